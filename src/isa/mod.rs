//! Target ISA model.
//!
//! The IC10 machine: a fixed mnemonic table with structural metadata,
//! a total operand parser, and instruction/program containers shared by
//! the emitter, the flow analyser and the optimiser.

pub mod opcode;
pub mod operand;
pub mod program;

pub use opcode::{Behaviour, Condition, Opcode, OperandKind, ALL_OPCODES};
pub use operand::{format_number, parse_operand, DevicePin, Operand, Register};
pub use program::{Instruction, Label, Program};
