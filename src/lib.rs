//! ic10c - compiles stack-based intermediate bytecode to IC10 assembly.
//!
//! The input is a resolved program bundle from an external front-end:
//! classes with annotated fields and methods whose bodies are SBIL, a
//! CIL-shaped stack bytecode. The output is IC10, a MIPS-like assembly
//! dialect with sixteen general-purpose f32 registers, six device pins
//! plus a housing, a call stack, and batched device I/O by type hash.
//!
//! # Pipeline
//!
//! ```ignore
//! use bumpalo::Bump;
//! use ic10c::codegen::{compile_class, CompileOptions};
//! use ic10c::core::CompilationSession;
//!
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let text = compile_class(&session, &class, &bundle.metadata, &CompileOptions::default())?;
//! ```
//!
//! # Architecture
//!
//! - [`isa`] - the IC10 opcode table, operand parser, program containers
//! - [`core`] - register bitset, symbolic values, virtual stack, session
//! - [`sbil`] - the resolved input model and bytecode reader
//! - [`codegen`] - symbolic evaluator, call-site engine, driver
//! - [`flow`] - basic-block analysis over emitted IC10
//! - [`opt`] - jump normalisation, block layout, peephole passes
//! - [`catalogue`] - offline device-interface generation

pub mod catalogue;
pub mod codegen;
pub mod core;
pub mod flow;
pub mod isa;
pub mod opt;
pub mod sbil;

pub use codegen::{compile_bundle, compile_class, CompileOptions};
pub use core::{CompilationSession, CompileError, CompileResult};
