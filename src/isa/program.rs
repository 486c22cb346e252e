//! IC10 instruction and program containers.
//!
//! A [`Program`] is a value-like snapshot: the optimiser passes consume
//! one and produce a new one. [`Program::blank`] is the identity for
//! [`Program::append`], and slices rebase label indices so block-level
//! splicing stays cheap.

use std::fmt;

use super::opcode::{Behaviour, Opcode, OperandKind};
use super::operand::{parse_operand, Operand};
use crate::core::error::{CompileError, CompileResult};

/// One IC10 instruction.
///
/// `source_line` is the line index of the instruction in the text it
/// was parsed from; relative jumps are resolved against it when the
/// optimiser normalises them to labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub source_line: usize,
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(source_line: usize, opcode: Opcode, operands: Vec<Operand>) -> Self {
        Instruction {
            source_line,
            opcode,
            operands,
        }
    }

    /// The jump-target operand (always last) for jump-like opcodes.
    pub fn branch_target(&self) -> Option<&Operand> {
        if self.opcode.is_jump() {
            self.operands.last()
        } else {
            None
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode.mnemonic())?;
        for operand in &self.operands {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

/// A named position in a program. `index` may equal the instruction
/// count, marking the end of the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub index: usize,
}

/// A sequence of instructions plus its labels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub labels: Vec<Label>,
}

fn operand_matches(kind: OperandKind, operand: &Operand) -> bool {
    match kind {
        OperandKind::Register => !matches!(
            operand,
            Operand::Number(_) | Operand::Device(_) | Operand::DeviceIndirect(_)
        ),
        OperandKind::Device => !matches!(
            operand,
            Operand::Number(_) | Operand::Register(_) | Operand::RegisterIndirect(_)
        ),
        OperandKind::Value => true,
        OperandKind::Name => matches!(operand, Operand::Name(_)),
    }
}

impl Program {
    /// The empty program, identity for [`Program::append`].
    pub fn blank() -> Program {
        Program::default()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Parse assembled IC10 text. Blank lines and `#` comments are
    /// dropped; labels attach to the next instruction.
    pub fn parse(text: &str) -> CompileResult<Program> {
        let mut program = Program::blank();
        for (line_index, raw_line) in text.lines().enumerate() {
            let line = match raw_line.find('#') {
                Some(at) => &raw_line[..at],
                None => raw_line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_suffix(':') {
                if name.is_empty() || name.contains(char::is_whitespace) {
                    return Err(CompileError::InternalInvariant(format!(
                        "bad label declaration `{raw_line}`"
                    )));
                }
                if program.find_label(name).is_some() {
                    return Err(CompileError::InternalInvariant(format!(
                        "duplicate label `{name}`"
                    )));
                }
                program.labels.push(Label {
                    name: name.to_string(),
                    index: program.instructions.len(),
                });
                continue;
            }
            let mut tokens = line.split_whitespace();
            let mnemonic = tokens.next().expect("non-empty line");
            let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(|| {
                CompileError::InternalInvariant(format!("unknown mnemonic `{mnemonic}`"))
            })?;
            let operands: Vec<Operand> = tokens.map(parse_operand).collect();
            let kinds = opcode.operand_kinds();
            if operands.len() != kinds.len() {
                return Err(CompileError::InternalInvariant(format!(
                    "`{mnemonic}` expects {} operands, found {} in `{line}`",
                    kinds.len(),
                    operands.len()
                )));
            }
            for (kind, operand) in kinds.iter().zip(&operands) {
                if !operand_matches(*kind, operand) {
                    return Err(CompileError::InternalInvariant(format!(
                        "operand `{operand}` does not fit {kind:?} in `{line}`"
                    )));
                }
            }
            program
                .instructions
                .push(Instruction::new(line_index, opcode, operands));
        }
        Ok(program)
    }

    /// Render back to text. Labels print on their own lines before the
    /// instruction they attach to.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for index in 0..=self.instructions.len() {
            for label in self.labels.iter().filter(|l| l.index == index) {
                out.push_str(&label.name);
                out.push_str(":\n");
            }
            if let Some(instruction) = self.instructions.get(index) {
                out.push_str(&instruction.to_string());
                out.push('\n');
            }
        }
        out
    }

    pub fn find_label(&self, name: &str) -> Option<usize> {
        self.labels
            .iter()
            .find(|label| label.name == name)
            .map(|label| label.index)
    }

    pub fn labels_at(&self, index: usize) -> impl Iterator<Item = &Label> {
        self.labels.iter().filter(move |label| label.index == index)
    }

    /// Append another program, rebasing its labels past this one.
    pub fn append(mut self, other: Program) -> Program {
        let base = self.instructions.len();
        self.instructions.extend(other.instructions);
        self.labels.extend(other.labels.into_iter().map(|label| Label {
            name: label.name,
            index: label.index + base,
        }));
        self
    }

    /// Copy of the instruction range, labels rebased to the slice.
    /// End-of-program labels are not carried.
    pub fn slice(&self, start: usize, end: usize) -> Program {
        Program {
            instructions: self.instructions[start..end].to_vec(),
            labels: self
                .labels
                .iter()
                .filter(|label| label.index >= start && label.index < end)
                .map(|label| Label {
                    name: label.name.clone(),
                    index: label.index - start,
                })
                .collect(),
        }
    }

    /// Remove one instruction; labels at it slide to its successor.
    pub fn remove_instruction(&mut self, index: usize) {
        self.instructions.remove(index);
        for label in &mut self.labels {
            if label.index > index {
                label.index -= 1;
            }
        }
    }

    pub fn insert_label(&mut self, name: impl Into<String>, index: usize) {
        self.labels.push(Label {
            name: name.into(),
            index,
        });
    }

    pub fn remove_label(&mut self, name: &str) {
        self.labels.retain(|label| label.name != name);
    }

    /// Whether any instruction operand names this label.
    pub fn label_is_referenced(&self, name: &str) -> bool {
        self.instructions.iter().any(|instruction| {
            instruction
                .operands
                .iter()
                .any(|operand| operand.as_name() == Some(name))
        })
    }

    /// Rename every operand reference of `from` to `to`.
    pub fn rename_label_references(&mut self, from: &str, to: &str) {
        for instruction in &mut self.instructions {
            for operand in &mut instruction.operands {
                if operand.as_name() == Some(from) {
                    *operand = Operand::Name(to.to_string());
                }
            }
        }
    }

    /// Resolve the static target of an absolute jump instruction.
    pub fn absolute_target(&self, instruction: &Instruction) -> Option<usize> {
        match instruction.opcode.behaviour() {
            Behaviour::Jump | Behaviour::JumpAndLink => instruction
                .branch_target()
                .and_then(Operand::as_name)
                .and_then(|name| self.find_label(name)),
            _ => None,
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
