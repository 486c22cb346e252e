//! SBIL byte-stream decoder.
//!
//! Method bodies arrive as flat byte vectors. Opcodes are one byte wide
//! with a `0xfe` extension page; operand payloads are little-endian.
//! Metadata tokens carry a table tag in their top byte and resolve
//! against [`MetadataTables`] during decoding, so downstream passes
//! never see raw tokens.

use super::{
    BinaryOp, BranchCond, CompareOp, MetadataTables, MethodSig, SbilOp,
};
use crate::core::error::{CompileError, CompileResult};
use std::collections::HashSet;
use std::fmt;

/// Token table tags (top byte of a metadata token).
const TOKEN_STRING: u8 = 0x70;
const TOKEN_FIELD: u8 = 0x04;
const TOKEN_METHOD: u8 = 0x06;
const TOKEN_TYPE: u8 = 0x02;

/// One decoded instruction: its byte offset, encoded size and payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SbilInstruction {
    pub offset: u32,
    pub size: u32,
    pub op: SbilOp,
}

impl fmt::Display for SbilInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.op)
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn offset(&self) -> u32 {
        self.pos as u32
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, count: usize) -> CompileResult<&'a [u8]> {
        if self.pos + count > self.bytes.len() {
            return Err(CompileError::decoder(
                self.pos as u32,
                format!("truncated payload: wanted {count} more bytes"),
            ));
        }
        let slice = &self.bytes[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    fn read_u8(&mut self) -> CompileResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_i8(&mut self) -> CompileResult<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    fn read_u16(&mut self) -> CompileResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_i32(&mut self) -> CompileResult<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u32(&mut self) -> CompileResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_f32(&mut self) -> CompileResult<f32> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_f64(&mut self) -> CompileResult<f64> {
        let bytes = self.take(8)?;
        Ok(f64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }
}

fn resolve_string(meta: &MetadataTables, token: u32, at: u32) -> CompileResult<String> {
    let tag = (token >> 24) as u8;
    let index = (token & 0x00ff_ffff) as usize;
    if tag != TOKEN_STRING {
        return Err(CompileError::decoder(
            at,
            format!("expected a string token, found tag {tag:#04x}"),
        ));
    }
    meta.strings.get(index).cloned().ok_or_else(|| {
        CompileError::decoder(at, format!("string token {index} out of range"))
    })
}

fn resolve_field(meta: &MetadataTables, token: u32, at: u32) -> CompileResult<String> {
    let tag = (token >> 24) as u8;
    let index = (token & 0x00ff_ffff) as usize;
    if tag != TOKEN_FIELD {
        return Err(CompileError::decoder(
            at,
            format!("expected a field token, found tag {tag:#04x}"),
        ));
    }
    meta.fields.get(index).cloned().ok_or_else(|| {
        CompileError::decoder(at, format!("field token {index} out of range"))
    })
}

fn resolve_method(meta: &MetadataTables, token: u32, at: u32) -> CompileResult<MethodSig> {
    let tag = (token >> 24) as u8;
    let index = (token & 0x00ff_ffff) as usize;
    match tag {
        TOKEN_METHOD => meta.methods.get(index).cloned().ok_or_else(|| {
            CompileError::decoder(at, format!("method token {index} out of range"))
        }),
        TOKEN_TYPE => Err(CompileError::decoder(
            at,
            "type token where a method token was expected".to_string(),
        )),
        other => Err(CompileError::decoder(
            at,
            format!("expected a method token, found tag {other:#04x}"),
        )),
    }
}

fn branch_target(cursor: &Cursor<'_>, at: u32, relative: i64) -> CompileResult<u32> {
    let next = cursor.pos as i64;
    let target = next + relative;
    if target < 0 || target > cursor.bytes.len() as i64 {
        return Err(CompileError::decoder(
            at,
            format!("branch target {target} outside the method body"),
        ));
    }
    Ok(target as u32)
}

/// Decode a raw method body into a typed instruction stream.
///
/// Branch targets are normalised to absolute byte offsets and checked
/// to land on instruction boundaries.
pub fn read_method_body(
    body: &[u8],
    meta: &MetadataTables,
) -> CompileResult<Vec<SbilInstruction>> {
    let mut cursor = Cursor::new(body);
    let mut instructions = Vec::new();

    while !cursor.is_at_end() {
        let at = cursor.offset();
        let opcode = cursor.read_u8()?;
        let op = match opcode {
            0x00 => SbilOp::Nop,
            0x01 => SbilOp::Dup,
            0x02 => SbilOp::Pop,
            0x03 => SbilOp::Ldarg(cursor.read_u8()? as u16),
            0x04 => SbilOp::Ldloc(cursor.read_u8()? as u16),
            0x05 => SbilOp::Ldloca(cursor.read_u8()? as u16),
            0x06 => SbilOp::Stloc(cursor.read_u8()? as u16),
            0x08 => SbilOp::Ldc(cursor.read_i32()? as f64),
            0x09 => SbilOp::Ldc(cursor.read_f32()? as f64),
            0x0a => SbilOp::Ldc(cursor.read_f64()?),
            0x0b => SbilOp::Ldc(cursor.read_i8()? as f64),
            0x0c => SbilOp::Ldnull,
            0x0d => {
                let token = cursor.read_u32()?;
                SbilOp::Ldstr(resolve_string(meta, token, at)?)
            }
            0x10 => {
                let token = cursor.read_u32()?;
                SbilOp::Ldfld(resolve_field(meta, token, at)?)
            }
            0x11 => {
                let token = cursor.read_u32()?;
                SbilOp::Stfld(resolve_field(meta, token, at)?)
            }
            0x20 => SbilOp::Binary(BinaryOp::Add),
            0x21 => SbilOp::Binary(BinaryOp::Sub),
            0x22 => SbilOp::Binary(BinaryOp::Mul),
            0x23 => SbilOp::Binary(BinaryOp::Div),
            0x24 => SbilOp::Binary(BinaryOp::Rem),
            0x25 => SbilOp::Binary(BinaryOp::And),
            0x26 => SbilOp::Binary(BinaryOp::Or),
            0x27 => SbilOp::Binary(BinaryOp::Xor),
            0x28 => SbilOp::Binary(BinaryOp::Shl),
            0x29 => SbilOp::Binary(BinaryOp::Shr),
            0x2a => SbilOp::Binary(BinaryOp::ShrUn),
            0x2b => SbilOp::Not,
            0x2c => SbilOp::Neg,
            0x30 => SbilOp::Compare(CompareOp::Eq),
            0x31 => SbilOp::Compare(CompareOp::Gt),
            0x32 => SbilOp::Compare(CompareOp::GtUn),
            0x33 => SbilOp::Compare(CompareOp::Lt),
            0x34 => SbilOp::Compare(CompareOp::LtUn),
            0x38..=0x44 => {
                let (cond, unsigned) = long_branch(opcode);
                let relative = cursor.read_i32()? as i64;
                SbilOp::Branch {
                    cond,
                    unsigned,
                    target: branch_target(&cursor, at, relative)?,
                }
            }
            0x48..=0x54 => {
                let (cond, unsigned) = long_branch(opcode - 0x10);
                let relative = cursor.read_i8()? as i64;
                SbilOp::Branch {
                    cond,
                    unsigned,
                    target: branch_target(&cursor, at, relative)?,
                }
            }
            0x58 => {
                let count = cursor.read_u32()? as usize;
                let mut relatives = Vec::with_capacity(count);
                for _ in 0..count {
                    relatives.push(cursor.read_i32()? as i64);
                }
                let mut targets = Vec::with_capacity(count);
                for relative in relatives {
                    targets.push(branch_target(&cursor, at, relative)?);
                }
                SbilOp::Switch(targets)
            }
            0x60 | 0x61 => {
                let token = cursor.read_u32()?;
                SbilOp::Call(resolve_method(meta, token, at)?)
            }
            0x62 => SbilOp::Ret,
            0x68 | 0x69 => SbilOp::ConvTrunc,
            0x6a => SbilOp::ConvNop,
            0x70 => SbilOp::LdindRef,
            0xfe => {
                let extended = cursor.read_u8()?;
                match extended {
                    0x01 => SbilOp::Ldarg(cursor.read_u16()?),
                    0x02 => SbilOp::Ldloc(cursor.read_u16()?),
                    0x03 => SbilOp::Ldloca(cursor.read_u16()?),
                    0x04 => SbilOp::Stloc(cursor.read_u16()?),
                    other => {
                        return Err(CompileError::decoder(
                            at,
                            format!("unknown extended opcode 0xfe {other:#04x}"),
                        ))
                    }
                }
            }
            other => {
                return Err(CompileError::decoder(
                    at,
                    format!("unknown opcode {other:#04x}"),
                ))
            }
        };
        instructions.push(SbilInstruction {
            offset: at,
            size: cursor.offset() - at,
            op,
        });
    }

    check_branch_boundaries(&instructions, body.len() as u32)?;
    Ok(instructions)
}

fn long_branch(opcode: u8) -> (BranchCond, bool) {
    match opcode {
        0x38 => (BranchCond::Always, false),
        0x39 => (BranchCond::False, false),
        0x3a => (BranchCond::True, false),
        0x3b => (BranchCond::Eq, false),
        0x3c => (BranchCond::Ge, false),
        0x3d => (BranchCond::Gt, false),
        0x3e => (BranchCond::Le, false),
        0x3f => (BranchCond::Lt, false),
        0x40 => (BranchCond::Ne, true),
        0x41 => (BranchCond::Ge, true),
        0x42 => (BranchCond::Gt, true),
        0x43 => (BranchCond::Le, true),
        0x44 => (BranchCond::Lt, true),
        _ => unreachable!("branch opcode range"),
    }
}

fn check_branch_boundaries(
    instructions: &[SbilInstruction],
    body_len: u32,
) -> CompileResult<()> {
    let boundaries: HashSet<u32> = instructions.iter().map(|i| i.offset).collect();
    let check = |at: u32, target: u32| -> CompileResult<()> {
        if target != body_len && !boundaries.contains(&target) {
            return Err(CompileError::decoder(
                at,
                format!("branch lands inside an instruction (offset {target})"),
            ));
        }
        Ok(())
    };
    for instruction in instructions {
        match &instruction.op {
            SbilOp::Branch { target, .. } => check(instruction.offset, *target)?,
            SbilOp::Switch(targets) => {
                for target in targets {
                    check(instruction.offset, *target)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}
