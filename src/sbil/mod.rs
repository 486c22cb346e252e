// This module defines the resolved input IR handed over by the front-end.
// The source object model is consumed with all reflection already done:
// classes carry their fields with annotation tags attached, methods carry
// parameter/local/body triples, and metadata tokens in the raw bytecode
// resolve against explicit tables instead of a runtime type system. The
// reader submodule decodes method bodies into a typed instruction stream;
// the asm submodule is the small assembler used to author bodies in tests.

//! SBIL input model: classes, fields, methods and metadata tables.

pub mod asm;
pub mod reader;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use reader::{read_method_body, SbilInstruction};

/// A resolved source-level type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeRef {
    Void,
    Number,
    Bool,
    Enum { name: String },
    Text,
    Class { name: String },
    DeviceInterface { type_name: String, slot_count: u32 },
}

impl TypeRef {
    /// Register width of a value of this type. Primitives and enums fit
    /// one register; reference-like values are tracked symbolically and
    /// occupy none.
    pub fn width(&self) -> u8 {
        match self {
            TypeRef::Number | TypeRef::Bool | TypeRef::Enum { .. } => 1,
            TypeRef::Void
            | TypeRef::Text
            | TypeRef::Class { .. }
            | TypeRef::DeviceInterface { .. } => 0,
        }
    }

    pub fn returns_value(&self) -> bool {
        !matches!(self, TypeRef::Void)
    }
}

/// Annotation attached to a program-class field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldTag {
    /// Bound to a specific device pin; the driver emits
    /// `alias {pin} d{index}`.
    Device { pin: String, index: u8 },
    /// Addressed over the multicast bus by type hash; no alias.
    Multicast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeRef,
    pub tag: Option<FieldTag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompileHintKind {
    Inline,
    CallStack,
}

/// User-supplied lowering pattern for a method, in the `#N`/`$`/`%N`
/// pattern language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileHint {
    pub pattern: String,
    pub kind: CompileHintKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub is_public: bool,
    pub params: Vec<TypeRef>,
    pub locals: Vec<TypeRef>,
    pub returns: TypeRef,
    pub body: Vec<u8>,
    pub hint: Option<CompileHint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub is_program: bool,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}

/// Name of the required entry method on a program class.
pub const ENTRY_METHOD: &str = "Run";

/// Name the front-end gives the optional constructor body.
pub const CTOR_METHOD: &str = ".ctor";

impl ClassDef {
    pub fn find_method(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|method| method.name == name)
    }

    pub fn entry_method(&self) -> Option<usize> {
        self.methods
            .iter()
            .position(|method| method.name == ENTRY_METHOD && method.is_public)
    }

    pub fn ctor_method(&self) -> Option<usize> {
        self.find_method(CTOR_METHOD)
    }
}

/// What a call token ultimately names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MethodTarget {
    /// A user method on the program class, called on `this`.
    Program { method: String },
    /// A well-known math intrinsic (`Abs`, `Max`, `Clamp`, ...).
    Math { name: String },
    /// A runtime intrinsic: `Hash`, `GetTypeHash` (with its generic
    /// argument already instantiated), `Yield`, `Sleep`, `Hcf`.
    Runtime {
        name: String,
        type_arg: Option<String>,
    },
    /// A member of a device interface (`get_*`, `set_*`, aggregation
    /// reads like `GetCharge`).
    Device { type_name: String, method: String },
}

/// Call-site signature stored in the method metadata table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSig {
    pub target: MethodTarget,
    pub param_count: usize,
    pub returns_value: bool,
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            MethodTarget::Program { method } => write!(f, "this::{method}"),
            MethodTarget::Math { name } => write!(f, "Math::{name}"),
            MethodTarget::Runtime { name, type_arg } => match type_arg {
                Some(arg) => write!(f, "{name}<{arg}>"),
                None => write!(f, "{name}"),
            },
            MethodTarget::Device { type_name, method } => write!(f, "{type_name}::{method}"),
        }
    }
}

/// Token tables the SBIL reader resolves against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataTables {
    pub strings: Vec<String>,
    pub fields: Vec<String>,
    pub methods: Vec<MethodSig>,
    pub types: Vec<String>,
}

/// The whole front-end hand-off: every class plus the shared tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramBundle {
    pub classes: Vec<ClassDef>,
    pub metadata: MetadataTables,
}

/// SBIL binary arithmetic/bitwise operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,
}

impl BinaryOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
            BinaryOp::ShrUn => "shr.un",
        }
    }
}

/// SBIL comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    GtUn,
    Lt,
    LtUn,
}

/// SBIL branch condition. `unsigned` variants collapse onto the signed
/// ones during lowering since IC10 only has one numeric domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCond {
    Always,
    False,
    True,
    Eq,
    Ge,
    Gt,
    Le,
    Lt,
    Ne,
}

impl BranchCond {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BranchCond::Always => "br",
            BranchCond::False => "brfalse",
            BranchCond::True => "brtrue",
            BranchCond::Eq => "beq",
            BranchCond::Ge => "bge",
            BranchCond::Gt => "bgt",
            BranchCond::Le => "ble",
            BranchCond::Lt => "blt",
            BranchCond::Ne => "bne",
        }
    }

    /// Number of operands the branch pops.
    pub fn operand_count(self) -> usize {
        match self {
            BranchCond::Always => 0,
            BranchCond::False | BranchCond::True => 1,
            _ => 2,
        }
    }
}

/// One decoded SBIL instruction with its payload resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum SbilOp {
    Nop,
    Dup,
    Pop,
    Ldarg(u16),
    Ldloc(u16),
    Ldloca(u16),
    Stloc(u16),
    Ldc(f64),
    Ldnull,
    Ldstr(String),
    Ldfld(String),
    Stfld(String),
    Binary(BinaryOp),
    Not,
    Neg,
    Compare(CompareOp),
    Branch {
        cond: BranchCond,
        unsigned: bool,
        target: u32,
    },
    Switch(Vec<u32>),
    Call(MethodSig),
    Ret,
    /// conv.i / conv.u - truncate toward zero.
    ConvTrunc,
    /// conv.r4 / conv.r8 - identity, everything is already f32.
    ConvNop,
    LdindRef,
}

impl fmt::Display for SbilOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SbilOp::Nop => write!(f, "nop"),
            SbilOp::Dup => write!(f, "dup"),
            SbilOp::Pop => write!(f, "pop"),
            SbilOp::Ldarg(index) => write!(f, "ldarg {index}"),
            SbilOp::Ldloc(index) => write!(f, "ldloc {index}"),
            SbilOp::Ldloca(index) => write!(f, "ldloca {index}"),
            SbilOp::Stloc(index) => write!(f, "stloc {index}"),
            SbilOp::Ldc(v) => write!(f, "ldc {v}"),
            SbilOp::Ldnull => write!(f, "ldnull"),
            SbilOp::Ldstr(text) => write!(f, "ldstr \"{text}\""),
            SbilOp::Ldfld(name) => write!(f, "ldfld {name}"),
            SbilOp::Stfld(name) => write!(f, "stfld {name}"),
            SbilOp::Binary(op) => write!(f, "{}", op.mnemonic()),
            SbilOp::Not => write!(f, "not"),
            SbilOp::Neg => write!(f, "neg"),
            SbilOp::Compare(op) => match op {
                CompareOp::Eq => write!(f, "ceq"),
                CompareOp::Gt => write!(f, "cgt"),
                CompareOp::GtUn => write!(f, "cgt.un"),
                CompareOp::Lt => write!(f, "clt"),
                CompareOp::LtUn => write!(f, "clt.un"),
            },
            SbilOp::Branch {
                cond,
                unsigned,
                target,
            } => {
                write!(f, "{}", cond.mnemonic())?;
                if *unsigned {
                    write!(f, ".un")?;
                }
                write!(f, " -> {target}")
            }
            SbilOp::Switch(targets) => {
                write!(f, "switch")?;
                for target in targets {
                    write!(f, " {target}")?;
                }
                Ok(())
            }
            SbilOp::Call(sig) => write!(f, "call {sig}"),
            SbilOp::Ret => write!(f, "ret"),
            SbilOp::ConvTrunc => write!(f, "conv.i"),
            SbilOp::ConvNop => write!(f, "conv.r"),
            SbilOp::LdindRef => write!(f, "ldind.ref"),
        }
    }
}
