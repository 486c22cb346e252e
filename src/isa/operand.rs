//! IC10 operand model and parser.
//!
//! Operand text is canonical: everything the emitter produces must
//! round-trip through [`parse_operand`]. The parser is total - any text
//! that is not a register, device pin or number is a name.

use std::fmt;

/// Canonical rendering for numbers in the f32 domain of the target.
///
/// Values are formatted through f32 so `180` stays `180` and `29.45`
/// stays `29.45` rather than picking up f64 noise.
pub fn format_number(v: f64) -> String {
    format!("{}", v as f32)
}

/// A value register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// r0..r15
    General(u8),
    /// Stack pointer.
    Sp,
    /// Return address.
    Ra,
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::General(index) => write!(f, "r{index}"),
            Register::Sp => write!(f, "sp"),
            Register::Ra => write!(f, "ra"),
        }
    }
}

/// A device pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DevicePin {
    /// d0..d5
    Numbered(u8),
    /// The housing itself (db).
    Base,
}

impl fmt::Display for DevicePin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePin::Numbered(index) => write!(f, "d{index}"),
            DevicePin::Base => write!(f, "db"),
        }
    }
}

/// A parsed IC10 operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Register(Register),
    /// rrN - the register named by the value of rN.
    RegisterIndirect(u8),
    Device(DevicePin),
    /// drN - the device pin named by the value of rN.
    DeviceIndirect(u8),
    Number(f64),
    Name(String),
}

impl Operand {
    /// Construct a numeric operand, normalising through f32.
    pub fn number(v: f64) -> Operand {
        Operand::Number(v as f32 as f64)
    }

    pub fn name(text: impl Into<String>) -> Operand {
        Operand::Name(text.into())
    }

    /// The register index if this operand is a general register.
    pub fn general_register(&self) -> Option<u8> {
        match self {
            Operand::Register(Register::General(index)) => Some(*index),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Operand::Name(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(register) => write!(f, "{register}"),
            Operand::RegisterIndirect(index) => write!(f, "rr{index}"),
            Operand::Device(pin) => write!(f, "{pin}"),
            Operand::DeviceIndirect(index) => write!(f, "dr{index}"),
            Operand::Number(v) => write!(f, "{}", format_number(*v)),
            Operand::Name(name) => write!(f, "{name}"),
        }
    }
}

fn parse_register_index(digits: &str, limit: u8) -> Option<u8> {
    if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // reject non-canonical leading zeroes ("r01")
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    let index: u8 = digits.parse().ok()?;
    (index < limit).then_some(index)
}

/// Parse one operand. Total: unrecognised text becomes a [`Operand::Name`].
pub fn parse_operand(text: &str) -> Operand {
    match text {
        "sp" => return Operand::Register(Register::Sp),
        "ra" => return Operand::Register(Register::Ra),
        "db" => return Operand::Device(DevicePin::Base),
        _ => {}
    }
    if let Some(rest) = text.strip_prefix("rr") {
        if let Some(index) = parse_register_index(rest, 16) {
            return Operand::RegisterIndirect(index);
        }
    } else if let Some(rest) = text.strip_prefix("dr") {
        if let Some(index) = parse_register_index(rest, 16) {
            return Operand::DeviceIndirect(index);
        }
    }
    if let Some(rest) = text.strip_prefix('r') {
        if let Some(index) = parse_register_index(rest, 16) {
            return Operand::Register(Register::General(index));
        }
    }
    if let Some(rest) = text.strip_prefix('d') {
        if let Some(index) = parse_register_index(rest, 6) {
            return Operand::Device(DevicePin::Numbered(index));
        }
    }
    if let Ok(v) = text.parse::<f64>() {
        // keep canonical-looking numerics only; "nan"-style names stay names
        if text
            .bytes()
            .all(|b| b.is_ascii_digit() || b == b'.' || b == b'-' || b == b'+' || b == b'e' || b == b'E')
        {
            return Operand::number(v);
        }
    }
    Operand::Name(text.to_string())
}
