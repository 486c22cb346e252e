//! Symbolic stack values.
//!
//! The evaluator never computes runtime values; it tracks where a value
//! lives (a register, a device pin, a compile-time constant) or how it
//! will be computed (a deferred expression awaiting a result register).
//! Variants that cannot appear as an IC10 operand report themselves as
//! not renderable and must be lowered before reaching an emitter.

use crate::isa::operand::format_number;

/// A deferred IC10 fragment awaiting a result-register binding.
///
/// `text` contains exactly one `$` placeholder marking where the result
/// goes. `free` lists temporary registers feeding the expression; they
/// are released when the expression is materialised or discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredExpr {
    pub text: String,
    pub free: Vec<u8>,
}

impl DeferredExpr {
    pub fn new(text: impl Into<String>, free: Vec<u8>) -> Self {
        DeferredExpr {
            text: text.into(),
            free,
        }
    }

    /// Substitute the `$` sink with a concrete operand rendering.
    pub fn bind(&self, sink: &str) -> String {
        self.text.replace('$', sink)
    }
}

/// Symbolic value on the virtual operand stack.
#[derive(Debug, Clone, PartialEq)]
pub enum StackValue {
    /// Compile-time numeric constant (kept in IC10's native f32 domain).
    Static(f64),
    /// The receiver of the program class.
    This,
    Null,
    /// A device pin bound field. `pin` is the alias or derived name the
    /// operand renders to; `type_name` feeds `HASH("...")` emission.
    Device {
        pin: String,
        type_name: String,
        slot_count: u32,
        multicast: bool,
    },
    /// The slot table of a device, before indexing.
    DeviceSlots {
        pin: String,
        type_name: String,
        slot_count: u32,
    },
    /// One indexed slot of a device.
    DeviceSlot {
        pin: String,
        type_name: String,
        index: Box<StackValue>,
    },
    /// A value held in a general-purpose register.
    Register(u8),
    /// A register-backed class field, addressed through its alias.
    Field { alias: String, field_index: usize },
    /// A string literal (renders as bare text, used for names).
    Str(String),
    /// A string routed through the runtime hash function.
    HashString(String),
    /// A pending expression fused into whichever sink consumes it.
    Deferred(DeferredExpr),
}

impl StackValue {
    /// Construct a constant, normalising through f32 like the target.
    pub fn number(v: f64) -> StackValue {
        StackValue::Static(v as f32 as f64)
    }

    /// Render as an IC10 operand, or `None` for variants that must be
    /// lowered first (`This`, `Null`, slot values, deferred expressions).
    pub fn render(&self) -> Option<String> {
        match self {
            StackValue::Static(v) => Some(format_number(*v)),
            StackValue::Register(index) => Some(format!("r{index}")),
            StackValue::Device { pin, .. } => Some(pin.clone()),
            StackValue::Field { alias, .. } => Some(alias.clone()),
            StackValue::Str(text) => Some(text.clone()),
            StackValue::HashString(text) => Some(format!("HASH(\"{text}\")")),
            StackValue::This
            | StackValue::Null
            | StackValue::DeviceSlots { .. }
            | StackValue::DeviceSlot { .. }
            | StackValue::Deferred(_) => None,
        }
    }

    pub fn is_renderable(&self) -> bool {
        self.render().is_some()
    }

    /// Short tag for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            StackValue::Static(_) => "static",
            StackValue::This => "this",
            StackValue::Null => "null",
            StackValue::Device { .. } => "device",
            StackValue::DeviceSlots { .. } => "device slots",
            StackValue::DeviceSlot { .. } => "device slot",
            StackValue::Register(_) => "register",
            StackValue::Field { .. } => "field",
            StackValue::Str(_) => "string",
            StackValue::HashString(_) => "hash string",
            StackValue::Deferred(_) => "deferred expression",
        }
    }
}
