//! Code generation: symbolic SBIL evaluation down to IC10 text.
//!
//! [`context`] holds the per-method symbolic interpreter, [`calls`] the
//! call lowering ladder and call-site engine, [`driver`] the per-class
//! orchestration, [`output`] the per-method emission buffer.

pub mod calls;
pub mod context;
pub mod driver;
pub mod output;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::core::error::{CompileError, CompileResult};
use crate::core::register_set::RegisterSet;
use crate::core::session::CompilationSession;
use crate::sbil::{ClassDef, FieldTag, MetadataTables, TypeRef};

pub use context::{CompileMode, ExecutionContext, ExecutionState};
pub use driver::{compile_bundle, compile_class};
pub use output::OutputWriter;

/// Knobs for one compile run.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Run the IC10 optimiser over the assembled program.
    pub optimise: bool,
    /// Emit the SBIL instruction as a `#` comment above each fragment.
    pub comments: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            optimise: true,
            comments: false,
        }
    }
}

/// How one program-class field is addressed from emitted code.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldBinding {
    /// Pin-bound device; the driver emits `alias {pin} d{index}`.
    Device {
        pin: String,
        index: u8,
        type_name: String,
        slot_count: u32,
    },
    /// Multicast device, addressed by type hash. `pin` is the derived
    /// display name used in batch reads.
    Multicast {
        pin: String,
        type_name: String,
        slot_count: u32,
    },
    /// Ordinary field backed by a persistent register alias.
    Register { alias: String, register: u8 },
}

/// Field bindings plus the register set reserved for field aliases.
#[derive(Debug, Clone, Default)]
pub struct FieldLayout {
    bindings: Vec<(String, FieldBinding)>,
    pub reserved: RegisterSet,
}

fn multicast_display_name(field_name: &str) -> String {
    let mut chars = field_name.chars();
    match chars.next() {
        Some(first) => format!("d{}{}", first.to_ascii_uppercase(), chars.as_str()),
        None => "d".to_string(),
    }
}

impl FieldLayout {
    /// Scan a class's fields: device tags bind pins, multicast tags bind
    /// the bus, everything else gets a persistent register.
    pub fn build(class: &ClassDef) -> CompileResult<FieldLayout> {
        let mut layout = FieldLayout::default();
        for field in &class.fields {
            let binding = match &field.tag {
                Some(FieldTag::Device { pin, index }) => {
                    if *index > 5 {
                        return Err(CompileError::unsupported(
                            &class.name,
                            format!("device pin index {index} out of range for field `{}`", field.name),
                        ));
                    }
                    let (type_name, slot_count) = device_type_of(class, field)?;
                    FieldBinding::Device {
                        pin: pin.clone(),
                        index: *index,
                        type_name,
                        slot_count,
                    }
                }
                Some(FieldTag::Multicast) => {
                    let (type_name, slot_count) = device_type_of(class, field)?;
                    FieldBinding::Multicast {
                        pin: multicast_display_name(&field.name),
                        type_name,
                        slot_count,
                    }
                }
                None => {
                    let (register, reserved) =
                        layout.reserved.allocate().ok_or(CompileError::RegisterExhausted {
                            method: class.name.clone(),
                        })?;
                    layout.reserved = reserved;
                    FieldBinding::Register {
                        alias: field.name.clone(),
                        register,
                    }
                }
            };
            layout.bindings.push((field.name.clone(), binding));
        }
        Ok(layout)
    }

    pub fn binding_for(&self, field_name: &str) -> Option<&FieldBinding> {
        self.bindings
            .iter()
            .find(|(name, _)| name == field_name)
            .map(|(_, binding)| binding)
    }

    pub fn field_index(&self, field_name: &str) -> Option<usize> {
        self.bindings.iter().position(|(name, _)| name == field_name)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &(String, FieldBinding)> {
        self.bindings.iter()
    }
}

fn device_type_of(class: &ClassDef, field: &crate::sbil::FieldDef) -> CompileResult<(String, u32)> {
    match &field.ty {
        TypeRef::DeviceInterface {
            type_name,
            slot_count,
        } => Ok((type_name.clone(), *slot_count)),
        other => Err(CompileError::unsupported(
            &class.name,
            format!(
                "field `{}` is device-tagged but typed {other:?}",
                field.name
            ),
        )),
    }
}

/// One standalone-compiled method body.
#[derive(Debug, Clone)]
pub struct CompiledMethod {
    pub text: String,
    pub all_used: RegisterSet,
}

/// Memoised method-to-body map shared across one class compile.
///
/// Call sites consult it for callee-saved sets; the driver drains it in
/// discovery order when assembling the final program. `in_progress`
/// stops recursion on cyclic method dependencies.
#[derive(Default)]
pub struct MethodRegistry {
    compiled: RefCell<HashMap<String, CompiledMethod>>,
    in_progress: RefCell<HashSet<String>>,
    order: RefCell<Vec<String>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        MethodRegistry::default()
    }

    pub fn all_used(&self, name: &str) -> Option<RegisterSet> {
        self.compiled.borrow().get(name).map(|m| m.all_used)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.compiled.borrow().contains_key(name)
    }

    pub fn is_in_progress(&self, name: &str) -> bool {
        self.in_progress.borrow().contains(name)
    }

    pub fn mark_in_progress(&self, name: &str) {
        self.in_progress.borrow_mut().insert(name.to_string());
    }

    pub fn clear_in_progress(&self, name: &str) {
        self.in_progress.borrow_mut().remove(name);
    }

    pub fn insert(&self, name: &str, method: CompiledMethod) {
        self.order.borrow_mut().push(name.to_string());
        self.compiled.borrow_mut().insert(name.to_string(), method);
    }

    pub fn body_text(&self, name: &str) -> Option<String> {
        self.compiled.borrow().get(name).map(|m| m.text.clone())
    }

    /// Method names in discovery order.
    pub fn order(&self) -> Vec<String> {
        self.order.borrow().clone()
    }
}

/// Borrowed references every context needs, cheap to copy around.
/// `'arena` is the session's arena lifetime, `'a` the compile scope.
#[derive(Clone, Copy)]
pub struct CompileEnv<'a, 'arena> {
    pub class: &'a ClassDef,
    pub meta: &'a MetadataTables,
    pub layout: &'a FieldLayout,
    pub registry: &'a MethodRegistry,
    pub session: &'a CompilationSession<'arena>,
    pub options: &'a CompileOptions,
}
