// This module orchestrates one class compile. It reserves registers and
// emits aliases for the class fields, compiles the optional constructor in
// inline mode under the `ctor` label, compiles the `Run` entry method as
// `main`, drains the transitive method dependencies discovered at call
// sites, lays out the final program text and hands it to the optimiser.

//! Compiler driver: from a program class to final IC10 text.

use log::debug;

use super::context::{ensure_method_compiled, CompileMode, ExecutionContext};
use super::output::OutputWriter;
use super::{CompileEnv, CompileOptions, FieldBinding, FieldLayout, MethodRegistry};
use crate::core::error::{CompileError, CompileResult};
use crate::core::session::CompilationSession;
use crate::core::stack::VirtualStack;
use crate::opt;
use crate::sbil::{ClassDef, MetadataTables, ProgramBundle, ENTRY_METHOD};

/// Label names the driver owns; methods must not shadow them.
const RESERVED_LABELS: &[&str] = &["main", "ctor", "end"];

/// Compile one program class to IC10 text.
pub fn compile_class<'arena>(
    session: &CompilationSession<'arena>,
    class: &ClassDef,
    meta: &MetadataTables,
    options: &CompileOptions,
) -> CompileResult<String> {
    let entry_index = class.entry_method().ok_or_else(|| {
        CompileError::unsupported(&class.name, format!("no public `{ENTRY_METHOD}` method"))
    })?;
    for method in &class.methods {
        if RESERVED_LABELS.contains(&method.name.as_str()) {
            return Err(CompileError::unsupported(
                &class.name,
                format!("method name `{}` collides with a driver label", method.name),
            ));
        }
    }

    let layout = FieldLayout::build(class)?;
    let registry = MethodRegistry::new();
    let env = CompileEnv {
        class,
        meta,
        layout: &layout,
        registry: &registry,
        session,
        options,
    };

    let mut parts: Vec<String> = Vec::new();
    for (_, binding) in layout.bindings() {
        match binding {
            FieldBinding::Device { pin, index, .. } => {
                parts.push(format!("alias {pin} d{index}"));
            }
            FieldBinding::Register { alias, register } => {
                parts.push(format!("alias {alias} r{register}"));
            }
            FieldBinding::Multicast { .. } => {}
        }
    }

    let mut dependencies = Vec::new();

    if let Some(ctor_index) = class.ctor_method() {
        let ctor = &class.methods[ctor_index];
        let mut ctx = ExecutionContext::new(
            env,
            ctor,
            "ctor",
            layout.reserved,
            CompileMode::Inline {
                initial_stack: VirtualStack::new(),
                return_sink: None,
            },
        )?;
        let mut writer = OutputWriter::new("ctor", ctx.instruction_count());
        ctx.compile(&mut writer)?;
        session.record_method();
        dependencies.extend(ctx.method_dependencies().iter().cloned());
        parts.push("ctor:".to_string());
        parts.push(writer.assemble());
    }

    let entry = &class.methods[entry_index];
    let mut ctx = ExecutionContext::new(env, entry, "main", layout.reserved, CompileMode::Function)?;
    let mut writer = OutputWriter::new("main", ctx.instruction_count());
    ctx.compile(&mut writer)?;
    session.record_method();
    dependencies.extend(ctx.method_dependencies().iter().cloned());

    parts.push("jal main".to_string());
    parts.push("j end".to_string());
    parts.push("main:".to_string());
    parts.push(writer.assemble());

    // call sites compile their callees eagerly; this pass only catches
    // dependencies surfaced through inline expansion
    for name in dependencies {
        ensure_method_compiled(env, &name)?;
    }
    for name in registry.order() {
        parts.push(format!("{name}:"));
        parts.push(registry.body_text(&name).expect("registered body"));
    }
    parts.push("end:".to_string());

    let mut text: String = parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    text.push('\n');

    if options.optimise {
        text = opt::optimise_text(&text, Some(session))?;
    }
    debug!("`{}` compiled: {}", class.name, session.stats());
    Ok(text)
}

/// Compile every program class in a bundle. Failures are per class;
/// the rest still compile.
pub fn compile_bundle<'arena>(
    session: &CompilationSession<'arena>,
    bundle: &ProgramBundle,
    options: &CompileOptions,
) -> Vec<(String, CompileResult<String>)> {
    bundle
        .classes
        .iter()
        .filter(|class| class.is_program)
        .map(|class| {
            (
                class.name.clone(),
                compile_class(session, class, &bundle.metadata, options),
            )
        })
        .collect()
}
