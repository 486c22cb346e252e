// This module lowers SBIL call sites. A call is matched against a ladder of
// shapes in order: well-known math intrinsics, user compile hints, device
// property setters and getters, hash and timing intrinsics, multicast
// aggregation reads, and finally real user methods. User methods go through
// the call-site engine, which first attempts inline expansion by re-entrant
// compilation with the caller's live register set reserved; if the callee's
// register demand cannot fit, the partial body is discarded and the call is
// lowered through the runtime stack with callee-saved push/pop around jal.

//! Call lowering and the call-site engine.

use log::{debug, trace};

use super::context::{ensure_method_compiled, CompileMode, ExecutionContext};
use super::output::OutputWriter;
use crate::core::error::{CompileError, CompileResult};
use crate::core::stack::VirtualStack;
use crate::core::value::{DeferredExpr, StackValue};
use crate::sbil::{CompileHintKind, MethodDef, MethodSig, MethodTarget};

/// Substitution patterns for the well-known math intrinsics, in the
/// `#N`/`$`/`%N` pattern language.
fn math_pattern(name: &str) -> Option<&'static str> {
    Some(match name {
        "Abs" => "abs $ #0",
        "Sqrt" => "sqrt $ #0",
        "Round" => "round $ #0",
        "Truncate" => "trunc $ #0",
        "Ceiling" => "ceil $ #0",
        "Floor" => "floor $ #0",
        "Exp" => "exp $ #0",
        "Log" => "log $ #0",
        "Sin" => "sin $ #0",
        "Cos" => "cos $ #0",
        "Tan" => "tan $ #0",
        "Asin" => "asin $ #0",
        "Acos" => "acos $ #0",
        "Atan" => "atan $ #0",
        "Atan2" => "atan2 $ #0 #1",
        "Max" => "max $ #1 #0",
        "Min" => "min $ #1 #0",
        "Clamp" => "max %1 #1 #0\nmin $ #2 %1",
        _ => return None,
    })
}

/// Distinct `%N` temp slots named by a pattern. Patterns can come from
/// user compile hints, so an oversized slot number is a compile error,
/// not a crash.
fn pattern_temp_slots(pattern: &str) -> CompileResult<Vec<u32>> {
    let bytes = pattern.as_bytes();
    let mut slots = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > start {
                let slot: u32 = pattern[start..end].parse().map_err(|_| {
                    CompileError::InternalInvariant(format!(
                        "pattern `{pattern}` names an unusable temp slot `%{}`",
                        &pattern[start..end]
                    ))
                })?;
                if !slots.contains(&slot) {
                    slots.push(slot);
                }
                i = end;
                continue;
            }
        }
        i += 1;
    }
    slots.sort_unstable_by(|a, b| b.cmp(a));
    Ok(slots)
}

impl<'a, 'arena> ExecutionContext<'a, 'arena> {
    /// Lower one `call`/`callvirt` instruction.
    pub(crate) fn lower_call(
        &mut self,
        sig: &MethodSig,
        slot: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        trace!("call {sig}");
        match &sig.target {
            MethodTarget::Math { name } => {
                let pattern = math_pattern(name).ok_or_else(|| {
                    CompileError::unsupported(
                        &self.method.name,
                        format!("unknown math intrinsic `{name}`"),
                    )
                })?;
                let args = self.pop_args(sig.param_count)?;
                self.expand_pattern(pattern, &args, sig.returns_value, slot, writer)
            }
            MethodTarget::Runtime { name, type_arg } => {
                self.lower_runtime_call(name, type_arg.as_deref(), sig, slot, writer)
            }
            MethodTarget::Device { type_name, method } => {
                self.lower_device_call(type_name, method, sig, slot, writer)
            }
            MethodTarget::Program { method } => self.lower_program_call(method, sig, slot, writer),
        }
    }

    fn pop_args(&mut self, count: usize) -> CompileResult<Vec<StackValue>> {
        let (mut args, rest) = self.stack.pop_n(count)?;
        self.stack = rest;
        args.reverse();
        Ok(args)
    }

    /// Expand a `#N`/`$`/`%N` pattern over the actual parameters.
    fn expand_pattern(
        &mut self,
        pattern: &str,
        args: &[StackValue],
        returns_value: bool,
        slot: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        let mut temps = Vec::new();
        let mut text = pattern.to_string();
        for temp_slot in pattern_temp_slots(pattern)? {
            let register = self.allocate_temp()?;
            text = text.replace(&format!("%{temp_slot}"), &format!("r{register}"));
            temps.push(register);
        }
        for index in (0..args.len()).rev() {
            let (operand, arg_temps) = self.operand_text(&args[index], writer, slot)?;
            text = text.replace(&format!("#{index}"), &operand);
            temps.extend(arg_temps);
        }
        if returns_value {
            if !text.contains('$') {
                return Err(CompileError::InternalInvariant(format!(
                    "pattern `{pattern}` returns a value but has no result sink"
                )));
            }
            self.push_value(StackValue::Deferred(DeferredExpr::new(text, temps)));
        } else {
            if text.contains('$') {
                return Err(CompileError::InternalInvariant(format!(
                    "pattern `{pattern}` has a result sink but returns nothing"
                )));
            }
            self.emit(writer, slot, &text);
            self.free_temps(&temps);
        }
        Ok(())
    }

    fn push_value(&mut self, value: StackValue) {
        self.stack = self.stack.push(value);
    }

    fn pop_value(&mut self) -> CompileResult<StackValue> {
        let (value, rest) = self.stack.pop()?;
        self.stack = rest;
        Ok(value)
    }

    fn lower_runtime_call(
        &mut self,
        name: &str,
        type_arg: Option<&str>,
        sig: &MethodSig,
        slot: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        match name {
            "Hash" => {
                let arg = self.pop_value()?;
                match arg {
                    StackValue::Str(text) => {
                        self.push_value(StackValue::HashString(text));
                        Ok(())
                    }
                    other => Err(CompileError::unsupported(
                        &self.method.name,
                        format!("Hash of a non-literal {} value", other.kind()),
                    )),
                }
            }
            "GetTypeHash" => {
                let type_name = type_arg.ok_or_else(|| {
                    CompileError::unsupported(
                        &self.method.name,
                        "GetTypeHash without an instantiated type argument",
                    )
                })?;
                self.push_value(StackValue::HashString(type_name.to_string()));
                Ok(())
            }
            "Yield" => {
                self.emit(writer, slot, "yield");
                Ok(())
            }
            "Sleep" => {
                let arg = self.pop_value()?;
                let (text, temps) = self.operand_text(&arg, writer, slot)?;
                self.emit(writer, slot, &format!("sleep {text}"));
                self.free_temps(&temps);
                Ok(())
            }
            "Hcf" => {
                self.emit(writer, slot, "hcf");
                Ok(())
            }
            other => Err(CompileError::unsupported(
                &self.method.name,
                format!("unknown runtime intrinsic `{other}` ({sig})"),
            )),
        }
    }

    fn lower_device_call(
        &mut self,
        type_name: &str,
        method: &str,
        sig: &MethodSig,
        slot: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        if let Some(property) = method.strip_prefix("set_") {
            let value = self.pop_value()?;
            let receiver = self.pop_value()?;
            let (text, temps) = self.operand_text(&value, writer, slot)?;
            match receiver {
                StackValue::Device {
                    type_name: receiver_type,
                    multicast: true,
                    ..
                } => {
                    self.emit(
                        writer,
                        slot,
                        &format!("sb HASH(\"{receiver_type}\") {property} {text}"),
                    );
                }
                StackValue::Device {
                    pin,
                    multicast: false,
                    ..
                } => {
                    self.emit(writer, slot, &format!("s {pin} {property} {text}"));
                }
                other => {
                    return Err(CompileError::unsupported(
                        &self.method.name,
                        format!("property store on a {} value", other.kind()),
                    ))
                }
            }
            self.free_temps(&temps);
            return Ok(());
        }

        match method {
            "get_Slots" => {
                let receiver = self.pop_value()?;
                return match receiver {
                    StackValue::Device {
                        pin,
                        type_name,
                        slot_count,
                        multicast: false,
                    } => {
                        self.push_value(StackValue::DeviceSlots {
                            pin,
                            type_name,
                            slot_count,
                        });
                        Ok(())
                    }
                    other => Err(CompileError::unsupported(
                        &self.method.name,
                        format!("slot table of a {} value", other.kind()),
                    )),
                };
            }
            "get_Length" => {
                let receiver = self.pop_value()?;
                return match receiver {
                    StackValue::DeviceSlots { slot_count, .. } => {
                        self.push_value(StackValue::number(slot_count as f64));
                        Ok(())
                    }
                    other => Err(CompileError::unsupported(
                        &self.method.name,
                        format!("slot count of a {} value", other.kind()),
                    )),
                };
            }
            "get_Item" => {
                let index_value = self.pop_value()?;
                let receiver = self.pop_value()?;
                let index_value = match index_value {
                    StackValue::Deferred(expr) => {
                        StackValue::Register(self.materialise(&expr, writer, slot)?)
                    }
                    other => other,
                };
                if !index_value.is_renderable() {
                    return Err(CompileError::unsupported(
                        &self.method.name,
                        format!("slot index is a {} value", index_value.kind()),
                    ));
                }
                return match receiver {
                    StackValue::DeviceSlots { pin, type_name, .. } => {
                        self.push_value(StackValue::DeviceSlot {
                            pin,
                            type_name,
                            index: Box::new(index_value),
                        });
                        Ok(())
                    }
                    other => Err(CompileError::unsupported(
                        &self.method.name,
                        format!("indexing into a {} value", other.kind()),
                    )),
                };
            }
            _ => {}
        }

        if let Some(property) = method.strip_prefix("get_") {
            let receiver = self.pop_value()?;
            match receiver {
                StackValue::DeviceSlot { pin, index, .. } => {
                    let index_text = index.render().expect("slot index is renderable");
                    let temps = match *index {
                        StackValue::Register(register) if self.is_temp(register) => vec![register],
                        _ => Vec::new(),
                    };
                    self.push_value(StackValue::Deferred(DeferredExpr::new(
                        format!("ls $ {pin} {index_text} {property}"),
                        temps,
                    )));
                }
                StackValue::Device {
                    pin,
                    multicast: false,
                    ..
                } => {
                    self.push_value(StackValue::Deferred(DeferredExpr::new(
                        format!("l $ {pin} {property}"),
                        Vec::new(),
                    )));
                }
                StackValue::Device {
                    multicast: true, ..
                } => {
                    return Err(CompileError::unsupported(
                        &self.method.name,
                        format!("multicast property `{property}` read without an aggregation mode"),
                    ))
                }
                other => {
                    return Err(CompileError::unsupported(
                        &self.method.name,
                        format!("property read on a {} value", other.kind()),
                    ))
                }
            }
            return Ok(());
        }

        if let Some(property) = method.strip_prefix("Get") {
            if sig.param_count == 1 {
                let mode = self.pop_value()?;
                let receiver = self.pop_value()?;
                let (mode_text, temps) = self.operand_text(&mode, writer, slot)?;
                return match receiver {
                    StackValue::Device {
                        pin,
                        type_name: receiver_type,
                        multicast: true,
                        ..
                    } => {
                        self.push_value(StackValue::Deferred(DeferredExpr::new(
                            format!("lb $ HASH(\"{receiver_type}\") {pin} {property} {mode_text}"),
                            temps,
                        )));
                        Ok(())
                    }
                    StackValue::Device {
                        multicast: false, ..
                    } => Err(CompileError::unsupported(
                        &self.method.name,
                        format!("aggregation read `{property}` on a pin-bound device"),
                    )),
                    other => Err(CompileError::unsupported(
                        &self.method.name,
                        format!("aggregation read on a {} value", other.kind()),
                    )),
                };
            }
        }

        Err(CompileError::unsupported(
            &self.method.name,
            format!("device method `{type_name}::{method}`"),
        ))
    }

    fn lower_program_call(
        &mut self,
        method_name: &str,
        sig: &MethodSig,
        slot: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        let class = self.env.class;
        let callee_index = class.find_method(method_name).ok_or_else(|| {
            CompileError::unsupported(
                &self.method.name,
                format!("call to unknown method `{method_name}`"),
            )
        })?;
        let callee = &class.methods[callee_index];
        if callee.params.len() != sig.param_count {
            return Err(CompileError::InternalInvariant(format!(
                "`{method_name}` metadata lists {} parameters, definition has {}",
                sig.param_count,
                callee.params.len()
            )));
        }

        // user compile hints substitute at the call site like intrinsics;
        // other hint kinds fall through to the regular engine
        if let Some(hint) = &callee.hint {
            if hint.kind == CompileHintKind::Inline {
                let args = self.pop_args(sig.param_count)?;
                self.expect_this_receiver(method_name)?;
                let pattern = hint.pattern.clone();
                return self.expand_pattern(
                    &pattern,
                    &args,
                    callee.returns.returns_value(),
                    slot,
                    writer,
                );
            }
        }

        let mut args = self.pop_args(sig.param_count)?;
        self.expect_this_receiver(method_name)?;

        // resolve deferred arguments up front so the callee re-reading a
        // parameter cannot replay its side effects
        for arg in &mut args {
            if let StackValue::Deferred(expr) = arg {
                let expr = expr.clone();
                let register = self.materialise(&expr, writer, slot)?;
                *arg = StackValue::Register(register);
            }
        }

        let recursive = self.inline_chain.iter().any(|name| name == method_name);
        let width1_locals = callee
            .locals
            .iter()
            .filter(|local| local.width() == 1)
            .count() as u32;
        let demand = self.registers.num_allocated()
            + width1_locals
            + callee.returns.returns_value() as u32;
        if !recursive && demand <= crate::core::register_set::NUM_REGISTERS as u32 {
            match self.try_inline(callee, method_name, &args, slot, writer) {
                Ok(()) => {
                    self.env.session.record_inline(false);
                    return Ok(());
                }
                Err(CompileError::RegisterExhausted { .. }) => {
                    debug!("inlining `{method_name}` overflowed the register file; using the call stack");
                    self.env.session.record_inline(true);
                }
                Err(other) => return Err(other),
            }
        } else {
            self.env.session.record_inline(true);
        }

        self.emit_call_stack(method_name, sig, &args, slot, writer)
    }

    fn expect_this_receiver(&mut self, method_name: &str) -> CompileResult<()> {
        let receiver = self.pop_value()?;
        if receiver != StackValue::This {
            return Err(CompileError::unsupported(
                &self.method.name,
                format!(
                    "`{method_name}` called on a {} receiver",
                    receiver.kind()
                ),
            ));
        }
        Ok(())
    }

    /// Inline the callee at this call site. On any register exhaustion
    /// the scratch body is dropped and the error propagates so the
    /// caller can fall back to the call stack.
    fn try_inline(
        &mut self,
        callee: &'a MethodDef,
        method_name: &str,
        args: &[StackValue],
        slot: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        let sink = if callee.returns.returns_value() {
            match self.registers.allocate() {
                Some((register, registers)) => {
                    self.registers = registers;
                    Some(register)
                }
                None => {
                    return Err(CompileError::RegisterExhausted {
                        method: self.method.name.clone(),
                    })
                }
            }
        } else {
            None
        };

        let result = self.inline_body(callee, method_name, args, sink, slot, writer);
        match result {
            Ok(()) => {
                if let Some(register) = sink {
                    self.all_used = self.all_used.allocate_at(register);
                }
                for arg in args {
                    self.release_value(arg);
                }
                if let Some(register) = sink {
                    self.push_value(StackValue::Register(register));
                }
                Ok(())
            }
            Err(error) => {
                if let Some(register) = sink {
                    self.registers = self.registers.free(register);
                }
                Err(error)
            }
        }
    }

    fn inline_body(
        &mut self,
        callee: &'a MethodDef,
        method_name: &str,
        args: &[StackValue],
        sink: Option<u8>,
        slot: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        let prefix = format!("{}_inl{}", self.label_prefix, self.inline_counter);
        self.inline_counter += 1;
        debug!("inlining `{method_name}` as `{prefix}`");

        let initial_stack = VirtualStack::from_values(args.to_vec());
        let mut sub = ExecutionContext::new(
            self.env,
            callee,
            &prefix,
            self.registers,
            CompileMode::Inline {
                initial_stack,
                return_sink: sink,
            },
        )?;
        sub.inline_chain = self.inline_chain.clone();
        sub.inline_chain.push(method_name.to_string());

        let mut sub_writer = OutputWriter::new(prefix, sub.instruction_count());
        sub.compile(&mut sub_writer)?;
        self.emit(writer, slot, &sub_writer.assemble());

        // keep whatever the callee allocated and did not free, so the
        // caller cannot hand those registers out again
        let leftover = sub.live_registers().difference(self.registers);
        self.registers = self.registers.union(leftover);
        self.all_used = self.all_used.union(sub.all_used_registers());
        let dependencies = sub.dependencies.clone();
        self.dependencies.extend(dependencies);
        Ok(())
    }

    /// The call-stack form: save the intersection of the callee's used
    /// registers with our live ones, save ra, push the parameters left
    /// to right, jal, then restore in reverse.
    fn emit_call_stack(
        &mut self,
        method_name: &str,
        sig: &MethodSig,
        args: &[StackValue],
        slot: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        self.dependencies.insert(method_name.to_string());
        let callee_all_used = ensure_method_compiled(self.env, method_name)?;

        let mut arg_texts = Vec::with_capacity(args.len());
        for arg in args {
            let (text, temps) = self.operand_text(arg, writer, slot)?;
            arg_texts.push(text);
            // argument registers die at the call; nothing allocates
            // before the pushes execute, so contents stay intact
            self.free_temps(&temps);
        }

        // field-alias registers are shared globals every method treats
        // as reserved; everything else live here needs saving
        let live = self.registers.difference(self.env.layout.reserved);
        let save = match callee_all_used {
            Some(callee_used) => callee_used.intersect(live),
            None => live,
        };

        for register in save.iter() {
            self.emit(writer, slot, &format!("push r{register}"));
        }
        self.emit(writer, slot, "push ra");
        for text in &arg_texts {
            self.emit(writer, slot, &format!("push {text}"));
        }
        self.emit(writer, slot, &format!("jal {method_name}"));
        if sig.returns_value {
            let register = self.allocate_temp()?;
            self.emit(writer, slot, &format!("pop r{register}"));
            self.push_value(StackValue::Register(register));
        }
        self.emit(writer, slot, "pop ra");
        let saved: Vec<u8> = save.iter().collect();
        for register in saved.iter().rev() {
            self.emit(writer, slot, &format!("pop r{register}"));
        }
        Ok(())
    }
}
