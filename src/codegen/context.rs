// This module implements the symbolic SBIL interpreter at the heart of the
// compiler. One ExecutionContext compiles one method: it walks the decoded
// instruction stream linearly, tracking a virtual operand stack, the
// register allocation bitset, per-local register mappings and known
// constant values, and emits one IC10 fragment per SBIL instruction into
// the method's OutputWriter. Expression results stay deferred (a fragment
// with a `$` result sink) until a consumer binds them, which is what fuses
// temporaries into local stores, field stores, comparisons and returns.
// Branch targets clear constant knowledge (no assumption at a join point),
// and after the sweep every recorded jump edge is checked for stack and
// register-state consistency.

//! Symbolic execution context for one SBIL method.

use std::collections::{BTreeSet, HashMap};

use log::{debug, trace};

use super::output::OutputWriter;
use super::{CompileEnv, CompiledMethod, FieldBinding};
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_set::RegisterSet;
use crate::core::stack::VirtualStack;
use crate::core::value::{DeferredExpr, StackValue};
use crate::isa::operand::format_number;
use crate::isa::{Behaviour, Condition, Opcode};
use crate::sbil::{
    read_method_body, BinaryOp, BranchCond, CompareOp, MethodDef, SbilInstruction, SbilOp,
};

/// Per-instruction snapshot of the evaluator state.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionState {
    pub stack: VirtualStack,
    pub registers: RegisterSet,
    pub local_registers: Vec<Option<u8>>,
    pub local_values: Vec<Option<StackValue>>,
}

/// How a method body is being compiled.
pub enum CompileMode {
    /// Standalone function: parameters arrive on the runtime stack and
    /// `ret` is `j ra`.
    Function,
    /// Expanded at a call site (or as the startup constructor):
    /// parameters are the caller's symbolic values and `ret` jumps to
    /// the `{prefix}_end` postamble label.
    Inline {
        initial_stack: VirtualStack,
        return_sink: Option<u8>,
    },
}

pub struct ExecutionContext<'a, 'arena> {
    pub(crate) env: CompileEnv<'a, 'arena>,
    pub(crate) method: &'a MethodDef,
    /// Interned in the session arena; shared by every fragment label.
    pub(crate) label_prefix: &'a str,
    pub(crate) inline: bool,
    pub(crate) return_sink: Option<u8>,
    /// Registers that were taken before this context started.
    pub(crate) reserved: RegisterSet,
    pub(crate) registers: RegisterSet,
    /// Every register this context ever allocated beyond `reserved`.
    pub(crate) all_used: RegisterSet,
    /// Registers that must survive value consumption (reserved set,
    /// parameters, locals).
    pub(crate) persistent: RegisterSet,
    pub(crate) param_values: Vec<StackValue>,
    pub(crate) local_registers: Vec<Option<u8>>,
    pub(crate) local_values: Vec<Option<StackValue>>,
    pub(crate) stack: VirtualStack,
    pub(crate) instructions: Vec<SbilInstruction>,
    offset_index: HashMap<u32, usize>,
    /// Instruction indices that are branch or switch targets.
    join_points: BTreeSet<usize>,
    pre_states: Vec<ExecutionState>,
    post_states: Vec<ExecutionState>,
    branch_edges: Vec<(usize, usize)>,
    pub(crate) dependencies: BTreeSet<String>,
    /// Methods currently being inline-expanded, to stop recursion.
    pub(crate) inline_chain: Vec<String>,
    pub(crate) inline_counter: usize,
}

impl<'a, 'arena> ExecutionContext<'a, 'arena> {
    pub fn new(
        env: CompileEnv<'a, 'arena>,
        method: &'a MethodDef,
        label_prefix: &str,
        reserved: RegisterSet,
        mode: CompileMode,
    ) -> CompileResult<Self> {
        let instructions = read_method_body(&method.body, env.meta)?;
        let offset_index: HashMap<u32, usize> = instructions
            .iter()
            .enumerate()
            .map(|(index, instruction)| (instruction.offset, index))
            .collect();
        let mut join_points = BTreeSet::new();
        for instruction in &instructions {
            match &instruction.op {
                SbilOp::Branch { target, .. } => {
                    if let Some(&index) = offset_index.get(target) {
                        join_points.insert(index);
                    }
                }
                SbilOp::Switch(targets) => {
                    for target in targets {
                        if let Some(&index) = offset_index.get(target) {
                            join_points.insert(index);
                        }
                    }
                }
                _ => {}
            }
        }

        let mut ctx = ExecutionContext {
            env,
            method,
            label_prefix: env.session.intern_str(label_prefix),
            inline: false,
            return_sink: None,
            reserved,
            registers: reserved,
            all_used: RegisterSet::EMPTY,
            persistent: reserved,
            param_values: Vec::new(),
            local_registers: Vec::new(),
            local_values: vec![None; method.locals.len()],
            stack: VirtualStack::new(),
            instructions,
            offset_index,
            join_points,
            pre_states: Vec::new(),
            post_states: Vec::new(),
            branch_edges: Vec::new(),
            dependencies: BTreeSet::new(),
            inline_chain: vec![method.name.clone()],
            inline_counter: 0,
        };

        match mode {
            CompileMode::Function => {
                for (index, param) in method.params.iter().enumerate() {
                    if param.width() != 1 {
                        return Err(CompileError::unsupported(
                            &method.name,
                            format!("parameter {index} is not register-sized"),
                        ));
                    }
                    let register = ctx.allocate_persistent()?;
                    ctx.param_values.push(StackValue::Register(register));
                }
            }
            CompileMode::Inline {
                initial_stack,
                return_sink,
            } => {
                ctx.inline = true;
                ctx.return_sink = return_sink;
                let (mut args, rest) = initial_stack.pop_n(method.params.len())?;
                args.reverse();
                ctx.param_values = args;
                ctx.stack = rest;
            }
        }

        for (index, local) in method.locals.iter().enumerate() {
            match local.width() {
                1 => {
                    let register = ctx.allocate_persistent()?;
                    ctx.local_registers.push(Some(register));
                }
                0 => ctx.local_registers.push(None),
                width => {
                    return Err(CompileError::unsupported(
                        &method.name,
                        format!("local {index} has unsupported width {width}"),
                    ))
                }
            }
        }

        Ok(ctx)
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn all_used_registers(&self) -> RegisterSet {
        self.all_used
    }

    /// Registers already taken when this context started.
    pub fn reserved_registers(&self) -> RegisterSet {
        self.reserved
    }

    pub fn live_registers(&self) -> RegisterSet {
        self.registers
    }

    /// Callee methods that need standalone bodies in the final program.
    pub fn method_dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub fn pre_state(&self, index: usize) -> Option<&ExecutionState> {
        self.pre_states.get(index)
    }

    pub fn post_state(&self, index: usize) -> Option<&ExecutionState> {
        self.post_states.get(index)
    }

    /// Compile the whole method into `writer`.
    pub fn compile(&mut self, writer: &mut OutputWriter) -> CompileResult<()> {
        debug!(
            "compiling `{}` ({} SBIL instructions, inline={})",
            self.method.name,
            self.instructions.len(),
            self.inline
        );
        debug_assert_eq!(writer.slot_count(), self.instructions.len());

        if !self.inline {
            // parameters were pushed left to right, so pop in reverse
            for value in self.param_values.iter().rev() {
                if let StackValue::Register(register) = value {
                    writer.push_preamble(format!("pop r{register}"));
                }
            }
        }

        for index in 0..self.instructions.len() {
            if self.join_points.contains(&index) {
                // no assumption survives a jump target
                self.local_values = vec![None; self.local_values.len()];
            }
            let op = self.instructions[index].op.clone();
            trace!("il_{index}: {op}");
            if self.env.options.comments {
                writer.set_comment(index, op.to_string());
            }
            self.pre_states.push(self.snapshot());
            self.dispatch(index, &op, writer)?;
            self.post_states.push(self.snapshot());
        }

        if self.inline {
            writer.push_postamble(format!("{}_end:", self.label_prefix));
        }

        self.env.session.record_fragments(self.instructions.len());
        self.verify_branches()
    }

    fn snapshot(&self) -> ExecutionState {
        ExecutionState {
            stack: self.stack.clone(),
            registers: self.registers,
            local_registers: self.local_registers.clone(),
            local_values: self.local_values.clone(),
        }
    }

    // ---- register and value plumbing -------------------------------------

    fn allocate_persistent(&mut self) -> CompileResult<u8> {
        let register = self.allocate_temp()?;
        self.persistent = self.persistent.allocate_at(register);
        Ok(register)
    }

    pub(crate) fn allocate_temp(&mut self) -> CompileResult<u8> {
        match self.registers.allocate() {
            Some((register, registers)) => {
                self.registers = registers;
                self.all_used = self.all_used.allocate_at(register);
                Ok(register)
            }
            None => Err(CompileError::RegisterExhausted {
                method: self.method.name.clone(),
            }),
        }
    }

    pub(crate) fn is_temp(&self, register: u8) -> bool {
        !self.persistent.contains(register)
    }

    pub(crate) fn free_temp(&mut self, register: u8) {
        if self.is_temp(register) {
            self.registers = self.registers.free(register);
        }
    }

    pub(crate) fn free_temps(&mut self, registers: &[u8]) {
        for &register in registers {
            self.free_temp(register);
        }
    }

    /// Release whatever a discarded value was holding.
    pub(crate) fn release_value(&mut self, value: &StackValue) {
        match value {
            StackValue::Register(register) => self.free_temp(*register),
            StackValue::Deferred(expr) => {
                let free = expr.free.clone();
                self.free_temps(&free);
            }
            StackValue::DeviceSlot { index, .. } => self.release_value(&index.clone()),
            _ => {}
        }
    }

    pub(crate) fn emit(&self, writer: &mut OutputWriter, slot: usize, line: &str) {
        writer.append_code(slot, line);
    }

    /// Materialise a deferred expression: release its inputs, bind the
    /// `$` sink to a freshly allocated register, emit the code.
    pub(crate) fn materialise(
        &mut self,
        expr: &DeferredExpr,
        writer: &mut OutputWriter,
        slot: usize,
    ) -> CompileResult<u8> {
        let free = expr.free.clone();
        self.free_temps(&free);
        let sink = self.allocate_temp()?;
        let code = expr.bind(&format!("r{sink}"));
        self.emit(writer, slot, &code);
        Ok(sink)
    }

    /// Render a value as operand text, materialising deferred inputs.
    /// Returns the text plus the temp registers now backing it.
    pub(crate) fn operand_text(
        &mut self,
        value: &StackValue,
        writer: &mut OutputWriter,
        slot: usize,
    ) -> CompileResult<(String, Vec<u8>)> {
        match value {
            StackValue::Deferred(expr) => {
                let register = self.materialise(expr, writer, slot)?;
                Ok((format!("r{register}"), vec![register]))
            }
            StackValue::Register(register) => {
                let temps = if self.is_temp(*register) {
                    vec![*register]
                } else {
                    Vec::new()
                };
                Ok((format!("r{register}"), temps))
            }
            other => other.render().map(|text| (text, Vec::new())).ok_or_else(|| {
                CompileError::unsupported(
                    &self.method.name,
                    format!("a {} value cannot appear as an operand", other.kind()),
                )
            }),
        }
    }

    fn pop(&mut self) -> CompileResult<StackValue> {
        let (value, rest) = self.stack.pop()?;
        self.stack = rest;
        Ok(value)
    }

    fn push(&mut self, value: StackValue) {
        self.stack = self.stack.push(value);
    }

    // ---- dispatch --------------------------------------------------------

    fn dispatch(
        &mut self,
        index: usize,
        op: &SbilOp,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        match op {
            SbilOp::Nop => Ok(()),
            SbilOp::Dup => self.handle_dup(index, writer),
            SbilOp::Pop => {
                let value = self.pop()?;
                self.release_value(&value);
                Ok(())
            }
            SbilOp::Ldarg(arg) => self.handle_ldarg(*arg),
            SbilOp::Ldloc(local) => self.handle_ldloc(*local),
            SbilOp::Ldloca(local) => self.handle_ldloca(*local),
            SbilOp::Stloc(local) => self.handle_stloc(*local, index, writer),
            SbilOp::Ldc(v) => {
                self.push(StackValue::number(*v));
                Ok(())
            }
            SbilOp::Ldnull => {
                self.push(StackValue::Null);
                Ok(())
            }
            SbilOp::Ldstr(text) => {
                self.push(StackValue::Str(text.clone()));
                Ok(())
            }
            SbilOp::Ldfld(field) => self.handle_ldfld(field),
            SbilOp::Stfld(field) => self.handle_stfld(field, index, writer),
            SbilOp::Binary(op) => self.handle_binary(*op, index, writer),
            SbilOp::Not => self.handle_unary(false, index, writer),
            SbilOp::Neg => self.handle_unary(true, index, writer),
            SbilOp::Compare(op) => self.handle_compare(*op, index, writer),
            SbilOp::Branch { cond, target, .. } => self.handle_branch(*cond, *target, index, writer),
            SbilOp::Switch(targets) => self.handle_switch(targets, index, writer),
            SbilOp::Call(sig) => self.lower_call(sig, index, writer),
            SbilOp::Ret => self.handle_ret(index, writer),
            SbilOp::ConvTrunc => self.handle_conv(index, writer),
            SbilOp::ConvNop => Ok(()),
            SbilOp::LdindRef => match self.stack.peek() {
                Some(StackValue::DeviceSlot { .. }) => Ok(()),
                Some(other) => Err(CompileError::unsupported(
                    &self.method.name,
                    format!("ldind.ref on a {} value", other.kind()),
                )),
                None => Err(CompileError::InternalInvariant(
                    "operand stack underflow".into(),
                )),
            },
        }
    }

    fn handle_dup(&mut self, index: usize, writer: &mut OutputWriter) -> CompileResult<()> {
        let top = self.pop()?;
        // resolve a deferred value first so aliasing cannot duplicate
        // its side effects
        let top = match top {
            StackValue::Deferred(expr) => {
                StackValue::Register(self.materialise(&expr, writer, index)?)
            }
            other => other,
        };
        match top {
            StackValue::Register(register) if self.is_temp(register) => {
                let copy = self.allocate_temp()?;
                self.emit(writer, index, &format!("move r{copy} r{register}"));
                self.push(StackValue::Register(register));
                self.push(StackValue::Register(copy));
            }
            other => {
                self.push(other.clone());
                self.push(other);
            }
        }
        Ok(())
    }

    fn handle_ldarg(&mut self, arg: u16) -> CompileResult<()> {
        if arg == 0 {
            self.push(StackValue::This);
            return Ok(());
        }
        let value = self
            .param_values
            .get(arg as usize - 1)
            .cloned()
            .ok_or_else(|| {
                CompileError::unsupported(
                    &self.method.name,
                    format!("parameter index {arg} out of range"),
                )
            })?;
        self.push(value);
        Ok(())
    }

    fn local_slot(&self, local: u16) -> CompileResult<usize> {
        let index = local as usize;
        if index >= self.local_registers.len() {
            return Err(CompileError::unsupported(
                &self.method.name,
                format!("local index {local} out of range"),
            ));
        }
        Ok(index)
    }

    fn handle_ldloc(&mut self, local: u16) -> CompileResult<()> {
        let slot = self.local_slot(local)?;
        if let Some(known) = self.local_values[slot].clone() {
            // known constants and untracked reference values read back
            // symbolically; everything else reads the backing register
            if matches!(known, StackValue::Static(_)) || self.local_registers[slot].is_none() {
                self.push(known);
                return Ok(());
            }
        }
        match self.local_registers[slot] {
            Some(register) => {
                self.push(StackValue::Register(register));
                Ok(())
            }
            None => Err(CompileError::unsupported(
                &self.method.name,
                format!("read of unassigned local {local}"),
            )),
        }
    }

    fn handle_ldloca(&mut self, local: u16) -> CompileResult<()> {
        let slot = self.local_slot(local)?;
        if let Some(register) = self.local_registers[slot] {
            self.push(StackValue::Register(register));
            return Ok(());
        }
        match self.local_values[slot].clone() {
            Some(value) => {
                self.push(value);
                Ok(())
            }
            None => Err(CompileError::unsupported(
                &self.method.name,
                format!("address of unassigned local {local}"),
            )),
        }
    }

    fn handle_stloc(
        &mut self,
        local: u16,
        index: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        let slot = self.local_slot(local)?;
        let value = self.pop()?;
        let Some(register) = self.local_registers[slot] else {
            // untracked local: record the symbolic value only
            if matches!(value, StackValue::Deferred(_)) {
                return Err(CompileError::unsupported(
                    &self.method.name,
                    format!("computed value stored into reference-typed local {local}"),
                ));
            }
            self.local_values[slot] = Some(value);
            return Ok(());
        };
        match value {
            StackValue::Deferred(expr) => {
                let free = expr.free.clone();
                self.free_temps(&free);
                let code = expr.bind(&format!("r{register}"));
                self.emit(writer, index, &code);
                self.local_values[slot] = None;
            }
            StackValue::Register(source) if source == register => {}
            StackValue::Register(source) => {
                self.emit(writer, index, &format!("move r{register} r{source}"));
                self.free_temp(source);
                self.local_values[slot] = None;
            }
            StackValue::Static(v) => {
                self.emit(
                    writer,
                    index,
                    &format!("move r{register} {}", format_number(v)),
                );
                self.local_values[slot] = Some(StackValue::Static(v));
            }
            other => match other.render() {
                Some(text) => {
                    self.emit(writer, index, &format!("move r{register} {text}"));
                    self.local_values[slot] = None;
                }
                None => {
                    return Err(CompileError::unsupported(
                        &self.method.name,
                        format!("a {} value stored into numeric local {local}", other.kind()),
                    ))
                }
            },
        }
        Ok(())
    }

    fn handle_ldfld(&mut self, field: &str) -> CompileResult<()> {
        let target = self.pop()?;
        if target != StackValue::This {
            return Err(CompileError::unsupported(
                &self.method.name,
                format!("field `{field}` read on a {} target", target.kind()),
            ));
        }
        let field_index = self.env.layout.field_index(field).ok_or_else(|| {
            CompileError::unsupported(&self.method.name, format!("unknown field `{field}`"))
        })?;
        match self
            .env
            .layout
            .binding_for(field)
            .expect("indexed fields are bound")
        {
            FieldBinding::Device {
                pin,
                type_name,
                slot_count,
                ..
            } => self.push(StackValue::Device {
                pin: pin.clone(),
                type_name: type_name.clone(),
                slot_count: *slot_count,
                multicast: false,
            }),
            FieldBinding::Multicast {
                pin,
                type_name,
                slot_count,
            } => self.push(StackValue::Device {
                pin: pin.clone(),
                type_name: type_name.clone(),
                slot_count: *slot_count,
                multicast: true,
            }),
            FieldBinding::Register { alias, .. } => self.push(StackValue::Field {
                alias: alias.clone(),
                field_index,
            }),
        }
        Ok(())
    }

    fn handle_stfld(
        &mut self,
        field: &str,
        index: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        let value = self.pop()?;
        let target = self.pop()?;
        if target != StackValue::This {
            return Err(CompileError::unsupported(
                &self.method.name,
                format!("field `{field}` written on a {} target", target.kind()),
            ));
        }
        let alias = match self.env.layout.binding_for(field) {
            Some(FieldBinding::Register { alias, .. }) => alias.clone(),
            Some(_) => {
                return Err(CompileError::unsupported(
                    &self.method.name,
                    format!("store to device-tagged field `{field}`"),
                ))
            }
            None => {
                return Err(CompileError::unsupported(
                    &self.method.name,
                    format!("unknown field `{field}`"),
                ))
            }
        };
        match value {
            StackValue::Deferred(expr) => {
                let free = expr.free.clone();
                self.free_temps(&free);
                let code = expr.bind(&alias);
                self.emit(writer, index, &code);
            }
            other => {
                let (text, temps) = self.operand_text(&other, writer, index)?;
                self.emit(writer, index, &format!("move {alias} {text}"));
                self.free_temps(&temps);
            }
        }
        Ok(())
    }

    fn handle_binary(
        &mut self,
        op: BinaryOp,
        index: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        let (rhs, lhs, rest) = self.stack.pop2()?;
        self.stack = rest;
        if let (StackValue::Static(a), StackValue::Static(b)) = (&lhs, &rhs) {
            self.push(StackValue::number(fold_binary(op, *a, *b)));
            return Ok(());
        }
        let (lhs_text, mut temps) = self.operand_text(&lhs, writer, index)?;
        let (rhs_text, rhs_temps) = self.operand_text(&rhs, writer, index)?;
        temps.extend(rhs_temps);
        let mnemonic = match op {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "mod",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "sll",
            BinaryOp::Shr => "sra",
            BinaryOp::ShrUn => "srl",
        };
        self.push(StackValue::Deferred(DeferredExpr::new(
            format!("{mnemonic} $ {lhs_text} {rhs_text}"),
            temps,
        )));
        Ok(())
    }

    fn handle_unary(
        &mut self,
        negate: bool,
        index: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        let value = self.pop()?;
        if let StackValue::Static(v) = value {
            let folded = if negate { -v } else { !(v as i64) as f64 };
            self.push(StackValue::number(folded));
            return Ok(());
        }
        let (text, temps) = self.operand_text(&value, writer, index)?;
        let expr = if negate {
            format!("sub $ 0 {text}")
        } else {
            format!("not $ {text}")
        };
        self.push(StackValue::Deferred(DeferredExpr::new(expr, temps)));
        Ok(())
    }

    fn handle_compare(
        &mut self,
        op: CompareOp,
        index: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        let (rhs, lhs, rest) = self.stack.pop2()?;
        self.stack = rest;

        // device-is-set predicates from null comparisons
        let device_null = match (&lhs, &rhs) {
            (StackValue::Device { pin, multicast, .. }, StackValue::Null)
            | (StackValue::Null, StackValue::Device { pin, multicast, .. }) => {
                Some((pin.clone(), *multicast))
            }
            _ => None,
        };
        if let Some((pin, multicast)) = device_null {
            if multicast {
                return Err(CompileError::unsupported(
                    &self.method.name,
                    "null comparison on a multicast device",
                ));
            }
            let mnemonic = match op {
                CompareOp::GtUn => "sdse",
                CompareOp::Eq => "sdns",
                other => {
                    return Err(CompileError::unsupported(
                        &self.method.name,
                        format!("{other:?} comparison between a device and null"),
                    ))
                }
            };
            self.push(StackValue::Deferred(DeferredExpr::new(
                format!("{mnemonic} $ {pin}"),
                Vec::new(),
            )));
            return Ok(());
        }

        if let (StackValue::Static(a), StackValue::Static(b)) = (&lhs, &rhs) {
            let result = match op {
                CompareOp::Eq => a == b,
                CompareOp::Gt | CompareOp::GtUn => a > b,
                CompareOp::Lt | CompareOp::LtUn => a < b,
            };
            self.push(StackValue::number(if result { 1.0 } else { 0.0 }));
            return Ok(());
        }

        let (lhs_text, mut temps) = self.operand_text(&lhs, writer, index)?;
        let (rhs_text, rhs_temps) = self.operand_text(&rhs, writer, index)?;
        temps.extend(rhs_temps);
        let mnemonic = match op {
            CompareOp::Eq => "seq",
            CompareOp::Gt | CompareOp::GtUn => "sgt",
            CompareOp::Lt | CompareOp::LtUn => "slt",
        };
        self.push(StackValue::Deferred(DeferredExpr::new(
            format!("{mnemonic} $ {lhs_text} {rhs_text}"),
            temps,
        )));
        Ok(())
    }

    fn target_index(&self, target: u32) -> CompileResult<usize> {
        self.offset_index.get(&target).copied().ok_or_else(|| {
            CompileError::unsupported(
                &self.method.name,
                format!("branch to byte offset {target} past the last instruction"),
            )
        })
    }

    fn emit_jump(
        &mut self,
        writer: &mut OutputWriter,
        slot: usize,
        target_index: usize,
        line: String,
    ) {
        writer.require_label(target_index);
        self.emit(writer, slot, &line);
        self.branch_edges.push((slot, target_index));
    }

    /// Recognise a single-line conditional-set expression like
    /// `slt $ r2 29.45`, yielding its condition and trailing operands
    /// for fusing straight into a branch.
    fn condition_of_expr(expr: &DeferredExpr) -> Option<(Condition, String)> {
        if expr.text.contains('\n') {
            return None;
        }
        let (mnemonic, rest) = expr.text.split_once(' ')?;
        let rest = rest.strip_prefix("$ ")?;
        let opcode = Opcode::from_mnemonic(mnemonic)?;
        if opcode.behaviour() != Behaviour::SetRegister || opcode.condition() == Condition::None {
            return None;
        }
        Some((opcode.condition(), rest.to_string()))
    }

    fn handle_branch(
        &mut self,
        cond: BranchCond,
        target: u32,
        index: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        let target_index = self.target_index(target)?;
        let label = writer.label_name(target_index);
        match cond.operand_count() {
            0 => {
                self.emit_jump(writer, index, target_index, format!("j {label}"));
                Ok(())
            }
            1 => {
                let value = self.pop()?;
                let want_true = cond == BranchCond::True;
                match value {
                    StackValue::Static(v) => {
                        if (v != 0.0) == want_true {
                            self.emit_jump(writer, index, target_index, format!("j {label}"));
                        }
                        Ok(())
                    }
                    StackValue::Device { pin, multicast, .. } => {
                        if multicast {
                            return Err(CompileError::unsupported(
                                &self.method.name,
                                "presence test on a multicast device",
                            ));
                        }
                        let mnemonic = if want_true { "bdse" } else { "bdns" };
                        self.emit_jump(
                            writer,
                            index,
                            target_index,
                            format!("{mnemonic} {pin} {label}"),
                        );
                        Ok(())
                    }
                    StackValue::Deferred(expr) => {
                        if let Some((condition, operands)) = Self::condition_of_expr(&expr) {
                            let condition = if want_true {
                                condition
                            } else {
                                condition.negate()
                            };
                            let opcode = Opcode::for_behaviour(Behaviour::Jump, condition)
                                .ok_or_else(|| {
                                    CompileError::InternalInvariant(format!(
                                        "no branch opcode for condition {condition:?}"
                                    ))
                                })?;
                            let free = expr.free.clone();
                            self.free_temps(&free);
                            self.emit_jump(
                                writer,
                                index,
                                target_index,
                                format!("{} {operands} {label}", opcode.mnemonic()),
                            );
                        } else {
                            let value = StackValue::Deferred(expr);
                            let (text, temps) = self.operand_text(&value, writer, index)?;
                            let mnemonic = if want_true { "bnez" } else { "beqz" };
                            self.emit_jump(
                                writer,
                                index,
                                target_index,
                                format!("{mnemonic} {text} {label}"),
                            );
                            self.free_temps(&temps);
                        }
                        Ok(())
                    }
                    other => {
                        let (text, temps) = self.operand_text(&other, writer, index)?;
                        let mnemonic = if want_true { "bnez" } else { "beqz" };
                        self.emit_jump(
                            writer,
                            index,
                            target_index,
                            format!("{mnemonic} {text} {label}"),
                        );
                        self.free_temps(&temps);
                        Ok(())
                    }
                }
            }
            _ => {
                let (rhs, lhs, rest) = self.stack.pop2()?;
                self.stack = rest;
                if let (StackValue::Static(a), StackValue::Static(b)) = (&lhs, &rhs) {
                    let taken = match cond {
                        BranchCond::Eq => a == b,
                        BranchCond::Ne => a != b,
                        BranchCond::Gt => a > b,
                        BranchCond::Ge => a >= b,
                        BranchCond::Lt => a < b,
                        BranchCond::Le => a <= b,
                        _ => unreachable!("two-operand branch"),
                    };
                    if taken {
                        self.emit_jump(writer, index, target_index, format!("j {label}"));
                    }
                    return Ok(());
                }
                let condition = match cond {
                    BranchCond::Eq => Condition::Equal,
                    BranchCond::Ne => Condition::NotEqual,
                    BranchCond::Gt => Condition::Greater,
                    BranchCond::Ge => Condition::GreaterEqual,
                    BranchCond::Lt => Condition::Less,
                    BranchCond::Le => Condition::LessEqual,
                    _ => unreachable!("two-operand branch"),
                };
                let opcode = Opcode::for_behaviour(Behaviour::Jump, condition)
                    .expect("every comparison condition has a branch form");
                let (lhs_text, mut temps) = self.operand_text(&lhs, writer, index)?;
                let (rhs_text, rhs_temps) = self.operand_text(&rhs, writer, index)?;
                temps.extend(rhs_temps);
                self.emit_jump(
                    writer,
                    index,
                    target_index,
                    format!("{} {lhs_text} {rhs_text} {label}", opcode.mnemonic()),
                );
                self.free_temps(&temps);
                Ok(())
            }
        }
    }

    fn handle_switch(
        &mut self,
        targets: &[u32],
        index: usize,
        writer: &mut OutputWriter,
    ) -> CompileResult<()> {
        let value = self.pop()?;
        let (text, temps) = self.operand_text(&value, writer, index)?;
        for (case, target) in targets.iter().enumerate() {
            let target_index = self.target_index(*target)?;
            let label = writer.label_name(target_index);
            self.emit_jump(
                writer,
                index,
                target_index,
                format!("beq {text} {case} {label}"),
            );
        }
        self.free_temps(&temps);
        Ok(())
    }

    fn handle_ret(&mut self, index: usize, writer: &mut OutputWriter) -> CompileResult<()> {
        let returns_value = self.method.returns.returns_value();
        if self.inline {
            if returns_value {
                let value = self.pop()?;
                let sink = self.return_sink.ok_or_else(|| {
                    CompileError::InternalInvariant(format!(
                        "inline `{}` returns a value but has no sink",
                        self.method.name
                    ))
                })?;
                match value {
                    StackValue::Deferred(expr) => {
                        let free = expr.free.clone();
                        self.free_temps(&free);
                        let code = expr.bind(&format!("r{sink}"));
                        self.emit(writer, index, &code);
                    }
                    StackValue::Register(register) if register == sink => {}
                    other => {
                        let (text, temps) = self.operand_text(&other, writer, index)?;
                        self.emit(writer, index, &format!("move r{sink} {text}"));
                        self.free_temps(&temps);
                    }
                }
            }
            self.emit(writer, index, &format!("j {}_end", self.label_prefix));
        } else {
            if returns_value {
                let value = self.pop()?;
                let (text, temps) = self.operand_text(&value, writer, index)?;
                self.emit(writer, index, &format!("push {text}"));
                self.free_temps(&temps);
            }
            self.emit(writer, index, "j ra");
        }
        Ok(())
    }

    fn handle_conv(&mut self, index: usize, writer: &mut OutputWriter) -> CompileResult<()> {
        let value = self.pop()?;
        if let StackValue::Static(v) = value {
            self.push(StackValue::number(v.trunc()));
            return Ok(());
        }
        let (text, temps) = self.operand_text(&value, writer, index)?;
        self.push(StackValue::Deferred(DeferredExpr::new(
            format!("trunc $ {text}"),
            temps,
        )));
        Ok(())
    }

    // ---- verification ----------------------------------------------------

    fn verify_branches(&self) -> CompileResult<()> {
        for &(from, to) in &self.branch_edges {
            let post = &self.post_states[from];
            let pre = &self.pre_states[to];
            if post.stack != pre.stack {
                return Err(CompileError::BranchInconsistent {
                    method: self.method.name.clone(),
                    from,
                    to,
                    message: format!(
                        "virtual stack differs: {} values at source, {} at target",
                        post.stack.len(),
                        pre.stack.len()
                    ),
                });
            }
            if post.registers != pre.registers {
                return Err(CompileError::BranchInconsistent {
                    method: self.method.name.clone(),
                    from,
                    to,
                    message: format!(
                        "register allocations differ: {:#06x} at source, {:#06x} at target",
                        post.registers.bits(),
                        pre.registers.bits()
                    ),
                });
            }
            for (slot, (source, target)) in post
                .local_values
                .iter()
                .zip(pre.local_values.iter())
                .enumerate()
            {
                if let Some(expected) = target {
                    if source.as_ref() != Some(expected) {
                        return Err(CompileError::BranchInconsistent {
                            method: self.method.name.clone(),
                            from,
                            to,
                            message: format!("local {slot} assumed {expected:?} at target"),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Compile-time arithmetic on two already-static operands, following
/// IC10's numeric behaviour (booleans collapse to 0/1, bit operations
/// go through the integer domain).
pub(crate) fn fold_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        BinaryOp::And => ((a != 0.0) && (b != 0.0)) as i64 as f64,
        BinaryOp::Or => ((a != 0.0) || (b != 0.0)) as i64 as f64,
        BinaryOp::Xor => ((a as i64) ^ (b as i64)) as f64,
        BinaryOp::Shl => ((a as i64).wrapping_shl(b as u32)) as f64,
        BinaryOp::Shr => ((a as i64).wrapping_shr(b as u32)) as f64,
        BinaryOp::ShrUn => ((a as i64 as u64).wrapping_shr(b as u32)) as f64,
    }
}

/// Compile a method standalone (non-inline) and memoise the result.
///
/// Returns the callee's all-used register set, or `None` when the
/// method is already on the compile stack (a dependency cycle) and the
/// caller must assume the worst.
pub fn ensure_method_compiled(
    env: CompileEnv<'_, '_>,
    name: &str,
) -> CompileResult<Option<RegisterSet>> {
    if let Some(all_used) = env.registry.all_used(name) {
        return Ok(Some(all_used));
    }
    if env.registry.is_in_progress(name) {
        debug!("`{name}` is already being compiled; assuming full clobber");
        return Ok(None);
    }
    let index = env.class.find_method(name).ok_or_else(|| {
        CompileError::unsupported(&env.class.name, format!("call to unknown method `{name}`"))
    })?;
    let method = &env.class.methods[index];
    env.registry.mark_in_progress(name);
    let outcome: CompileResult<CompiledMethod> = (|| {
        let mut ctx =
            ExecutionContext::new(env, method, name, env.layout.reserved, CompileMode::Function)?;
        let mut writer = OutputWriter::new(name, ctx.instruction_count());
        ctx.compile(&mut writer)?;
        env.session.record_method();
        Ok(CompiledMethod {
            text: writer.assemble(),
            all_used: ctx.all_used_registers(),
        })
    })();
    env.registry.clear_in_progress(name);
    let compiled = outcome?;
    let all_used = compiled.all_used;
    env.registry.insert(name, compiled);
    Ok(Some(all_used))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_folds_match_direct_evaluation() {
        assert_eq!(fold_binary(BinaryOp::Add, 2.5, 0.5), 3.0);
        assert_eq!(fold_binary(BinaryOp::Sub, 2.5, 0.5), 2.0);
        assert_eq!(fold_binary(BinaryOp::Mul, 4.0, 0.25), 1.0);
        assert_eq!(fold_binary(BinaryOp::Div, 9.0, 2.0), 4.5);
        assert_eq!(fold_binary(BinaryOp::Rem, 9.0, 4.0), 1.0);
    }

    #[test]
    fn boolean_folds_collapse_to_unit_values() {
        assert_eq!(fold_binary(BinaryOp::And, 3.0, 2.0), 1.0);
        assert_eq!(fold_binary(BinaryOp::And, 3.0, 0.0), 0.0);
        assert_eq!(fold_binary(BinaryOp::Or, 0.0, 0.0), 0.0);
        assert_eq!(fold_binary(BinaryOp::Or, 0.0, 7.0), 1.0);
    }

    #[test]
    fn bit_folds_go_through_the_integer_domain() {
        assert_eq!(fold_binary(BinaryOp::Xor, 6.0, 3.0), 5.0);
        assert_eq!(fold_binary(BinaryOp::Shl, 1.0, 4.0), 16.0);
        assert_eq!(fold_binary(BinaryOp::Shr, -16.0, 2.0), -4.0);
        assert_eq!(fold_binary(BinaryOp::ShrUn, 16.0, 2.0), 4.0);
    }
}
