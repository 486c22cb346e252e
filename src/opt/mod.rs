// This module rewrites assembled IC10 programs. NormaliseJumps first makes
// every static jump target a label, so later passes never reason about raw
// line numbers. ControlFlow uses the flow analysis to rewrite dead-return
// jump-and-links into plain jumps, lay blocks out greedily behind their
// natural predecessors and drop unreachable blocks. RedundantJumps and
// RedundantLabels clean up the obvious leftovers, and a final peephole runs
// to fixed point: pop/push ra pairs, jumps to the next line, one-line jump
// blocks threaded through, chained labels merged, unused labels and
// jump-shadowed dead code removed. Every pass reports truthfully whether it
// changed the program, and the whole pipeline is idempotent.

//! IC10 optimiser passes.

use log::debug;

use crate::core::error::{CompileError, CompileResult};
use crate::core::session::CompilationSession;
use crate::flow::FlowAnalysis;
use crate::isa::{Behaviour, Condition, Opcode, Operand, Program, Register};

/// Optimise a parsed program.
pub fn optimise(program: Program) -> CompileResult<Program> {
    optimise_with_session(program, None)
}

/// Optimise assembled text, returning the rewritten text.
pub fn optimise_text(text: &str, session: Option<&CompilationSession>) -> CompileResult<String> {
    Ok(optimise_with_session(Program::parse(text)?, session)?.render())
}

/// Full pass pipeline: normalise, reorder, strip, then peephole to
/// fixed point.
pub fn optimise_with_session(
    mut program: Program,
    session: Option<&CompilationSession>,
) -> CompileResult<Program> {
    let before = program.len();
    normalise_jumps(&mut program)?;
    program = control_flow(program)?;
    redundant_jumps(&mut program);
    redundant_labels(&mut program);
    peephole(&mut program, session);
    if let Some(session) = session {
        session.record_removed_instructions(before.saturating_sub(program.len()));
    }
    debug!("optimised {before} instructions down to {}", program.len());
    Ok(program)
}

/// The target instruction of a statically resolvable jump at `pc`.
fn static_target(program: &Program, pc: usize) -> Option<usize> {
    let instruction = &program.instructions[pc];
    if !matches!(
        instruction.opcode.behaviour(),
        Behaviour::Jump | Behaviour::JumpAndLink
    ) {
        return None;
    }
    match instruction.branch_target() {
        Some(Operand::Name(name)) => program.find_label(name),
        _ => None,
    }
}

fn find_line_index(program: &Program, line: i64) -> CompileResult<usize> {
    if line < 0 {
        return Err(CompileError::InternalInvariant(format!(
            "jump to negative line {line}"
        )));
    }
    program
        .instructions
        .iter()
        .position(|instruction| instruction.source_line == line as usize)
        .ok_or_else(|| {
            CompileError::InternalInvariant(format!("jump to line {line} matches no instruction"))
        })
}

/// Rewrite relative jumps to absolute label jumps, and numeric absolute
/// targets to labels, inserting labels where none exist.
pub fn normalise_jumps(program: &mut Program) -> CompileResult<bool> {
    // (pc, target index, absolute opcode replacing a relative one)
    let mut rewrites: Vec<(usize, usize, Option<Opcode>)> = Vec::new();
    for (pc, instruction) in program.instructions.iter().enumerate() {
        match instruction.opcode.behaviour() {
            Behaviour::RelativeJump => {
                let offset = instruction
                    .operands
                    .last()
                    .and_then(Operand::as_number)
                    .ok_or_else(|| {
                        CompileError::InternalInvariant(format!(
                            "relative jump `{instruction}` needs a static offset"
                        ))
                    })?;
                let target =
                    find_line_index(program, instruction.source_line as i64 + offset as i64)?;
                let absolute = Opcode::for_behaviour(Behaviour::Jump, instruction.opcode.condition())
                    .expect("every relative jump has an absolute form");
                rewrites.push((pc, target, Some(absolute)));
            }
            Behaviour::Jump | Behaviour::JumpAndLink => {
                if let Some(Operand::Number(line)) = instruction.branch_target() {
                    let target = find_line_index(program, *line as i64)?;
                    rewrites.push((pc, target, None));
                }
            }
            _ => {}
        }
    }

    let changed = !rewrites.is_empty();
    let mut fresh = 0usize;
    for (pc, target, replacement) in rewrites {
        let existing = program.labels_at(target).next().map(|l| l.name.clone());
        let label = match existing {
            Some(name) => name,
            None => {
                let mut name = format!("norm_{fresh}");
                while program.find_label(&name).is_some() {
                    fresh += 1;
                    name = format!("norm_{fresh}");
                }
                fresh += 1;
                program.insert_label(name.clone(), target);
                name
            }
        };
        let instruction = &mut program.instructions[pc];
        if let Some(opcode) = replacement {
            instruction.opcode = opcode;
        }
        let last = instruction.operands.len() - 1;
        instruction.operands[last] = Operand::Name(label);
    }
    Ok(changed)
}

/// Tail-call rewriting, greedy block layout, unreachable elimination.
pub fn control_flow(mut program: Program) -> CompileResult<Program> {
    if program.is_empty() {
        return Ok(program);
    }

    // a jal with no return path back to its resume point never comes
    // back; lower it to a plain jump
    let mut flow = FlowAnalysis::build(&program)?;
    let is_ra_jump = |pc: usize| {
        let instruction = &program.instructions[pc];
        instruction.opcode.behaviour() == Behaviour::Jump
            && matches!(
                instruction.branch_target(),
                Some(Operand::Register(Register::Ra))
            )
    };
    let mut dead_links = Vec::new();
    for pc in 0..program.len() {
        if program.instructions[pc].opcode.behaviour() != Behaviour::JumpAndLink {
            continue;
        }
        let resume = pc + 1;
        let returns = resume < program.len()
            && flow.enters(resume).iter().any(|&(from, _)| is_ra_jump(from));
        if !returns {
            dead_links.push(pc);
        }
    }
    let rewrote_links = !dead_links.is_empty();
    for pc in dead_links {
        program.instructions[pc].opcode = Opcode::J;
    }
    if rewrote_links {
        flow = FlowAnalysis::build(&program)?;
    }

    let blocks = &flow.blocks;
    let reachable: Vec<bool> = blocks
        .iter()
        .map(|block| flow.is_reachable(block.start))
        .collect();

    let mut placed = vec![false; blocks.len()];
    let mut ordered = Vec::with_capacity(blocks.len());
    ordered.push(0);
    placed[0] = true;
    loop {
        let last = *ordered.last().expect("entry block is placed");
        // eager fallthrough chain
        if let Some(follow) = blocks[last].natural_follow() {
            if !placed[follow] {
                ordered.push(follow);
                placed[follow] = true;
                continue;
            }
        }
        // any block entered only by taken jumps can be placed anywhere
        let next = (0..blocks.len()).find(|&candidate| {
            !placed[candidate]
                && reachable[candidate]
                && !blocks[candidate]
                    .enter_states
                    .iter()
                    .any(|enter| enter.natural && reachable[enter.block])
        });
        match next {
            Some(candidate) => {
                ordered.push(candidate);
                placed[candidate] = true;
            }
            None => break,
        }
    }
    if let Some(stranded) = (0..blocks.len()).find(|&b| reachable[b] && !placed[b]) {
        return Err(CompileError::InternalInvariant(format!(
            "block layout stranded reachable block {stranded}"
        )));
    }

    let identity: Vec<usize> = (0..blocks.len()).collect();
    if ordered == identity {
        return Ok(program);
    }

    let mut out = Program::blank();
    for &index in &ordered {
        let block = &blocks[index];
        out = out.append(program.slice(block.start, block.end));
    }
    let end = out.len();
    for label in program.labels_at(program.len()) {
        out.insert_label(label.name.clone(), end);
    }
    Ok(out)
}

/// Drop jumps whose static target is the next instruction.
pub fn redundant_jumps(program: &mut Program) -> bool {
    let mut changed = false;
    for pc in (0..program.len()).rev() {
        if program.instructions[pc].opcode.behaviour() != Behaviour::Jump {
            continue;
        }
        if static_target(program, pc) == Some(pc + 1) {
            program.remove_instruction(pc);
            changed = true;
        }
    }
    changed
}

/// Drop labels no operand names.
pub fn redundant_labels(program: &mut Program) -> bool {
    let names: Vec<String> = program
        .labels
        .iter()
        .map(|label| label.name.clone())
        .collect();
    let mut changed = false;
    for name in names {
        if !program.label_is_referenced(&name) {
            program.remove_label(&name);
            changed = true;
        }
    }
    changed
}

fn is_plain_jump(program: &Program, pc: usize) -> bool {
    let instruction = &program.instructions[pc];
    instruction.opcode == Opcode::J
}

fn is_unconditional_jump(program: &Program, pc: usize) -> bool {
    let instruction = &program.instructions[pc];
    matches!(
        instruction.opcode.behaviour(),
        Behaviour::Jump | Behaviour::RelativeJump
    ) && instruction.opcode.condition() == Condition::None
}

/// `pop ra` immediately followed by `push ra`, with no label between
/// (a jump in between could enter with an unbalanced stack).
fn strip_stack_churn(program: &mut Program) -> bool {
    for pc in 0..program.len().saturating_sub(1) {
        let first = &program.instructions[pc];
        let second = &program.instructions[pc + 1];
        let pops_ra = first.opcode == Opcode::Pop
            && first.operands.first() == Some(&Operand::Register(Register::Ra));
        let pushes_ra = second.opcode == Opcode::Push
            && second.operands.first() == Some(&Operand::Register(Register::Ra));
        if pops_ra && pushes_ra && program.labels_at(pc + 1).next().is_none() {
            program.remove_instruction(pc + 1);
            program.remove_instruction(pc);
            return true;
        }
    }
    false
}

/// A label whose section is a single unconditional `j` can stand in for
/// any plain `j` that references it.
fn thread_tiny_blocks(program: &mut Program) -> bool {
    let mut changed = false;
    let candidates: Vec<(String, usize)> = program
        .labels
        .iter()
        .filter(|label| label.index < program.len())
        .map(|label| (label.name.clone(), label.index))
        .collect();
    for (name, index) in candidates {
        if !is_plain_jump(program, index) {
            continue;
        }
        let replacement = program.instructions[index].operands.clone();
        // a self-loop must not thread into itself
        if replacement.first().and_then(Operand::as_name) == Some(name.as_str()) {
            continue;
        }
        for pc in 0..program.len() {
            if pc == index || !is_plain_jump(program, pc) {
                continue;
            }
            if program.instructions[pc].operands.first().and_then(Operand::as_name)
                == Some(name.as_str())
            {
                program.instructions[pc].operands = replacement.clone();
                changed = true;
            }
        }
    }
    changed
}

/// Two labels on the same instruction collapse into the first.
fn merge_chained_labels(program: &mut Program) -> bool {
    for first in 0..program.labels.len() {
        for second in (first + 1)..program.labels.len() {
            if program.labels[first].index != program.labels[second].index {
                continue;
            }
            let keep = program.labels[first].name.clone();
            let drop = program.labels[second].name.clone();
            program.rename_label_references(&drop, &keep);
            program.remove_label(&drop);
            return true;
        }
    }
    false
}

/// Unlabelled code right after an unconditional jump can never run.
fn strip_dead_after_jump(program: &mut Program) -> bool {
    for pc in (1..program.len()).rev() {
        if program.labels_at(pc).next().is_some() {
            continue;
        }
        if is_unconditional_jump(program, pc - 1) {
            program.remove_instruction(pc);
            return true;
        }
    }
    false
}

/// Run the local rules to fixed point.
pub fn peephole(program: &mut Program, session: Option<&CompilationSession>) -> bool {
    let mut any = false;
    loop {
        let mut changed = false;
        changed |= strip_stack_churn(program);
        changed |= redundant_jumps(program);
        changed |= thread_tiny_blocks(program);
        changed |= merge_chained_labels(program);
        changed |= redundant_labels(program);
        changed |= strip_dead_after_jump(program);
        if !changed {
            break;
        }
        any = true;
        if let Some(session) = session {
            session.record_optimiser_iteration();
        }
    }
    any
}
