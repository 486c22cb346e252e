// This module computes the basic-block graph of an emitted IC10 program by
// abstract interpretation. The only abstract component is the return
// address: jump-and-link sets it, `j ra` consumes it, and when it is
// unknown a `j ra` conservatively targets every instruction that follows a
// jump-and-link anywhere in the program. The analysis records enter and
// follow edges per instruction, merges disagreeing predecessor states to
// least-known, and cuts the instruction sequence into single-entry
// single-exit blocks tagged with natural (fallthrough) edges. Blocks are
// never mutated; the optimiser builds new programs from them.

//! Flow analysis: block graph construction over IC10 programs.

use std::collections::{BTreeSet, VecDeque};

use crate::core::error::{CompileError, CompileResult};
use crate::isa::{Behaviour, Condition, Operand, Program, Register};

/// Abstract state carried along control edges. `None` is ⊥.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowState {
    pub return_address: Option<usize>,
}

impl FlowState {
    /// Least-known merge: disagreement decays to ⊥.
    pub fn merge(self, other: FlowState) -> FlowState {
        if self.return_address == other.return_address {
            self
        } else {
            FlowState {
                return_address: None,
            }
        }
    }
}

/// An edge into a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEnter {
    /// Predecessor block.
    pub block: usize,
    /// True when control flows in by sequence rather than a taken jump.
    pub natural: bool,
    pub state: FlowState,
}

/// An edge out of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFollow {
    pub block: usize,
    pub natural: bool,
}

/// A maximal run of instructions with a single entry at its head and an
/// exit only at its tail. `start..end` indexes the analysed program.
#[derive(Debug, Clone)]
pub struct Block {
    pub start: usize,
    pub end: usize,
    pub enter_states: Vec<BlockEnter>,
    pub follow_states: Vec<BlockFollow>,
    pub exit_state: FlowState,
}

impl Block {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The unique block this one falls through into, if any.
    pub fn natural_follow(&self) -> Option<usize> {
        self.follow_states
            .iter()
            .find(|follow| follow.natural)
            .map(|follow| follow.block)
    }

    pub fn natural_enter(&self) -> Option<usize> {
        self.enter_states
            .iter()
            .find(|enter| enter.natural)
            .map(|enter| enter.block)
    }
}

/// The block graph of one program snapshot.
pub struct FlowAnalysis {
    pub blocks: Vec<Block>,
    block_of: Vec<usize>,
    enters: Vec<Vec<(usize, bool)>>,
    follows: Vec<Vec<(usize, bool)>>,
    states: Vec<Option<FlowState>>,
}

impl FlowAnalysis {
    /// Abstractly interpret `program` from instruction 0 and cut blocks.
    pub fn build(program: &Program) -> CompileResult<FlowAnalysis> {
        let n = program.len();
        let mut enters: Vec<Vec<(usize, bool)>> = vec![Vec::new(); n];
        let mut follows: Vec<Vec<(usize, bool)>> = vec![Vec::new(); n];
        let mut states: Vec<Option<FlowState>> = vec![None; n];

        if n == 0 {
            return Ok(FlowAnalysis {
                blocks: Vec::new(),
                block_of: Vec::new(),
                enters,
                follows,
                states,
            });
        }

        // `j ra` with an unknown return address may resume anywhere a
        // jump-and-link could have come from
        let post_link: Vec<usize> = program
            .instructions
            .iter()
            .enumerate()
            .filter(|(_, i)| i.opcode.behaviour() == Behaviour::JumpAndLink)
            .map(|(pc, _)| pc + 1)
            .filter(|&pc| pc < n)
            .collect();

        states[0] = Some(FlowState::default());
        let mut worklist = VecDeque::from([0usize]);
        while let Some(pc) = worklist.pop_front() {
            let state = states[pc].expect("worklist entries are visited");
            for (to, natural, new_state) in successors(program, pc, state, &post_link)? {
                if !follows[pc].contains(&(to, natural)) {
                    follows[pc].push((to, natural));
                }
                if !enters[to].contains(&(pc, natural)) {
                    enters[to].push((pc, natural));
                }
                let merged = match states[to] {
                    None => new_state,
                    Some(old) => old.merge(new_state),
                };
                if states[to] != Some(merged) {
                    states[to] = Some(merged);
                    worklist.push_back(to);
                }
            }
        }

        // block boundaries
        let mut starts: BTreeSet<usize> = BTreeSet::new();
        starts.insert(0);
        for pc in 1..n {
            let single_natural = enters[pc].len() == 1 && enters[pc][0] == (pc - 1, true);
            if !single_natural {
                starts.insert(pc);
            }
        }
        for pc in 0..n {
            let falls_through = follows[pc].len() == 1 && follows[pc][0] == (pc + 1, true);
            if !falls_through && pc + 1 < n {
                starts.insert(pc + 1);
            }
        }

        let starts: Vec<usize> = starts.into_iter().collect();
        let mut block_of = vec![0usize; n];
        let mut ranges = Vec::with_capacity(starts.len());
        for (index, &start) in starts.iter().enumerate() {
            let end = starts.get(index + 1).copied().unwrap_or(n);
            for pc in start..end {
                block_of[pc] = index;
            }
            ranges.push((start, end));
        }

        let edge_state = |from: usize, to: usize| -> FlowState {
            let instruction = &program.instructions[from];
            match instruction.opcode.behaviour() {
                Behaviour::JumpAndLink => FlowState {
                    return_address: Some(from + 1),
                },
                Behaviour::Jump
                    if matches!(
                        instruction.branch_target(),
                        Some(Operand::Register(Register::Ra))
                    ) && to != from + 1 =>
                {
                    FlowState::default()
                }
                _ => states[from].unwrap_or_default(),
            }
        };

        let blocks = ranges
            .iter()
            .map(|&(start, end)| {
                let tail = end - 1;
                Block {
                    start,
                    end,
                    enter_states: enters[start]
                        .iter()
                        .map(|&(from, natural)| BlockEnter {
                            block: block_of[from],
                            natural,
                            state: edge_state(from, start),
                        })
                        .collect(),
                    follow_states: follows[tail]
                        .iter()
                        .map(|&(to, natural)| BlockFollow {
                            block: block_of[to],
                            natural,
                        })
                        .collect(),
                    exit_state: states[tail].unwrap_or_default(),
                }
            })
            .collect();

        Ok(FlowAnalysis {
            blocks,
            block_of,
            enters,
            follows,
            states,
        })
    }

    pub fn block_of(&self, pc: usize) -> usize {
        self.block_of[pc]
    }

    pub fn enters(&self, pc: usize) -> &[(usize, bool)] {
        &self.enters[pc]
    }

    pub fn follows(&self, pc: usize) -> &[(usize, bool)] {
        &self.follows[pc]
    }

    pub fn is_reachable(&self, pc: usize) -> bool {
        self.states[pc].is_some()
    }

    pub fn state_at(&self, pc: usize) -> Option<FlowState> {
        self.states[pc]
    }
}

fn label_target(program: &Program, name: &str) -> CompileResult<Option<usize>> {
    let index = program.find_label(name).ok_or_else(|| {
        CompileError::InternalInvariant(format!("unresolved label `{name}`"))
    })?;
    Ok((index < program.len()).then_some(index))
}

fn line_target(program: &Program, line: i64) -> CompileResult<usize> {
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

fn successors(
    program: &Program,
    pc: usize,
    state: FlowState,
    post_link: &[usize],
) -> CompileResult<Vec<(usize, bool, FlowState)>> {
    let n = program.len();
    let instruction = &program.instructions[pc];
    let behaviour = instruction.opcode.behaviour();
    let condition = instruction.opcode.condition();
    let mut out = Vec::new();

    match behaviour {
        Behaviour::Jump => {
            match instruction.branch_target().expect("jumps carry a target") {
                Operand::Register(Register::Ra) => match state.return_address {
                    Some(ra) => {
                        if ra < n {
                            out.push((ra, false, FlowState::default()));
                        }
                    }
                    None => {
                        for &resume in post_link {
                            out.push((resume, false, FlowState::default()));
                        }
                    }
                },
                Operand::Name(name) => {
                    if let Some(target) = label_target(program, name)? {
                        out.push((target, false, state));
                    }
                }
                Operand::Number(line) => {
                    out.push((line_target(program, *line as i64)?, false, state));
                }
                other => {
                    return Err(CompileError::InternalInvariant(format!(
                        "jump through dynamic target `{other}`"
                    )))
                }
            }
            if condition != Condition::None && pc + 1 < n {
                out.push((pc + 1, true, state));
            }
        }
        Behaviour::JumpAndLink => {
            let linked = FlowState {
                return_address: Some(pc + 1),
            };
            match instruction.branch_target().expect("jumps carry a target") {
                Operand::Name(name) => {
                    if let Some(target) = label_target(program, name)? {
                        out.push((target, false, linked));
                    }
                }
                Operand::Number(line) => {
                    out.push((line_target(program, *line as i64)?, false, linked));
                }
                other => {
                    return Err(CompileError::InternalInvariant(format!(
                        "jump-and-link through dynamic target `{other}`"
                    )))
                }
            }
        }
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
            let target = line_target(program, instruction.source_line as i64 + offset as i64)?;
            out.push((target, false, state));
            if condition != Condition::None && pc + 1 < n {
                out.push((pc + 1, true, state));
            }
        }
        _ => {
            if pc + 1 < n {
                out.push((pc + 1, true, state));
            }
        }
    }
    Ok(out)
}
