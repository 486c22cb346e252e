//! Immutable virtual operand stack.
//!
//! Push and pop return new stacks instead of mutating, so the evaluator
//! can keep per-instruction snapshots and the branch-consistency check
//! can compare them structurally.

use super::error::{CompileError, CompileResult};
use super::value::StackValue;

/// Ordered sequence of symbolic values; index 0 is the stack bottom.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VirtualStack {
    values: Vec<StackValue>,
}

impl VirtualStack {
    pub fn new() -> Self {
        VirtualStack { values: Vec::new() }
    }

    pub fn from_values(values: Vec<StackValue>) -> Self {
        VirtualStack { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&self, value: StackValue) -> VirtualStack {
        let mut values = self.values.clone();
        values.push(value);
        VirtualStack { values }
    }

    pub fn pop(&self) -> CompileResult<(StackValue, VirtualStack)> {
        let mut values = self.values.clone();
        match values.pop() {
            Some(value) => Ok((value, VirtualStack { values })),
            None => Err(CompileError::InternalInvariant(
                "operand stack underflow".into(),
            )),
        }
    }

    /// Pop two values; the first returned is the former top of stack.
    pub fn pop2(&self) -> CompileResult<(StackValue, StackValue, VirtualStack)> {
        let (top, rest) = self.pop()?;
        let (next, rest) = rest.pop()?;
        Ok((top, next, rest))
    }

    /// Pop `n` values, returned top-of-stack first.
    pub fn pop_n(&self, n: usize) -> CompileResult<(Vec<StackValue>, VirtualStack)> {
        if n > self.values.len() {
            return Err(CompileError::InternalInvariant(format!(
                "operand stack underflow: need {n}, have {}",
                self.values.len()
            )));
        }
        let mut values = self.values.clone();
        let split = values.len() - n;
        let mut popped: Vec<StackValue> = values.split_off(split);
        popped.reverse();
        Ok((popped, VirtualStack { values }))
    }

    pub fn peek(&self) -> Option<&StackValue> {
        self.values.last()
    }

    pub fn values(&self) -> &[StackValue] {
        &self.values
    }
}
