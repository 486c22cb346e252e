// This module provides arena-based compilation session management using the
// bumpalo crate. One session lives for the duration of a program compile: it
// owns the arena that label prefixes are interned into, and it accumulates
// statistics (methods compiled, fragments emitted, inline fallbacks,
// optimiser iterations) that the CLI surfaces at debug log level. Method
// compiles themselves are short-lived; everything they allocate beyond the
// interned strings is dropped when the method text is appended to the
// global output stream.

//! Arena-based compilation session management.

use bumpalo::Bump;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

/// Counters accumulated over one program compile.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionStats {
    pub methods_compiled: usize,
    pub fragments_emitted: usize,
    pub inline_expansions: usize,
    pub inline_fallbacks: usize,
    pub optimiser_iterations: usize,
    pub instructions_removed: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} methods, {} fragments, {} inlined ({} fell back to call stack), \
             {} optimiser iterations, {} instructions removed",
            self.methods_compiled,
            self.fragments_emitted,
            self.inline_expansions,
            self.inline_fallbacks,
            self.optimiser_iterations,
            self.instructions_removed
        )
    }
}

/// Shared state for one program compile.
///
/// All interned strings live in the arena and share the session
/// lifetime, so label prefixes can be passed around as plain `&str`
/// without ownership juggling.
pub struct CompilationSession<'arena> {
    arena: &'arena Bump,
    stats: RefCell<SessionStats>,
    interned: RefCell<HashMap<String, &'arena str>>,
}

impl<'arena> CompilationSession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        CompilationSession {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned: RefCell::new(HashMap::new()),
        }
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Intern a string in the arena, deduplicating repeats.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut interned = self.interned.borrow_mut();
        if let Some(&existing) = interned.get(s) {
            return existing;
        }
        let stored = self.arena.alloc_str(s);
        interned.insert(s.to_string(), stored);
        stored
    }

    pub fn stats(&self) -> SessionStats {
        *self.stats.borrow()
    }

    pub fn record_method(&self) {
        self.stats.borrow_mut().methods_compiled += 1;
    }

    pub fn record_fragments(&self, count: usize) {
        self.stats.borrow_mut().fragments_emitted += count;
    }

    pub fn record_inline(&self, fell_back: bool) {
        let mut stats = self.stats.borrow_mut();
        if fell_back {
            stats.inline_fallbacks += 1;
        } else {
            stats.inline_expansions += 1;
        }
    }

    pub fn record_optimiser_iteration(&self) {
        self.stats.borrow_mut().optimiser_iterations += 1;
    }

    pub fn record_removed_instructions(&self, count: usize) {
        self.stats.borrow_mut().instructions_removed += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let a = session.intern_str("main_inl0");
        let b = session.intern_str("main_inl0");
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn stats_accumulate() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        session.record_method();
        session.record_fragments(12);
        session.record_inline(false);
        session.record_inline(true);
        let stats = session.stats();
        assert_eq!(stats.methods_compiled, 1);
        assert_eq!(stats.fragments_emitted, 12);
        assert_eq!(stats.inline_expansions, 1);
        assert_eq!(stats.inline_fallbacks, 1);
    }
}
