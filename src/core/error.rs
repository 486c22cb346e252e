//! Error types for the IC10 compiler.
//!
//! Using thiserror for more idiomatic error handling. All failures are
//! fatal at the method level; the driver converts them into per-class
//! diagnostics so the remaining classes still compile.

use thiserror::Error;

/// Main error type for SBIL compilation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("malformed SBIL at byte offset {offset}: {message}")]
    Decoder { offset: u32, message: String },

    #[error("unsupported construct in `{method}`: {message}")]
    UnsupportedConstruct { method: String, message: String },

    #[error("register file exhausted while compiling `{method}`")]
    RegisterExhausted { method: String },

    #[error("inconsistent branch il_{from} -> il_{to} in `{method}`: {message}")]
    BranchInconsistent {
        method: String,
        from: usize,
        to: usize,
        message: String,
    },

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("malformed prefab catalogue: {0}")]
    Catalogue(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

impl CompileError {
    /// Shorthand for the most common failure in the symbolic evaluator.
    pub fn unsupported(method: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::UnsupportedConstruct {
            method: method.into(),
            message: message.into(),
        }
    }

    pub fn decoder(offset: u32, message: impl Into<String>) -> Self {
        CompileError::Decoder {
            offset,
            message: message.into(),
        }
    }
}
