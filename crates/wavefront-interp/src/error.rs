//! Interpreter error types.

/// Errors raised while executing a function.
#[derive(Debug, thiserror::Error)]
pub enum InterpError {
    /// An expression was used before any `Emit` evaluated it.
    #[error("expression [{0}] used before it was evaluated")]
    NotEvaluated(usize),

    /// An argument value was not supplied.
    #[error("no value supplied for argument {0}")]
    MissingArgument(u32),

    /// An operand had a shape the operation does not accept.
    #[error("{op}: {detail}")]
    TypeMismatch { op: &'static str, detail: String },

    /// A pointer did not address anything loadable.
    #[error("invalid pointer access: {0}")]
    BadPointer(String),

    /// The host does not implement a call.
    #[error("unsupported call {0}")]
    UnsupportedCall(String),

    /// A loop ran more iterations than the interpreter allows.
    #[error("loop exceeded {0} iterations")]
    LoopLimit(u32),
}
