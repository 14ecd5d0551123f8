//! Builder error types.

use wavefront_ir::IrError;

/// Errors raised while lowering an operation.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// An operand has a type the operation cannot take.
    #[error("{op}: expected {expected}, found {found}")]
    UnexpectedType {
        op: &'static str,
        expected: &'static str,
        found: String,
    },

    /// Operand shapes do not agree.
    #[error("{op}: {detail}")]
    ShapeMismatch { op: &'static str, detail: String },

    /// An operand index is out of range for the wrapped instruction.
    #[error("waterfall operand {index} out of range ({count} operands)")]
    BadOperandIndex { index: usize, count: usize },

    /// A waterfall was requested for an expression that was already emitted.
    #[error("waterfall target {0} must be the last expression built")]
    WaterfallNotPending(usize),

    #[error(transparent)]
    Ir(#[from] IrError),
}
