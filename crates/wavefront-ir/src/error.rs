//! Error types for the wavefront IR.

use crate::binding::ShaderStage;

/// Errors that can occur when constructing or inspecting IR.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// A handle index is out of bounds for its arena.
    #[error("handle index {index} out of bounds (arena size: {size})")]
    BadHandle { index: usize, size: usize },

    /// A type mismatch was detected.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// The module has no entry point for a stage.
    #[error("no entry point for the {} stage", .0.name())]
    MissingEntryPoint(ShaderStage),
}
