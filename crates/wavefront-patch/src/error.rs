//! Error types for the patch passes.

use wavefront_ir::{IrError, ShaderStage};

/// Errors raised while patching a module.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// The internal arguments leave no room for the spill table pointer.
    #[error(
        "{} stage needs {needed} user-data registers but the target has {budget}",
        .stage.name()
    )]
    UserDataOverflow {
        stage: ShaderStage,
        needed: u32,
        budget: u32,
    },

    /// A front-end argument has no binding to map it to.
    #[error("argument {index} of the {} entry point has no binding", .stage.name())]
    UnboundArgument { stage: ShaderStage, index: u32 },

    /// The body refers to a user-data node the pipeline does not declare.
    #[error("{} stage refers to unknown user-data node {node}", .stage.name())]
    UnknownNode { stage: ShaderStage, node: u32 },

    /// Validation found structural problems.
    #[error("invalid {} entry point: {detail}", .stage.name())]
    Invalid { stage: ShaderStage, detail: String },

    #[error(transparent)]
    Ir(#[from] IrError),
}
