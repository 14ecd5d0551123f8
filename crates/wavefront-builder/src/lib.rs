//! Lowering builder for wavefront shaders.
//!
//! A [`Builder`] appends hardware-level IR to one entry point while
//! recording what the stage uses in the [`PipelineState`]. Operations are
//! grouped by concern: arithmetic, descriptors, images, inputs and outputs,
//! matrices, subgroups and a few stage-specific odds and ends.
//!
//! [`PipelineState`]: wavefront_state::PipelineState

mod arith;
mod base;
mod desc;
mod error;
mod image;
mod inout;
mod matrix;
mod misc;
mod scalar;
mod subgroup;
#[cfg(test)]
mod testing;

pub use arith::RoundingMode;
pub use base::Builder;
pub use desc::{DescKind, DescriptorPtr};
pub use error::BuildError;
pub use image::{
    ATOMIC_OP_COMPARE_SWAP, IMG_DATA_FORMAT_32, IMG_DATA_FORMAT_32_32,
    IMG_DATA_FORMAT_32_32_32_32, ImageAddress,
};
pub use inout::{InOutInfo, builtin_valid_mask, is_builtin_input, is_builtin_output};
pub use subgroup::{DppCtrl, GroupArithOp};
