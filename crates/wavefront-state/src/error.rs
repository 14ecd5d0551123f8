//! Error types for pipeline state construction.

use crate::resource::ResourceNodeType;

/// Errors raised while configuring a [`PipelineState`](crate::PipelineState).
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// A wave size other than 32 or 64 was requested.
    #[error("unsupported wave size {0} (expected 32 or 64)")]
    InvalidWaveSize(u32),

    /// Wave32 requested on a target without it.
    #[error("wave size 32 requires gfx10 or later (target is gfx{major}.{minor})")]
    Wave32Unsupported { major: u32, minor: u32 },

    /// A GFX IP version string could not be parsed.
    #[error("invalid gfx ip version '{0}' (expected MAJOR or MAJOR.MINOR)")]
    BadGfxIp(String),

    /// Two declarations at one set/binding cannot share a descriptor slot.
    #[error(
        "set {set} binding {binding}: cannot combine {existing:?} with {new:?} in one descriptor slot"
    )]
    AutoLayoutConflict {
        set: u32,
        binding: u32,
        existing: ResourceNodeType,
        new: ResourceNodeType,
    },
}
