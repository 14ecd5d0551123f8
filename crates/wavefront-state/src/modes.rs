//! Per-stage shader modes.

/// Denormal handling of floating-point operations.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub enum FpDenormMode {
    #[default]
    DontCare,
    /// Denormals are preserved on input and output.
    Preserve,
    /// Input denormals are flushed to zero.
    FlushIn,
    /// Output denormals are flushed to zero.
    FlushOut,
    FlushInOut,
}

impl FpDenormMode {
    /// Whether the mode flushes denormals anywhere.
    pub fn flushes(self) -> bool {
        matches!(self, Self::FlushIn | Self::FlushOut | Self::FlushInOut)
    }
}

/// Modes declared by one shader stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderModes {
    pub fp16_denorm: FpDenormMode,
    pub fp32_denorm: FpDenormMode,
    pub fp64_denorm: FpDenormMode,
    /// Compute workgroup size.
    pub workgroup_size: [u32; 3],
    /// Geometry output vertex count per invocation.
    pub gs_output_vertices: u32,
    /// Tessellation control output vertices per patch.
    pub tcs_output_vertices: u32,
}

impl Default for ShaderModes {
    fn default() -> Self {
        Self {
            fp16_denorm: FpDenormMode::DontCare,
            fp32_denorm: FpDenormMode::DontCare,
            fp64_denorm: FpDenormMode::DontCare,
            workgroup_size: [1, 1, 1],
            gs_output_vertices: 0,
            tcs_output_vertices: 0,
        }
    }
}

impl ShaderModes {
    /// Denormal mode for floats of `bits` width.
    pub fn denorm_mode(&self, bits: u32) -> FpDenormMode {
        match bits {
            16 => self.fp16_denorm,
            64 => self.fp64_denorm,
            _ => self.fp32_denorm,
        }
    }

    /// Number of invocations in a compute workgroup.
    pub fn workgroup_invocations(&self) -> u32 {
        self.workgroup_size.iter().product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denorm_by_width() {
        let modes = ShaderModes {
            fp32_denorm: FpDenormMode::FlushInOut,
            ..ShaderModes::default()
        };
        assert!(modes.denorm_mode(32).flushes());
        assert!(!modes.denorm_mode(16).flushes());
        assert_eq!(modes.workgroup_invocations(), 1);
    }
}
