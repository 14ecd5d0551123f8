//! Target description and capability flags.

use std::fmt;
use std::str::FromStr;

use wavefront_ir::ShaderStage;

use crate::error::StateError;

/// A GFX IP version.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct GfxIp {
    pub major: u32,
    pub minor: u32,
}

impl GfxIp {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for GfxIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for GfxIp {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || StateError::BadGfxIp(s.to_string());
        let (major, minor) = match s.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (s, "0"),
        };
        let major = major.trim().parse().map_err(|_| bad())?;
        let minor = minor.trim().parse().map_err(|_| bad())?;
        Ok(Self { major, minor })
    }
}

/// Default dword3 of a buffer descriptor before gfx10: identity swizzle,
/// 32-bit float data.
pub const BUFFER_DWORD3_GFX9: u32 = 0x0002_7FAC;
/// Default dword3 of a buffer descriptor on gfx10: identity swizzle,
/// 32-bit float format, resource level 1, raw out-of-bounds checking.
pub const BUFFER_DWORD3_GFX10: u32 = 0x2101_6FAC;

/// What the target hardware offers.
///
/// Every capability is a public field so that callers can model targets that
/// differ from the defaults [`TargetInfo::for_gfx_ip`] derives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetInfo {
    pub gfx_ip: GfxIp,
    /// Wave size (32 or 64) per shader stage, indexed by [`ShaderStage::index`].
    pub wave_size: [u32; 6],
    /// DPP data-parallel moves.
    pub dpp: bool,
    /// DPP wave shifts, wave rotates and row broadcasts (removed in gfx10).
    pub dpp_row_broadcast: bool,
    /// `ds_bpermute`. From gfx10 it only spans 32 lanes, so a wave64
    /// shuffle cannot use it.
    pub bpermute: bool,
    /// `v_permlane16` and `v_permlanex16`.
    pub permlane: bool,
    /// Fused multiply-add is fast for 32-bit floats.
    pub fma_f32: bool,
    /// 1D images are addressed as 2D images with one row.
    pub treat_1d_as_2d: bool,
    /// Gather of 32-bit integer formats returns wrong texels unless the
    /// descriptor is patched to a scaled format.
    pub integer_gather_workaround: bool,
    /// Uniform registers available for user data.
    pub max_user_data: u32,
    /// dword3 used to expand a compact (two-dword) buffer descriptor.
    pub buffer_dword3: u32,
}

impl TargetInfo {
    /// Capability defaults for a GFX IP version, with wave64 in every stage.
    pub fn for_gfx_ip(major: u32, minor: u32) -> Self {
        Self {
            gfx_ip: GfxIp::new(major, minor),
            wave_size: [64; 6],
            dpp: major >= 8,
            dpp_row_broadcast: major == 8 || major == 9,
            bpermute: major >= 8,
            permlane: major >= 10,
            fma_f32: major >= 9,
            treat_1d_as_2d: major >= 9,
            integer_gather_workaround: major < 9,
            max_user_data: if major >= 9 { 32 } else { 16 },
            buffer_dword3: if major >= 10 {
                BUFFER_DWORD3_GFX10
            } else {
                BUFFER_DWORD3_GFX9
            },
        }
    }

    /// Wave size of `stage`.
    pub fn wave_size(&self, stage: ShaderStage) -> u32 {
        self.wave_size[stage.index()]
    }

    /// Sets the wave size of one stage.
    pub fn set_wave_size(&mut self, stage: ShaderStage, size: u32) -> Result<(), StateError> {
        match size {
            64 => {}
            32 if self.gfx_ip.major >= 10 => {}
            32 => {
                return Err(StateError::Wave32Unsupported {
                    major: self.gfx_ip.major,
                    minor: self.gfx_ip.minor,
                });
            }
            other => return Err(StateError::InvalidWaveSize(other)),
        }
        self.wave_size[stage.index()] = size;
        Ok(())
    }

    /// Sets the wave size of every stage.
    pub fn set_wave_size_all(&mut self, size: u32) -> Result<(), StateError> {
        for stage in ShaderStage::ALL {
            self.set_wave_size(stage, size)?;
        }
        Ok(())
    }

    /// Whether `ds_bpermute` covers a whole wave of `stage`.
    pub fn bpermute_spans_wave(&self, stage: ShaderStage) -> bool {
        self.bpermute && (self.gfx_ip.major < 10 || self.wave_size(stage) == 32)
    }
}

impl Default for TargetInfo {
    fn default() -> Self {
        Self::for_gfx_ip(9, 0)
    }
}
