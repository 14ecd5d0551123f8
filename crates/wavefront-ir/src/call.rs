//! Lowered operations carried by [`Expression::Call`](crate::Expression::Call).
//!
//! Each callee documents the layout of its argument list. Optional operands
//! are present only when the corresponding flag on the callee says so.

use crate::binding::BuiltInKind;

/// Image dimensionality.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ImageDim {
    D1,
    D2,
    D3,
    Cube,
    D1Array,
    D2Array,
    D2Msaa,
    D2MsaaArray,
    CubeArray,
}

impl ImageDim {
    /// Number of coordinate components, counting the array layer, the
    /// sample index of multisampled images and the face of cube images.
    pub fn coord_components(self) -> u32 {
        match self {
            Self::D1 => 1,
            Self::D2 | Self::D1Array => 2,
            Self::D3 | Self::Cube | Self::D2Array | Self::D2Msaa => 3,
            Self::D2MsaaArray | Self::CubeArray => 4,
        }
    }

    pub fn is_array(self) -> bool {
        matches!(
            self,
            Self::D1Array | Self::D2Array | Self::D2MsaaArray | Self::CubeArray
        )
    }

    pub fn is_cube(self) -> bool {
        matches!(self, Self::Cube | Self::CubeArray)
    }

    pub fn is_msaa(self) -> bool {
        matches!(self, Self::D2Msaa | Self::D2MsaaArray)
    }
}

/// Flags on image operations.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct ImageFlags(u32);

impl ImageFlags {
    pub const EMPTY: Self = Self(0);
    pub const COHERENT: Self = Self(0x1);
    pub const VOLATILE: Self = Self(0x2);
    /// Integer texel results are signed.
    pub const SIGNED_RESULT: Self = Self(0x4);
    /// The image descriptor may differ between lanes.
    pub const NON_UNIFORM_IMAGE: Self = Self(0x8);
    /// The sampler descriptor may differ between lanes.
    pub const NON_UNIFORM_SAMPLER: Self = Self(0x10);
    /// Subpass input: add the fragment coordinate to the coordinate.
    pub const ADD_FRAG_COORD: Self = Self(0x20);
    /// Subpass input: use the view index as array layer under multiview.
    pub const CHECK_MULTI_VIEW: Self = Self(0x40);

    /// Returns `true` if `self` contains all flags in `other`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no flags are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for ImageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ImageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Optional operands of a sample or gather instruction.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct SampleOperands(u32);

impl SampleOperands {
    pub const NONE: Self = Self(0);
    pub const OFFSET: Self = Self(0x1);
    pub const BIAS: Self = Self(0x2);
    pub const COMPARE: Self = Self(0x4);
    pub const GRADIENT: Self = Self(0x8);
    pub const LOD: Self = Self(0x10);
    pub const LEVEL_ZERO: Self = Self(0x20);
    pub const MIN_LOD: Self = Self(0x40);

    /// Returns `true` if `self` contains all flags in `other`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no flags are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for SampleOperands {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for SampleOperands {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Image atomic operation codes.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum AtomicOp {
    Swap = 0,
    CompareSwap = 1,
    Add,
    Sub,
    SMin,
    UMin,
    SMax,
    UMax,
    And,
    Or,
    Xor,
    Inc,
    Dec,
}

/// Memory ordering of atomics and fences.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum AtomicOrdering {
    Monotonic,
    Acquire,
    Release,
    AcquireRelease,
    SequentiallyConsistent,
}

impl AtomicOrdering {
    pub fn has_release(self) -> bool {
        matches!(
            self,
            Self::Release | Self::AcquireRelease | Self::SequentiallyConsistent
        )
    }

    pub fn has_acquire(self) -> bool {
        matches!(
            self,
            Self::Acquire | Self::AcquireRelease | Self::SequentiallyConsistent
        )
    }
}

/// Interpolation mode of a fragment input.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub enum InterpMode {
    #[default]
    Smooth,
    Flat,
    NoPersp,
    /// Explicit per-vertex fetch.
    Custom,
}

/// Interpolation location of a fragment input.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub enum InterpLoc {
    #[default]
    Unknown,
    Center,
    Centroid,
    Sample,
    /// Explicit vertex selection for custom interpolation.
    Explicit,
}

/// A lowered operation.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Callee {
    /// `[]`: pointer to the descriptor table of root user-data node `node`.
    DescriptorTable { node: u32 },
    /// `[]`: the `dwords` dwords of root user-data node `node`.
    RootDescriptor { node: u32, dwords: u32 },
    /// `[]`: pointer to the push constants held by root node `node`.
    PushConstants { node: u32 },

    /// `[desc, coord, mip?]`.
    ImageLoad {
        dim: ImageDim,
        flags: ImageFlags,
        mip: bool,
    },
    /// `[texel, desc, coord, mip?]`.
    ImageStore {
        dim: ImageDim,
        flags: ImageFlags,
        mip: bool,
    },
    /// `[desc, sampler, offset?, bias?, compare?, dpdx?, dpdy?, coord, lod?, min_lod?]`.
    ImageSample {
        dim: ImageDim,
        flags: ImageFlags,
        operands: SampleOperands,
        dmask: u32,
    },
    /// Same layout as [`Callee::ImageSample`].
    ImageGather {
        dim: ImageDim,
        flags: ImageFlags,
        operands: SampleOperands,
        dmask: u32,
    },
    /// `[value, compare?, desc, coord]`.
    ImageAtomic {
        op: AtomicOp,
        dim: ImageDim,
        flags: ImageFlags,
    },
    /// `[desc, lod]`: width, height, depth or layers, and mip levels.
    ImageResInfo { dim: ImageDim },
    /// `[desc, sampler, coord]`: computed and clamped level of detail.
    ImageGetLod { dim: ImageDim },

    /// `[location_offset, elem_idx, vertex_index?]`.
    InputGeneric {
        location: u32,
        interp: InterpMode,
        loc: InterpLoc,
        per_vertex: bool,
    },
    /// `[location_offset, elem_idx, aux_interp_value]`: interpolate at the
    /// barycentrics (or vertex index for custom mode) given in the last operand.
    InputInterpolant { location: u32, interp: InterpMode },
    /// `[location_offset, elem_idx, vertex_index?]`.
    OutputImportGeneric { location: u32, per_vertex: bool },
    /// `[location_offset, elem_idx, vertex_index?, value]`.
    OutputExportGeneric {
        location: u32,
        stream: u32,
        per_vertex: bool,
    },
    /// `[value]`.
    OutputExportXfb {
        buffer: u32,
        offset: u32,
        stream: u32,
    },
    /// `[vertex_index?, index?]`.
    InputBuiltIn {
        kind: BuiltInKind,
        per_vertex: bool,
        indexed: bool,
    },
    /// `[vertex_index?, index?]`.
    OutputImportBuiltIn {
        kind: BuiltInKind,
        per_vertex: bool,
        indexed: bool,
    },
    /// `[vertex_index?, index?, value]`.
    OutputExportBuiltIn {
        kind: BuiltInKind,
        stream: u32,
        per_vertex: bool,
        indexed: bool,
    },

    EmitVertex { stream: u32 },
    EndPrimitive { stream: u32 },
    Barrier,
    Kill,
    Demote,
    IsHelperInvocation,
    ReadClock { realtime: bool },
    Fence { ordering: AtomicOrdering },
}

impl Callee {
    /// Returns `true` if the call writes memory, exports, changes lane
    /// state or reads a volatile source.
    pub fn has_side_effects(&self) -> bool {
        match self {
            Self::ImageLoad { flags, .. } => flags.contains(ImageFlags::VOLATILE),
            Self::DescriptorTable { .. }
            | Self::RootDescriptor { .. }
            | Self::PushConstants { .. }
            | Self::ImageSample { .. }
            | Self::ImageGather { .. }
            | Self::ImageResInfo { .. }
            | Self::ImageGetLod { .. }
            | Self::InputGeneric { .. }
            | Self::InputInterpolant { .. }
            | Self::OutputImportGeneric { .. }
            | Self::InputBuiltIn { .. }
            | Self::OutputImportBuiltIn { .. }
            | Self::IsHelperInvocation => false,
            Self::ImageStore { .. }
            | Self::ImageAtomic { .. }
            | Self::OutputExportGeneric { .. }
            | Self::OutputExportXfb { .. }
            | Self::OutputExportBuiltIn { .. }
            | Self::EmitVertex { .. }
            | Self::EndPrimitive { .. }
            | Self::Barrier
            | Self::Kill
            | Self::Demote
            | Self::ReadClock { .. }
            | Self::Fence { .. } => true,
        }
    }

    /// Short name used in IR dumps.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DescriptorTable { .. } => "descriptor.table",
            Self::RootDescriptor { .. } => "root.descriptor",
            Self::PushConstants { .. } => "push.constants",
            Self::ImageLoad { .. } => "image.load",
            Self::ImageStore { .. } => "image.store",
            Self::ImageSample { .. } => "image.sample",
            Self::ImageGather { .. } => "image.gather",
            Self::ImageAtomic { .. } => "image.atomic",
            Self::ImageResInfo { .. } => "image.resinfo",
            Self::ImageGetLod { .. } => "image.getlod",
            Self::InputGeneric { .. } => "input.import.generic",
            Self::InputInterpolant { .. } => "input.import.interpolant",
            Self::OutputImportGeneric { .. } => "output.import.generic",
            Self::OutputExportGeneric { .. } => "output.export.generic",
            Self::OutputExportXfb { .. } => "output.export.xfb",
            Self::InputBuiltIn { .. } => "input.import.builtin",
            Self::OutputImportBuiltIn { .. } => "output.import.builtin",
            Self::OutputExportBuiltIn { .. } => "output.export.builtin",
            Self::EmitVertex { .. } => "gs.emit",
            Self::EndPrimitive { .. } => "gs.cut",
            Self::Barrier => "barrier",
            Self::Kill => "kill",
            Self::Demote => "demote",
            Self::IsHelperInvocation => "is.helper",
            Self::ReadClock { .. } => "read.clock",
            Self::Fence { .. } => "fence",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_flags() {
        let flags = ImageFlags::NON_UNIFORM_IMAGE | ImageFlags::SIGNED_RESULT;
        assert!(flags.contains(ImageFlags::NON_UNIFORM_IMAGE));
        assert!(!flags.contains(ImageFlags::NON_UNIFORM_SAMPLER));
        assert!(ImageFlags::EMPTY.is_empty());
        assert_eq!(flags.bits(), 0xC);
    }

    #[test]
    fn dim_coordinates() {
        assert_eq!(ImageDim::CubeArray.coord_components(), 4);
        assert_eq!(ImageDim::D1Array.coord_components(), 2);
        assert!(ImageDim::CubeArray.is_cube());
        assert!(ImageDim::CubeArray.is_array());
        assert!(!ImageDim::D3.is_array());
    }

    #[test]
    fn compare_swap_code() {
        assert_eq!(AtomicOp::CompareSwap as u32, 1);
        assert!(AtomicOrdering::SequentiallyConsistent.has_release());
        assert!(!AtomicOrdering::Release.has_acquire());
    }

    #[test]
    fn volatile_load_is_not_removable() {
        let plain = Callee::ImageLoad {
            dim: ImageDim::D2,
            flags: ImageFlags::EMPTY,
            mip: false,
        };
        let volatile = Callee::ImageLoad {
            dim: ImageDim::D2,
            flags: ImageFlags::VOLATILE,
            mip: false,
        };
        assert!(!plain.has_side_effects());
        assert!(volatile.has_side_effects());
        assert_eq!(plain.name(), "image.load");
    }
}
