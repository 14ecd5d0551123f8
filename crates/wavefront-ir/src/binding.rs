//! Shader stages, built-in identifiers and argument bindings.

/// A shader stage of a graphics or compute pipeline.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub const ALL: [Self; 6] = [
        Self::Vertex,
        Self::TessControl,
        Self::TessEval,
        Self::Geometry,
        Self::Fragment,
        Self::Compute,
    ];

    /// Index of the stage in per-stage tables.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn mask(self) -> StageMask {
        StageMask(1 << self as u32)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::TessControl => "tess-control",
            Self::TessEval => "tess-eval",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }
}

/// A set of shader stages.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct StageMask(u32);

impl StageMask {
    pub const EMPTY: Self = Self(0);
    pub const VERTEX: Self = Self(1 << 0);
    pub const TESS_CONTROL: Self = Self(1 << 1);
    pub const TESS_EVAL: Self = Self(1 << 2);
    pub const GEOMETRY: Self = Self(1 << 3);
    pub const FRAGMENT: Self = Self(1 << 4);
    pub const COMPUTE: Self = Self(1 << 5);
    /// Stages that run before rasterisation.
    pub const PRE_RASTER: Self = Self(0xF);
    pub const ALL_GRAPHICS: Self = Self(0x1F);

    /// Returns `true` if `self` contains all stages in `other`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn contains_stage(self, stage: ShaderStage) -> bool {
        self.contains(stage.mask())
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns `true` if no stages are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn stages(self) -> impl Iterator<Item = ShaderStage> {
        ShaderStage::ALL
            .into_iter()
            .filter(move |s| self.contains_stage(*s))
    }
}

impl std::ops::BitOr for StageMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for StageMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromIterator<ShaderStage> for StageMask {
    fn from_iter<I: IntoIterator<Item = ShaderStage>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::EMPTY, |mask, stage| mask | stage.mask())
    }
}

/// Start of the internal built-in range used only inside the lowering layer.
pub const INTERNAL_BUILT_IN_BASE: u32 = 0x1000_0000;

/// A built-in input or output, numbered as in SPIR-V plus an internal range.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u32)]
pub enum BuiltInKind {
    Position = 0,
    PointSize = 1,
    ClipDistance = 3,
    CullDistance = 4,
    VertexId = 5,
    InstanceId = 6,
    PrimitiveId = 7,
    InvocationId = 8,
    Layer = 9,
    ViewportIndex = 10,
    TessLevelOuter = 11,
    TessLevelInner = 12,
    TessCoord = 13,
    PatchVertices = 14,
    FragCoord = 15,
    PointCoord = 16,
    FrontFacing = 17,
    SampleId = 18,
    SamplePosition = 19,
    SampleMask = 20,
    FragDepth = 22,
    HelperInvocation = 23,
    NumWorkgroups = 24,
    WorkgroupSize = 25,
    WorkgroupId = 26,
    LocalInvocationId = 27,
    GlobalInvocationId = 28,
    LocalInvocationIndex = 29,
    SubgroupSize = 36,
    NumSubgroups = 38,
    SubgroupId = 40,
    SubgroupLocalInvocationId = 41,
    VertexIndex = 42,
    InstanceIndex = 43,
    SubgroupEqMask = 4416,
    SubgroupGeMask = 4417,
    SubgroupGtMask = 4418,
    SubgroupLeMask = 4419,
    SubgroupLtMask = 4420,
    BaseVertex = 4424,
    BaseInstance = 4425,
    DrawIndex = 4426,
    DeviceIndex = 4438,
    ViewIndex = 4440,
    FragStencilRef = 5014,

    InterpPerspSample = INTERNAL_BUILT_IN_BASE,
    InterpPerspCenter = INTERNAL_BUILT_IN_BASE + 1,
    InterpPerspCentroid = INTERNAL_BUILT_IN_BASE + 2,
    InterpPullMode = INTERNAL_BUILT_IN_BASE + 3,
    InterpLinearSample = INTERNAL_BUILT_IN_BASE + 4,
    InterpLinearCenter = INTERNAL_BUILT_IN_BASE + 5,
    InterpLinearCentroid = INTERNAL_BUILT_IN_BASE + 6,
    SamplePosOffset = INTERNAL_BUILT_IN_BASE + 7,
    NumSamples = INTERNAL_BUILT_IN_BASE + 8,
    SamplePatternIdx = INTERNAL_BUILT_IN_BASE + 9,
    WaveId = INTERNAL_BUILT_IN_BASE + 10,
}

impl BuiltInKind {
    pub const ALL: [Self; 56] = [
        Self::Position,
        Self::PointSize,
        Self::ClipDistance,
        Self::CullDistance,
        Self::VertexId,
        Self::InstanceId,
        Self::PrimitiveId,
        Self::InvocationId,
        Self::Layer,
        Self::ViewportIndex,
        Self::TessLevelOuter,
        Self::TessLevelInner,
        Self::TessCoord,
        Self::PatchVertices,
        Self::FragCoord,
        Self::PointCoord,
        Self::FrontFacing,
        Self::SampleId,
        Self::SamplePosition,
        Self::SampleMask,
        Self::FragDepth,
        Self::HelperInvocation,
        Self::NumWorkgroups,
        Self::WorkgroupSize,
        Self::WorkgroupId,
        Self::LocalInvocationId,
        Self::GlobalInvocationId,
        Self::LocalInvocationIndex,
        Self::SubgroupSize,
        Self::NumSubgroups,
        Self::SubgroupId,
        Self::SubgroupLocalInvocationId,
        Self::VertexIndex,
        Self::InstanceIndex,
        Self::SubgroupEqMask,
        Self::SubgroupGeMask,
        Self::SubgroupGtMask,
        Self::SubgroupLeMask,
        Self::SubgroupLtMask,
        Self::BaseVertex,
        Self::BaseInstance,
        Self::DrawIndex,
        Self::DeviceIndex,
        Self::ViewIndex,
        Self::FragStencilRef,
        Self::InterpPerspSample,
        Self::InterpPerspCenter,
        Self::InterpPerspCentroid,
        Self::InterpPullMode,
        Self::InterpLinearSample,
        Self::InterpLinearCenter,
        Self::InterpLinearCentroid,
        Self::SamplePosOffset,
        Self::NumSamples,
        Self::SamplePatternIdx,
        Self::WaveId,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    /// Looks up a built-in by its numeric code.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.code() == code)
    }

    /// Returns `true` for the internal pseudo built-ins.
    pub fn is_internal(self) -> bool {
        self.code() >= INTERNAL_BUILT_IN_BASE
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Position => "Position",
            Self::PointSize => "PointSize",
            Self::ClipDistance => "ClipDistance",
            Self::CullDistance => "CullDistance",
            Self::VertexId => "VertexId",
            Self::InstanceId => "InstanceId",
            Self::PrimitiveId => "PrimitiveId",
            Self::InvocationId => "InvocationId",
            Self::Layer => "Layer",
            Self::ViewportIndex => "ViewportIndex",
            Self::TessLevelOuter => "TessLevelOuter",
            Self::TessLevelInner => "TessLevelInner",
            Self::TessCoord => "TessCoord",
            Self::PatchVertices => "PatchVertices",
            Self::FragCoord => "FragCoord",
            Self::PointCoord => "PointCoord",
            Self::FrontFacing => "FrontFacing",
            Self::SampleId => "SampleId",
            Self::SamplePosition => "SamplePosition",
            Self::SampleMask => "SampleMask",
            Self::FragDepth => "FragDepth",
            Self::HelperInvocation => "HelperInvocation",
            Self::NumWorkgroups => "NumWorkgroups",
            Self::WorkgroupSize => "WorkgroupSize",
            Self::WorkgroupId => "WorkgroupId",
            Self::LocalInvocationId => "LocalInvocationId",
            Self::GlobalInvocationId => "GlobalInvocationId",
            Self::LocalInvocationIndex => "LocalInvocationIndex",
            Self::SubgroupSize => "SubgroupSize",
            Self::NumSubgroups => "NumSubgroups",
            Self::SubgroupId => "SubgroupId",
            Self::SubgroupLocalInvocationId => "SubgroupLocalInvocationId",
            Self::VertexIndex => "VertexIndex",
            Self::InstanceIndex => "InstanceIndex",
            Self::SubgroupEqMask => "SubgroupEqMask",
            Self::SubgroupGeMask => "SubgroupGeMask",
            Self::SubgroupGtMask => "SubgroupGtMask",
            Self::SubgroupLeMask => "SubgroupLeMask",
            Self::SubgroupLtMask => "SubgroupLtMask",
            Self::BaseVertex => "BaseVertex",
            Self::BaseInstance => "BaseInstance",
            Self::DrawIndex => "DrawIndex",
            Self::DeviceIndex => "DeviceIndex",
            Self::ViewIndex => "ViewIndex",
            Self::FragStencilRef => "FragStencilRef",
            Self::InterpPerspSample => "InterpPerspSample",
            Self::InterpPerspCenter => "InterpPerspCenter",
            Self::InterpPerspCentroid => "InterpPerspCentroid",
            Self::InterpPullMode => "InterpPullMode",
            Self::InterpLinearSample => "InterpLinearSample",
            Self::InterpLinearCenter => "InterpLinearCenter",
            Self::InterpLinearCentroid => "InterpLinearCentroid",
            Self::SamplePosOffset => "SamplePosOffset",
            Self::NumSamples => "NumSamples",
            Self::SamplePatternIdx => "SamplePatternIdx",
            Self::WaveId => "WaveId",
        }
    }
}

/// A hardware entry-point argument of the lowered calling convention.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum EntryArg {
    /// A root user-data node passed directly in `dwords` uniform registers.
    UserDataNode { node: u32, dwords: u32 },
    /// Pointer to the in-memory copy of user data that did not fit.
    SpillTable,
    VertexBufferTable,
    BaseVertex,
    BaseInstance,
    DrawIndex,
    ViewIndex,
    StreamOutTable,
    NumWorkgroupsPtr,
    StreamOutWriteIndex,
    StreamOutOffset(u32),
    EsGsOffset,
    OffChipLdsBase,
    TessFactorBufferBase,
    GsVsOffset,
    GsWaveId,
    PrimMask,
    WorkgroupId,

    VertexId,
    RelVertexId,
    VsPrimitiveId,
    InstanceId,
    PatchId,
    RelPatchId,
    TessCoordX,
    TessCoordY,
    EsGsOffsets(u32),
    GsPrimitiveId,
    GsInvocationId,
    PerspSample,
    PerspCenter,
    PerspCentroid,
    PerspPullMode,
    LinearSample,
    LinearCenter,
    LinearCentroid,
    LineStipple,
    FragCoord(u32),
    FrontFacing,
    Ancillary,
    SampleCoverage,
    FixedXy,
    LocalInvocationId,
}

/// How a function argument is bound.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Binding {
    /// Front-end argument carrying a built-in input.
    BuiltIn(BuiltInKind),
    /// Front-end argument carrying root user-data node `node`.
    UserData { node: u32 },
    /// Argument of the lowered hardware calling convention.
    Entry(EntryArg),
}
