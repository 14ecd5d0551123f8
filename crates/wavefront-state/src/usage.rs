//! Per-stage usage records filled in while lowering.

use std::collections::{BTreeMap, BTreeSet};

use wavefront_ir::{BuiltInKind, Scalar, ScalarKind};

/// Basic type of a fragment output.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BasicType {
    Float16,
    Float,
    Double,
    Int16,
    Uint16,
    Int,
    Uint,
    Int64,
    Uint64,
}

impl BasicType {
    pub fn from_scalar(scalar: Scalar) -> Option<Self> {
        Some(match (scalar.kind, scalar.width) {
            (ScalarKind::Float, 2) => Self::Float16,
            (ScalarKind::Float, 4) => Self::Float,
            (ScalarKind::Float, 8) => Self::Double,
            (ScalarKind::Sint, 2) => Self::Int16,
            (ScalarKind::Uint, 2) => Self::Uint16,
            (ScalarKind::Sint, 4) => Self::Int,
            (ScalarKind::Uint, 4) => Self::Uint,
            (ScalarKind::Sint, 8) => Self::Int64,
            (ScalarKind::Uint, 8) => Self::Uint64,
            _ => return None,
        })
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::Float16 | Self::Int16 | Self::Uint16 => 16,
            Self::Float | Self::Int | Self::Uint => 32,
            Self::Double | Self::Int64 | Self::Uint64 => 64,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float16 | Self::Float | Self::Double)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::Int16 | Self::Int | Self::Int64)
    }
}

/// Type written to a colour target.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct FsOutputType {
    pub basic: BasicType,
    pub components: u32,
}

/// Maximum number of colour targets.
pub const MAX_COLOR_TARGETS: usize = 8;

/// Interpolation modes and locations used by fragment inputs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterpUsage {
    pub smooth: bool,
    pub flat: bool,
    pub no_persp: bool,
    pub custom: bool,
    pub center: bool,
    pub centroid: bool,
    pub sample: bool,
    /// Perspective pull-mode barycentrics are read (interpolation at an offset).
    pub pull_mode: bool,
}

/// Usage of one built-in output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuiltInOutputUsage {
    pub array_size: u32,
    /// Geometry streams that write the output.
    pub stream_mask: u32,
}

/// Transform-feedback usage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct XfbUsage {
    pub enabled: bool,
    /// Byte stride per XFB buffer.
    pub strides: [u32; 4],
    /// For each stream, the mask of XFB buffers it writes.
    pub stream_buffers: [u32; 4],
}

/// Everything one shader stage uses, recorded by the builder and read by
/// later passes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    /// Descriptor (set, binding) pairs accessed.
    pub desc_pairs: BTreeSet<(u32, u32)>,
    pub resource_read: bool,
    pub resource_write: bool,
    pub push_constants: bool,

    /// Built-in inputs with their array size (1 for non-arrays).
    pub built_in_inputs: BTreeMap<BuiltInKind, u32>,
    pub built_in_outputs: BTreeMap<BuiltInKind, BuiltInOutputUsage>,

    /// Generic per-vertex input locations, mapped to hardware slots once
    /// assigned.
    pub input_locations: BTreeMap<u32, Option<u32>>,
    pub output_locations: BTreeMap<u32, Option<u32>>,
    pub per_patch_input_locations: BTreeMap<u32, Option<u32>>,
    pub per_patch_output_locations: BTreeMap<u32, Option<u32>>,
    /// Geometry output stream of each output location.
    pub gs_output_streams: BTreeMap<u32, u32>,

    pub interp: InterpUsage,
    pub fs_output_types: [Option<FsOutputType>; MAX_COLOR_TARGETS],
    pub run_at_sample_rate: bool,
    pub uses_discard: bool,
    pub uses_demote: bool,
    pub uses_helper_query: bool,

    pub xfb: XfbUsage,
    /// Streams with `EmitVertex`.
    pub gs_emit_streams: u32,
    /// Streams with `EndPrimitive`.
    pub gs_cut_streams: u32,
    pub uses_barrier: bool,
}

impl ResourceUsage {
    pub fn uses_built_in_input(&self, kind: BuiltInKind) -> bool {
        self.built_in_inputs.contains_key(&kind)
    }

    pub fn uses_built_in_output(&self, kind: BuiltInKind) -> bool {
        self.built_in_outputs.contains_key(&kind)
    }

    /// Records a built-in input, keeping the largest array size seen.
    pub fn mark_built_in_input(&mut self, kind: BuiltInKind, array_size: u32) {
        let size = self.built_in_inputs.entry(kind).or_insert(0);
        *size = (*size).max(array_size.max(1));
    }

    /// Records a built-in output written from `stream`.
    pub fn mark_built_in_output(&mut self, kind: BuiltInKind, array_size: u32, stream: u32) {
        let usage = self.built_in_outputs.entry(kind).or_default();
        usage.array_size = usage.array_size.max(array_size.max(1));
        usage.stream_mask |= 1 << stream;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_types() {
        assert_eq!(BasicType::from_scalar(Scalar::F16), Some(BasicType::Float16));
        assert_eq!(BasicType::from_scalar(Scalar::I32), Some(BasicType::Int));
        assert_eq!(BasicType::from_scalar(Scalar::BOOL), None);
        assert!(BasicType::Int64.is_signed());
        assert_eq!(BasicType::Uint16.bits(), 16);
    }

    #[test]
    fn built_in_marks_merge() {
        let mut usage = ResourceUsage::default();
        usage.mark_built_in_input(BuiltInKind::ClipDistance, 2);
        usage.mark_built_in_input(BuiltInKind::ClipDistance, 4);
        usage.mark_built_in_input(BuiltInKind::ClipDistance, 3);
        assert_eq!(usage.built_in_inputs[&BuiltInKind::ClipDistance], 4);

        usage.mark_built_in_output(BuiltInKind::Position, 0, 0);
        usage.mark_built_in_output(BuiltInKind::Position, 0, 2);
        let pos = usage.built_in_outputs[&BuiltInKind::Position];
        assert_eq!(pos.array_size, 1);
        assert_eq!(pos.stream_mask, 0b101);
        assert!(usage.uses_built_in_output(BuiltInKind::Position));
        assert!(!usage.uses_built_in_input(BuiltInKind::Position));
    }
}
