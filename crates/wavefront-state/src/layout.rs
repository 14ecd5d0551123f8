//! Automatic user-data layout.
//!
//! Builds the root node list from the resources each stage declares, for
//! callers that have no layout of their own. Descriptors are grouped into one
//! table per descriptor set; tables come first, then the vertex buffer table
//! pointer, the stream-out table pointer and push constants.

use std::collections::BTreeMap;
use std::fmt;

use wavefront_ir::{Scalar, ShaderStage, StageMask};

use crate::error::StateError;
use crate::resource::{ResourceNode, ResourceNodeType};
use crate::usage::{BasicType, FsOutputType, MAX_COLOR_TARGETS};

/// Fixed inner-node offset stride used by compatible layouts.
pub const OFFSET_STRIDE_IN_DWORDS: u32 = 12;

/// Byte stride of every auto-generated vertex binding.
pub const VERTEX_STRIDE: u32 = 16;

/// Shape of a declared resource.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum DeclaredKind {
    Sampler,
    Image,
    TexelBuffer,
    SampledImage,
    Buffer,
}

impl DeclaredKind {
    fn node(self, array_size: u32) -> (ResourceNodeType, u32) {
        match self {
            Self::Sampler => (ResourceNodeType::DescriptorSampler, 4 * array_size),
            Self::Image => (ResourceNodeType::DescriptorResource, 8 * array_size),
            Self::TexelBuffer => (ResourceNodeType::DescriptorTexelBuffer, 8 * array_size),
            Self::SampledImage => (ResourceNodeType::DescriptorCombinedTexture, 12 * array_size),
            Self::Buffer => (ResourceNodeType::DescriptorBuffer, 4 * array_size),
        }
    }
}

/// A resource variable declared by a shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeclaredResource {
    pub set: u32,
    pub binding: u32,
    pub kind: DeclaredKind,
    /// Product of all array dimensions; 1 for a non-array.
    pub array_size: u32,
}

/// Numeric interpretation of a format.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum NumericFormat {
    Uint,
    Sint,
    Sfloat,
}

/// A colour-target or vertex-attribute format: `components` channels of
/// `bits` each.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct Format {
    pub bits: u32,
    pub components: u32,
    pub numeric: NumericFormat,
}

impl Format {
    fn for_basic(basic: BasicType, components: u32) -> Self {
        let numeric = if basic.is_float() {
            NumericFormat::Sfloat
        } else if basic.is_signed() {
            NumericFormat::Sint
        } else {
            NumericFormat::Uint
        };
        Self {
            bits: basic.bits(),
            components,
            numeric,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for channel in ["R", "G", "B", "A"].iter().take(self.components as usize) {
            write!(f, "{channel}{}", self.bits)?;
        }
        let numeric = match self.numeric {
            NumericFormat::Uint => "UINT",
            NumericFormat::Sint => "SINT",
            NumericFormat::Sfloat => "SFLOAT",
        };
        write!(f, "_{numeric}")
    }
}

/// A colour target configured for a fragment output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorTarget {
    pub format: Format,
    pub write_mask: u32,
}

/// Colour targets implied by the fragment output types.
pub fn default_color_targets(
    outputs: &[Option<FsOutputType>; MAX_COLOR_TARGETS],
) -> [Option<ColorTarget>; MAX_COLOR_TARGETS] {
    outputs.map(|output| {
        output.map(|ty| {
            let components = ty.components.clamp(1, 4);
            ColorTarget {
                format: Format::for_basic(ty.basic, components),
                write_mask: (1 << components) - 1,
            }
        })
    })
}

/// A vertex attribute fed from its own binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub stride: u32,
    pub offset: u32,
    pub format: Format,
}

impl VertexAttribute {
    /// Default attribute for a vertex input of element type `scalar`:
    /// four channels, or two for 64-bit floats.
    pub fn for_input(location: u32, scalar: Scalar) -> Option<Self> {
        let basic = BasicType::from_scalar(scalar)?;
        let components = if basic == BasicType::Double { 2 } else { 4 };
        Some(Self {
            location,
            binding: location,
            stride: VERTEX_STRIDE,
            offset: 0,
            format: Format::for_basic(basic, components),
        })
    }
}

#[derive(Debug, Default)]
struct SetLayout {
    nodes: Vec<ResourceNode>,
    bindings: BTreeMap<u32, usize>,
    visibility: StageMask,
}

/// Collects declared resources and produces a root node list.
#[derive(Debug, Default)]
pub struct AutoLayout {
    compatible: bool,
    stages: StageMask,
    sets: BTreeMap<u32, SetLayout>,
    push_const_dwords: u32,
    vertex_inputs: BTreeMap<u32, Scalar>,
}

impl AutoLayout {
    /// A new layout; `compatible` places inner nodes at `binding * 12`.
    pub fn new(compatible: bool) -> Self {
        Self {
            compatible,
            ..Self::default()
        }
    }

    pub fn add_stage(&mut self, stage: ShaderStage) {
        self.stages |= stage.mask();
    }

    /// Stages that declared anything.
    pub fn stages(&self) -> StageMask {
        self.stages
    }

    /// Adds a resource declared by `stage`.
    ///
    /// Image, texel buffer and sampler declarations sharing a set/binding
    /// merge into one combined texture.
    pub fn add_resource(
        &mut self,
        stage: ShaderStage,
        res: DeclaredResource,
    ) -> Result<(), StateError> {
        self.add_stage(stage);
        let set = self.sets.entry(res.set).or_default();
        set.visibility |= stage.mask();
        let (ty, mut size) = res.kind.node(res.array_size.max(1));
        let index = *set.bindings.entry(res.binding).or_insert_with(|| {
            set.nodes.push(ResourceNode::descriptor(ty, res.set, res.binding, 0, 0));
            set.nodes.len() - 1
        });
        let node = &mut set.nodes[index];
        let mut node_ty = node.ty;
        if node.size_in_dwords != 0 && node_ty != ty {
            let mergeable = |t: ResourceNodeType| {
                matches!(
                    t,
                    ResourceNodeType::DescriptorCombinedTexture
                        | ResourceNodeType::DescriptorResource
                        | ResourceNodeType::DescriptorTexelBuffer
                        | ResourceNodeType::DescriptorSampler
                )
            };
            if !mergeable(node_ty) || !mergeable(ty) {
                return Err(StateError::AutoLayoutConflict {
                    set: res.set,
                    binding: res.binding,
                    existing: node_ty,
                    new: ty,
                });
            }
            node_ty = ResourceNodeType::DescriptorCombinedTexture;
            size = 12 * res.array_size.max(1);
        }
        node.ty = node_ty;
        node.size_in_dwords = size;
        Ok(())
    }

    /// Adds `bytes` of push constants used by `stage`.
    pub fn add_push_constants(&mut self, stage: ShaderStage, bytes: u32) {
        self.add_stage(stage);
        self.push_const_dwords = self.push_const_dwords.max(bytes.div_ceil(4));
    }

    /// Declares a vertex shader input at `location` with element type `scalar`.
    pub fn add_vertex_input(&mut self, location: u32, scalar: Scalar) {
        self.add_stage(ShaderStage::Vertex);
        self.vertex_inputs.insert(location, scalar);
    }

    /// Vertex attributes for the declared vertex inputs.
    pub fn vertex_attributes(&self) -> Vec<VertexAttribute> {
        self.vertex_inputs
            .iter()
            .filter_map(|(&location, &scalar)| VertexAttribute::for_input(location, scalar))
            .collect()
    }

    /// Produces the root node list.
    pub fn build(&self) -> Vec<ResourceNode> {
        let mut roots = Vec::new();
        let mut top_offset = 0;

        for set in self.sets.values() {
            let mut inner = set.nodes.clone();
            let mut offset = 0;
            for node in &mut inner {
                if self.compatible {
                    node.offset_in_dwords = node.binding * OFFSET_STRIDE_IN_DWORDS;
                } else {
                    node.offset_in_dwords = offset;
                    offset += node.size_in_dwords;
                }
            }
            roots.push(ResourceNode::table(top_offset, inner).with_visibility(set.visibility));
            top_offset += 1;
        }

        if self.stages.contains(StageMask::VERTEX) {
            roots.push(
                ResourceNode::root(ResourceNodeType::IndirectUserDataVaPtr, top_offset, 1)
                    .with_visibility(StageMask::VERTEX),
            );
            top_offset += 1;
        }

        let xfb_stages = StageMask::VERTEX | StageMask::TESS_EVAL | StageMask::GEOMETRY;
        if self.stages.intersects(xfb_stages) {
            let visibility = self
                .stages
                .stages()
                .filter(|s| xfb_stages.contains_stage(*s))
                .collect();
            roots.push(
                ResourceNode::root(ResourceNodeType::StreamOutTableVaPtr, top_offset, 1)
                    .with_visibility(visibility),
            );
            top_offset += 1;
        }

        if self.push_const_dwords > 0 {
            roots.push(
                ResourceNode::root(ResourceNodeType::PushConst, top_offset, self.push_const_dwords)
                    .with_visibility(self.stages),
            );
        }

        log::debug!(
            "auto layout: {} root nodes, {} descriptor sets",
            roots.len(),
            self.sets.len()
        );
        roots
    }
}
