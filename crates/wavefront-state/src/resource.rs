//! User-data resource nodes.
//!
//! The root node list describes the user data the driver passes to every
//! shader: descriptor table pointers, inline descriptors and push constants,
//! each at a dword offset. A descriptor table node holds inner nodes laid out
//! in the memory it points to.

use wavefront_ir::StageMask;

/// Kind of a resource node.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ResourceNodeType {
    /// Image descriptor (eight dwords).
    DescriptorResource,
    /// Sampler descriptor (four dwords).
    DescriptorSampler,
    /// Image descriptor followed by a sampler descriptor (twelve dwords).
    DescriptorCombinedTexture,
    /// Texel buffer descriptor (four dwords).
    DescriptorTexelBuffer,
    /// Fmask descriptor (eight dwords).
    DescriptorFmask,
    /// Buffer descriptor (four dwords).
    DescriptorBuffer,
    /// Buffer address only (two dwords); expanded with a default dword3.
    DescriptorBufferCompact,
    /// Pointer to a descriptor table.
    DescriptorTableVaPtr,
    /// Pointer to the vertex buffer table.
    IndirectUserDataVaPtr,
    /// Pointer to the stream-out buffer table.
    StreamOutTableVaPtr,
    /// Inline push constant data.
    PushConst,
}

impl ResourceNodeType {
    /// Size of one descriptor of this type in dwords.
    pub fn descriptor_dwords(self) -> u32 {
        match self {
            Self::DescriptorResource | Self::DescriptorFmask => 8,
            Self::DescriptorCombinedTexture => 12,
            Self::DescriptorSampler | Self::DescriptorTexelBuffer | Self::DescriptorBuffer => 4,
            Self::DescriptorBufferCompact => 2,
            Self::DescriptorTableVaPtr
            | Self::IndirectUserDataVaPtr
            | Self::StreamOutTableVaPtr
            | Self::PushConst => 1,
        }
    }

    /// Whether a node of this type can satisfy a lookup for `wanted`.
    ///
    /// A combined texture satisfies image and sampler lookups and a compact
    /// buffer satisfies buffer lookups.
    pub fn satisfies(self, wanted: Self) -> bool {
        self == wanted
            || match wanted {
                Self::DescriptorResource | Self::DescriptorSampler => {
                    self == Self::DescriptorCombinedTexture
                }
                Self::DescriptorBuffer => self == Self::DescriptorBufferCompact,
                _ => false,
            }
    }

    /// Whether this is a descriptor that lives at a set/binding.
    pub fn is_descriptor(self) -> bool {
        !matches!(
            self,
            Self::DescriptorTableVaPtr
                | Self::IndirectUserDataVaPtr
                | Self::StreamOutTableVaPtr
                | Self::PushConst
        )
    }
}

/// A user-data or descriptor-table node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceNode {
    pub ty: ResourceNodeType,
    pub size_in_dwords: u32,
    /// Offset in user data (root nodes) or in the table (inner nodes).
    pub offset_in_dwords: u32,
    pub set: u32,
    pub binding: u32,
    /// Nodes of the table a `DescriptorTableVaPtr` points to.
    pub inner: Vec<ResourceNode>,
    /// Stages that see the node; empty means every stage.
    pub visibility: StageMask,
}

impl ResourceNode {
    /// A descriptor node at `set`/`binding`.
    pub fn descriptor(
        ty: ResourceNodeType,
        set: u32,
        binding: u32,
        offset_in_dwords: u32,
        array_size: u32,
    ) -> Self {
        Self {
            ty,
            size_in_dwords: ty.descriptor_dwords() * array_size,
            offset_in_dwords,
            set,
            binding,
            inner: Vec::new(),
            visibility: StageMask::EMPTY,
        }
    }

    /// A one-dword descriptor table pointer holding `inner`.
    pub fn table(offset_in_dwords: u32, inner: Vec<ResourceNode>) -> Self {
        Self {
            ty: ResourceNodeType::DescriptorTableVaPtr,
            size_in_dwords: 1,
            offset_in_dwords,
            set: inner.first().map_or(0, |n| n.set),
            binding: 0,
            inner,
            visibility: StageMask::EMPTY,
        }
    }

    /// A root node of `ty` without set/binding.
    pub fn root(ty: ResourceNodeType, offset_in_dwords: u32, size_in_dwords: u32) -> Self {
        Self {
            ty,
            size_in_dwords,
            offset_in_dwords,
            set: 0,
            binding: 0,
            inner: Vec::new(),
            visibility: StageMask::EMPTY,
        }
    }

    pub fn with_visibility(mut self, visibility: StageMask) -> Self {
        self.visibility = visibility;
        self
    }

    /// Whether `stage` sees this node.
    pub fn is_visible_to(&self, stage: wavefront_ir::ShaderStage) -> bool {
        self.visibility.is_empty() || self.visibility.contains_stage(stage)
    }

    /// Distance in dwords between consecutive array elements.
    pub fn stride_dwords(&self) -> u32 {
        self.ty.descriptor_dwords()
    }
}

/// Finds the node for `set`/`binding` that satisfies a lookup for `ty`.
///
/// Returns the index of the root node (the table pointer for inner nodes)
/// and the matching node.
pub fn find_resource_node(
    nodes: &[ResourceNode],
    ty: ResourceNodeType,
    set: u32,
    binding: u32,
) -> Option<(usize, &ResourceNode)> {
    for (index, node) in nodes.iter().enumerate() {
        if node.ty == ResourceNodeType::DescriptorTableVaPtr {
            if let Some(inner) = node
                .inner
                .iter()
                .find(|n| n.set == set && n.binding == binding && n.ty.satisfies(ty))
            {
                return Some((index, inner));
            }
        } else if node.ty.is_descriptor()
            && node.set == set
            && node.binding == binding
            && node.ty.satisfies(ty)
        {
            return Some((index, node));
        }
    }
    None
}

/// Finds the first root node of `ty`.
pub fn find_root_node_by_type(
    nodes: &[ResourceNode],
    ty: ResourceNodeType,
) -> Option<(usize, &ResourceNode)> {
    nodes.iter().enumerate().find(|(_, n)| n.ty == ty)
}
