//! Descriptor access.
//!
//! Descriptors live either in a descriptor table the user data points to or
//! directly in a root user-data node. A [`DescriptorPtr`] names one element
//! of a binding; loading it yields the descriptor dwords as a `u32` vector.

use wavefront_ir::{AddressSpace, Callee, Expression, Handle, LaneOp, Scalar, Type, TypeInner};
use wavefront_state::ResourceNodeType;

use crate::Builder;
use crate::error::BuildError;

type Value = Handle<Expression>;

/// Which descriptor of a binding is wanted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescKind {
    Sampler,
    Image,
    TexelBuffer,
    Fmask,
    Buffer,
}

impl DescKind {
    fn node_type(self) -> ResourceNodeType {
        match self {
            Self::Sampler => ResourceNodeType::DescriptorSampler,
            Self::Image => ResourceNodeType::DescriptorResource,
            Self::TexelBuffer => ResourceNodeType::DescriptorTexelBuffer,
            Self::Fmask => ResourceNodeType::DescriptorFmask,
            Self::Buffer => ResourceNodeType::DescriptorBuffer,
        }
    }

    /// Dwords in one loaded descriptor.
    pub fn dwords(self) -> u32 {
        match self {
            Self::Image | Self::Fmask => 8,
            Self::Sampler | Self::TexelBuffer | Self::Buffer => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DescSource {
    /// In memory at `pointer`, which addresses element 0.
    Table { pointer: Value },
    /// Held in root user-data node `node`, `count` elements of `stride`
    /// dwords each.
    Root { node: u32, count: u32 },
    /// The binding has no user-data node.
    Unresolved,
}

/// A pointer to an element of a descriptor binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorPtr {
    kind: DescKind,
    source: DescSource,
    /// Distance between array elements in dwords.
    stride: u32,
    /// Dword offset of the wanted descriptor inside an element; the sampler
    /// of a combined texture follows its image.
    skip: u32,
    /// Element index, a `u32` value; `None` is element 0.
    index: Option<Value>,
}

impl DescriptorPtr {
    pub fn kind(&self) -> DescKind {
        self.kind
    }

    pub fn is_resolved(&self) -> bool {
        self.source != DescSource::Unresolved
    }

    pub fn stride_dwords(&self) -> u32 {
        self.stride
    }
}

// Descriptors.
impl Builder<'_> {
    fn desc_type(&mut self, kind: DescKind) -> Handle<Type> {
        self.vector_type(Scalar::U32, kind.dwords())
    }

    fn mark_descriptor_use(&mut self, set: u32, binding: u32, is_written: bool) {
        let stage = self.stage();
        let usage = self.state_mut().resource_usage_mut(stage);
        usage.desc_pairs.insert((set, binding));
        usage.resource_read = true;
        usage.resource_write |= is_written;
    }

    /// A pointer to element 0 of the `kind` descriptor at `set`/`binding`.
    fn get_desc_ptr(&mut self, kind: DescKind, set: u32, binding: u32) -> DescriptorPtr {
        self.mark_descriptor_use(set, binding, false);
        let stage = self.stage();
        let found = self
            .state()
            .find_resource_node(kind.node_type(), set, binding)
            .filter(|(root, _)| self.state().user_data_nodes[*root].is_visible_to(stage))
            .map(|(root, node)| (root, node.clone()));
        let Some((root, node)) = found else {
            log::warn!("no user-data node for {kind:?} descriptor at set {set}, binding {binding}");
            return DescriptorPtr {
                kind,
                source: DescSource::Unresolved,
                stride: kind.dwords(),
                skip: 0,
                index: None,
            };
        };
        let stride = node.stride_dwords();
        let skip = if kind == DescKind::Sampler
            && node.ty == ResourceNodeType::DescriptorCombinedTexture
        {
            8
        } else {
            0
        };
        let is_root = self.state().user_data_nodes[root].ty != ResourceNodeType::DescriptorTableVaPtr;
        let source = if is_root {
            DescSource::Root {
                node: root as u32,
                count: (node.size_in_dwords / stride.max(1)).max(1),
            }
        } else {
            let u32_ty = self.scalar_type(Scalar::U32);
            let ptr_ty = self.pointer_type(u32_ty, AddressSpace::Constant);
            let table = self.call(Callee::DescriptorTable { node: root as u32 }, vec![], ptr_ty);
            let offset = self.const_u32(4 * node.offset_in_dwords);
            let pointer = self.offset_pointer(table, offset, u32_ty);
            DescSource::Table { pointer }
        };
        log::debug!(
            "{kind:?} descriptor at set {set}, binding {binding}: root node {root}, stride {stride}"
        );
        DescriptorPtr {
            kind,
            source,
            stride,
            skip,
            index: None,
        }
    }

    pub fn create_get_sampler_desc_ptr(&mut self, set: u32, binding: u32) -> DescriptorPtr {
        self.get_desc_ptr(DescKind::Sampler, set, binding)
    }

    pub fn create_get_image_desc_ptr(&mut self, set: u32, binding: u32) -> DescriptorPtr {
        self.get_desc_ptr(DescKind::Image, set, binding)
    }

    pub fn create_get_texel_buffer_desc_ptr(&mut self, set: u32, binding: u32) -> DescriptorPtr {
        self.get_desc_ptr(DescKind::TexelBuffer, set, binding)
    }

    pub fn create_get_fmask_desc_ptr(&mut self, set: u32, binding: u32) -> DescriptorPtr {
        self.get_desc_ptr(DescKind::Fmask, set, binding)
    }

    /// Steps `ptr` forward by `index` array elements.
    ///
    /// A uniform index is read from the first lane so that the address stays
    /// scalar.
    pub fn create_index_desc_ptr(
        &mut self,
        ptr: DescriptorPtr,
        index: Value,
        is_non_uniform: bool,
    ) -> Result<DescriptorPtr, BuildError> {
        self.expect_int("index descriptor pointer", index)?;
        let index = self.convert(index, Scalar::U32);
        let index = self.scalarize_if_uniform(index, is_non_uniform)?;
        let index = match ptr.index {
            Some(prev) => self.add(prev, index),
            None => index,
        };
        Ok(DescriptorPtr {
            index: Some(index),
            ..ptr
        })
    }

    /// Loads the descriptor `ptr` points at.
    pub fn create_load_desc_from_ptr(&mut self, ptr: DescriptorPtr) -> Value {
        let ty = self.desc_type(ptr.kind);
        match ptr.source {
            DescSource::Unresolved => self.zero_value(ty),
            DescSource::Table { pointer } => {
                let skip = self.const_u32(4 * ptr.skip);
                let offset = match ptr.index {
                    Some(index) => {
                        let stride = self.const_u32(4 * ptr.stride);
                        let scaled = self.mul(index, stride);
                        self.add(scaled, skip)
                    }
                    None => skip,
                };
                let at = self.offset_pointer(pointer, offset, ty);
                self.load(at)
            }
            DescSource::Root { node, count } => {
                let words = self.root_dwords(&ptr, node, count, ptr.kind.dwords());
                self.compose(ty, words)
            }
        }
    }

    /// `n` dwords of the selected element of a root node.
    fn root_dwords(&mut self, ptr: &DescriptorPtr, node: u32, count: u32, n: u32) -> Vec<Value> {
        let dwords = ptr.stride * count;
        let u32_ty = self.scalar_type(Scalar::U32);
        let array = self.insert_type(TypeInner::Array {
            base: u32_ty,
            size: dwords,
        });
        let all = self.call(Callee::RootDescriptor { node, dwords }, vec![], array);
        match ptr.index {
            None => (ptr.skip..ptr.skip + n).map(|i| self.extract(all, i)).collect(),
            Some(index) => {
                let stride = self.const_u32(ptr.stride);
                let first = self.mul(index, stride);
                (ptr.skip..ptr.skip + n)
                    .map(|i| {
                        let at = self.const_u32(i);
                        let at = self.add(first, at);
                        self.extract_dynamic(all, at)
                    })
                    .collect()
            }
        }
    }

    /// Loads the buffer descriptor at `set`/`binding`, element `index`.
    ///
    /// Compact descriptors are widened to four dwords with an unlimited
    /// record count and the target's default dword3.
    pub fn create_load_buffer_desc(
        &mut self,
        set: u32,
        binding: u32,
        index: Value,
        is_non_uniform: bool,
        is_written: bool,
    ) -> Result<Value, BuildError> {
        self.mark_descriptor_use(set, binding, is_written);
        let stage = self.stage();
        let found = self
            .state()
            .find_resource_node(ResourceNodeType::DescriptorBuffer, set, binding)
            .filter(|(root, _)| self.state().user_data_nodes[*root].is_visible_to(stage))
            .map(|(_, node)| node.ty);
        let Some(node_ty) = found else {
            log::warn!("no user-data node for buffer descriptor at set {set}, binding {binding}");
            let ty = self.desc_type(DescKind::Buffer);
            return Ok(self.zero_value(ty));
        };
        let ptr = self.get_desc_ptr(DescKind::Buffer, set, binding);
        let ptr = self.create_index_desc_ptr(ptr, index, is_non_uniform)?;
        if node_ty != ResourceNodeType::DescriptorBufferCompact {
            return Ok(self.create_load_desc_from_ptr(ptr));
        }

        let pair_ty = self.vector_type(Scalar::U32, 2);
        let pair = match ptr.source {
            DescSource::Table { pointer } => {
                let stride = self.const_u32(4 * ptr.stride);
                let offset = match ptr.index {
                    Some(index) => self.mul(index, stride),
                    None => self.const_u32(0),
                };
                let at = self.offset_pointer(pointer, offset, pair_ty);
                self.load(at)
            }
            DescSource::Root { node, count } => {
                let words = self.root_dwords(&ptr, node, count, 2);
                self.compose(pair_ty, words)
            }
            DescSource::Unresolved => self.zero_value(pair_ty),
        };
        let lo = self.extract(pair, 0);
        let hi = self.extract(pair, 1);
        let mask = self.const_u32(0xFFFF);
        let hi = self.binary(wavefront_ir::BinaryOp::BitwiseAnd, hi, mask);
        let records = self.const_u32(u32::MAX);
        let dword3 = self.const_u32(self.state().target.buffer_dword3);
        let ty = self.desc_type(DescKind::Buffer);
        Ok(self.compose(ty, vec![lo, hi, records, dword3]))
    }

    /// Number of bytes a buffer descriptor covers.
    pub fn create_get_buffer_desc_length(&mut self, desc: Value) -> Result<Value, BuildError> {
        if self.component_count(desc) != 4 {
            return Err(BuildError::ShapeMismatch {
                op: "buffer descriptor length",
                detail: format!("descriptor has {} dwords", self.component_count(desc)),
            });
        }
        Ok(self.extract(desc, 2))
    }

    /// A pointer of type `ty` to the push constants.
    pub fn create_load_push_constants_ptr(&mut self, ty: Handle<Type>) -> Value {
        let stage = self.stage();
        self.state_mut().resource_usage_mut(stage).push_constants = true;
        let ptr_ty = self.pointer_type(ty, AddressSpace::Constant);
        match self.state().find_push_constant_node() {
            Some((root, _)) => self.call(Callee::PushConstants { node: root as u32 }, vec![], ptr_ty),
            None => {
                log::warn!("push constants used without a push-constant node");
                self.zero_value(ptr_ty)
            }
        }
    }

    /// Reads `value` from the first active lane unless it is marked
    /// non-uniform.
    pub fn scalarize_if_uniform(
        &mut self,
        value: Value,
        is_non_uniform: bool,
    ) -> Result<Value, BuildError> {
        if is_non_uniform {
            return Ok(value);
        }
        self.map_to_int32(value, |b, v| {
            let ty = b.type_of(v);
            Ok(b.lane(LaneOp::ReadFirstLane, vec![v], ty))
        })
    }
}

#[cfg(test)]
mod tests {
    use wavefront_interp::{Invocation, Value as LaneValue};
    use wavefront_ir::{Binding, Scalar};
    use wavefront_state::{ResourceNode, ResourceNodeType};

    use crate::testing::Harness;

    const TABLE: u64 = 0x1000;

    fn harness_with_table() -> Harness {
        let mut h = Harness::new();
        h.state.user_data_nodes = vec![
            ResourceNode::table(
                0,
                vec![
                    ResourceNode::descriptor(ResourceNodeType::DescriptorCombinedTexture, 0, 0, 0, 2),
                    ResourceNode::descriptor(ResourceNodeType::DescriptorBuffer, 0, 1, 24, 4),
                ],
            ),
            ResourceNode::descriptor(ResourceNodeType::DescriptorBufferCompact, 1, 0, 1, 1),
            ResourceNode::root(ResourceNodeType::PushConst, 3, 4),
        ];
        h.host.descriptor_tables.insert(0, TABLE);
        // Two combined textures, dwords numbered by position.
        let textures: Vec<u32> = (0..24).collect();
        h.host.write_dwords(TABLE, &textures);
        let buffers: Vec<u32> = (100..116).collect();
        h.host.write_dwords(TABLE + 24 * 4, &buffers);
        h.host.root_descriptors.insert(1, vec![0xDEAD_B000, 0x1234_5678]);
        h
    }

    #[test]
    fn combined_texture_image_and_sampler() {
        let mut h = harness_with_table();
        let (image, sampler) = {
            let mut b = h.b();
            let ptr = b.create_get_image_desc_ptr(0, 0);
            let one = b.const_u32(1);
            let second = b.create_index_desc_ptr(ptr, one, false).unwrap();
            let image = b.create_load_desc_from_ptr(second);
            let sampler_ptr = b.create_get_sampler_desc_ptr(0, 0);
            assert_eq!(sampler_ptr.stride_dwords(), 12);
            let sampler = b.create_load_desc_from_ptr(sampler_ptr);
            (image, sampler)
        };
        let exec = h.run();
        let want_image: Vec<u32> = (12..20).collect();
        assert_eq!(exec.lane(image, 0).unwrap().to_u32_vec(), want_image);
        assert_eq!(
            exec.lane(sampler, 3).unwrap().to_u32_vec(),
            vec![8, 9, 10, 11]
        );
        assert!(h.state.resource_usage(h.stage).desc_pairs.contains(&(0, 0)));
    }

    #[test]
    fn non_uniform_buffer_index_per_lane() {
        let mut h = harness_with_table();
        let desc = {
            let mut b = h.b();
            let u32_ty = b.scalar_type(Scalar::U32);
            let index = b.add_argument("index", u32_ty, Some(Binding::UserData { node: 9 }), false);
            b.create_load_buffer_desc(0, 1, index, true, true).unwrap()
        };
        let inv = Invocation::new(h.wave_size()).lane_arg_with(|lane| LaneValue::U32(lane % 4));
        let exec = h.run_with(inv);
        assert_eq!(exec.lane(desc, 2).unwrap().to_u32_vec(), vec![108, 109, 110, 111]);
        assert_eq!(exec.lane(desc, 5).unwrap().to_u32_vec(), vec![104, 105, 106, 107]);
        let usage = h.state.resource_usage(h.stage);
        assert!(usage.resource_read && usage.resource_write);
    }

    #[test]
    fn uniform_index_reads_first_lane() {
        let mut h = harness_with_table();
        let desc = {
            let mut b = h.b();
            let u32_ty = b.scalar_type(Scalar::U32);
            let index = b.add_argument("index", u32_ty, None, false);
            b.create_load_buffer_desc(0, 1, index, false, false).unwrap()
        };
        let inv = Invocation::new(h.wave_size()).lane_arg_with(|lane| LaneValue::U32(3 - lane % 4));
        let exec = h.run_with(inv);
        let want: Vec<u32> = (112..116).collect();
        assert_eq!(exec.lane(desc, 1).unwrap().to_u32_vec(), want);
    }

    #[test]
    fn compact_buffer_is_widened() {
        let mut h = harness_with_table();
        let (desc, len) = {
            let mut b = h.b();
            let zero = b.const_u32(0);
            let desc = b.create_load_buffer_desc(1, 0, zero, false, false).unwrap();
            let len = b.create_get_buffer_desc_length(desc).unwrap();
            (desc, len)
        };
        let dword3 = h.state.target.buffer_dword3;
        let exec = h.run();
        assert_eq!(
            exec.lane(desc, 0).unwrap().to_u32_vec(),
            vec![0xDEAD_B000, 0x5678, u32::MAX, dword3]
        );
        assert_eq!(exec.lane(len, 0).unwrap().as_u32(), Some(u32::MAX));
    }

    #[test]
    fn unresolved_binding_is_zero() {
        let mut h = harness_with_table();
        let (desc, ptr) = {
            let mut b = h.b();
            let ptr = b.create_get_fmask_desc_ptr(7, 7);
            (b.create_load_desc_from_ptr(ptr), ptr)
        };
        assert!(!ptr.is_resolved());
        let exec = h.run();
        assert_eq!(exec.lane(desc, 0).unwrap().to_u32_vec(), vec![0; 8]);
    }

    #[test]
    fn push_constants_pointer() {
        let mut h = harness_with_table();
        h.host.push_constants = 0x2000;
        h.host.write_dwords(0x2000, &[1.5f32.to_bits(), 7]);
        let value = {
            let mut b = h.b();
            let u32_ty = b.scalar_type(Scalar::U32);
            let ptr = b.create_load_push_constants_ptr(u32_ty);
            let four = b.const_u32(4);
            let second = b.offset_pointer(ptr, four, u32_ty);
            b.load(second)
        };
        let exec = h.run();
        assert_eq!(exec.lane(value, 0).unwrap().as_u32(), Some(7));
        assert!(h.state.resource_usage(h.stage).push_constants);
    }
}
