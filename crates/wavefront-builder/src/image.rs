//! Image access.
//!
//! Every image operation goes through the same preparation: subpass inputs
//! get the fragment coordinate and view index folded in, 1D images become 2D
//! where the target wants it, cube directions are projected to a face, and
//! cube images accessed by texel get a 2D-array descriptor. A descriptor that
//! may differ between lanes wraps the instruction in a waterfall loop.

use wavefront_ir::{
    AtomicOp, AtomicOrdering, BinaryOp, BuiltInKind, Callee, Expression, Handle, ImageDim,
    ImageFlags, Literal, MathFunction, SampleOperands, Scalar, ScalarKind, Type,
};

use crate::Builder;
use crate::error::BuildError;
use crate::inout::InOutInfo;

type Value = Handle<Expression>;

/// Image data format `32` in dword1 of an image descriptor.
pub const IMG_DATA_FORMAT_32: u32 = 4;
/// Image data format `32_32`.
pub const IMG_DATA_FORMAT_32_32: u32 = 11;
/// Image data format `32_32_32_32`.
pub const IMG_DATA_FORMAT_32_32_32_32: u32 = 14;
/// Hardware code of the compare-and-swap image atomic.
pub const ATOMIC_OP_COMPARE_SWAP: u32 = 1;

const DATA_FORMAT_SHIFT: u32 = 20;
const DATA_FORMAT_MASK: u32 = 0x3F;
const NUM_FORMAT_SHIFT: u32 = 26;
const NUM_FORMAT_MASK: u32 = 0xF;
const NUM_FORMAT_USCALED: u32 = 2;
const NUM_FORMAT_SSCALED: u32 = 3;

const RSRC_TYPE_SHIFT: u32 = 28;
const RSRC_TYPE_2D_ARRAY: u32 = 0xD;
const RSRC_TYPE_2D_MSAA: u32 = 0xE;
const LAST_LEVEL_SHIFT: u32 = 16;
const DEPTH_MASK: u32 = 0x1FFF;

/// Addressing operands of a sample or gather.
#[derive(Clone, Copy, Debug)]
pub struct ImageAddress {
    pub coord: Value,
    /// Divides the coordinate.
    pub projective: Option<Value>,
    pub bias: Option<Value>,
    pub lod: Option<Value>,
    /// `(dpdx, dpdy)`.
    pub gradient: Option<(Value, Value)>,
    pub zero_lod: bool,
    /// Depth comparison reference.
    pub compare: Option<Value>,
    /// Integer texel offset.
    pub offset: Option<Value>,
    pub min_lod: Option<Value>,
    /// Component a gather fetches.
    pub component: u32,
}

impl ImageAddress {
    pub fn new(coord: Value) -> Self {
        Self {
            coord,
            projective: None,
            bias: None,
            lod: None,
            gradient: None,
            zero_lod: false,
            compare: None,
            offset: None,
            min_lod: None,
            component: 0,
        }
    }
}

// Coordinate and descriptor preparation.
impl Builder<'_> {
    fn mark_image_use(&mut self, written: bool) {
        let stage = self.stage();
        let usage = self.state_mut().resource_usage_mut(stage);
        usage.resource_read = true;
        usage.resource_write |= written;
    }

    /// A constant like `value`'s element type: `int` for integers, `float`
    /// otherwise.
    fn fill_like(&mut self, value: Value, int: i64, float: f64) -> Value {
        let scalar = self.scalar_of(value);
        if scalar.is_float() {
            self.literal(Literal::from_f64(scalar, float))
        } else {
            self.literal(Literal::from_int(scalar, int))
        }
    }

    /// Inserts `fill` as component `at` of a scalar or vector.
    fn insert_component(&mut self, value: Value, at: usize, fill: Value) -> Value {
        let mut parts = self.components(value);
        parts.insert(at.min(parts.len()), fill);
        self.vector_from(parts)
    }

    /// Addresses a 1D image as a 2D image with one row on targets that
    /// want it; the added row coordinate is 0 for texel coordinates and 0.5
    /// for normalized ones.
    pub fn change_1d_to_2d_if_needed(&mut self, dim: ImageDim, coord: Value) -> (ImageDim, Value) {
        if !self.state().target.treat_1d_as_2d {
            return (dim, coord);
        }
        let dim = match dim {
            ImageDim::D1 => ImageDim::D2,
            ImageDim::D1Array => ImageDim::D2Array,
            _ => return (dim, coord),
        };
        let fill = self.fill_like(coord, 0, 0.5);
        (dim, self.insert_component(coord, 1, fill))
    }

    /// Widens an offset or gradient of a 1D image the same way the
    /// coordinate was widened.
    fn widen_1d_operand(&mut self, dim: ImageDim, value: Value) -> Value {
        if !self.state().target.treat_1d_as_2d || !matches!(dim, ImageDim::D1 | ImageDim::D1Array)
        {
            return value;
        }
        let zero = self.fill_like(value, 0, 0.0);
        self.insert_component(value, 1, zero)
    }

    /// Layer `slice` of face `face` of a cube array, packed as
    /// `8 * slice + face`.
    pub fn combine_cube_array_face_and_slice(
        &mut self,
        face: Value,
        slice: Value,
    ) -> Result<Value, BuildError> {
        let slice = self.math1(MathFunction::Round, slice);
        let eight = self.const_f32(8.0);
        self.create_fma(slice, eight, face)
    }

    /// Prepares normalized sampling coordinates: array layers are rounded
    /// and cube directions become `(s, t, face)` with s and t offset into
    /// [1, 2] as the hardware expects.
    pub fn prepare_coordinate(&mut self, dim: ImageDim, coord: Value) -> Result<Value, BuildError> {
        self.expect_float("prepare coordinate", coord)?;
        let mut parts = self.components(coord);
        if dim.is_cube() {
            if parts.len() < 3 {
                return Err(BuildError::ShapeMismatch {
                    op: "prepare coordinate",
                    detail: format!("cube coordinate has {} components", parts.len()),
                });
            }
            let direction = self.vector_from(parts[..3].to_vec());
            let sc = self.math1(MathFunction::CubeSc, direction);
            let tc = self.math1(MathFunction::CubeTc, direction);
            let ma = self.math1(MathFunction::CubeMa, direction);
            let mut face = self.math1(MathFunction::CubeId, direction);
            let abs_ma = self.math1(MathFunction::Abs, ma);
            let recip = self.math1(MathFunction::Reciprocal, abs_ma);
            let offset = self.const_f32(1.5);
            let s = self.math3(MathFunction::Fma, sc, recip, offset);
            let t = self.math3(MathFunction::Fma, tc, recip, offset);
            if dim == ImageDim::CubeArray {
                let slice = parts.get(3).copied().ok_or_else(|| BuildError::ShapeMismatch {
                    op: "prepare coordinate",
                    detail: "cube array coordinate without a layer".into(),
                })?;
                face = self.combine_cube_array_face_and_slice(face, slice)?;
            }
            return Ok(self.vector_from(vec![s, t, face]));
        }
        if dim.is_array() {
            if let Some(layer) = parts.last_mut() {
                *layer = self.math1(MathFunction::Round, *layer);
            }
        }
        Ok(self.vector_from(parts))
    }

    /// Retypes a cube image descriptor as a 2D array of six layers per cube
    /// so that texel access can address faces as layers.
    pub fn patch_cube_descriptor(&mut self, desc: Value, dim: ImageDim) -> Value {
        if !dim.is_cube() {
            return desc;
        }
        let dword3 = self.extract(desc, 3);
        let keep = self.const_u32(!(0xF << RSRC_TYPE_SHIFT));
        let kept = self.binary(BinaryOp::BitwiseAnd, dword3, keep);
        let ty = self.const_u32(RSRC_TYPE_2D_ARRAY << RSRC_TYPE_SHIFT);
        let dword3 = self.binary(BinaryOp::BitwiseOr, kept, ty);

        let dword4 = self.extract(desc, 4);
        let mask = self.const_u32(DEPTH_MASK);
        let depth = self.binary(BinaryOp::BitwiseAnd, dword4, mask);
        let six = self.const_u32(6);
        let five = self.const_u32(5);
        let layers = self.mul(depth, six);
        let layers = self.add(layers, five);
        let keep = self.const_u32(!DEPTH_MASK);
        let kept = self.binary(BinaryOp::BitwiseAnd, dword4, keep);
        let dword4 = self.binary(BinaryOp::BitwiseOr, kept, layers);

        let desc = self.insert(desc, dword3, 3);
        self.insert(desc, dword4, 4)
    }

    /// Texel access to a cube image addresses faces as 2D array layers.
    fn cube_as_array(dim: ImageDim) -> ImageDim {
        if dim.is_cube() { ImageDim::D2Array } else { dim }
    }

    /// Applies the subpass-input flags: adds the fragment coordinate to the
    /// texel coordinate, and under multiview reads the layer from the view
    /// index.
    pub fn handle_frag_coord_view_index(
        &mut self,
        coord: Value,
        flags: ImageFlags,
        dim: ImageDim,
    ) -> Result<(ImageDim, Value), BuildError> {
        let mut dim = dim;
        let mut coord = coord;
        if flags.contains(ImageFlags::ADD_FRAG_COORD) {
            let frag_coord =
                self.create_read_builtin_input(BuiltInKind::FragCoord, InOutInfo::default(), None, None)?;
            let xy = self.swizzle(frag_coord, &[0, 1]);
            let xy = self.convert(xy, Scalar::I32);
            let scalar = self.scalar_of(coord);
            let xy = self.bitcast_kind(xy, scalar.kind);
            let mut parts = self.components(coord);
            let offsets = self.components(xy);
            for (part, offset) in parts.iter_mut().zip(offsets) {
                *part = self.add(*part, offset);
            }
            coord = self.vector_from(parts);
        }
        if flags.contains(ImageFlags::CHECK_MULTI_VIEW) && self.state().options.multiview {
            let view =
                self.create_read_builtin_input(BuiltInKind::ViewIndex, InOutInfo::default(), None, None)?;
            let scalar = self.scalar_of(coord);
            let view = self.bitcast_kind(view, scalar.kind);
            let mut parts = self.components(coord);
            match dim {
                ImageDim::D2 => {
                    parts.push(view);
                    dim = ImageDim::D2Array;
                }
                ImageDim::D2Msaa => {
                    parts.insert(2, view);
                    dim = ImageDim::D2MsaaArray;
                }
                ImageDim::D2Array | ImageDim::D2MsaaArray => {
                    if let Some(layer) = parts.get_mut(2) {
                        *layer = view;
                    }
                }
                _ => {}
            }
            coord = self.vector_from(parts);
        }
        Ok((dim, coord))
    }

    /// Works around gathers of integer formats on targets that need it.
    ///
    /// 32-bit formats are gathered as is with a half-texel correction of the
    /// coordinate; narrower formats are switched to a scaled number format so
    /// that the gather returns the integers as floats. Returns the patched
    /// descriptor and coordinate and a flag saying whether the format was
    /// 32-bit.
    pub fn preprocess_integer_image_gather(
        &mut self,
        dim: ImageDim,
        flags: ImageFlags,
        desc: Value,
        coord: Value,
    ) -> (Value, Value, Value) {
        let dword1 = self.extract(desc, 1);
        let shift = self.const_u32(DATA_FORMAT_SHIFT);
        let format = self.binary(BinaryOp::ShiftRight, dword1, shift);
        let mask = self.const_u32(DATA_FORMAT_MASK);
        let format = self.binary(BinaryOp::BitwiseAnd, format, mask);
        let mut checks = Vec::new();
        for wide in [IMG_DATA_FORMAT_32, IMG_DATA_FORMAT_32_32, IMG_DATA_FORMAT_32_32_32_32] {
            let wide = self.const_u32(wide);
            checks.push(self.binary(BinaryOp::Equal, format, wide));
        }
        let is_32 = {
            let either = self.binary(BinaryOp::LogicalOr, checks[0], checks[1]);
            self.binary(BinaryOp::LogicalOr, either, checks[2])
        };

        let num = if flags.contains(ImageFlags::SIGNED_RESULT) {
            NUM_FORMAT_SSCALED
        } else {
            NUM_FORMAT_USCALED
        };
        let keep = self.const_u32(!(NUM_FORMAT_MASK << NUM_FORMAT_SHIFT));
        let kept = self.binary(BinaryOp::BitwiseAnd, dword1, keep);
        let scaled = self.const_u32(num << NUM_FORMAT_SHIFT);
        let scaled = self.binary(BinaryOp::BitwiseOr, kept, scaled);
        let dword1 = self.select(is_32, dword1, scaled);
        let desc = self.insert(desc, dword1, 1);

        let lod = self.const_i32(0);
        let i32x4 = self.vector_type(Scalar::I32, 4);
        let info = self.call(Callee::ImageResInfo { dim }, vec![desc, lod], i32x4);
        let mut parts = self.components(coord);
        let zero = self.const_f32(0.0);
        let half = self.const_f32(0.5);
        for (i, part) in parts.iter_mut().take(2).enumerate() {
            let size = self.extract(info, i as u32);
            let size = self.convert(size, Scalar::F32);
            let correction = self.div(half, size);
            let correction = self.select(is_32, correction, zero);
            *part = self.sub(*part, correction);
        }
        let coord = self.vector_from(parts);
        (desc, coord, is_32)
    }

    /// Turns the float texels of a patched integer gather back into the
    /// integers of `result_ty`.
    pub fn postprocess_integer_image_gather(
        &mut self,
        is_32: Value,
        texels: Value,
        result_ty: Handle<Type>,
    ) -> Value {
        let scalar = self.type_inner(result_ty).scalar().unwrap_or(Scalar::I32);
        let raw = self.bitcast_kind(texels, scalar.kind);
        let converted = self.convert(texels, scalar);
        self.select(is_32, raw, converted)
    }
}

// Loads and stores.
impl Builder<'_> {
    /// Loads the texel at integer `coord`, at mip level `mip` if given.
    pub fn create_image_load(
        &mut self,
        result_ty: Handle<Type>,
        dim: ImageDim,
        flags: ImageFlags,
        desc: Value,
        coord: Value,
        mip: Option<Value>,
    ) -> Result<Value, BuildError> {
        self.expect_int("image load", coord)?;
        self.mark_image_use(false);
        let (dim, coord) = self.handle_frag_coord_view_index(coord, flags, dim)?;
        let (dim, coord) = self.change_1d_to_2d_if_needed(dim, coord);
        let desc = self.patch_cube_descriptor(desc, dim);
        let dim = Self::cube_as_array(dim);
        let mut args = vec![desc, coord];
        args.extend(mip);
        let callee = Callee::ImageLoad {
            dim,
            flags,
            mip: mip.is_some(),
        };
        let load = self.call(callee, args, result_ty);
        if flags.contains(ImageFlags::NON_UNIFORM_IMAGE) {
            self.create_waterfall_loop(load, &[0])
        } else {
            Ok(load)
        }
    }

    /// Loads sample `sample` of a multisampled image through its fmask,
    /// which maps sample indices to stored fragments. An fmask descriptor
    /// with no data format means the image is not compressed and `sample`
    /// is used directly.
    pub fn create_image_load_with_fmask(
        &mut self,
        result_ty: Handle<Type>,
        dim: ImageDim,
        flags: ImageFlags,
        desc: Value,
        fmask_desc: Value,
        coord: Value,
        sample: Value,
    ) -> Result<Value, BuildError> {
        debug_assert!(dim.is_msaa(), "fmask load of a single-sampled image");
        self.expect_int("image load with fmask", coord)?;
        let (dim, coord) = self.handle_frag_coord_view_index(coord, flags, dim)?;
        let fmask_dim = if dim == ImageDim::D2MsaaArray {
            ImageDim::D2Array
        } else {
            ImageDim::D2
        };
        let u32_ty = self.scalar_type(Scalar::U32);
        let fmask_flags = if flags.contains(ImageFlags::NON_UNIFORM_IMAGE) {
            ImageFlags::NON_UNIFORM_IMAGE
        } else {
            ImageFlags::EMPTY
        };
        let fmask = self.create_image_load(u32_ty, fmask_dim, fmask_flags, fmask_desc, coord, None)?;

        let sample = self.convert(sample, Scalar::U32);
        let two = self.const_u32(2);
        let shift = self.binary(BinaryOp::ShiftLeft, sample, two);
        let fragment = self.binary(BinaryOp::ShiftRight, fmask, shift);
        let nibble = self.const_u32(0xF);
        let fragment = self.binary(BinaryOp::BitwiseAnd, fragment, nibble);

        let dword1 = self.extract(fmask_desc, 1);
        let format = self.const_u32(DATA_FORMAT_MASK << DATA_FORMAT_SHIFT);
        let format = self.binary(BinaryOp::BitwiseAnd, dword1, format);
        let zero = self.const_u32(0);
        let valid = self.binary(BinaryOp::NotEqual, format, zero);
        let index = self.select(valid, fragment, sample);

        let scalar = self.scalar_of(coord);
        let index = self.bitcast_kind(index, scalar.kind);
        let mut parts = self.components(coord);
        parts.push(index);
        let coord = self.vector_from(parts);
        self.create_image_load(result_ty, dim, flags, desc, coord, None)
    }

    /// Stores `texel` at integer `coord`.
    pub fn create_image_store(
        &mut self,
        texel: Value,
        dim: ImageDim,
        flags: ImageFlags,
        desc: Value,
        coord: Value,
        mip: Option<Value>,
    ) -> Result<Value, BuildError> {
        self.expect_int("image store", coord)?;
        self.mark_image_use(true);
        let (dim, coord) = self.change_1d_to_2d_if_needed(dim, coord);
        let desc = self.patch_cube_descriptor(desc, dim);
        let dim = Self::cube_as_array(dim);
        let mut args = vec![texel, desc, coord];
        args.extend(mip);
        let callee = Callee::ImageStore {
            dim,
            flags,
            mip: mip.is_some(),
        };
        let store = self.call_void(callee, args);
        if flags.contains(ImageFlags::NON_UNIFORM_IMAGE) {
            self.create_waterfall_loop(store, &[1])
        } else {
            Ok(store)
        }
    }
}

// Sampling.
impl Builder<'_> {
    pub fn create_image_sample(
        &mut self,
        result_ty: Handle<Type>,
        dim: ImageDim,
        flags: ImageFlags,
        desc: Value,
        sampler: Value,
        address: &ImageAddress,
    ) -> Result<Value, BuildError> {
        self.image_sample_gather(result_ty, dim, flags, desc, sampler, address, true)
    }

    /// Gathers one component of the four texels a bilinear sample would
    /// read, or the comparison results for a depth gather.
    pub fn create_image_gather(
        &mut self,
        result_ty: Handle<Type>,
        dim: ImageDim,
        flags: ImageFlags,
        desc: Value,
        sampler: Value,
        address: &ImageAddress,
    ) -> Result<Value, BuildError> {
        self.image_sample_gather(result_ty, dim, flags, desc, sampler, address, false)
    }

    /// Shared lowering of sample and gather.
    #[allow(clippy::too_many_arguments)]
    pub fn image_sample_gather(
        &mut self,
        result_ty: Handle<Type>,
        dim: ImageDim,
        flags: ImageFlags,
        desc: Value,
        sampler: Value,
        address: &ImageAddress,
        is_sample: bool,
    ) -> Result<Value, BuildError> {
        debug_assert!(!dim.is_msaa(), "sampling a multisampled image");
        self.expect_float("image sample", address.coord)?;
        self.mark_image_use(false);

        let mut coord = address.coord;
        if let Some(q) = address.projective {
            coord = self.div(coord, q);
        }
        let (dim, coord) = self.change_1d_to_2d_if_needed(dim, coord);
        let mut coord = self.prepare_coordinate(dim, coord)?;
        let mut desc = desc;

        let int_result = self
            .type_inner(result_ty)
            .scalar()
            .is_some_and(|s| s.is_integer());
        let workaround = !is_sample && int_result && self.state().target.integer_gather_workaround;
        let mut is_32 = None;
        if workaround {
            let (patched, moved, flag) = self.preprocess_integer_image_gather(dim, flags, desc, coord);
            desc = patched;
            coord = moved;
            is_32 = Some(flag);
        }

        let mut operands = SampleOperands::NONE;
        let mut args = vec![desc, sampler];
        if let Some(offset) = address.offset {
            operands |= SampleOperands::OFFSET;
            args.push(self.widen_1d_operand(dim, offset));
        }
        if let Some(bias) = address.bias {
            operands |= SampleOperands::BIAS;
            args.push(bias);
        }
        if let Some(compare) = address.compare {
            operands |= SampleOperands::COMPARE;
            args.push(compare);
        }
        if let Some((dpdx, dpdy)) = address.gradient {
            operands |= SampleOperands::GRADIENT;
            args.push(self.widen_1d_operand(dim, dpdx));
            args.push(self.widen_1d_operand(dim, dpdy));
        }
        args.push(coord);
        if let Some(lod) = address.lod {
            operands |= SampleOperands::LOD;
            args.push(lod);
        } else if address.zero_lod {
            operands |= SampleOperands::LEVEL_ZERO;
        }
        if let Some(min_lod) = address.min_lod {
            operands |= SampleOperands::MIN_LOD;
            args.push(min_lod);
        }

        let call_ty = if workaround {
            let count = self.type_inner(result_ty).component_count();
            self.vector_type(Scalar::F32, count)
        } else {
            result_ty
        };
        let callee = if is_sample {
            Callee::ImageSample {
                dim,
                flags,
                operands,
                dmask: 0xF,
            }
        } else {
            let dmask = if address.compare.is_some() {
                1
            } else {
                1 << address.component
            };
            Callee::ImageGather {
                dim,
                flags,
                operands,
                dmask,
            }
        };
        log::debug!("{} {dim:?} with operands {operands:?}", callee.name());
        let call = self.call(callee, args, call_ty);

        let mut waterfall = Vec::new();
        if flags.contains(ImageFlags::NON_UNIFORM_IMAGE) {
            waterfall.push(0);
        }
        if flags.contains(ImageFlags::NON_UNIFORM_SAMPLER) {
            waterfall.push(1);
        }
        let call = if waterfall.is_empty() {
            call
        } else {
            self.create_waterfall_loop(call, &waterfall)?
        };
        Ok(match is_32 {
            Some(is_32) => self.postprocess_integer_image_gather(is_32, call, result_ty),
            None => call,
        })
    }

    /// Level of detail the hardware would pick at `coord`, as
    /// `(clamped, unclamped)`.
    pub fn create_image_get_lod(
        &mut self,
        dim: ImageDim,
        flags: ImageFlags,
        desc: Value,
        sampler: Value,
        coord: Value,
    ) -> Result<Value, BuildError> {
        self.mark_image_use(false);
        let (dim, coord) = self.change_1d_to_2d_if_needed(dim, coord);
        let coord = self.prepare_coordinate(dim, coord)?;
        let ty = self.vector_type(Scalar::F32, 2);
        let call = self.call(Callee::ImageGetLod { dim }, vec![desc, sampler, coord], ty);
        let mut waterfall = Vec::new();
        if flags.contains(ImageFlags::NON_UNIFORM_IMAGE) {
            waterfall.push(0);
        }
        if flags.contains(ImageFlags::NON_UNIFORM_SAMPLER) {
            waterfall.push(1);
        }
        if waterfall.is_empty() {
            Ok(call)
        } else {
            self.create_waterfall_loop(call, &waterfall)
        }
    }
}

// Atomics.
impl Builder<'_> {
    pub fn create_image_atomic(
        &mut self,
        op: AtomicOp,
        dim: ImageDim,
        flags: ImageFlags,
        ordering: AtomicOrdering,
        desc: Value,
        coord: Value,
        value: Value,
    ) -> Result<Value, BuildError> {
        debug_assert!(op != AtomicOp::CompareSwap, "use create_image_atomic_compare_swap");
        self.image_atomic_common(op, dim, flags, ordering, desc, coord, value, None)
    }

    pub fn create_image_atomic_compare_swap(
        &mut self,
        dim: ImageDim,
        flags: ImageFlags,
        ordering: AtomicOrdering,
        desc: Value,
        coord: Value,
        value: Value,
        compare: Value,
    ) -> Result<Value, BuildError> {
        self.image_atomic_common(
            AtomicOp::CompareSwap,
            dim,
            flags,
            ordering,
            desc,
            coord,
            value,
            Some(compare),
        )
    }

    /// Shared lowering of image atomics. Release ordering puts a fence
    /// before the atomic and acquire ordering one after it.
    #[allow(clippy::too_many_arguments)]
    pub fn image_atomic_common(
        &mut self,
        op: AtomicOp,
        dim: ImageDim,
        flags: ImageFlags,
        ordering: AtomicOrdering,
        desc: Value,
        coord: Value,
        value: Value,
        compare: Option<Value>,
    ) -> Result<Value, BuildError> {
        self.expect_int("image atomic", coord)?;
        let has_compare = op as u32 == ATOMIC_OP_COMPARE_SWAP;
        if has_compare != compare.is_some() {
            return Err(BuildError::ShapeMismatch {
                op: "image atomic",
                detail: format!("{op:?} with compare operand {}", compare.is_some()),
            });
        }
        self.mark_image_use(true);
        if ordering.has_release() {
            self.call_void(Callee::Fence { ordering: AtomicOrdering::Release }, vec![]);
        }

        let (dim, coord) = self.change_1d_to_2d_if_needed(dim, coord);
        let desc = self.patch_cube_descriptor(desc, dim);
        let dim = Self::cube_as_array(dim);
        let mut args = vec![value];
        args.extend(compare);
        let desc_index = args.len();
        args.push(desc);
        args.push(coord);
        let mut flags = flags;
        if self.scalar_of(value).kind == ScalarKind::Sint {
            flags |= ImageFlags::SIGNED_RESULT;
        }
        let ty = self.type_of(value);
        let atomic = self.call(Callee::ImageAtomic { op, dim, flags }, args, ty);
        let atomic = if flags.contains(ImageFlags::NON_UNIFORM_IMAGE) {
            self.create_waterfall_loop(atomic, &[desc_index])?
        } else {
            atomic
        };

        if ordering.has_acquire() {
            self.call_void(Callee::Fence { ordering: AtomicOrdering::Acquire }, vec![]);
        }
        Ok(atomic)
    }
}

// Queries.
impl Builder<'_> {
    fn res_info(&mut self, dim: ImageDim, flags: ImageFlags, desc: Value, lod: Value) -> Result<Value, BuildError> {
        let ty = self.vector_type(Scalar::I32, 4);
        let info = self.call(Callee::ImageResInfo { dim }, vec![desc, lod], ty);
        if flags.contains(ImageFlags::NON_UNIFORM_IMAGE) {
            self.create_waterfall_loop(info, &[0])
        } else {
            Ok(info)
        }
    }

    /// Number of mip levels.
    pub fn create_image_query_levels(
        &mut self,
        dim: ImageDim,
        flags: ImageFlags,
        desc: Value,
    ) -> Result<Value, BuildError> {
        let lod = self.const_i32(0);
        let info = self.res_info(dim, flags, desc, lod)?;
        Ok(self.extract(info, 3))
    }

    /// Number of samples, read from the descriptor: multisampled images keep
    /// log2 of it in the last-level field, every other image has one.
    pub fn create_image_query_samples(
        &mut self,
        _dim: ImageDim,
        _flags: ImageFlags,
        desc: Value,
    ) -> Result<Value, BuildError> {
        let dword3 = self.extract(desc, 3);
        let shift = self.const_u32(LAST_LEVEL_SHIFT);
        let last_level = self.binary(BinaryOp::ShiftRight, dword3, shift);
        let mask = self.const_u32(0xF);
        let last_level = self.binary(BinaryOp::BitwiseAnd, last_level, mask);
        let one = self.const_u32(1);
        let samples = self.binary(BinaryOp::ShiftLeft, one, last_level);

        let shift = self.const_u32(RSRC_TYPE_SHIFT);
        let ty = self.binary(BinaryOp::ShiftRight, dword3, shift);
        let msaa = self.const_u32(RSRC_TYPE_2D_MSAA);
        let is_msaa = self.binary(BinaryOp::GreaterEqual, ty, msaa);
        let samples = self.select(is_msaa, samples, one);
        Ok(self.bitcast_kind(samples, ScalarKind::Sint))
    }

    /// Size of mip level `lod`: width, then height, then depth or layer
    /// count as the dimension has them.
    pub fn create_image_query_size(
        &mut self,
        dim: ImageDim,
        flags: ImageFlags,
        desc: Value,
        lod: Value,
    ) -> Result<Value, BuildError> {
        let one_d_as_2d = self.state().target.treat_1d_as_2d
            && matches!(dim, ImageDim::D1 | ImageDim::D1Array);
        let info = self.res_info(dim, flags, desc, lod)?;
        let pattern: &[u32] = match dim {
            ImageDim::D1 => &[0],
            ImageDim::D1Array if one_d_as_2d => &[0, 2],
            ImageDim::D1Array | ImageDim::D2 | ImageDim::D2Msaa | ImageDim::Cube => &[0, 1],
            ImageDim::D3 | ImageDim::D2Array | ImageDim::D2MsaaArray | ImageDim::CubeArray => {
                &[0, 1, 2]
            }
        };
        let size = self.swizzle(info, pattern);
        if dim != ImageDim::CubeArray {
            return Ok(size);
        }
        let layers = self.extract(size, 2);
        let six = self.const_i32(6);
        let cubes = self.div(layers, six);
        Ok(self.insert(size, cubes, 2))
    }
}

#[cfg(test)]
mod tests {
    use wavefront_interp::{Image, Invocation, Value as LaneValue};
    use wavefront_ir::{
        AtomicOp, AtomicOrdering, BuiltInKind, Callee, ImageDim, ImageFlags, Scalar, ShaderStage,
    };
    use wavefront_state::TargetInfo;

    use super::*;
    use crate::testing::{Harness, approx};

    /// An eight-dword image descriptor whose first dword keys the host image.
    fn desc(b: &mut Builder<'_>, key: u32, dword1: u32, dword3: u32, dword4: u32) -> Value {
        let words = [key, dword1, 0, dword3, dword4, 0, 0, 0];
        let parts = words.iter().map(|&w| b.const_u32(w)).collect();
        b.vector_from(parts)
    }

    fn ivec(b: &mut Builder<'_>, parts: &[i32]) -> Value {
        let parts = parts.iter().map(|&p| b.const_i32(p)).collect();
        b.vector_from(parts)
    }

    fn vec2(b: &mut Builder<'_>, x: f32, y: f32) -> Value {
        let parts = vec![b.const_f32(x), b.const_f32(y)];
        b.vector_from(parts)
    }

    fn image_with(width: u32, height: u32, depth: u32, f: impl Fn(usize) -> [u32; 4]) -> Image {
        let mut image = Image::new(width, height, depth);
        for (i, texel) in image.texels.iter_mut().enumerate() {
            *texel = f(i);
        }
        image
    }

    #[test]
    fn store_then_load() {
        let mut h = Harness::new();
        h.host.images.insert(1, Image::new(4, 4, 1));
        let loaded = {
            let mut b = h.b();
            let d = desc(&mut b, 1, 0, 0, 0);
            let coord = ivec(&mut b, &[1, 2]);
            let texel = {
                let parts = [9, 8, 7, 6].iter().map(|&v| b.const_u32(v)).collect();
                b.vector_from(parts)
            };
            b.create_image_store(texel, ImageDim::D2, ImageFlags::EMPTY, d, coord, None)
                .unwrap();
            let u32x4 = b.vector_type(Scalar::U32, 4);
            b.create_image_load(u32x4, ImageDim::D2, ImageFlags::EMPTY, d, coord, None)
                .unwrap()
        };
        let exec = h.run();
        assert_eq!(exec.lane(loaded, 5).unwrap().to_u32_vec(), vec![9, 8, 7, 6]);
        let usage = h.state.resource_usage(h.stage);
        assert!(usage.resource_read && usage.resource_write);
    }

    #[test]
    fn one_d_load_is_widened() {
        let mut h = Harness::new();
        assert!(h.state.target.treat_1d_as_2d);
        h.host
            .images
            .insert(1, image_with(4, 1, 1, |i| [10 + i as u32, 0, 0, 0]));
        let loaded = {
            let mut b = h.b();
            let d = desc(&mut b, 1, 0, 0, 0);
            let x = b.const_i32(3);
            let u32_ty = b.scalar_type(Scalar::U32);
            b.create_image_load(u32_ty, ImageDim::D1, ImageFlags::EMPTY, d, x, None)
                .unwrap()
        };
        let func = h.func();
        let widened = func.expressions.iter().any(|(_, e)| {
            matches!(
                e,
                Expression::Call {
                    callee: Callee::ImageLoad { dim: ImageDim::D2, .. },
                    ..
                }
            )
        });
        assert!(widened);
        let exec = h.run();
        assert_eq!(exec.lane(loaded, 0).and_then(LaneValue::as_u32), Some(13));
    }

    #[test]
    fn non_uniform_descriptor_waterfall() {
        let mut h = Harness::new();
        h.host.images.insert(1, image_with(1, 1, 1, |_| [100, 0, 0, 0]));
        h.host.images.insert(2, image_with(1, 1, 1, |_| [200, 0, 0, 0]));
        let loaded = {
            let mut b = h.b();
            let u32_ty = b.scalar_type(Scalar::U32);
            let key = b.add_argument("key", u32_ty, None, false);
            let zero = b.const_u32(0);
            let mut parts = vec![key];
            parts.extend(std::iter::repeat_n(zero, 7));
            let d = b.vector_from(parts);
            let coord = ivec(&mut b, &[0, 0]);
            b.create_image_load(u32_ty, ImageDim::D2, ImageFlags::NON_UNIFORM_IMAGE, d, coord, None)
                .unwrap()
        };
        let inv = Invocation::new(h.wave_size()).lane_arg_with(|lane| LaneValue::U32(1 + lane % 2));
        let exec = h.run_with(inv);
        assert_eq!(exec.lane(loaded, 0).and_then(LaneValue::as_u32), Some(100));
        assert_eq!(exec.lane(loaded, 1).and_then(LaneValue::as_u32), Some(200));
        assert_eq!(exec.lane(loaded, 7).and_then(LaneValue::as_u32), Some(200));
    }

    #[test]
    fn sample_with_projection() {
        let mut h = Harness::new();
        h.host
            .images
            .insert(3, image_with(4, 4, 1, |i| [(i as f32).to_bits(), 0, 0, 0]));
        let (plain, projected) = {
            let mut b = h.b();
            let d = desc(&mut b, 3, 0, 0, 0);
            let sampler = {
                let zero = b.const_u32(0);
                b.splat(zero, 4)
            };
            let f32x4 = b.vector_type(Scalar::F32, 4);
            let coord = vec2(&mut b, 0.6, 0.3);
            let mut address = ImageAddress::new(coord);
            address.zero_lod = true;
            let plain = b
                .create_image_sample(f32x4, ImageDim::D2, ImageFlags::EMPTY, d, sampler, &address)
                .unwrap();
            let coord = vec2(&mut b, 1.2, 0.6);
            let mut address = ImageAddress::new(coord);
            address.projective = Some(b.const_f32(2.0));
            let projected = b
                .create_image_sample(f32x4, ImageDim::D2, ImageFlags::EMPTY, d, sampler, &address)
                .unwrap();
            (plain, projected)
        };
        let exec = h.run();
        // Texel (2, 1) of a 4x4 image.
        assert_eq!(exec.lane(plain, 0).unwrap().to_f32_vec()[0], 6.0);
        assert_eq!(exec.lane(projected, 0).unwrap().to_f32_vec()[0], 6.0);
    }

    #[test]
    fn integer_gather_workaround() {
        let mut h = Harness::with(TargetInfo::for_gfx_ip(8, 0), ShaderStage::Fragment);
        // Image 1 has a 32-bit format and raw integer texels; image 2 a
        // narrow format whose scaled texels come back as floats.
        h.host.images.insert(1, image_with(4, 4, 1, |i| [i as u32, 0, 0, 0]));
        h.host
            .images
            .insert(2, image_with(4, 4, 1, |i| [(i as f32).to_bits(), 0, 0, 0]));
        let (wide, narrow) = {
            let mut b = h.b();
            let wide_desc = desc(&mut b, 1, IMG_DATA_FORMAT_32 << 20, 0, 0);
            let narrow_desc = desc(&mut b, 2, 10 << 20, 0, 0);
            let sampler = {
                let zero = b.const_u32(0);
                b.splat(zero, 4)
            };
            let i32x4 = b.vector_type(Scalar::I32, 4);
            let coord = vec2(&mut b, 2.5 / 4.0, 1.5 / 4.0);
            let address = ImageAddress::new(coord);
            let wide = b
                .create_image_gather(i32x4, ImageDim::D2, ImageFlags::EMPTY, wide_desc, sampler, &address)
                .unwrap();
            let narrow = b
                .create_image_gather(i32x4, ImageDim::D2, ImageFlags::EMPTY, narrow_desc, sampler, &address)
                .unwrap();
            (wide, narrow)
        };
        let exec = h.run();
        assert_eq!(exec.lane(wide, 0).unwrap().components()[0], LaneValue::I32(6));
        assert_eq!(exec.lane(narrow, 0).unwrap().components()[0], LaneValue::I32(6));
    }

    #[test]
    fn atomics_and_fences() {
        let mut h = Harness::new();
        h.host.images.insert(1, image_with(2, 2, 1, |_| [10, 0, 0, 0]));
        h.host.images.insert(2, image_with(1, 1, 1, |_| [5, 0, 0, 0]));
        let (old, swapped) = {
            let mut b = h.b();
            let d = desc(&mut b, 1, 0, 0, 0);
            let coord = ivec(&mut b, &[1, 1]);
            let one = b.const_u32(1);
            let old = b
                .create_image_atomic(
                    AtomicOp::Add,
                    ImageDim::D2,
                    ImageFlags::EMPTY,
                    AtomicOrdering::AcquireRelease,
                    d,
                    coord,
                    one,
                )
                .unwrap();
            let d2 = desc(&mut b, 2, 0, 0, 0);
            let origin = ivec(&mut b, &[0, 0]);
            let new = b.const_u32(42);
            let expected = b.const_u32(5);
            let swapped = b
                .create_image_atomic_compare_swap(
                    ImageDim::D2,
                    ImageFlags::EMPTY,
                    AtomicOrdering::Monotonic,
                    d2,
                    origin,
                    new,
                    expected,
                )
                .unwrap();
            (old, swapped)
        };
        let wave = h.wave_size();
        let exec = h.run();
        let olds: Vec<u32> = (0..wave)
            .map(|l| exec.lane(old, l).and_then(LaneValue::as_u32).unwrap())
            .collect();
        assert_eq!(olds[0], 10);
        assert_eq!(olds[wave as usize - 1], 10 + wave - 1);
        assert_eq!(h.host.images[&1].texels[3][0], 10 + wave);
        // Only the first lane sees the expected value.
        assert_eq!(exec.lane(swapped, 0).and_then(LaneValue::as_u32), Some(5));
        assert_eq!(exec.lane(swapped, 1).and_then(LaneValue::as_u32), Some(42));
        assert_eq!(h.host.images[&2].texels[0][0], 42);

        let fences: Vec<&Callee> = h
            .host
            .calls
            .iter()
            .map(|(_, c)| c)
            .filter(|c| matches!(c, Callee::Fence { .. }))
            .collect();
        assert_eq!(fences.len(), 2 * wave as usize);
        assert!(matches!(h.host.calls[0].1, Callee::Fence { ordering: AtomicOrdering::Release }));
    }

    #[test]
    fn queries() {
        let mut h = Harness::new();
        let mut cube_array = Image::new(8, 8, 12);
        cube_array.levels = 3;
        h.host.images.insert(1, cube_array);
        let (size, levels, msaa_samples, plain_samples) = {
            let mut b = h.b();
            let d = desc(&mut b, 1, 0, 0, 0);
            let lod = b.const_i32(0);
            let size = b
                .create_image_query_size(ImageDim::CubeArray, ImageFlags::EMPTY, d, lod)
                .unwrap();
            let levels = b
                .create_image_query_levels(ImageDim::CubeArray, ImageFlags::EMPTY, d)
                .unwrap();
            let msaa = desc(&mut b, 1, 0, (0xE << 28) | (2 << 16), 0);
            let msaa_samples = b
                .create_image_query_samples(ImageDim::D2Msaa, ImageFlags::EMPTY, msaa)
                .unwrap();
            let plain = desc(&mut b, 1, 0, (0x9 << 28) | (2 << 16), 0);
            let plain_samples = b
                .create_image_query_samples(ImageDim::D2, ImageFlags::EMPTY, plain)
                .unwrap();
            (size, levels, msaa_samples, plain_samples)
        };
        let exec = h.run();
        let size: Vec<i64> = exec
            .lane(size, 0)
            .unwrap()
            .components()
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect();
        assert_eq!(size, vec![8, 8, 2]);
        assert_eq!(exec.lane(levels, 0), Some(&LaneValue::I32(3)));
        assert_eq!(exec.lane(msaa_samples, 0), Some(&LaneValue::I32(4)));
        assert_eq!(exec.lane(plain_samples, 0), Some(&LaneValue::I32(1)));
    }

    #[test]
    fn cube_coordinates_and_descriptor() {
        let mut h = Harness::new();
        let (coord, array_coord, patched) = {
            let mut b = h.b();
            let parts = vec![b.const_f32(1.0), b.const_f32(0.5), b.const_f32(-0.25)];
            let dir = b.vector_from(parts);
            let coord = b.prepare_coordinate(ImageDim::Cube, dir).unwrap();
            let parts = vec![
                b.const_f32(1.0),
                b.const_f32(0.5),
                b.const_f32(-0.25),
                b.const_f32(2.2),
            ];
            let dir = b.vector_from(parts);
            let array_coord = b.prepare_coordinate(ImageDim::CubeArray, dir).unwrap();
            let d = desc(&mut b, 1, 0, (0xB << 28) | 0x123, 1);
            let patched = b.patch_cube_descriptor(d, ImageDim::Cube);
            (coord, array_coord, patched)
        };
        let exec = h.run();
        // +X face: sc = -z, tc = -y, |ma| = 2.
        assert_eq!(exec.lane(coord, 0).unwrap().to_f32_vec(), vec![1.625, 1.25, 0.0]);
        approx(Some(&exec.lane(array_coord, 0).unwrap().components()[2]), 16.0, 0.0);
        let words = exec.lane(patched, 0).unwrap().to_u32_vec();
        assert_eq!(words[3], (0xD << 28) | 0x123);
        assert_eq!(words[4], 11);
    }

    #[test]
    fn fmask_selects_the_stored_fragment() {
        let mut h = Harness::new();
        // Sample 1 is stored as fragment 3.
        h.host.images.insert(7, image_with(2, 2, 1, |_| [0x30, 0, 0, 0]));
        h.host
            .images
            .insert(1, image_with(2, 2, 4, |i| [i as u32 / 4, 0, 0, 0]));
        let (via_fmask, direct) = {
            let mut b = h.b();
            let d = desc(&mut b, 1, 0, 0, 0);
            let fmask = desc(&mut b, 7, 1 << 20, 0, 0);
            let no_fmask = desc(&mut b, 7, 0, 0, 0);
            let coord = ivec(&mut b, &[0, 0]);
            let sample = b.const_u32(1);
            let u32_ty = b.scalar_type(Scalar::U32);
            let via_fmask = b
                .create_image_load_with_fmask(u32_ty, ImageDim::D2Msaa, ImageFlags::EMPTY, d, fmask, coord, sample)
                .unwrap();
            let direct = b
                .create_image_load_with_fmask(u32_ty, ImageDim::D2Msaa, ImageFlags::EMPTY, d, no_fmask, coord, sample)
                .unwrap();
            (via_fmask, direct)
        };
        let exec = h.run();
        assert_eq!(exec.lane(via_fmask, 0).and_then(LaneValue::as_u32), Some(3));
        assert_eq!(exec.lane(direct, 0).and_then(LaneValue::as_u32), Some(1));
    }

    #[test]
    fn subpass_input_adds_frag_coord() {
        let mut h = Harness::with(TargetInfo::default(), ShaderStage::Fragment);
        h.host.images.insert(1, image_with(4, 4, 1, |i| [i as u32, 0, 0, 0]));
        h.host.set_uniform_built_in(
            BuiltInKind::FragCoord,
            LaneValue::Composite(vec![
                LaneValue::F32(1.5),
                LaneValue::F32(2.5),
                LaneValue::F32(0.0),
                LaneValue::F32(1.0),
            ]),
        );
        let loaded = {
            let mut b = h.b();
            let d = desc(&mut b, 1, 0, 0, 0);
            let coord = ivec(&mut b, &[0, 0]);
            let u32_ty = b.scalar_type(Scalar::U32);
            b.create_image_load(u32_ty, ImageDim::D2, ImageFlags::ADD_FRAG_COORD, d, coord, None)
                .unwrap()
        };
        let exec = h.run();
        assert_eq!(exec.lane(loaded, 0).and_then(LaneValue::as_u32), Some(9));
        assert!(
            h.state
                .resource_usage(ShaderStage::Fragment)
                .uses_built_in_input(BuiltInKind::FragCoord)
        );
    }
}
