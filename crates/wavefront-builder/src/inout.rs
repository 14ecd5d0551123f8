//! Generic and built-in inputs and outputs.
//!
//! Every access records what the stage uses in its [`ResourceUsage`] so that
//! later passes can allocate locations and hardware inputs. Fragment inputs
//! interpolated at an offset or sample compute their barycentrics here from
//! the hardware's center or pull-mode values.
//!
//! [`ResourceUsage`]: wavefront_state::ResourceUsage

use wavefront_ir::{
    BinaryOp, BuiltInKind, Callee, Expression, Handle, InterpLoc, InterpMode, Scalar, ScalarKind,
    ShaderStage, StageMask, Type, TypeInner, UnaryOp,
};
use wavefront_state::{BasicType, FsOutputType, MAX_COLOR_TARGETS};

use crate::Builder;
use crate::error::BuildError;

type Value = Handle<Expression>;

/// How an input or output is accessed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InOutInfo {
    pub interp_mode: InterpMode,
    pub interp_loc: InterpLoc,
    /// Integer data is signed.
    pub is_signed: bool,
    /// Element count of an arrayed built-in.
    pub array_size: u32,
    /// Geometry output stream.
    pub stream: u32,
    /// A fragment input read takes an auxiliary value: an offset for
    /// `Center`, a sample id for `Sample`, a vertex for `Explicit`.
    pub has_interp_aux: bool,
}

impl InOutInfo {
    pub fn with_interp(interp_mode: InterpMode, interp_loc: InterpLoc) -> Self {
        Self {
            interp_mode,
            interp_loc,
            ..Self::default()
        }
    }
}

const ALL_STAGES: StageMask = StageMask::ALL_GRAPHICS.union(StageMask::COMPUTE);

/// Stages in which `kind` is a valid input, or output when `is_output`.
pub fn builtin_valid_mask(kind: BuiltInKind, is_output: bool) -> StageMask {
    use BuiltInKind as B;
    const VS: StageMask = StageMask::VERTEX;
    const TCS: StageMask = StageMask::TESS_CONTROL;
    const TES: StageMask = StageMask::TESS_EVAL;
    const GS: StageMask = StageMask::GEOMETRY;
    const FS: StageMask = StageMask::FRAGMENT;
    const CS: StageMask = StageMask::COMPUTE;

    if is_output {
        return match kind {
            B::Position | B::PointSize | B::ClipDistance | B::CullDistance => {
                VS.union(TCS).union(TES).union(GS)
            }
            B::Layer | B::ViewportIndex => VS.union(TES).union(GS),
            B::PrimitiveId => GS,
            B::TessLevelOuter | B::TessLevelInner => TCS,
            B::FragDepth | B::SampleMask | B::FragStencilRef => FS,
            _ => StageMask::EMPTY,
        };
    }
    match kind {
        B::Position | B::PointSize | B::ClipDistance | B::CullDistance => {
            TCS.union(TES).union(GS).union(if matches!(kind, B::ClipDistance | B::CullDistance) {
                FS
            } else {
                StageMask::EMPTY
            })
        }
        B::VertexId
        | B::InstanceId
        | B::VertexIndex
        | B::InstanceIndex
        | B::BaseVertex
        | B::BaseInstance
        | B::DrawIndex => VS,
        B::PrimitiveId => TCS.union(TES).union(GS).union(FS),
        B::InvocationId => TCS.union(GS),
        B::Layer | B::ViewportIndex => FS,
        B::TessLevelOuter | B::TessLevelInner | B::TessCoord => TES,
        B::PatchVertices => TCS.union(TES),
        B::FragCoord
        | B::PointCoord
        | B::FrontFacing
        | B::SampleId
        | B::SamplePosition
        | B::SampleMask
        | B::HelperInvocation => FS,
        B::FragDepth | B::FragStencilRef => StageMask::EMPTY,
        B::NumWorkgroups
        | B::WorkgroupSize
        | B::WorkgroupId
        | B::LocalInvocationId
        | B::GlobalInvocationId
        | B::LocalInvocationIndex
        | B::NumSubgroups
        | B::SubgroupId => CS,
        B::SubgroupSize
        | B::SubgroupLocalInvocationId
        | B::SubgroupEqMask
        | B::SubgroupGeMask
        | B::SubgroupGtMask
        | B::SubgroupLeMask
        | B::SubgroupLtMask
        | B::DeviceIndex => ALL_STAGES,
        B::ViewIndex => StageMask::ALL_GRAPHICS,
        B::InterpPerspSample
        | B::InterpPerspCenter
        | B::InterpPerspCentroid
        | B::InterpPullMode
        | B::InterpLinearSample
        | B::InterpLinearCenter
        | B::InterpLinearCentroid
        | B::SamplePosOffset
        | B::NumSamples
        | B::SamplePatternIdx => FS,
        B::WaveId => GS,
    }
}

pub fn is_builtin_input(kind: BuiltInKind) -> bool {
    !builtin_valid_mask(kind, false).is_empty()
}

pub fn is_builtin_output(kind: BuiltInKind) -> bool {
    !builtin_valid_mask(kind, true).is_empty()
}

// Generic inputs and outputs.
impl Builder<'_> {
    /// Reads `result_ty` from input `location` plus the dynamic
    /// `location_offset`, starting at component `elem_idx`.
    ///
    /// `location_count` is the number of locations the offset may reach.
    /// Per-vertex inputs of tessellation and geometry stages take a
    /// `vertex_index`; a fragment input with [`InOutInfo::has_interp_aux`]
    /// takes its auxiliary interpolation value in the same operand.
    #[allow(clippy::too_many_arguments)]
    pub fn create_read_generic_input(
        &mut self,
        result_ty: Handle<Type>,
        location: u32,
        location_offset: Value,
        elem_idx: Value,
        location_count: u32,
        info: InOutInfo,
        vertex_index: Option<Value>,
    ) -> Result<Value, BuildError> {
        self.read_generic_input_output(
            false,
            result_ty,
            location,
            location_offset,
            elem_idx,
            location_count,
            info,
            vertex_index,
        )
    }

    /// Reads back an output of the current stage, as a tessellation control
    /// shader reads outputs of other invocations.
    #[allow(clippy::too_many_arguments)]
    pub fn create_read_generic_output(
        &mut self,
        result_ty: Handle<Type>,
        location: u32,
        location_offset: Value,
        elem_idx: Value,
        location_count: u32,
        info: InOutInfo,
        vertex_index: Option<Value>,
    ) -> Result<Value, BuildError> {
        self.read_generic_input_output(
            true,
            result_ty,
            location,
            location_offset,
            elem_idx,
            location_count,
            info,
            vertex_index,
        )
    }

    /// Shared lowering of generic reads.
    #[allow(clippy::too_many_arguments)]
    pub fn read_generic_input_output(
        &mut self,
        is_output: bool,
        result_ty: Handle<Type>,
        location: u32,
        location_offset: Value,
        elem_idx: Value,
        location_count: u32,
        info: InOutInfo,
        vertex_index: Option<Value>,
    ) -> Result<Value, BuildError> {
        let stage = self.stage();
        debug_assert!(
            !is_output || stage == ShaderStage::TessControl,
            "outputs are only read back in a tessellation control shader"
        );
        self.mark_generic_input_output_usage(is_output, location, location_count, info, vertex_index);

        let mut args = vec![location_offset, elem_idx];
        if is_output {
            args.extend(vertex_index);
            let callee = Callee::OutputImportGeneric {
                location,
                per_vertex: vertex_index.is_some(),
            };
            return Ok(self.call(callee, args, result_ty));
        }

        if stage == ShaderStage::Fragment && info.has_interp_aux {
            let aux = vertex_index.ok_or_else(|| BuildError::ShapeMismatch {
                op: "read generic input",
                detail: "interpolation without its auxiliary value".into(),
            })?;
            let aux = self.modify_aux_interp_value(aux, info)?;
            args.push(aux);
            let interp = if info.interp_loc == InterpLoc::Explicit {
                InterpMode::Custom
            } else {
                info.interp_mode
            };
            let callee = Callee::InputInterpolant { location, interp };
            return Ok(self.call(callee, args, result_ty));
        }

        args.extend(vertex_index);
        let callee = Callee::InputGeneric {
            location,
            interp: info.interp_mode,
            loc: info.interp_loc,
            per_vertex: vertex_index.is_some(),
        };
        Ok(self.call(callee, args, result_ty))
    }

    /// Writes `value` to output `location` plus `location_offset`, starting
    /// at component `elem_idx`.
    #[allow(clippy::too_many_arguments)]
    pub fn create_write_generic_output(
        &mut self,
        value: Value,
        location: u32,
        location_offset: Value,
        elem_idx: Value,
        location_count: u32,
        info: InOutInfo,
        vertex_index: Option<Value>,
    ) -> Result<Value, BuildError> {
        self.mark_generic_input_output_usage(true, location, location_count, info, vertex_index);
        if self.stage() == ShaderStage::Fragment {
            let ty = self.type_of(value);
            self.mark_fs_output_type(ty, location, info);
        }
        let mut args = vec![location_offset, elem_idx];
        args.extend(vertex_index);
        args.push(value);
        let callee = Callee::OutputExportGeneric {
            location,
            stream: info.stream,
            per_vertex: vertex_index.is_some(),
        };
        Ok(self.call_void(callee, args))
    }

    /// Writes `value` to transform-feedback buffer `xfb_buffer` at byte
    /// `xfb_offset` of each vertex record of `xfb_stride` bytes.
    #[allow(clippy::too_many_arguments)]
    pub fn create_write_xfb_output(
        &mut self,
        value: Value,
        is_built_in: bool,
        location: u32,
        xfb_buffer: u32,
        xfb_stride: u32,
        xfb_offset: u32,
        info: InOutInfo,
    ) -> Result<Value, BuildError> {
        if xfb_buffer >= 4 || info.stream >= 4 {
            return Err(BuildError::ShapeMismatch {
                op: "write xfb output",
                detail: format!("buffer {xfb_buffer} stream {}", info.stream),
            });
        }
        log::debug!(
            "xfb output {} {location} to buffer {xfb_buffer} at {xfb_offset}",
            if is_built_in { "built-in" } else { "location" }
        );
        let stage = self.stage();
        let usage = self.state_mut().resource_usage_mut(stage);
        usage.xfb.enabled = true;
        usage.xfb.strides[xfb_buffer as usize] = xfb_stride;
        usage.xfb.stream_buffers[info.stream as usize] |= 1 << xfb_buffer;

        let callee = Callee::OutputExportXfb {
            buffer: xfb_buffer,
            offset: xfb_offset,
            stream: info.stream,
        };
        Ok(self.call_void(callee, vec![value]))
    }

    /// Records the locations a generic access may touch. Per-patch
    /// locations of tessellation stages are kept apart from per-vertex ones.
    pub fn mark_generic_input_output_usage(
        &mut self,
        is_output: bool,
        location: u32,
        location_count: u32,
        info: InOutInfo,
        vertex_index: Option<Value>,
    ) {
        let stage = self.stage();
        let per_patch = vertex_index.is_none()
            && ((stage == ShaderStage::TessControl && is_output)
                || (stage == ShaderStage::TessEval && !is_output));
        let usage = self.state_mut().resource_usage_mut(stage);
        let map = match (is_output, per_patch) {
            (false, false) => &mut usage.input_locations,
            (true, false) => &mut usage.output_locations,
            (false, true) => &mut usage.per_patch_input_locations,
            (true, true) => &mut usage.per_patch_output_locations,
        };
        for loc in location..location + location_count.max(1) {
            map.entry(loc).or_insert(None);
        }
        if is_output && stage == ShaderStage::Geometry {
            for loc in location..location + location_count.max(1) {
                usage.gs_output_streams.insert(loc, info.stream);
            }
        }
        if !is_output && stage == ShaderStage::Fragment {
            self.mark_interpolation_info(info);
        }
    }

    /// Records the interpolation mode and location of a fragment input.
    pub fn mark_interpolation_info(&mut self, info: InOutInfo) {
        let stage = self.stage();
        let usage = self.state_mut().resource_usage_mut(stage);
        let interp = &mut usage.interp;
        match info.interp_mode {
            InterpMode::Smooth => interp.smooth = true,
            InterpMode::Flat => interp.flat = true,
            InterpMode::NoPersp => interp.no_persp = true,
            InterpMode::Custom => interp.custom = true,
        }
        if matches!(info.interp_mode, InterpMode::Smooth | InterpMode::NoPersp) {
            match info.interp_loc {
                InterpLoc::Unknown | InterpLoc::Center => interp.center = true,
                InterpLoc::Centroid => interp.centroid = true,
                InterpLoc::Sample => {
                    interp.sample = true;
                    usage.run_at_sample_rate = true;
                }
                InterpLoc::Explicit => interp.custom = true,
            }
        }
        if info.has_interp_aux
            && info.interp_mode == InterpMode::Smooth
            && matches!(info.interp_loc, InterpLoc::Center | InterpLoc::Sample)
        {
            usage.interp.pull_mode = true;
        }
    }

    /// Records the type written to colour target `location`.
    pub fn mark_fs_output_type(&mut self, ty: Handle<Type>, location: u32, info: InOutInfo) {
        let inner = self.type_inner(ty);
        let Some(mut scalar) = inner.scalar() else {
            return;
        };
        if scalar.is_integer() {
            let kind = if info.is_signed {
                ScalarKind::Sint
            } else {
                ScalarKind::Uint
            };
            scalar = scalar.with_kind(kind);
        }
        let Some(basic) = BasicType::from_scalar(scalar) else {
            return;
        };
        if location as usize >= MAX_COLOR_TARGETS {
            log::warn!("fragment output location {location} has no colour target");
            return;
        }
        let stage = self.stage();
        let usage = self.state_mut().resource_usage_mut(stage);
        usage.fs_output_types[location as usize] = Some(FsOutputType {
            basic,
            components: inner.component_count(),
        });
    }
}

// Interpolation.
impl Builder<'_> {
    /// Turns the auxiliary operand of an interpolated read into what the
    /// hardware interpolates with: barycentrics at an offset from the pixel
    /// center or at a sample position, or the vertex index unchanged for
    /// explicit per-vertex reads.
    pub fn modify_aux_interp_value(
        &mut self,
        aux: Value,
        info: InOutInfo,
    ) -> Result<Value, BuildError> {
        if info.interp_loc == InterpLoc::Explicit {
            return Ok(self.convert(aux, Scalar::U32));
        }
        let offset = if info.interp_loc == InterpLoc::Center {
            aux
        } else {
            let pos = BuiltInKind::SamplePosOffset;
            self.read_builtin(false, pos, InOutInfo::default(), None, Some(aux))?
        };
        if info.interp_mode == InterpMode::NoPersp {
            self.eval_ij_offset_no_persp(offset)
        } else {
            self.eval_ij_offset_smooth(offset)
        }
    }

    /// Linear barycentrics at `offset` from the pixel center.
    pub fn eval_ij_offset_no_persp(&mut self, offset: Value) -> Result<Value, BuildError> {
        let center = self.read_builtin(
            false,
            BuiltInKind::InterpLinearCenter,
            InOutInfo::default(),
            None,
            None,
        )?;
        self.adjust_ij(center, offset)
    }

    /// Perspective-correct barycentrics at `offset` from the pixel center.
    ///
    /// The pull-mode value `(i/w, j/w, 1/w)` is linear in screen space, so
    /// it is moved to the offset first and divided by the moved `1/w`.
    pub fn eval_ij_offset_smooth(&mut self, offset: Value) -> Result<Value, BuildError> {
        let pull = self.read_builtin(
            false,
            BuiltInKind::InterpPullMode,
            InOutInfo::default(),
            None,
            None,
        )?;
        let adjusted = self.adjust_ij(pull, offset)?;
        let ij_over_w = self.swizzle(adjusted, &[0, 1]);
        let rcp_w = self.extract(adjusted, 2);
        let one = self.const_f32(1.0);
        let w = self.div(one, rcp_w);
        Ok(self.mul(ij_over_w, w))
    }

    /// `value + ddx(value) * offset.x + ddy(value) * offset.y`.
    pub fn adjust_ij(&mut self, value: Value, offset: Value) -> Result<Value, BuildError> {
        let offset = self.convert(offset, Scalar::F32);
        let offset_x = self.extract(offset, 0);
        let offset_y = self.extract(offset, 1);
        let ddx = self.create_derivative(value, false, true)?;
        let ddy = self.create_derivative(value, true, true)?;
        let step_x = self.mul(ddx, offset_x);
        let adjusted = self.add(value, step_x);
        let step_y = self.mul(ddy, offset_y);
        Ok(self.add(adjusted, step_y))
    }
}

// Built-ins.
impl Builder<'_> {
    /// Reads built-in input `kind`. `vertex_index` selects the vertex of a
    /// per-vertex input and `index` the element of an arrayed one.
    pub fn create_read_builtin_input(
        &mut self,
        kind: BuiltInKind,
        info: InOutInfo,
        vertex_index: Option<Value>,
        index: Option<Value>,
    ) -> Result<Value, BuildError> {
        debug_assert!(is_builtin_input(kind), "{} is not an input", kind.name());
        self.read_builtin(false, kind, info, vertex_index, index)
    }

    /// Reads back built-in output `kind` of the current stage.
    pub fn create_read_builtin_output(
        &mut self,
        kind: BuiltInKind,
        info: InOutInfo,
        vertex_index: Option<Value>,
        index: Option<Value>,
    ) -> Result<Value, BuildError> {
        debug_assert!(is_builtin_output(kind), "{} is not an output", kind.name());
        self.read_builtin(true, kind, info, vertex_index, index)
    }

    pub fn create_write_builtin_output(
        &mut self,
        value: Value,
        kind: BuiltInKind,
        info: InOutInfo,
        vertex_index: Option<Value>,
        index: Option<Value>,
    ) -> Result<Value, BuildError> {
        debug_assert!(is_builtin_output(kind), "{} is not an output", kind.name());
        debug_assert!(
            builtin_valid_mask(kind, true).contains_stage(self.stage()),
            "{} is not an output of the {} stage",
            kind.name(),
            self.stage().name()
        );
        self.mark_builtin_output_usage(kind, info.array_size, info.stream);
        let mut args: Vec<Value> = vertex_index.into_iter().chain(index).collect();
        args.push(value);
        let callee = Callee::OutputExportBuiltIn {
            kind,
            stream: info.stream,
            per_vertex: vertex_index.is_some(),
            indexed: index.is_some(),
        };
        Ok(self.call_void(callee, args))
    }

    /// Shared lowering of built-in reads. Subgroup built-ins are computed
    /// in place; everything else becomes an import the entry-point mutator
    /// resolves.
    pub fn read_builtin(
        &mut self,
        is_output: bool,
        kind: BuiltInKind,
        info: InOutInfo,
        vertex_index: Option<Value>,
        index: Option<Value>,
    ) -> Result<Value, BuildError> {
        debug_assert!(
            builtin_valid_mask(kind, is_output).contains_stage(self.stage()),
            "{} is not valid in the {} stage",
            kind.name(),
            self.stage().name()
        );
        if is_output {
            self.mark_builtin_output_usage(kind, info.array_size, info.stream);
        } else {
            self.mark_builtin_input_usage(kind, info.array_size);
        }

        if !is_output {
            match kind {
                BuiltInKind::SubgroupSize => {
                    let size = self.wave_size();
                    return Ok(self.const_u32(size));
                }
                BuiltInKind::SubgroupLocalInvocationId => return self.lane_id(),
                BuiltInKind::SubgroupEqMask
                | BuiltInKind::SubgroupGeMask
                | BuiltInKind::SubgroupGtMask
                | BuiltInKind::SubgroupLeMask
                | BuiltInKind::SubgroupLtMask => return self.subgroup_mask(kind),
                _ => {}
            }
        }

        let mut ty = self.builtin_type(kind, info);
        if index.is_some() {
            if let TypeInner::Array { base, .. } = self.type_inner(ty) {
                ty = base;
            }
        }
        let args: Vec<Value> = vertex_index.into_iter().chain(index).collect();
        let per_vertex = vertex_index.is_some();
        let indexed = index.is_some();
        let callee = if is_output {
            Callee::OutputImportBuiltIn {
                kind,
                per_vertex,
                indexed,
            }
        } else {
            Callee::InputBuiltIn {
                kind,
                per_vertex,
                indexed,
            }
        };
        Ok(self.call(callee, args, ty))
    }

    /// `uvec4` subgroup mask relative to the current lane, with lanes past
    /// the wave size cleared.
    fn subgroup_mask(&mut self, kind: BuiltInKind) -> Result<Value, BuildError> {
        let lane = self.lane_id()?;
        let lane = self.convert(lane, Scalar::U64);
        let one = self.const_u64(1);
        let ones = self.const_u64(u64::MAX);
        let ge = self.binary(BinaryOp::ShiftLeft, ones, lane);
        let gt = self.binary(BinaryOp::ShiftLeft, ge, one);
        let mask = match kind {
            BuiltInKind::SubgroupEqMask => self.binary(BinaryOp::ShiftLeft, one, lane),
            BuiltInKind::SubgroupGeMask => ge,
            BuiltInKind::SubgroupGtMask => gt,
            BuiltInKind::SubgroupLeMask => self.unary(UnaryOp::BitwiseNot, gt),
            _ => self.unary(UnaryOp::BitwiseNot, ge),
        };
        let mask = if self.wave_size() == 32 {
            let low = self.const_u64(u64::from(u32::MAX));
            self.binary(BinaryOp::BitwiseAnd, mask, low)
        } else {
            mask
        };
        Ok(self.mask_to_uvec4(mask))
    }

    /// Type of built-in `kind`; arrayed built-ins take their size from
    /// `info`.
    pub fn builtin_type(&mut self, kind: BuiltInKind, info: InOutInfo) -> Handle<Type> {
        use BuiltInKind as B;
        let array = |b: &mut Self, scalar: Scalar, size: u32| {
            let base = b.scalar_type(scalar);
            b.insert_type(TypeInner::Array {
                base,
                size: size.max(1),
            })
        };
        match kind {
            B::Position | B::FragCoord => self.vector_type(Scalar::F32, 4),
            B::PointSize | B::FragDepth => self.scalar_type(Scalar::F32),
            B::ClipDistance | B::CullDistance => array(self, Scalar::F32, info.array_size),
            B::TessLevelOuter => array(self, Scalar::F32, 4),
            B::TessLevelInner => array(self, Scalar::F32, 2),
            B::SampleMask => array(self, Scalar::I32, info.array_size),
            B::TessCoord | B::InterpPullMode => self.vector_type(Scalar::F32, 3),
            B::PointCoord
            | B::SamplePosition
            | B::SamplePosOffset
            | B::InterpPerspSample
            | B::InterpPerspCenter
            | B::InterpPerspCentroid
            | B::InterpLinearSample
            | B::InterpLinearCenter
            | B::InterpLinearCentroid => self.vector_type(Scalar::F32, 2),
            B::FrontFacing | B::HelperInvocation => self.scalar_type(Scalar::BOOL),
            B::NumWorkgroups
            | B::WorkgroupSize
            | B::WorkgroupId
            | B::LocalInvocationId
            | B::GlobalInvocationId => self.vector_type(Scalar::U32, 3),
            B::SubgroupEqMask
            | B::SubgroupGeMask
            | B::SubgroupGtMask
            | B::SubgroupLeMask
            | B::SubgroupLtMask => self.vector_type(Scalar::U32, 4),
            B::LocalInvocationIndex
            | B::SubgroupSize
            | B::NumSubgroups
            | B::SubgroupId
            | B::SubgroupLocalInvocationId
            | B::WaveId => self.scalar_type(Scalar::U32),
            B::VertexId
            | B::InstanceId
            | B::PrimitiveId
            | B::InvocationId
            | B::Layer
            | B::ViewportIndex
            | B::PatchVertices
            | B::SampleId
            | B::VertexIndex
            | B::InstanceIndex
            | B::BaseVertex
            | B::BaseInstance
            | B::DrawIndex
            | B::DeviceIndex
            | B::ViewIndex
            | B::FragStencilRef
            | B::NumSamples
            | B::SamplePatternIdx => self.scalar_type(Scalar::I32),
        }
    }

    /// Records a built-in input, with what reading it implies for fragment
    /// shaders.
    pub fn mark_builtin_input_usage(&mut self, kind: BuiltInKind, array_size: u32) {
        let stage = self.stage();
        let usage = self.state_mut().resource_usage_mut(stage);
        usage.mark_built_in_input(kind, array_size);
        if stage != ShaderStage::Fragment {
            return;
        }
        let interp = &mut usage.interp;
        match kind {
            BuiltInKind::SampleId | BuiltInKind::SamplePosition => usage.run_at_sample_rate = true,
            BuiltInKind::HelperInvocation => usage.uses_helper_query = true,
            BuiltInKind::InterpPerspSample => {
                interp.smooth = true;
                interp.sample = true;
            }
            BuiltInKind::InterpPerspCenter => {
                interp.smooth = true;
                interp.center = true;
            }
            BuiltInKind::InterpPerspCentroid => {
                interp.smooth = true;
                interp.centroid = true;
            }
            BuiltInKind::InterpPullMode => {
                interp.smooth = true;
                interp.pull_mode = true;
            }
            BuiltInKind::InterpLinearSample => {
                interp.no_persp = true;
                interp.sample = true;
            }
            BuiltInKind::InterpLinearCenter => {
                interp.no_persp = true;
                interp.center = true;
            }
            BuiltInKind::InterpLinearCentroid => {
                interp.no_persp = true;
                interp.centroid = true;
            }
            _ => {}
        }
    }

    pub fn mark_builtin_output_usage(&mut self, kind: BuiltInKind, array_size: u32, stream: u32) {
        let stage = self.stage();
        debug_assert!(stream == 0 || stage == ShaderStage::Geometry);
        self.state_mut()
            .resource_usage_mut(stage)
            .mark_built_in_output(kind, array_size, stream);
    }
}

#[cfg(test)]
mod tests {
    use wavefront_interp::{Invocation, Value as LaneValue};
    use wavefront_ir::{BuiltInKind, InterpLoc, InterpMode, Scalar, ShaderStage};
    use wavefront_state::{BasicType, TargetInfo};

    use super::*;
    use crate::testing::Harness;

    fn stage(stage: ShaderStage) -> Harness {
        Harness::with(TargetInfo::default(), stage)
    }

    #[test]
    fn output_write_then_read_back() {
        let mut h = stage(ShaderStage::TessControl);
        let read = {
            let mut b = h.b();
            let f32x4 = b.vector_type(Scalar::F32, 4);
            let parts = vec![
                b.const_f32(1.0),
                b.const_f32(2.0),
                b.const_f32(3.0),
                b.const_f32(4.0),
            ];
            let value = b.vector_from(parts);
            let zero = b.const_u32(0);
            let vertex = b.const_u32(1);
            let info = InOutInfo::default();
            b.create_write_generic_output(value, 3, zero, zero, 1, info, Some(vertex))
                .unwrap();
            b.create_read_generic_output(f32x4, 3, zero, zero, 1, info, Some(vertex))
                .unwrap()
        };
        let exec = h.run();
        assert_eq!(
            exec.lane(read, 9).unwrap().to_f32_vec(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
        let usage = h.state.resource_usage(ShaderStage::TessControl);
        assert!(usage.output_locations.contains_key(&3));
        assert!(usage.per_patch_output_locations.is_empty());
    }

    #[test]
    fn per_patch_outputs_are_separate() {
        let mut h = stage(ShaderStage::TessControl);
        {
            let mut b = h.b();
            let value = b.const_f32(0.5);
            let zero = b.const_u32(0);
            b.create_write_generic_output(value, 2, zero, zero, 2, InOutInfo::default(), None)
                .unwrap();
        }
        let usage = h.state.resource_usage(ShaderStage::TessControl);
        let patch: Vec<u32> = usage.per_patch_output_locations.keys().copied().collect();
        assert_eq!(patch, vec![2, 3]);
    }

    #[test]
    fn flat_fragment_input() {
        let mut h = stage(ShaderStage::Fragment);
        h.host.inputs.insert(
            (1, u32::MAX),
            LaneValue::Composite(vec![LaneValue::I32(7), LaneValue::I32(8)]),
        );
        let read = {
            let mut b = h.b();
            let i32_ty = b.scalar_type(Scalar::I32);
            let zero = b.const_u32(0);
            let elem = b.const_u32(1);
            let info = InOutInfo::with_interp(InterpMode::Flat, InterpLoc::Unknown);
            b.create_read_generic_input(i32_ty, 1, zero, elem, 1, info, None)
                .unwrap()
        };
        let exec = h.run();
        assert_eq!(exec.lane(read, 0), Some(&LaneValue::I32(8)));
        let usage = h.state.resource_usage(ShaderStage::Fragment);
        assert!(usage.interp.flat);
        assert!(!usage.interp.smooth);
        assert!(usage.input_locations.contains_key(&1));
    }

    #[test]
    fn sample_interpolation_runs_per_sample() {
        let mut h = stage(ShaderStage::Fragment);
        {
            let mut b = h.b();
            let f32_ty = b.scalar_type(Scalar::F32);
            let zero = b.const_u32(0);
            let sample = b.const_i32(2);
            let mut info = InOutInfo::with_interp(InterpMode::Smooth, InterpLoc::Sample);
            info.has_interp_aux = true;
            b.create_read_generic_input(f32_ty, 0, zero, zero, 1, info, Some(sample))
                .unwrap();
        }
        let usage = h.state.resource_usage(ShaderStage::Fragment);
        assert!(usage.run_at_sample_rate);
        assert!(usage.interp.pull_mode);
        assert!(usage.uses_built_in_input(BuiltInKind::SamplePosOffset));
        assert!(usage.uses_built_in_input(BuiltInKind::InterpPullMode));
    }

    #[test]
    fn linear_offset_follows_the_gradient() {
        let mut h = stage(ShaderStage::Fragment);
        // Barycentrics grow by 0.5 per pixel in x and 0.25 per pixel in y.
        for lane in 0..h.wave_size() {
            let (x, y) = ((lane & 1) as f32, ((lane >> 1) & 1) as f32);
            h.host.built_ins.insert(
                (BuiltInKind::InterpLinearCenter, lane),
                LaneValue::Composite(vec![
                    LaneValue::F32(1.0 + 0.5 * x),
                    LaneValue::F32(2.0 + 0.25 * y),
                ]),
            );
        }
        let ij = {
            let mut b = h.b();
            let parts = vec![b.const_f32(0.5), b.const_f32(-0.5)];
            let offset = b.vector_from(parts);
            b.eval_ij_offset_no_persp(offset).unwrap()
        };
        let exec = h.run();
        assert_eq!(exec.lane(ij, 0).unwrap().to_f32_vec(), vec![1.25, 1.875]);
        assert_eq!(exec.lane(ij, 3).unwrap().to_f32_vec(), vec![1.75, 2.125]);
    }

    #[test]
    fn smooth_offset_divides_by_w() {
        let mut h = stage(ShaderStage::Fragment);
        h.host.set_uniform_built_in(
            BuiltInKind::InterpPullMode,
            LaneValue::Composite(vec![
                LaneValue::F32(0.5),
                LaneValue::F32(0.25),
                LaneValue::F32(0.5),
            ]),
        );
        let ij = {
            let mut b = h.b();
            let parts = vec![b.const_f32(0.25), b.const_f32(0.25)];
            let offset = b.vector_from(parts);
            b.eval_ij_offset_smooth(offset).unwrap()
        };
        let exec = h.run();
        assert_eq!(exec.lane(ij, 6).unwrap().to_f32_vec(), vec![1.0, 0.5]);
    }

    #[test]
    fn subgroup_masks_from_lane_index() {
        let mut h = Harness::new();
        let masks: Vec<_> = {
            let mut b = h.b();
            [
                BuiltInKind::SubgroupEqMask,
                BuiltInKind::SubgroupGeMask,
                BuiltInKind::SubgroupGtMask,
                BuiltInKind::SubgroupLeMask,
                BuiltInKind::SubgroupLtMask,
            ]
            .into_iter()
            .map(|kind| {
                b.create_read_builtin_input(kind, InOutInfo::default(), None, None)
                    .unwrap()
            })
            .collect()
        };
        let exec = h.run();
        let lane = 37;
        let bits = |handle| {
            let words = exec.lane(handle, lane).unwrap().to_u32_vec();
            assert_eq!(&words[2..], &[0, 0]);
            u64::from(words[0]) | (u64::from(words[1]) << 32)
        };
        assert_eq!(bits(masks[0]), 1 << 37);
        assert_eq!(bits(masks[1]), u64::MAX << 37);
        assert_eq!(bits(masks[2]), u64::MAX << 38);
        assert_eq!(bits(masks[3]), !(u64::MAX << 38));
        assert_eq!(bits(masks[4]), !(u64::MAX << 37));
    }

    #[test]
    fn wave32_masks_stop_at_lane_31() {
        let mut target = TargetInfo::for_gfx_ip(10, 3);
        target.set_wave_size_all(32).unwrap();
        let mut h = Harness::with(target, ShaderStage::Compute);
        let (ge, id) = {
            let mut b = h.b();
            let info = InOutInfo::default();
            let ge = b
                .create_read_builtin_input(BuiltInKind::SubgroupGeMask, info, None, None)
                .unwrap();
            let id = b
                .create_read_builtin_input(BuiltInKind::SubgroupLocalInvocationId, info, None, None)
                .unwrap();
            (ge, id)
        };
        let exec = h.run();
        assert_eq!(exec.lane(ge, 4).unwrap().to_u32_vec(), vec![!0xF, 0, 0, 0]);
        assert_eq!(exec.lane(id, 17).and_then(LaneValue::as_u32), Some(17));
    }

    #[test]
    fn built_in_reads_and_writes_mark_usage() {
        let mut h = stage(ShaderStage::Geometry);
        h.host
            .built_ins
            .insert((BuiltInKind::PrimitiveId, 2), LaneValue::I32(40));
        let prim = {
            let mut b = h.b();
            let prim = b
                .create_read_builtin_input(BuiltInKind::PrimitiveId, InOutInfo::default(), None, None)
                .unwrap();
            let pos = {
                let zero = b.const_f32(0.0);
                b.splat(zero, 4)
            };
            let info = InOutInfo {
                stream: 1,
                ..InOutInfo::default()
            };
            b.create_write_builtin_output(pos, BuiltInKind::Position, info, None, None)
                .unwrap();
            b.create_write_builtin_output(prim, BuiltInKind::PrimitiveId, info, None, None)
                .unwrap();
            prim
        };
        let exec = h.run();
        assert_eq!(exec.lane(prim, 2), Some(&LaneValue::I32(40)));
        assert_eq!(h.host.built_in_outputs[&(BuiltInKind::PrimitiveId, 2)], LaneValue::I32(40));
        let usage = h.state.resource_usage(ShaderStage::Geometry);
        assert!(usage.uses_built_in_input(BuiltInKind::PrimitiveId));
        assert_eq!(usage.built_in_outputs[&BuiltInKind::Position].stream_mask, 0b10);
    }

    #[test]
    fn arrayed_built_in_element() {
        let mut h = stage(ShaderStage::Fragment);
        let clip = {
            let mut b = h.b();
            let index = b.const_u32(1);
            let info = InOutInfo {
                array_size: 4,
                ..InOutInfo::default()
            };
            b.create_read_builtin_input(BuiltInKind::ClipDistance, info, None, Some(index))
                .unwrap()
        };
        assert_eq!(h.b().inner_of(clip), TypeInner::Scalar(Scalar::F32));
        let usage = h.state.resource_usage(ShaderStage::Fragment);
        assert_eq!(usage.built_in_inputs[&BuiltInKind::ClipDistance], 4);
    }

    #[test]
    fn fragment_outputs_record_types() {
        let mut h = stage(ShaderStage::Fragment);
        {
            let mut b = h.b();
            let zero = b.const_u32(0);
            let color = {
                let one = b.const_f32(1.0);
                b.splat(one, 4)
            };
            b.create_write_generic_output(color, 0, zero, zero, 1, InOutInfo::default(), None)
                .unwrap();
            let ids = {
                let id = b.const_u32(5);
                b.splat(id, 2)
            };
            let signed = InOutInfo {
                is_signed: true,
                ..InOutInfo::default()
            };
            b.create_write_generic_output(ids, 2, zero, zero, 1, signed, None)
                .unwrap();
        }
        let usage = h.state.resource_usage(ShaderStage::Fragment);
        assert_eq!(
            usage.fs_output_types[0],
            Some(FsOutputType {
                basic: BasicType::Float,
                components: 4
            })
        );
        assert_eq!(usage.fs_output_types[2].map(|t| t.basic), Some(BasicType::Int));
        assert_eq!(usage.fs_output_types[1], None);
    }

    #[test]
    fn xfb_output_marks_buffers() {
        let mut h = stage(ShaderStage::Vertex);
        {
            let mut b = h.b();
            let value = b.const_f32(2.0);
            let info = InOutInfo {
                stream: 0,
                ..InOutInfo::default()
            };
            b.create_write_xfb_output(value, false, 4, 2, 16, 8, info)
                .unwrap();
            assert!(b.create_write_xfb_output(value, false, 4, 5, 16, 8, info).is_err());
        }
        h.run();
        assert_eq!(h.host.xfb_outputs.len(), h.wave_size() as usize);
        assert_eq!(h.host.xfb_outputs[0], (2, 8, LaneValue::F32(2.0)));
        let xfb = &h.state.resource_usage(ShaderStage::Vertex).xfb;
        assert!(xfb.enabled);
        assert_eq!(xfb.strides[2], 16);
        assert_eq!(xfb.stream_buffers[0], 0b100);
    }

    #[test]
    fn validity_tables() {
        assert!(is_builtin_input(BuiltInKind::FragCoord));
        assert!(!is_builtin_output(BuiltInKind::FragCoord));
        assert!(is_builtin_output(BuiltInKind::FragDepth));
        assert!(!is_builtin_input(BuiltInKind::FragDepth));
        assert!(builtin_valid_mask(BuiltInKind::Position, true).contains_stage(ShaderStage::Vertex));
        assert!(!builtin_valid_mask(BuiltInKind::Position, false).contains_stage(ShaderStage::Vertex));
        assert!(builtin_valid_mask(BuiltInKind::SubgroupEqMask, false).contains_stage(ShaderStage::Compute));
        for kind in BuiltInKind::ALL {
            assert!(
                is_builtin_input(kind) || is_builtin_output(kind),
                "{} is neither input nor output",
                kind.name()
            );
        }
    }

    #[test]
    fn explicit_vertex_read() {
        let mut h = stage(ShaderStage::Fragment);
        h.host.inputs.insert((0, u32::MAX), LaneValue::F32(3.5));
        let read = {
            let mut b = h.b();
            let f32_ty = b.scalar_type(Scalar::F32);
            let zero = b.const_u32(0);
            let vertex = b.const_i32(2);
            let mut info = InOutInfo::with_interp(InterpMode::Custom, InterpLoc::Explicit);
            info.has_interp_aux = true;
            b.create_read_generic_input(f32_ty, 0, zero, zero, 1, info, Some(vertex))
                .unwrap()
        };
        let func = h.func();
        assert!(func.expressions.iter().any(|(_, e)| matches!(
            e,
            Expression::Call {
                callee: Callee::InputInterpolant {
                    interp: InterpMode::Custom,
                    ..
                },
                ..
            }
        )));
        let exec = h.run_with(Invocation::new(64));
        assert_eq!(exec.lane(read, 0), Some(&LaneValue::F32(3.5)));
        assert!(h.state.resource_usage(ShaderStage::Fragment).interp.custom);
    }
}
