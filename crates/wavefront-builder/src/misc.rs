//! Stage control: geometry emission, barriers, kill and demote, clocks and
//! screen-space derivatives.

use wavefront_ir::{Callee, Expression, Handle, Scalar, ShaderStage};

use crate::Builder;
use crate::error::BuildError;

type Value = Handle<Expression>;

impl Builder<'_> {
    pub fn create_emit_vertex(&mut self, stream: u32) -> Value {
        debug_assert_eq!(self.stage(), ShaderStage::Geometry);
        let stage = self.stage();
        self.state_mut().resource_usage_mut(stage).gs_emit_streams |= 1 << stream;
        self.call_void(Callee::EmitVertex { stream }, Vec::new())
    }

    pub fn create_end_primitive(&mut self, stream: u32) -> Value {
        debug_assert_eq!(self.stage(), ShaderStage::Geometry);
        let stage = self.stage();
        self.state_mut().resource_usage_mut(stage).gs_cut_streams |= 1 << stream;
        self.call_void(Callee::EndPrimitive { stream }, Vec::new())
    }

    /// Workgroup execution barrier.
    pub fn create_barrier(&mut self) -> Value {
        let stage = self.stage();
        self.state_mut().resource_usage_mut(stage).uses_barrier = true;
        self.call_void(Callee::Barrier, Vec::new())
    }

    /// Discards the fragment; the lanes stop executing.
    pub fn create_kill(&mut self) -> Value {
        debug_assert_eq!(self.stage(), ShaderStage::Fragment);
        let stage = self.stage();
        self.state_mut().resource_usage_mut(stage).uses_discard = true;
        self.call_void(Callee::Kill, Vec::new())
    }

    /// 64-bit clock: the shader clock, or the device's constant-rate clock
    /// when `realtime`.
    pub fn create_read_clock(&mut self, realtime: bool) -> Value {
        let ty = self.scalar_type(Scalar::U64);
        self.call(Callee::ReadClock { realtime }, Vec::new(), ty)
    }

    /// Turns the invocation into a helper: it keeps running for the
    /// derivatives of its quad but has no visible effects.
    pub fn create_demote_to_helper_invocation(&mut self) -> Value {
        debug_assert_eq!(self.stage(), ShaderStage::Fragment);
        let stage = self.stage();
        self.state_mut().resource_usage_mut(stage).uses_demote = true;
        self.call_void(Callee::Demote, Vec::new())
    }

    pub fn create_is_helper_invocation(&mut self) -> Value {
        let stage = self.stage();
        self.state_mut().resource_usage_mut(stage).uses_helper_query = true;
        let ty = self.scalar_type(Scalar::BOOL);
        self.call(Callee::IsHelperInvocation, Vec::new(), ty)
    }

    /// Screen-space derivative of a float `value` along x, or y when `is_y`.
    ///
    /// Lanes of a 2x2 quad are laid out `[top-left, top-right, bottom-left,
    /// bottom-right]`. A fine derivative differences within the lane's own
    /// row or column; a coarse one uses the top-left pixel's for the whole
    /// quad.
    pub fn create_derivative(
        &mut self,
        value: Value,
        is_y: bool,
        is_fine: bool,
    ) -> Result<Value, BuildError> {
        self.expect_float("derivative", value)?;
        let (first, second) = match (is_y, is_fine) {
            (false, true) => ([0, 0, 2, 2], [1, 1, 3, 3]),
            (false, false) => ([0, 0, 0, 0], [1, 1, 1, 1]),
            (true, true) => ([0, 1, 0, 1], [2, 3, 2, 3]),
            (true, false) => ([0, 0, 0, 0], [2, 2, 2, 2]),
        };
        let from = self.create_subgroup_swizzle_quad(value, first)?;
        let to = self.create_subgroup_swizzle_quad(value, second)?;
        let diff = self.sub(to, from);
        Ok(self.create_wqm(diff))
    }
}

#[cfg(test)]
mod tests {
    use wavefront_interp::{Invocation, Value as LaneValue};
    use wavefront_ir::{BinaryOp, BuiltInKind, Callee, Expression, Handle, Scalar, ShaderStage};
    use wavefront_state::TargetInfo;

    use crate::InOutInfo;
    use crate::testing::{Harness, approx};

    /// Square of the lane argument, which holds `x + 10 * y` of the pixel
    /// the lane shades in its quad. Squaring makes fine and coarse
    /// derivatives differ.
    fn quad_ramp(h: &mut Harness) -> Handle<Expression> {
        let mut b = h.b();
        let f32_ty = b.scalar_type(Scalar::F32);
        let arg = b.add_argument("v", f32_ty, None, false);
        b.mul(arg, arg)
    }

    fn ramp_invocation(wave: u32) -> Invocation {
        Invocation::new(wave).lane_arg_with(|lane| {
            let (x, y) = ((lane & 1) as f32, ((lane >> 1) & 1) as f32);
            LaneValue::F32(x + 10.0 * y)
        })
    }

    fn derivatives(target: TargetInfo) {
        let mut h = Harness::with(target, ShaderStage::Fragment);
        let v = quad_ramp(&mut h);
        let (fine_x, coarse_x, fine_y, coarse_y) = {
            let mut b = h.b();
            (
                b.create_derivative(v, false, true).unwrap(),
                b.create_derivative(v, false, false).unwrap(),
                b.create_derivative(v, true, true).unwrap(),
                b.create_derivative(v, true, false).unwrap(),
            )
        };
        let wave = h.wave_size();
        let exec = h.run_with(ramp_invocation(wave));
        // Squares of the quad: 0, 1, 100, 121.
        approx(exec.lane(fine_x, 0), 1.0, 0.0);
        approx(exec.lane(fine_x, 2), 21.0, 0.0);
        approx(exec.lane(coarse_x, 3), 1.0, 0.0);
        approx(exec.lane(fine_y, 1), 120.0, 0.0);
        approx(exec.lane(coarse_y, 1), 100.0, 0.0);
        approx(exec.lane(fine_x, 6), 21.0, 0.0);
    }

    #[test]
    fn derivatives_with_dpp() {
        derivatives(TargetInfo::default());
    }

    #[test]
    fn derivatives_with_swizzle() {
        let mut target = TargetInfo::default();
        target.dpp = false;
        derivatives(target);
    }

    #[test]
    fn derivative_takes_floats() {
        let mut h = Harness::with(TargetInfo::default(), ShaderStage::Fragment);
        let mut b = h.b();
        let one = b.const_u32(1);
        assert!(b.create_derivative(one, false, true).is_err());
    }

    #[test]
    fn kill_stops_lanes() {
        let mut h = Harness::with(TargetInfo::default(), ShaderStage::Fragment);
        {
            let mut b = h.b();
            let id = b
                .create_read_builtin_input(
                    BuiltInKind::SubgroupLocalInvocationId,
                    InOutInfo::default(),
                    None,
                    None,
                )
                .unwrap();
            let four = b.const_u32(4);
            let low = b.binary(BinaryOp::Less, id, four);
            b.create_if(low, false, |b, _| {
                b.create_kill();
                Ok(())
            })
            .unwrap();
            b.create_barrier();
        }
        let exec = h.run();
        assert_eq!(exec.killed, 0xF);
        let barrier_lanes: Vec<u32> = h
            .host
            .calls
            .iter()
            .filter(|(_, c)| *c == Callee::Barrier)
            .map(|(lane, _)| *lane)
            .collect();
        assert_eq!(barrier_lanes, (4..64).collect::<Vec<_>>());
        assert!(h.state.resource_usage(ShaderStage::Fragment).uses_discard);
    }

    #[test]
    fn demoted_lanes_are_helpers() {
        let mut h = Harness::with(TargetInfo::default(), ShaderStage::Fragment);
        let helper = {
            let mut b = h.b();
            b.create_demote_to_helper_invocation();
            b.create_is_helper_invocation()
        };
        let exec = h.run_with(Invocation::new(64).with_exec(0b11));
        assert_eq!(exec.lane(helper, 1), Some(&LaneValue::Bool(true)));
        assert_eq!(h.host.helper_lanes, 0b11);
        let usage = h.state.resource_usage(ShaderStage::Fragment);
        assert!(usage.uses_demote);
        assert!(usage.uses_helper_query);
    }

    #[test]
    fn geometry_streams_and_barrier() {
        let mut h = Harness::with(TargetInfo::default(), ShaderStage::Geometry);
        {
            let mut b = h.b();
            b.create_emit_vertex(0);
            b.create_emit_vertex(2);
            b.create_end_primitive(2);
            b.create_barrier();
        }
        h.run_with(Invocation::new(64).with_exec(1));
        let callees: Vec<&Callee> = h.host.calls.iter().map(|(_, c)| c).collect();
        assert_eq!(
            callees,
            vec![
                &Callee::EmitVertex { stream: 0 },
                &Callee::EmitVertex { stream: 2 },
                &Callee::EndPrimitive { stream: 2 },
                &Callee::Barrier,
            ]
        );
        let usage = h.state.resource_usage(ShaderStage::Geometry);
        assert_eq!(usage.gs_emit_streams, 0b101);
        assert_eq!(usage.gs_cut_streams, 0b100);
        assert!(usage.uses_barrier);
    }

    #[test]
    fn clock_is_a_u64_call() {
        let mut h = Harness::new();
        let clock = h.b().create_read_clock(true);
        assert_eq!(h.b().scalar_of(clock), Scalar::U64);
        assert!(matches!(
            h.func().expressions[clock],
            Expression::Call {
                callee: Callee::ReadClock { realtime: true },
                ..
            }
        ));
    }
}
