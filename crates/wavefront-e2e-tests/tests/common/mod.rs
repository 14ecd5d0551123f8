use wavefront_builder::{Builder, InOutInfo};
use wavefront_interp::{Execution, Invocation, MemoryHost, Value};
#[allow(unused_imports)]
use wavefront_ir::{BuiltInKind, EntryArg, Expression, Handle, Module, Scalar, ShaderStage};
use wavefront_state::{PipelineState, TargetInfo};

/// One shader stage taken through the builder, the patch passes and the
/// interpreter.
#[allow(dead_code)]
pub struct Pipeline {
    pub module: Module,
    pub state: PipelineState,
    pub stage: ShaderStage,
    pub host: MemoryHost,
}

#[allow(dead_code)]
impl Pipeline {
    pub fn new(target: TargetInfo, stage: ShaderStage) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            module: Module::default(),
            state: PipelineState::new(target),
            stage,
            host: MemoryHost::new(),
        }
    }

    pub fn compute(target: TargetInfo) -> Self {
        Self::new(target, ShaderStage::Compute)
    }

    /// Builds into the entry point; the builder is flushed on return.
    pub fn build<R>(&mut self, f: impl FnOnce(&mut Builder<'_>) -> R) -> R {
        let mut b = Builder::for_stage(&mut self.module, &mut self.state, self.stage);
        f(&mut b)
    }

    pub fn patch(&mut self) {
        wavefront_patch::patch(&mut self.module, &mut self.state).expect("patching failed");
    }

    pub fn wave_size(&self) -> u32 {
        self.state.wave_size(self.stage)
    }

    /// Runs the patched entry point with lanes `exec` active.
    ///
    /// `arg` gives the value of a hardware argument in a lane; arguments it
    /// leaves out are zero.
    pub fn run(&mut self, exec: u64, arg: impl Fn(EntryArg, u32) -> Option<Value>) -> Execution {
        let ep = self
            .module
            .entry_points
            .iter()
            .find(|ep| ep.stage == self.stage)
            .expect("entry point");
        let data = self.state.interface_data(self.stage);
        assert_eq!(data.entry_args.len(), ep.function.arguments.len());

        let mut invocation = Invocation::new(self.wave_size()).with_exec(exec);
        for (info, param) in data.entry_args.iter().zip(&ep.function.arguments) {
            let zero = Value::zero(&self.module.types[param.ty].inner, &self.module.types);
            invocation = if info.in_reg {
                invocation.uniform_arg(arg(info.arg, 0).unwrap_or(zero))
            } else {
                invocation.lane_arg_with(|lane| arg(info.arg, lane).unwrap_or_else(|| zero.clone()))
            };
        }
        wavefront_interp::run(&self.module.types, &ep.function, &invocation, &mut self.host)
            .expect("interpretation failed")
    }

    /// Runs a patched compute shader whose lanes read `input(lane)` from the
    /// x component of the local invocation id.
    pub fn run_compute(&mut self, exec: u64, input: impl Fn(u32) -> u32) -> Execution {
        self.run(exec, |arg, lane| match arg {
            EntryArg::LocalInvocationId => Some(Value::Composite(vec![
                Value::U32(input(lane)),
                Value::U32(0),
                Value::U32(0),
            ])),
            _ => None,
        })
    }

    /// Every lane of the wave.
    pub fn all_lanes(&self) -> u64 {
        match self.wave_size() {
            64 => u64::MAX,
            size => (1u64 << size) - 1,
        }
    }
}

/// Stores `value` to a fresh local so that dead code elimination keeps it.
#[allow(dead_code)]
pub fn keep(b: &mut Builder<'_>, value: Handle<Expression>) {
    let ty = b.type_of(value);
    let local = b.add_local("keep", ty);
    b.store(local, value);
}

/// The x component of the local invocation id, as a `u32`.
#[allow(dead_code)]
pub fn compute_input(b: &mut Builder<'_>) -> Handle<Expression> {
    let id = b
        .create_read_builtin_input(BuiltInKind::LocalInvocationId, InOutInfo::default(), None, None)
        .expect("local invocation id");
    b.extract(id, 0)
}

/// [`compute_input`] converted to `f32`.
#[allow(dead_code)]
pub fn compute_input_f32(b: &mut Builder<'_>) -> Handle<Expression> {
    let input = compute_input(b);
    b.convert(input, Scalar::F32)
}

/// Targets covering each cross-lane lowering strategy.
#[allow(dead_code)]
pub fn targets() -> Vec<(&'static str, TargetInfo)> {
    let mut wave32 = TargetInfo::for_gfx_ip(10, 3);
    wave32.set_wave_size_all(32).expect("wave32");
    let mut no_dpp = TargetInfo::for_gfx_ip(9, 0);
    no_dpp.dpp = false;
    vec![
        ("gfx8", TargetInfo::for_gfx_ip(8, 0)),
        ("gfx9", TargetInfo::for_gfx_ip(9, 0)),
        ("gfx9 without dpp", no_dpp),
        ("gfx10 wave64", TargetInfo::for_gfx_ip(10, 3)),
        ("gfx10 wave32", wave32),
        ("gfx7", TargetInfo::for_gfx_ip(7, 0)),
    ]
}

/// Asserts two floats agree to a relative tolerance; NaN matches NaN.
#[allow(dead_code)]
#[track_caller]
pub fn assert_close(got: f32, want: f32, tol: f32, what: &str) {
    if got.is_nan() && want.is_nan() {
        return;
    }
    let scale = want.abs().max(1.0);
    assert!(
        (got - want).abs() <= tol * scale,
        "{what}: got {got}, want {want}"
    );
}
