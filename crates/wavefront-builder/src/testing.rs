//! Test harness: builds into one entry point and runs it in the interpreter.

use wavefront_interp::{Execution, Invocation, MemoryHost, Value};
use wavefront_ir::{Expression, Function, Handle, Module, ShaderStage};
use wavefront_state::{PipelineState, TargetInfo};

use crate::Builder;

pub(crate) struct Harness {
    pub module: Module,
    pub state: PipelineState,
    pub stage: ShaderStage,
    pub host: MemoryHost,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(TargetInfo::default(), ShaderStage::Compute)
    }

    pub fn with(target: TargetInfo, stage: ShaderStage) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut module = Module::default();
        module.get_or_add_entry_point(stage);
        let mut state = PipelineState::new(target);
        state.add_stage(stage);
        Self {
            module,
            state,
            stage,
            host: MemoryHost::new(),
        }
    }

    /// A builder appending to the entry point; dropping it emits what it
    /// built.
    pub fn b(&mut self) -> Builder<'_> {
        Builder::for_stage(&mut self.module, &mut self.state, self.stage)
    }

    pub fn vec3(&mut self, x: f32, y: f32, z: f32) -> Handle<Expression> {
        let mut b = self.b();
        let parts = vec![b.const_f32(x), b.const_f32(y), b.const_f32(z)];
        b.vector_from(parts)
    }

    pub fn func(&self) -> &Function {
        &self.module.entry_points[0].function
    }

    pub fn wave_size(&self) -> u32 {
        self.state.wave_size(self.stage)
    }

    pub fn run(&mut self) -> Execution {
        let invocation = Invocation::new(self.wave_size());
        self.run_with(invocation)
    }

    pub fn run_with(&mut self, invocation: Invocation) -> Execution {
        let func = &self.module.entry_points[0].function;
        wavefront_interp::run(&self.module.types, func, &invocation, &mut self.host)
            .expect("interpretation failed")
    }
}

/// Asserts that a lane value is a float within `tol` of `want`.
#[track_caller]
pub(crate) fn approx(got: Option<&Value>, want: f32, tol: f32) {
    let got = got.and_then(Value::as_f32).expect("expected a float value");
    assert!(
        (got - want).abs() <= tol,
        "got {got}, want {want} (tolerance {tol})"
    );
}
