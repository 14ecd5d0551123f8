mod demo;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use miette::{Context, IntoDiagnostic};

use wavefront_interp::{Execution, Invocation, MemoryHost, Value};
use wavefront_ir::{Module, Scalar, ShaderStage, TypeInner, dump_module};
use wavefront_state::{GfxIp, PipelineState, TargetInfo};

use crate::demo::{Demo, Output};

/// wavefront: lowers demonstration shaders to the SIMD hardware model
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Demonstration shader to build
    #[arg(short, long, value_enum, default_value = "arith")]
    demo: Demo,

    /// Shader stage the demo is built in
    #[arg(short, long, value_enum, default_value = "compute")]
    stage: Stage,

    /// Target GFX IP version, e.g. 9 or 10.3
    #[arg(long, default_value = "10.3")]
    gfx_ip: GfxIp,

    /// Wave size of every stage: 32 or 64 (default: the target's)
    #[arg(long)]
    wave_size: Option<u32>,

    /// User-data register budget (default: the target's)
    #[arg(long)]
    user_data_budget: Option<u32>,

    /// Dump IR to stderr before patching
    #[arg(long)]
    emit_ir: bool,

    /// Interpret the patched shader on one wave and print the demo outputs
    #[arg(long)]
    run: bool,

    /// Output path for the patched IR (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Stage {
    Vertex,
    TessControl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

impl From<Stage> for ShaderStage {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Vertex => Self::Vertex,
            Stage::TessControl => Self::TessControl,
            Stage::TessEval => Self::TessEval,
            Stage::Geometry => Self::Geometry,
            Stage::Fragment => Self::Fragment,
            Stage::Compute => Self::Compute,
        }
    }
}

impl Cli {
    fn pipeline_state(&self) -> miette::Result<PipelineState> {
        let mut target = TargetInfo::for_gfx_ip(self.gfx_ip.major, self.gfx_ip.minor);
        if let Some(size) = self.wave_size {
            target
                .set_wave_size_all(size)
                .into_diagnostic()
                .wrap_err("invalid --wave-size")?;
        }
        if let Some(budget) = self.user_data_budget {
            target.max_user_data = budget;
        }
        Ok(PipelineState::new(target))
    }
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let stage = ShaderStage::from(cli.stage);

    // 1. Target and pipeline configuration.
    let mut state = cli.pipeline_state()?;

    // 2. Build the demo shader.
    let mut module = Module::default();
    let outputs = demo::build(cli.demo, &mut module, &mut state, stage)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("building the demo shader failed")?;

    // 3. Optionally dump the unpatched IR to stderr.
    if cli.emit_ir {
        eprintln!("{}", dump_module(&module));
    }

    // 4. Mutate the entry point and clean up.
    wavefront_patch::patch(&mut module, &mut state)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("patching failed")?;
    let data = state.interface_data(stage);
    log::info!(
        "{}: {} entry arguments, {} user-data registers{}",
        stage.name(),
        data.entry_args.len(),
        data.user_data_regs,
        if data.spill_table.is_some() { ", spill table" } else { "" }
    );

    // 5. Write the patched IR.
    let text = dump_module(&module);
    match &cli.output {
        Some(path) => std::fs::write(path, &text)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => print!("{text}"),
    }

    // 6. Optionally interpret it.
    if cli.run {
        let exec = execute(&module, &state, stage)?;
        print_outputs(&exec, &outputs, state.wave_size(stage));
    }

    Ok(())
}

/// Runs the patched `stage` entry point over one wave.
///
/// Per-lane `u32` arguments carry the lane index; every other argument is
/// zero.
fn execute(module: &Module, state: &PipelineState, stage: ShaderStage) -> miette::Result<Execution> {
    let ep = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == stage)
        .ok_or_else(|| miette::miette!("no {} entry point", stage.name()))?;
    let u32_inner = TypeInner::Scalar(Scalar::U32);
    let mut invocation = Invocation::new(state.wave_size(stage));
    for arg in &ep.function.arguments {
        let inner = &module.types[arg.ty].inner;
        invocation = if !arg.in_reg && *inner == u32_inner {
            invocation.lane_arg_with(Value::U32)
        } else {
            invocation.uniform_arg(Value::zero(inner, &module.types))
        };
    }
    wavefront_interp::run(&module.types, &ep.function, &invocation, &mut MemoryHost::new())
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("interpretation failed")
}

fn print_outputs(exec: &Execution, outputs: &[Output], wave_size: u32) {
    for output in outputs {
        let lanes: Vec<String> = (0..wave_size.min(8))
            .filter_map(|lane| exec.lane(output.value, lane))
            .map(|value| format!("{value:?}"))
            .collect();
        println!("{}: {}", output.label, lanes.join(" "));
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["wavefront"]).unwrap();
        assert_eq!(cli.demo, Demo::Arith);
        assert_eq!(cli.stage, Stage::Compute);
        assert_eq!(cli.gfx_ip, GfxIp::new(10, 3));
        assert!(!cli.run);
    }

    #[test]
    fn options_reach_the_target() {
        let cli = Cli::try_parse_from([
            "wavefront",
            "--gfx-ip",
            "10.1",
            "--wave-size",
            "32",
            "--user-data-budget",
            "6",
            "--stage",
            "tess-eval",
        ])
        .unwrap();
        let state = cli.pipeline_state().unwrap();
        assert_eq!(state.target.max_user_data, 6);
        assert_eq!(state.wave_size(ShaderStage::TessEval), 32);
        assert_eq!(ShaderStage::from(cli.stage), ShaderStage::TessEval);
    }

    #[test]
    fn bad_wave_size_is_reported() {
        let cli =
            Cli::try_parse_from(["wavefront", "--gfx-ip", "9", "--wave-size", "32"]).unwrap();
        assert!(cli.pipeline_state().is_err());
    }

    #[test]
    fn unknown_gfx_ip_is_rejected() {
        assert!(Cli::try_parse_from(["wavefront", "--gfx-ip", "gfx9"]).is_err());
    }

    #[test]
    fn every_demo_patches_and_runs_in_every_stage() {
        let _ = env_logger::builder().is_test(true).try_init();
        for &demo in Demo::value_variants() {
            for stage in ShaderStage::ALL {
                let mut state = PipelineState::new(TargetInfo::for_gfx_ip(10, 3));
                let mut module = Module::default();
                let outputs = demo::build(demo, &mut module, &mut state, stage).unwrap();
                wavefront_patch::patch(&mut module, &mut state).unwrap();
                let exec = execute(&module, &state, stage).unwrap();
                for output in &outputs {
                    assert!(
                        exec.lane(output.value, 0).is_some(),
                        "{demo:?} in {}: {} was not evaluated",
                        stage.name(),
                        output.label
                    );
                }
            }
        }
    }

    #[test]
    fn subgroup_demo_values() {
        let mut state = PipelineState::new(TargetInfo::for_gfx_ip(10, 3));
        let mut module = Module::default();
        let outputs =
            demo::build(Demo::Subgroup, &mut module, &mut state, ShaderStage::Compute).unwrap();
        wavefront_patch::patch(&mut module, &mut state).unwrap();
        let exec = execute(&module, &state, ShaderStage::Compute).unwrap();
        let at = |index: usize, lane: u32| exec.lane(outputs[index].value, lane).and_then(Value::as_u32);
        // Cluster of lanes 4..8: 4 + 5 + 6 + 7.
        assert_eq!(at(0, 5), Some(22));
        assert_eq!(at(1, 5), Some(9));
        assert_eq!(at(2, 4), Some(0));
        assert_eq!(at(2, 7), Some(15));
    }

    #[test]
    fn tight_budget_still_patches_descriptors() {
        let mut target = TargetInfo::for_gfx_ip(10, 3);
        target.max_user_data = 2;
        let mut state = PipelineState::new(target);
        let mut module = Module::default();
        demo::build(Demo::Descriptors, &mut module, &mut state, ShaderStage::Compute).unwrap();
        wavefront_patch::patch(&mut module, &mut state).unwrap();
        let data = state.interface_data(ShaderStage::Compute);
        assert_eq!(data.spill_table.as_ref().map(|s| s.nodes.len()), Some(3));
    }
}
