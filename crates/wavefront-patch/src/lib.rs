//! Patch passes for lowered shader modules.
//!
//! The builder leaves entry points with abstract arguments. The passes here
//! rewrite them to the hardware calling convention, drop expressions nothing
//! reads and check the result. [`patch`] runs them all.

mod dce;
mod entry;
mod error;
mod validation;

pub use dce::DeadCodeElimination;
pub use entry::{
    EntryPointMutate, TABLE_PTR_RESERVED_ARG_COUNT, generate_entry_point_type,
    is_resource_node_active, mutate_entry_point,
};
pub use error::PatchError;
pub use validation::{Validation, validate_function};

use std::fmt::Debug;

use wavefront_ir::Module;
use wavefront_state::PipelineState;

/// A pass over a lowered module and its pipeline state.
pub trait Pass: Debug {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Runs the pass. Returns `true` if anything was modified.
    fn run(&self, module: &mut Module, state: &mut PipelineState) -> Result<bool, PatchError>;
}

/// Rounds [`PassManager::run`] makes before settling for what it has.
const MAX_ITERATIONS: usize = 10;

/// An ordered list of passes, repeated until none of them changes anything.
#[derive(Debug)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Entry-point mutation, dead expression elimination, then validation.
    pub fn standard() -> Self {
        let mut pm = Self::new();
        pm.add_pass(Box::new(EntryPointMutate));
        pm.add_pass(Box::new(DeadCodeElimination));
        pm.add_pass(Box::new(Validation));
        pm
    }

    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs every pass in order, round after round, until a whole round
    /// leaves the module alone. The first error aborts the run.
    pub fn run(&self, module: &mut Module, state: &mut PipelineState) -> Result<(), PatchError> {
        for iteration in 0..MAX_ITERATIONS {
            let mut changed = false;
            for pass in &self.passes {
                let modified = pass.run(module, state)?;
                if modified {
                    log::debug!("pass {} modified the module (round {iteration})", pass.name());
                }
                changed |= modified;
            }
            if !changed {
                return Ok(());
            }
        }
        log::warn!("passes still modifying the module after {MAX_ITERATIONS} rounds");
        Ok(())
    }
}

/// Convenience function: runs the standard passes on a module.
pub fn patch(module: &mut Module, state: &mut PipelineState) -> Result<(), PatchError> {
    PassManager::standard().run(module, state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_empty_module() {
        let mut module = Module::default();
        let mut state = PipelineState::default();
        patch(&mut module, &mut state).unwrap();
        assert!(module.entry_points.is_empty() && module.types.is_empty());
    }

    #[test]
    fn empty_manager_is_noop() {
        let pm = PassManager::new();
        let mut module = Module::default();
        module.get_or_add_entry_point(wavefront_ir::ShaderStage::Compute);
        let mut state = PipelineState::default();
        pm.run(&mut module, &mut state).unwrap();
        assert!(pm.pass_names().is_empty());
        assert!(module.entry_points[0].function.arguments.is_empty());
    }

    #[test]
    fn standard_pass_order() {
        assert_eq!(
            PassManager::standard().pass_names(),
            vec!["entry-point-mutate", "dce", "validation"]
        );
    }
}
