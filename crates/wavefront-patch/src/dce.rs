//! Dead expression elimination.
//!
//! Drops expressions from `Emit` statements unless a statement, a local
//! initializer or a side-effecting call needs them, directly or through
//! operands. Handles stay stable; only the emitted ranges shrink.

use std::collections::HashSet;

use wavefront_ir::{Block, Expression, Function, Handle, Module, Range, Statement};
use wavefront_state::PipelineState;

use crate::Pass;
use crate::error::PatchError;

/// Removes unused expressions from `Emit` statements.
#[derive(Debug)]
pub struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
    fn name(&self) -> &str {
        "dce"
    }

    fn run(&self, module: &mut Module, _state: &mut PipelineState) -> Result<bool, PatchError> {
        let mut changed = false;
        for ep in &mut module.entry_points {
            changed |= prune_emits(&mut ep.function);
        }
        Ok(changed)
    }
}

fn prune_emits(func: &mut Function) -> bool {
    // Roots: statement operands, effectful calls and local initializers.
    let mut live: HashSet<Handle<Expression>> = HashSet::new();
    Statement::walk(&func.body, &mut |stmt| match stmt {
        Statement::Emit(range) => {
            live.extend(range.iter().filter(|&h| {
                matches!(
                    func.expressions.try_get(h),
                    Some(Expression::Call { callee, .. }) if callee.has_side_effects()
                )
            }));
        }
        other => live.extend(other.operands()),
    });
    for (_, local) in func.local_variables.iter() {
        if let Some(init) = local.init {
            live.insert(init);
        }
    }

    // Everything a live expression reads is live too.
    let mut worklist: Vec<Handle<Expression>> = live.iter().copied().collect();
    while let Some(handle) = worklist.pop() {
        if let Some(expr) = func.expressions.try_get(handle) {
            for operand in expr.operands() {
                if live.insert(operand) {
                    worklist.push(operand);
                }
            }
        }
    }

    // Shrink every Emit to its live runs.
    let changed = filter_emits_in_block(&mut func.body, &live);
    if changed {
        log::debug!(
            "dce: {} keeps {} of {} expressions",
            func.name.as_deref().unwrap_or("<anon>"),
            live.len(),
            func.expressions.len()
        );
    }
    changed
}

/// Maximal runs of live handles in `range`.
fn live_runs(range: Range<Expression>, live: &HashSet<Handle<Expression>>) -> Vec<Range<Expression>> {
    let mut runs = Vec::new();
    let mut start = None;
    let bounds = range.index_range();
    for index in bounds.clone() {
        match (live.contains(&Handle::new(index)), start) {
            (true, None) => start = Some(index),
            (false, Some(first)) => {
                runs.push(Range::from_index_range(first..index));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(first) = start {
        runs.push(Range::from_index_range(first..bounds.end));
    }
    runs
}

fn filter_emits_in_block(block: &mut Block, live: &HashSet<Handle<Expression>>) -> bool {
    let mut changed = false;
    for stmt in std::mem::take(block) {
        match stmt {
            Statement::Emit(range) => {
                let runs = live_runs(range, live);
                changed |= runs.len() != 1 || runs[0] != range;
                block.extend(runs.into_iter().map(Statement::Emit));
            }
            Statement::If {
                condition,
                mut accept,
                mut reject,
            } => {
                changed |= filter_emits_in_block(&mut accept, live);
                changed |= filter_emits_in_block(&mut reject, live);
                block.push(Statement::If {
                    condition,
                    accept,
                    reject,
                });
            }
            Statement::Loop {
                mut body,
                mut continuing,
                break_if,
            } => {
                changed |= filter_emits_in_block(&mut body, live);
                changed |= filter_emits_in_block(&mut continuing, live);
                block.push(Statement::Loop {
                    body,
                    continuing,
                    break_if,
                });
            }
            other => block.push(other),
        }
    }
    changed
}
