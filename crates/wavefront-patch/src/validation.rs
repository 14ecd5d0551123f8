//! IR validation pass.
//!
//! Checks structural invariants of every entry point: handle bounds, the
//! type table, argument references and that each expression is emitted
//! before anything reads it. Findings are logged and the first one fails
//! the pass. This pass never modifies the module.

use std::collections::HashSet;

use wavefront_ir::{Expression, Function, Handle, Module, Statement, Type, UniqueArena};
use wavefront_state::PipelineState;

use crate::Pass;
use crate::error::PatchError;

/// Validates IR structural invariants.
#[derive(Debug)]
pub struct Validation;

impl Pass for Validation {
    fn name(&self) -> &str {
        "validation"
    }

    fn run(&self, module: &mut Module, _state: &mut PipelineState) -> Result<bool, PatchError> {
        for ep in &module.entry_points {
            let findings = validate_function(&module.types, &ep.function);
            for finding in &findings {
                log::warn!("{}: {finding}", ep.name);
            }
            if let Some(first) = findings.into_iter().next() {
                return Err(PatchError::Invalid {
                    stage: ep.stage,
                    detail: first,
                });
            }
        }
        Ok(false)
    }
}

/// Returns a description of every structural problem in `func`.
pub fn validate_function(types: &UniqueArena<Type>, func: &Function) -> Vec<String> {
    let mut findings = Vec::new();
    let len = func.expressions.len();
    let type_ok = |ty: Handle<Type>| ty.index() < types.len();

    if func.expression_types.len() != len {
        findings.push(format!(
            "{} expression types for {len} expressions",
            func.expression_types.len()
        ));
    }
    for (index, arg) in func.arguments.iter().enumerate() {
        if !type_ok(arg.ty) {
            findings.push(format!("argument {index} has out-of-bounds type {:?}", arg.ty));
        }
    }
    for (handle, local) in func.local_variables.iter() {
        if !type_ok(local.ty) {
            findings.push(format!("local {handle:?} has out-of-bounds type {:?}", local.ty));
        }
        if local.init.is_some_and(|init| init.index() >= len) {
            findings.push(format!("local {handle:?} has out-of-bounds initializer"));
        }
    }

    for (handle, expr) in func.expressions.iter() {
        if let Some(ty) = func.try_expression_type(handle).filter(|&ty| !type_ok(ty)) {
            findings.push(format!("expression {handle:?} has out-of-bounds type {ty:?}"));
        }
        for operand in expr.operands() {
            if operand.index() >= len {
                findings.push(format!(
                    "expression {handle:?} references out-of-bounds operand {operand:?} (arena size {len})"
                ));
            }
        }
        match *expr {
            Expression::FunctionArgument(index) | Expression::ArgumentPointer { first: index, .. }
                if index as usize >= func.arguments.len() =>
            {
                findings.push(format!(
                    "expression {handle:?} reads argument {index} of {}",
                    func.arguments.len()
                ));
            }
            Expression::LocalVariable(var) if func.local_variables.try_get(var).is_none() => {
                findings.push(format!("expression {handle:?} references missing local {var:?}"));
            }
            Expression::ZeroValue(ty)
            | Expression::Compose { ty, .. }
            | Expression::Bitcast { ty, .. }
                if !type_ok(ty) =>
            {
                findings.push(format!("expression {handle:?} names out-of-bounds type {ty:?}"));
            }
            _ => {}
        }
    }

    // Emission order: an expression is read only after its Emit ran in
    // program order.
    let mut emitted: HashSet<Handle<Expression>> = HashSet::new();
    Statement::walk(&func.body, &mut |stmt| {
        match stmt {
            Statement::Emit(range) => {
                if range.index_range().end as usize > len {
                    findings.push(format!("emit {range:?} is out of bounds (arena size {len})"));
                    return;
                }
                for handle in range.iter() {
                    if let Some(expr) = func.expressions.try_get(handle) {
                        for operand in expr.operands() {
                            if operand.index() < len && !emitted.contains(&operand) {
                                findings.push(format!(
                                    "expression {handle:?} reads {operand:?} before it is emitted"
                                ));
                            }
                        }
                    }
                    emitted.insert(handle);
                }
            }
            other => {
                for operand in other.operands() {
                    if !emitted.contains(&operand) {
                        findings.push(format!("statement reads {operand:?} before it is emitted"));
                    }
                }
            }
        }
    });
    findings
}
