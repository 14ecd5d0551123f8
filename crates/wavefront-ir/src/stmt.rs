//! Structured statements.
//!
//! Calls are expressions in this IR, so the statement set is limited to
//! emission, stores and control flow.

use crate::arena::{Handle, Range};
use crate::expr::Expression;

/// Statements run in order under one execution mask.
pub type Block = Vec<Statement>;

#[derive(Clone, Debug)]
pub enum Statement {
    /// Evaluate a run of expressions under the current execution mask.
    Emit(Range<Expression>),
    /// `*pointer = value` for every active lane.
    Store {
        pointer: Handle<Expression>,
        value: Handle<Expression>,
    },
    /// Conditional branch; lanes diverge and reconverge after the `If`.
    If {
        condition: Handle<Expression>,
        accept: Block,
        reject: Block,
    },
    /// Loop until every lane has left through `Break`, `Return` or `break_if`.
    Loop {
        body: Block,
        continuing: Block,
        break_if: Option<Handle<Expression>>,
    },
    /// Leave the innermost loop; the lane stays inactive until it exits.
    Break,
    /// Skip to the continuing block of the innermost loop.
    Continue,
    /// Deactivate the lane for the rest of the function.
    Return { value: Option<Handle<Expression>> },
}

impl Statement {
    /// Visits every statement in `block`, including nested ones, in order.
    pub fn walk<'a>(block: &'a [Statement], f: &mut impl FnMut(&'a Statement)) {
        for stmt in block {
            f(stmt);
            match stmt {
                Self::If { accept, reject, .. } => {
                    Self::walk(accept, f);
                    Self::walk(reject, f);
                }
                Self::Loop {
                    body, continuing, ..
                } => {
                    Self::walk(body, f);
                    Self::walk(continuing, f);
                }
                _ => {}
            }
        }
    }

    /// Expression handles referenced directly by this statement (not by
    /// nested blocks).
    pub fn operands(&self) -> Vec<Handle<Expression>> {
        match self {
            Self::Emit(_) | Self::Break | Self::Continue => vec![],
            Self::Store { pointer, value } => vec![*pointer, *value],
            Self::If { condition, .. } => vec![*condition],
            Self::Loop { break_if, .. } => break_if.iter().copied().collect(),
            Self::Return { value } => value.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::expr::Literal;

    #[test]
    fn operands_exclude_nested_blocks() {
        let mut exprs = Arena::new();
        let flag = exprs.append(Expression::Literal(Literal::Bool(true)));
        let value = exprs.append(Expression::Literal(Literal::U32(9)));
        let branch = Statement::If {
            condition: flag,
            accept: vec![Statement::Return { value: Some(value) }],
            reject: Vec::new(),
        };
        assert_eq!(branch.operands(), vec![flag]);
        let looping = Statement::Loop {
            body: vec![branch],
            continuing: Vec::new(),
            break_if: Some(flag),
        };
        assert_eq!(looping.operands(), vec![flag]);
        assert!(Statement::Emit(Range::new(flag, value)).operands().is_empty());
    }

    #[test]
    fn walk_visits_nested_blocks() {
        let body = vec![
            Statement::Loop {
                body: vec![Statement::If {
                    condition: Handle::new(0),
                    accept: vec![Statement::Break],
                    reject: vec![Statement::Continue],
                }],
                continuing: vec![],
                break_if: None,
            },
            Statement::Return { value: None },
        ];
        let mut count = 0;
        Statement::walk(&body, &mut |_| count += 1);
        assert_eq!(count, 5);
    }
}
