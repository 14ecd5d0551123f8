//! Shader functions and the entry point wrapper around them.

use std::collections::HashMap;

use crate::arena::{Arena, Handle};
use crate::binding::{Binding, ShaderStage};
use crate::expr::Expression;
use crate::stmt::Block;
use crate::types::Type;

/// One incoming value of a function: a built-in, a user-data node or a
/// hardware-provided entry argument.
#[derive(Clone, Debug)]
pub struct FunctionArgument {
    pub name: Option<String>,
    pub ty: Handle<Type>,
    /// What the argument carries.
    pub binding: Option<Binding>,
    /// Passed in uniform (scalar) registers rather than per-lane registers.
    pub in_reg: bool,
}

/// What a function hands back, and where it goes.
#[derive(Clone, Debug)]
pub struct FunctionResult {
    pub ty: Handle<Type>,
    pub binding: Option<Binding>,
}

/// Private per-lane storage addressed through `Expression::LocalVariable`.
#[derive(Clone, Debug)]
pub struct LocalVariable {
    pub name: Option<String>,
    pub ty: Handle<Type>,
    /// Value the variable holds on entry; zero when absent.
    pub init: Option<Handle<Expression>>,
}

/// An IR function.
///
/// Every expression has a result type, kept in a table parallel to the
/// expression arena. Use [`Function::add_expression`] rather than appending
/// to the arena directly so the two stay in step.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: Option<String>,
    pub arguments: Vec<FunctionArgument>,
    pub result: Option<FunctionResult>,
    pub local_variables: Arena<LocalVariable>,
    pub expressions: Arena<Expression>,
    /// Result type of each expression, indexed like `expressions`.
    pub expression_types: Vec<Handle<Type>>,
    /// Debug names, shown by the dump when present.
    pub named_expressions: HashMap<Handle<Expression>, String>,
    pub body: Block,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            arguments: Vec::new(),
            result: None,
            local_variables: Arena::new(),
            expressions: Arena::new(),
            expression_types: Vec::new(),
            named_expressions: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// Appends an expression together with its result type.
    pub fn add_expression(&mut self, expr: Expression, ty: Handle<Type>) -> Handle<Expression> {
        let handle = self.expressions.append(expr);
        self.expression_types.push(ty);
        handle
    }

    /// The result type of `handle`.
    ///
    /// # Panics
    ///
    /// Panics if the expression was appended without a type.
    pub fn expression_type(&self, handle: Handle<Expression>) -> Handle<Type> {
        self.expression_types[handle.index()]
    }

    pub fn try_expression_type(&self, handle: Handle<Expression>) -> Option<Handle<Type>> {
        self.expression_types.get(handle.index()).copied()
    }

    /// Replaces the expression behind `handle`, keeping its handle and type.
    /// Returns the previous expression.
    pub fn replace_expression(
        &mut self,
        handle: Handle<Expression>,
        expr: Expression,
    ) -> Expression {
        self.expressions.replace(handle, expr)
    }

    /// Index of the first argument carrying `binding`.
    pub fn argument_index(&self, binding: Binding) -> Option<u32> {
        self.arguments
            .iter()
            .position(|a| a.binding == Some(binding))
            .map(|i| i as u32)
    }
}

/// A shader entry point: one per stage.
#[derive(Clone, Debug)]
pub struct EntryPoint {
    pub name: String,
    pub stage: ShaderStage,
    pub function: Function,
}
