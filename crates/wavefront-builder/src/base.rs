//! The builder core: insertion point, typed expression helpers and the
//! divergence primitives every other builder module relies on.

use std::mem;

use wavefront_ir::{
    AddressSpace, BinaryOp, Binding, Block, Callee, Expression, Function, FunctionArgument, Handle,
    LaneOp, Literal, LocalVariable, MathFunction, Module, Range, Scalar, ScalarKind, ShaderStage,
    Statement, Type, TypeInner, UnaryOp, UniqueArena, VectorSize,
};
use wavefront_state::PipelineState;

use crate::error::BuildError;

/// Lowers shader operations into one function.
///
/// The builder appends to the end of the function body. Expressions are
/// emitted in runs; a run is closed whenever a statement is added, so each
/// expression is evaluated where it was built. Dropping the builder flushes
/// the last run into the body.
pub struct Builder<'a> {
    types: &'a mut UniqueArena<Type>,
    func: &'a mut Function,
    state: &'a mut PipelineState,
    stage: ShaderStage,
    /// Insertion stack; the last block receives new statements.
    blocks: Vec<Block>,
    /// Index of the first expression not yet covered by an `Emit`.
    pending: u32,
}

impl<'a> Builder<'a> {
    pub fn new(
        types: &'a mut UniqueArena<Type>,
        func: &'a mut Function,
        state: &'a mut PipelineState,
        stage: ShaderStage,
    ) -> Self {
        let body = mem::take(&mut func.body);
        let pending = func.expressions.len() as u32;
        state.add_stage(stage);
        Self {
            types,
            func,
            state,
            stage,
            blocks: vec![body],
            pending,
        }
    }

    /// A builder for the entry point of `stage`, created if missing.
    pub fn for_stage(
        module: &'a mut Module,
        state: &'a mut PipelineState,
        stage: ShaderStage,
    ) -> Self {
        let index = module.get_or_add_entry_point(stage);
        let (types, func) = module.split_entry_point_mut(index);
        Self::new(types, func, state, stage)
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn state(&self) -> &PipelineState {
        &*self.state
    }

    pub fn state_mut(&mut self) -> &mut PipelineState {
        &mut *self.state
    }

    pub fn function(&self) -> &Function {
        &*self.func
    }

    pub fn types(&self) -> &UniqueArena<Type> {
        &*self.types
    }

    /// Wave size of the stage being built.
    pub fn wave_size(&self) -> u32 {
        self.state.wave_size(self.stage)
    }
}

impl Drop for Builder<'_> {
    fn drop(&mut self) {
        self.flush();
        while self.blocks.len() > 1 {
            // An arm left open by a panic; keep what was built.
            let block = self.blocks.pop().unwrap_or_default();
            if let Some(parent) = self.blocks.last_mut() {
                parent.extend(block);
            }
        }
        self.func.body = self.blocks.pop().unwrap_or_default();
    }
}

// Types.
impl Builder<'_> {
    pub fn insert_type(&mut self, inner: TypeInner) -> Handle<Type> {
        self.types.insert(Type { name: None, inner })
    }

    pub fn void_type(&mut self) -> Handle<Type> {
        self.insert_type(TypeInner::Void)
    }

    pub fn scalar_type(&mut self, scalar: Scalar) -> Handle<Type> {
        self.insert_type(TypeInner::Scalar(scalar))
    }

    /// Scalar type for `count == 1`, vector otherwise.
    pub fn vector_type(&mut self, scalar: Scalar, count: u32) -> Handle<Type> {
        self.insert_type(TypeInner::vector_or_scalar(scalar, count))
    }

    pub fn pointer_type(&mut self, base: Handle<Type>, space: AddressSpace) -> Handle<Type> {
        self.insert_type(TypeInner::Pointer { base, space })
    }

    pub fn type_of(&self, value: Handle<Expression>) -> Handle<Type> {
        self.func.expression_type(value)
    }

    pub fn inner_of(&self, value: Handle<Expression>) -> TypeInner {
        self.types[self.type_of(value)].inner.clone()
    }

    pub fn type_inner(&self, ty: Handle<Type>) -> TypeInner {
        self.types[ty].inner.clone()
    }

    /// Element scalar of a scalar or vector value.
    pub fn scalar_of(&self, value: Handle<Expression>) -> Scalar {
        self.inner_of(value).scalar().unwrap_or(Scalar::U32)
    }

    /// Component count of a value, 1 for scalars.
    pub fn component_count(&self, value: Handle<Expression>) -> u32 {
        self.inner_of(value).component_count()
    }

    pub(crate) fn expect_scalar_or_vector(
        &self,
        op: &'static str,
        value: Handle<Expression>,
    ) -> Result<Scalar, BuildError> {
        match self.inner_of(value) {
            TypeInner::Scalar(s) | TypeInner::Vector { scalar: s, .. } => Ok(s),
            other => Err(self.unexpected(op, "scalar or vector", &other)),
        }
    }

    pub(crate) fn expect_float(
        &self,
        op: &'static str,
        value: Handle<Expression>,
    ) -> Result<Scalar, BuildError> {
        let scalar = self.expect_scalar_or_vector(op, value)?;
        if scalar.is_float() {
            Ok(scalar)
        } else {
            Err(self.unexpected(op, "float", &self.inner_of(value)))
        }
    }

    pub(crate) fn expect_int(
        &self,
        op: &'static str,
        value: Handle<Expression>,
    ) -> Result<Scalar, BuildError> {
        let scalar = self.expect_scalar_or_vector(op, value)?;
        if scalar.is_integer() {
            Ok(scalar)
        } else {
            Err(self.unexpected(op, "integer", &self.inner_of(value)))
        }
    }

    pub(crate) fn unexpected(
        &self,
        op: &'static str,
        expected: &'static str,
        found: &TypeInner,
    ) -> BuildError {
        BuildError::UnexpectedType {
            op,
            expected,
            found: wavefront_ir::format_type_inner(found, self.types()),
        }
    }
}

// Expressions.
impl Builder<'_> {
    /// Appends an expression of type `ty` to the pending run.
    pub fn append(&mut self, expr: Expression, ty: Handle<Type>) -> Handle<Expression> {
        self.func.add_expression(expr, ty)
    }

    /// Adds an entry argument and returns the expression reading it.
    pub fn add_argument(
        &mut self,
        name: &str,
        ty: Handle<Type>,
        binding: Option<Binding>,
        in_reg: bool,
    ) -> Handle<Expression> {
        let index = self.func.arguments.len() as u32;
        self.func.arguments.push(FunctionArgument {
            name: Some(name.to_string()),
            ty,
            binding,
            in_reg,
        });
        self.append(Expression::FunctionArgument(index), ty)
    }

    /// Declares a function-local variable and returns a pointer to it.
    pub fn add_local(&mut self, name: &str, ty: Handle<Type>) -> Handle<Expression> {
        let var = self.func.local_variables.append(LocalVariable {
            name: Some(name.to_string()),
            ty,
            init: None,
        });
        let ptr_ty = self.pointer_type(ty, AddressSpace::Function);
        self.append(Expression::LocalVariable(var), ptr_ty)
    }

    pub fn literal(&mut self, lit: Literal) -> Handle<Expression> {
        let ty = self.scalar_type(lit.scalar());
        self.append(Expression::Literal(lit), ty)
    }

    pub fn const_bool(&mut self, value: bool) -> Handle<Expression> {
        self.literal(Literal::Bool(value))
    }

    pub fn const_i32(&mut self, value: i32) -> Handle<Expression> {
        self.literal(Literal::I32(value))
    }

    pub fn const_u32(&mut self, value: u32) -> Handle<Expression> {
        self.literal(Literal::U32(value))
    }

    pub fn const_u64(&mut self, value: u64) -> Handle<Expression> {
        self.literal(Literal::U64(value))
    }

    pub fn const_f32(&mut self, value: f32) -> Handle<Expression> {
        self.literal(Literal::F32(value))
    }

    /// A constant from an `f64` bit pattern, converted to the float type of
    /// `like` and splatted to its shape.
    pub fn const_f64_bits(&mut self, like: Handle<Expression>, bits: u64) -> Handle<Expression> {
        self.const_float_like(like, f64::from_bits(bits))
    }

    /// A float constant with the type of `like`.
    pub fn const_float_like(&mut self, like: Handle<Expression>, value: f64) -> Handle<Expression> {
        let ty = self.type_of(like);
        self.const_float(ty, value)
    }

    /// A float constant of scalar or vector type `ty`.
    pub fn const_float(&mut self, ty: Handle<Type>, value: f64) -> Handle<Expression> {
        match self.type_inner(ty) {
            TypeInner::Vector { size, scalar } => {
                let lit = self.literal(Literal::from_f64(scalar, value));
                self.splat(lit, size.count())
            }
            inner => {
                let scalar = inner.scalar().unwrap_or(Scalar::F32);
                self.literal(Literal::from_f64(scalar, value))
            }
        }
    }

    /// An integer constant with the type of `like`.
    pub fn const_int_like(&mut self, like: Handle<Expression>, value: i64) -> Handle<Expression> {
        match self.inner_of(like) {
            TypeInner::Vector { size, scalar } => {
                let lit = self.literal(Literal::from_int(scalar, value));
                self.splat(lit, size.count())
            }
            inner => {
                let scalar = inner.scalar().unwrap_or(Scalar::I32);
                self.literal(Literal::from_int(scalar, value))
            }
        }
    }

    pub fn zero_value(&mut self, ty: Handle<Type>) -> Handle<Expression> {
        self.append(Expression::ZeroValue(ty), ty)
    }

    pub fn unary(&mut self, op: UnaryOp, expr: Handle<Expression>) -> Handle<Expression> {
        let ty = self.type_of(expr);
        self.append(Expression::Unary { op, expr }, ty)
    }

    /// A binary operation. A scalar operand is broadcast against a vector
    /// one; comparisons produce booleans of the operand shape.
    pub fn binary(
        &mut self,
        op: BinaryOp,
        left: Handle<Expression>,
        right: Handle<Expression>,
    ) -> Handle<Expression> {
        let shape = if self.inner_of(left).is_vector() || !self.inner_of(right).is_vector() {
            left
        } else {
            right
        };
        let ty = if op.is_comparison() {
            let count = self.component_count(shape);
            self.vector_type(Scalar::BOOL, count)
        } else {
            self.type_of(shape)
        };
        self.append(Expression::Binary { op, left, right }, ty)
    }

    pub fn add(&mut self, a: Handle<Expression>, b: Handle<Expression>) -> Handle<Expression> {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&mut self, a: Handle<Expression>, b: Handle<Expression>) -> Handle<Expression> {
        self.binary(BinaryOp::Subtract, a, b)
    }

    pub fn mul(&mut self, a: Handle<Expression>, b: Handle<Expression>) -> Handle<Expression> {
        self.binary(BinaryOp::Multiply, a, b)
    }

    pub fn div(&mut self, a: Handle<Expression>, b: Handle<Expression>) -> Handle<Expression> {
        self.binary(BinaryOp::Divide, a, b)
    }

    pub fn neg(&mut self, a: Handle<Expression>) -> Handle<Expression> {
        self.unary(UnaryOp::Negate, a)
    }

    pub fn select(
        &mut self,
        condition: Handle<Expression>,
        accept: Handle<Expression>,
        reject: Handle<Expression>,
    ) -> Handle<Expression> {
        let ty = self.type_of(accept);
        self.append(
            Expression::Select {
                condition,
                accept,
                reject,
            },
            ty,
        )
    }

    /// A hardware arithmetic primitive.
    pub fn math(
        &mut self,
        fun: MathFunction,
        arg: Handle<Expression>,
        arg1: Option<Handle<Expression>>,
        arg2: Option<Handle<Expression>>,
    ) -> Handle<Expression> {
        let count = self.component_count(arg);
        let ty = match fun {
            MathFunction::Class => self.vector_type(Scalar::BOOL, count),
            MathFunction::FrexpExp
            | MathFunction::FindLsb
            | MathFunction::FindMsb
            | MathFunction::FindSMsb => self.vector_type(Scalar::I32, count),
            MathFunction::CubeId
            | MathFunction::CubeSc
            | MathFunction::CubeTc
            | MathFunction::CubeMa => self.scalar_type(Scalar::F32),
            MathFunction::CvtPkRtz => self.vector_type(Scalar::F16, 2),
            _ => self.type_of(arg),
        };
        self.append(
            Expression::Math {
                fun,
                arg,
                arg1,
                arg2,
            },
            ty,
        )
    }

    pub fn math1(&mut self, fun: MathFunction, arg: Handle<Expression>) -> Handle<Expression> {
        self.math(fun, arg, None, None)
    }

    pub fn math2(
        &mut self,
        fun: MathFunction,
        arg: Handle<Expression>,
        arg1: Handle<Expression>,
    ) -> Handle<Expression> {
        self.math(fun, arg, Some(arg1), None)
    }

    pub fn math3(
        &mut self,
        fun: MathFunction,
        arg: Handle<Expression>,
        arg1: Handle<Expression>,
        arg2: Handle<Expression>,
    ) -> Handle<Expression> {
        self.math(fun, arg, Some(arg1), Some(arg2))
    }

    /// Numeric conversion to the element type `to`, keeping the shape.
    pub fn convert(&mut self, expr: Handle<Expression>, to: Scalar) -> Handle<Expression> {
        if self.scalar_of(expr) == to {
            return expr;
        }
        let count = self.component_count(expr);
        let ty = self.vector_type(to, count);
        self.append(
            Expression::As {
                expr,
                kind: to.kind,
                convert: Some(to.width),
            },
            ty,
        )
    }

    /// Reinterprets the bits of `expr` as `ty`.
    pub fn bitcast(&mut self, expr: Handle<Expression>, ty: Handle<Type>) -> Handle<Expression> {
        if self.type_of(expr) == ty {
            return expr;
        }
        self.append(Expression::Bitcast { expr, ty }, ty)
    }

    /// Reinterprets the bits of `expr` with element kind `kind`.
    pub fn bitcast_kind(&mut self, expr: Handle<Expression>, kind: ScalarKind) -> Handle<Expression> {
        let scalar = self.scalar_of(expr);
        if scalar.kind == kind {
            return expr;
        }
        let count = self.component_count(expr);
        let ty = self.vector_type(scalar.with_kind(kind), count);
        self.append(
            Expression::As {
                expr,
                kind,
                convert: None,
            },
            ty,
        )
    }

    /// Component `index` of a vector, matrix column or array element.
    pub fn extract(&mut self, base: Handle<Expression>, index: u32) -> Handle<Expression> {
        let ty = match self.inner_of(base) {
            TypeInner::Vector { scalar, .. } => self.scalar_type(scalar),
            TypeInner::Matrix { rows, scalar, .. } => self.vector_type(scalar, rows.count()),
            TypeInner::Array { base: elem, .. } => elem,
            TypeInner::Struct { members } => members[index as usize].ty,
            _ => return base,
        };
        self.append(Expression::AccessIndex { base, index }, ty)
    }

    /// Dynamic component of a vector or array.
    pub fn extract_dynamic(
        &mut self,
        base: Handle<Expression>,
        index: Handle<Expression>,
    ) -> Handle<Expression> {
        let ty = match self.inner_of(base) {
            TypeInner::Vector { scalar, .. } => self.scalar_type(scalar),
            TypeInner::Array { base: elem, .. } => elem,
            _ => self.type_of(base),
        };
        self.append(Expression::Access { base, index }, ty)
    }

    pub fn insert(
        &mut self,
        base: Handle<Expression>,
        value: Handle<Expression>,
        index: u32,
    ) -> Handle<Expression> {
        let ty = self.type_of(base);
        self.append(Expression::Insert { base, value, index }, ty)
    }

    pub fn compose(
        &mut self,
        ty: Handle<Type>,
        components: Vec<Handle<Expression>>,
    ) -> Handle<Expression> {
        self.append(Expression::Compose { ty, components }, ty)
    }

    /// Builds a vector of the components' scalar type; one component is
    /// returned as is.
    pub fn vector_from(&mut self, components: Vec<Handle<Expression>>) -> Handle<Expression> {
        if components.len() == 1 {
            return components[0];
        }
        let scalar = self.scalar_of(components[0]);
        let ty = self.vector_type(scalar, components.len() as u32);
        self.compose(ty, components)
    }

    /// Every component of a scalar or vector value.
    pub fn components(&mut self, value: Handle<Expression>) -> Vec<Handle<Expression>> {
        match self.inner_of(value) {
            TypeInner::Vector { size, .. } => {
                (0..size.count()).map(|i| self.extract(value, i)).collect()
            }
            _ => vec![value],
        }
    }

    pub fn splat(&mut self, value: Handle<Expression>, count: u32) -> Handle<Expression> {
        let Some(size) = VectorSize::from_count(count) else {
            return value;
        };
        let scalar = self.scalar_of(value);
        let ty = self.insert_type(TypeInner::Vector { size, scalar });
        self.append(Expression::Splat { size, value }, ty)
    }

    pub fn swizzle(&mut self, vector: Handle<Expression>, pattern: &[u32]) -> Handle<Expression> {
        let scalar = self.scalar_of(vector);
        let ty = self.vector_type(scalar, pattern.len() as u32);
        if pattern.len() == 1 {
            return self.extract(vector, pattern[0]);
        }
        self.append(
            Expression::Swizzle {
                vector,
                pattern: pattern.to_vec(),
            },
            ty,
        )
    }

    /// A cross-lane primitive producing `ty`.
    pub fn lane(
        &mut self,
        op: LaneOp,
        args: Vec<Handle<Expression>>,
        ty: Handle<Type>,
    ) -> Handle<Expression> {
        self.append(Expression::Lane { op, args }, ty)
    }

    /// A lowered call producing `ty`.
    pub fn call(
        &mut self,
        callee: Callee,
        args: Vec<Handle<Expression>>,
        ty: Handle<Type>,
    ) -> Handle<Expression> {
        self.append(Expression::Call { callee, args }, ty)
    }

    /// A call producing no value.
    pub fn call_void(&mut self, callee: Callee, args: Vec<Handle<Expression>>) -> Handle<Expression> {
        let ty = self.void_type();
        self.call(callee, args, ty)
    }

    pub fn load(&mut self, pointer: Handle<Expression>) -> Handle<Expression> {
        let ty = match self.inner_of(pointer) {
            TypeInner::Pointer { base, .. } => base,
            _ => self.type_of(pointer),
        };
        self.append(Expression::Load { pointer }, ty)
    }

    /// Advances `pointer` by `offset` bytes, retyping it to point at `base`.
    pub fn offset_pointer(
        &mut self,
        pointer: Handle<Expression>,
        offset: Handle<Expression>,
        base: Handle<Type>,
    ) -> Handle<Expression> {
        let space = match self.inner_of(pointer) {
            TypeInner::Pointer { space, .. } => space,
            _ => AddressSpace::Constant,
        };
        let ty = self.pointer_type(base, space);
        self.append(Expression::Offset { pointer, offset }, ty)
    }

    /// Reduces booleans with logical and.
    pub fn all_of(&mut self, values: Vec<Handle<Expression>>) -> Handle<Expression> {
        let mut iter = values.into_iter();
        let Some(mut acc) = iter.next() else {
            return self.const_bool(true);
        };
        for value in iter {
            acc = self.binary(BinaryOp::LogicalAnd, acc, value);
        }
        acc
    }
}

// Statements and control flow.
impl Builder<'_> {
    /// Closes the pending run of expressions with an `Emit`.
    pub(crate) fn flush(&mut self) {
        let end = self.func.expressions.len() as u32;
        if self.pending < end {
            let range = Range::from_index_range(self.pending..end);
            self.push_statement(Statement::Emit(range));
        }
        self.pending = end;
    }

    fn push_statement(&mut self, stmt: Statement) {
        if let Some(block) = self.blocks.last_mut() {
            block.push(stmt);
        }
    }

    /// Adds a statement after flushing pending expressions.
    pub fn statement(&mut self, stmt: Statement) {
        self.flush();
        self.push_statement(stmt);
    }

    pub fn store(&mut self, pointer: Handle<Expression>, value: Handle<Expression>) {
        self.statement(Statement::Store { pointer, value });
    }

    /// Returns from the function in the current lanes.
    pub fn ret(&mut self) {
        self.statement(Statement::Return { value: None });
    }

    /// Builds `build` into a fresh block and returns it.
    fn build_block(
        &mut self,
        build: impl FnOnce(&mut Self) -> Result<(), BuildError>,
    ) -> Result<Block, BuildError> {
        self.flush();
        self.blocks.push(Vec::new());
        let result = build(self);
        self.flush();
        let block = self.blocks.pop().unwrap_or_default();
        result.map(|()| block)
    }

    /// Builds a structured `If` on `condition`.
    ///
    /// `build` is called with `false` for the then-arm and, when `want_else`
    /// is set, again with `true` for the else-arm. Building continues after
    /// the `If`, where the lanes reconverge.
    pub fn create_if(
        &mut self,
        condition: Handle<Expression>,
        want_else: bool,
        mut build: impl FnMut(&mut Self, bool) -> Result<(), BuildError>,
    ) -> Result<(), BuildError> {
        let accept = self.build_block(|b| build(b, false))?;
        let reject = if want_else {
            self.build_block(|b| build(b, true))?
        } else {
            Vec::new()
        };
        self.statement(Statement::If {
            condition,
            accept,
            reject,
        });
        Ok(())
    }

    /// Wraps `inst` in a loop that runs it once per distinct value of the
    /// operands at `operand_idxs` among the active lanes.
    ///
    /// Each iteration reads those operands from the first remaining lane,
    /// runs a copy of `inst` in the lanes that share the values and retires
    /// them. `inst` must be the last expression built; afterwards it loads
    /// the per-lane result, so existing uses of the handle stay valid.
    pub fn create_waterfall_loop(
        &mut self,
        inst: Handle<Expression>,
        operand_idxs: &[usize],
    ) -> Result<Handle<Expression>, BuildError> {
        if inst.index() + 1 != self.func.expressions.len() || inst.index() < self.pending as usize
        {
            return Err(BuildError::WaterfallNotPending(inst.index()));
        }
        let expr = self.func.expressions[inst].clone();
        let operands = expr.operands();
        for &index in operand_idxs {
            if index >= operands.len() {
                return Err(BuildError::BadOperandIndex {
                    index,
                    count: operands.len(),
                });
            }
        }
        log::debug!(
            "waterfall loop around [{}] over operands {:?}",
            inst.index(),
            operand_idxs
        );

        // Everything before `inst` is evaluated ahead of the loop; `inst`
        // itself moves to after it.
        let end = inst.index() as u32;
        if self.pending < end {
            let range = Range::from_index_range(self.pending..end);
            self.push_statement(Statement::Emit(range));
        }
        self.pending = end + 1;

        let ty = self.type_of(inst);
        let result = self.add_local("waterfall.result", ty);
        let body = self.build_block(|b| {
            let mut first_values = Vec::new();
            let mut matches = Vec::new();
            for &index in operand_idxs {
                let operand = operands[index];
                let first = b.map_to_int32(operand, |b, v| {
                    let ty = b.type_of(v);
                    Ok(b.lane(LaneOp::ReadFirstLane, vec![v], ty))
                })?;
                // Compare bits so that NaN operands still retire.
                let (lhs, rhs) = if b.scalar_of(operand).is_float() {
                    (
                        b.bitcast_kind(operand, ScalarKind::Uint),
                        b.bitcast_kind(first, ScalarKind::Uint),
                    )
                } else {
                    (operand, first)
                };
                let eq = b.binary(BinaryOp::Equal, lhs, rhs);
                let eq_parts = b.components(eq);
                matches.push(b.all_of(eq_parts));
                first_values.push((index, first));
            }
            let cond = b.all_of(matches);
            b.create_if(cond, false, |b, _| {
                let mut copy = expr.clone();
                let mut position = 0;
                copy.map_operands(|h| {
                    let replaced = first_values
                        .iter()
                        .find(|(index, _)| *index == position)
                        .map_or(h, |(_, first)| *first);
                    position += 1;
                    replaced
                });
                let value = b.append(copy, ty);
                b.store(result, value);
                b.statement(Statement::Break);
                Ok(())
            })
        })?;
        self.statement(Statement::Loop {
            body,
            continuing: Vec::new(),
            break_if: None,
        });

        self.func
            .replace_expression(inst, Expression::Load { pointer: result });
        self.push_statement(Statement::Emit(Range::from_index_range(end..end + 1)));
        Ok(inst)
    }
}
