//! Scalarization helpers.
//!
//! Hardware primitives that only take scalars or 32-bit values are applied
//! to wider operands by splitting them, applying the primitive per piece and
//! reassembling a value of the original shape.

use wavefront_ir::{Expression, Handle, Scalar, ScalarKind, TypeInner};

use crate::Builder;
use crate::error::BuildError;

type Value = Handle<Expression>;

impl Builder<'_> {
    /// Applies `f` to each component of `value` and gathers the results
    /// into a vector. A scalar is passed to `f` unchanged.
    pub fn scalarize(
        &mut self,
        value: Value,
        mut f: impl FnMut(&mut Self, Value) -> Result<Value, BuildError>,
    ) -> Result<Value, BuildError> {
        if !self.inner_of(value).is_vector() {
            return f(self, value);
        }
        let mut results = Vec::new();
        for component in self.components(value) {
            results.push(f(self, component)?);
        }
        Ok(self.vector_from(results))
    }

    /// Like [`Builder::scalarize`] over two operands of the same shape. A
    /// scalar second operand is reused for every component.
    pub fn scalarize2(
        &mut self,
        a: Value,
        b: Value,
        mut f: impl FnMut(&mut Self, Value, Value) -> Result<Value, BuildError>,
    ) -> Result<Value, BuildError> {
        if !self.inner_of(a).is_vector() {
            return f(self, a, b);
        }
        let a_parts = self.components(a);
        let b_parts = self.components_like(b, a_parts.len());
        let mut results = Vec::new();
        for (x, y) in a_parts.into_iter().zip(b_parts) {
            results.push(f(self, x, y)?);
        }
        Ok(self.vector_from(results))
    }

    /// Like [`Builder::scalarize`] over three operands.
    pub fn scalarize3(
        &mut self,
        a: Value,
        b: Value,
        c: Value,
        mut f: impl FnMut(&mut Self, Value, Value, Value) -> Result<Value, BuildError>,
    ) -> Result<Value, BuildError> {
        if !self.inner_of(a).is_vector() {
            return f(self, a, b, c);
        }
        let a_parts = self.components(a);
        let count = a_parts.len();
        let b_parts = self.components_like(b, count);
        let c_parts = self.components_like(c, count);
        let mut results = Vec::new();
        for ((x, y), z) in a_parts.into_iter().zip(b_parts).zip(c_parts) {
            results.push(f(self, x, y, z)?);
        }
        Ok(self.vector_from(results))
    }

    /// Applies `f` to consecutive component pairs of `value`, each passed as
    /// a two-component vector; `f` returns a two-component vector. An odd
    /// last component is paired with itself and the extra result dropped.
    pub fn scalarize_in_pairs(
        &mut self,
        value: Value,
        mut f: impl FnMut(&mut Self, Value) -> Result<Value, BuildError>,
    ) -> Result<Value, BuildError> {
        let parts = self.components(value);
        let mut results = Vec::new();
        for pair in parts.chunks(2) {
            let second = pair.get(1).copied().unwrap_or(pair[0]);
            let input = self.vector_from(vec![pair[0], second]);
            let output = f(self, input)?;
            results.push(self.extract(output, 0));
            if pair.len() == 2 {
                results.push(self.extract(output, 1));
            }
        }
        Ok(self.vector_from(results))
    }

    /// Applies a 32-bit lane primitive `f` to a value of any scalar or
    /// vector type: the value is split into `u32` pieces, each piece goes
    /// through `f`, and the result is reassembled with the original type.
    pub fn map_to_int32(
        &mut self,
        value: Value,
        mut f: impl FnMut(&mut Self, Value) -> Result<Value, BuildError>,
    ) -> Result<Value, BuildError> {
        self.map_to_int32_inner(&[value], &mut |b, pieces| f(b, pieces[0]))
    }

    /// Like [`Builder::map_to_int32`] over several operands of one type,
    /// split in lockstep: `f` gets the matching piece of each operand.
    pub fn map_to_int32_n(
        &mut self,
        values: &[Value],
        mut f: impl FnMut(&mut Self, &[Value]) -> Result<Value, BuildError>,
    ) -> Result<Value, BuildError> {
        debug_assert!(!values.is_empty());
        debug_assert!(values.iter().all(|&v| self.type_of(v) == self.type_of(values[0])));
        self.map_to_int32_inner(values, &mut f)
    }

    fn map_to_int32_inner(
        &mut self,
        values: &[Value],
        f: &mut dyn FnMut(&mut Self, &[Value]) -> Result<Value, BuildError>,
    ) -> Result<Value, BuildError> {
        let value = values[0];
        let inner = self.inner_of(value);
        let scalar = match inner {
            TypeInner::Vector { .. } => {
                let split: Vec<Vec<Value>> = values.iter().map(|&v| self.components(v)).collect();
                let mut results = Vec::new();
                for i in 0..split[0].len() {
                    let pieces: Vec<Value> = split.iter().map(|parts| parts[i]).collect();
                    results.push(self.map_to_int32_inner(&pieces, f)?);
                }
                let ty = self.type_of(value);
                return Ok(self.compose(ty, results));
            }
            TypeInner::Scalar(scalar) => scalar,
            other => return Err(self.unexpected("map_to_int32", "scalar or vector", &other)),
        };

        match (scalar.kind, scalar.width) {
            (ScalarKind::Uint, 4) => f(self, values),
            (ScalarKind::Bool, _) => {
                let one = self.const_u32(1);
                let zero = self.const_u32(0);
                let as_int: Vec<Value> = values
                    .iter()
                    .map(|&v| self.select(v, one, zero))
                    .collect();
                let mapped = f(self, &as_int)?;
                Ok(self.binary(wavefront_ir::BinaryOp::NotEqual, mapped, zero))
            }
            (_, 4) => {
                let as_int: Vec<Value> = values
                    .iter()
                    .map(|&v| self.bitcast_kind(v, ScalarKind::Uint))
                    .collect();
                let mapped = f(self, &as_int)?;
                Ok(self.bitcast_kind(mapped, scalar.kind))
            }
            (_, 8) => {
                let pair_ty = self.vector_type(Scalar::U32, 2);
                let pairs: Vec<Value> = values.iter().map(|&v| self.bitcast(v, pair_ty)).collect();
                let mut halves = Vec::with_capacity(2);
                for half in 0..2 {
                    let pieces: Vec<Value> = pairs.iter().map(|&p| self.extract(p, half)).collect();
                    halves.push(f(self, &pieces)?);
                }
                let pair = self.compose(pair_ty, halves);
                let ty = self.type_of(value);
                Ok(self.bitcast(pair, ty))
            }
            _ => {
                // 16-bit: widen through the unsigned bit pattern.
                let wide: Vec<Value> = values
                    .iter()
                    .map(|&v| {
                        let bits = self.bitcast_kind(v, ScalarKind::Uint);
                        self.convert(bits, Scalar::U32)
                    })
                    .collect();
                let mapped = f(self, &wide)?;
                let narrow = self.convert(mapped, scalar.with_kind(ScalarKind::Uint));
                Ok(self.bitcast_kind(narrow, scalar.kind))
            }
        }
    }

    /// `count` components of `value`, repeating a scalar.
    fn components_like(&mut self, value: Value, count: usize) -> Vec<Value> {
        if self.inner_of(value).is_vector() {
            self.components(value)
        } else {
            vec![value; count]
        }
    }
}
