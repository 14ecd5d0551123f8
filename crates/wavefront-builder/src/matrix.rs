//! Matrix arithmetic.
//!
//! Matrices are arrays of column vectors. Products are built from column
//! multiplies and dot products; determinants and inverses use cofactor
//! expansion, which is fine for the 2x2 to 4x4 matrices shaders declare.

use wavefront_ir::{Expression, Handle, Scalar, Type, TypeInner, VectorSize};

use crate::Builder;
use crate::error::BuildError;

type Value = Handle<Expression>;

#[derive(Clone, Copy, Debug)]
struct Shape {
    columns: u32,
    rows: u32,
    scalar: Scalar,
}

impl Builder<'_> {
    fn matrix_shape(&self, op: &'static str, matrix: Value) -> Result<Shape, BuildError> {
        match self.inner_of(matrix) {
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => Ok(Shape {
                columns: columns.count(),
                rows: rows.count(),
                scalar,
            }),
            other => Err(self.unexpected(op, "matrix", &other)),
        }
    }

    fn matrix_type(
        &mut self,
        scalar: Scalar,
        columns: u32,
        rows: u32,
    ) -> Result<Handle<Type>, BuildError> {
        let size = |count| {
            VectorSize::from_count(count).ok_or_else(|| BuildError::ShapeMismatch {
                op: "matrix",
                detail: format!("{count} is not a matrix dimension"),
            })
        };
        let inner = TypeInner::Matrix {
            columns: size(columns)?,
            rows: size(rows)?,
            scalar,
        };
        Ok(self.insert_type(inner))
    }

    fn columns_of(&mut self, matrix: Value, shape: Shape) -> Vec<Value> {
        (0..shape.columns).map(|c| self.extract(matrix, c)).collect()
    }

    /// Column-major scalar elements.
    fn elements_of(&mut self, matrix: Value, shape: Shape) -> Vec<Value> {
        let mut elements = Vec::with_capacity((shape.columns * shape.rows) as usize);
        for column in self.columns_of(matrix, shape) {
            elements.extend((0..shape.rows).map(|r| self.extract(column, r)));
        }
        elements
    }

    fn build_matrix(
        &mut self,
        scalar: Scalar,
        columns: Vec<Value>,
    ) -> Result<Value, BuildError> {
        let rows = self.component_count(columns[0]);
        let ty = self.matrix_type(scalar, columns.len() as u32, rows)?;
        Ok(self.compose(ty, columns))
    }

    fn expect_square(&self, op: &'static str, shape: Shape) -> Result<(), BuildError> {
        if shape.columns != shape.rows {
            return Err(BuildError::ShapeMismatch {
                op,
                detail: format!("{}x{} matrix is not square", shape.columns, shape.rows),
            });
        }
        Ok(())
    }

    fn expect_components(
        &self,
        op: &'static str,
        vector: Value,
        want: u32,
    ) -> Result<(), BuildError> {
        let got = self.component_count(vector);
        if got != want {
            return Err(BuildError::ShapeMismatch {
                op,
                detail: format!("vector of {got} components, matrix needs {want}"),
            });
        }
        Ok(())
    }

    pub fn create_transpose_matrix(&mut self, matrix: Value) -> Result<Value, BuildError> {
        let shape = self.matrix_shape("transpose", matrix)?;
        let columns = self.columns_of(matrix, shape);
        let mut transposed = Vec::with_capacity(shape.rows as usize);
        for r in 0..shape.rows {
            let row: Vec<Value> = columns.iter().map(|&c| self.extract(c, r)).collect();
            transposed.push(self.vector_from(row));
        }
        self.build_matrix(shape.scalar, transposed)
    }

    pub fn create_matrix_times_scalar(
        &mut self,
        matrix: Value,
        scalar: Value,
    ) -> Result<Value, BuildError> {
        let shape = self.matrix_shape("matrix times scalar", matrix)?;
        let splat = self.splat(scalar, shape.rows);
        let columns: Vec<Value> = self
            .columns_of(matrix, shape)
            .into_iter()
            .map(|c| self.mul(c, splat))
            .collect();
        self.build_matrix(shape.scalar, columns)
    }

    /// Row vector times matrix: component `c` is the dot product of
    /// `vector` with column `c`.
    pub fn create_vector_times_matrix(
        &mut self,
        vector: Value,
        matrix: Value,
    ) -> Result<Value, BuildError> {
        let shape = self.matrix_shape("vector times matrix", matrix)?;
        self.expect_components("vector times matrix", vector, shape.rows)?;
        let mut result = Vec::with_capacity(shape.columns as usize);
        for column in self.columns_of(matrix, shape) {
            result.push(self.create_dot_product(vector, column)?);
        }
        Ok(self.vector_from(result))
    }

    /// Matrix times column vector: the columns weighted by the vector's
    /// components and summed.
    pub fn create_matrix_times_vector(
        &mut self,
        matrix: Value,
        vector: Value,
    ) -> Result<Value, BuildError> {
        let shape = self.matrix_shape("matrix times vector", matrix)?;
        self.expect_components("matrix times vector", vector, shape.columns)?;
        let columns = self.columns_of(matrix, shape);
        self.weighted_sum(&columns, vector, shape.rows)
    }

    pub fn create_matrix_times_matrix(
        &mut self,
        left: Value,
        right: Value,
    ) -> Result<Value, BuildError> {
        let left_shape = self.matrix_shape("matrix times matrix", left)?;
        let right_shape = self.matrix_shape("matrix times matrix", right)?;
        if left_shape.columns != right_shape.rows {
            return Err(BuildError::ShapeMismatch {
                op: "matrix times matrix",
                detail: format!(
                    "{}x{} times {}x{}",
                    left_shape.columns, left_shape.rows, right_shape.columns, right_shape.rows
                ),
            });
        }
        let left_columns = self.columns_of(left, left_shape);
        let mut product = Vec::with_capacity(right_shape.columns as usize);
        for column in self.columns_of(right, right_shape) {
            product.push(self.weighted_sum(&left_columns, column, left_shape.rows)?);
        }
        self.build_matrix(left_shape.scalar, product)
    }

    /// `column * transpose(row)`: column `j` of the result is `column`
    /// scaled by `row[j]`.
    pub fn create_outer_product(&mut self, column: Value, row: Value) -> Result<Value, BuildError> {
        self.expect_float("outer product", column)?;
        let rows = self.component_count(column);
        let scalar = self.scalar_of(column);
        let mut columns = Vec::new();
        for weight in self.components(row) {
            let splat = self.splat(weight, rows);
            columns.push(self.mul(column, splat));
        }
        self.build_matrix(scalar, columns)
    }

    pub fn create_determinant(&mut self, matrix: Value) -> Result<Value, BuildError> {
        let shape = self.matrix_shape("determinant", matrix)?;
        self.expect_square("determinant", shape)?;
        let elements = self.elements_of(matrix, shape);
        Ok(self.determinant(&elements, shape.rows))
    }

    /// Adjugate divided by the determinant. A singular matrix gives
    /// infinities or NaNs.
    pub fn create_matrix_inverse(&mut self, matrix: Value) -> Result<Value, BuildError> {
        let shape = self.matrix_shape("inverse", matrix)?;
        self.expect_square("inverse", shape)?;
        let order = shape.rows;
        let elements = self.elements_of(matrix, shape);
        let det = self.determinant(&elements, order);
        let one = self.const_float_like(det, 1.0);
        let inv_det = self.div(one, det);

        let mut columns = Vec::with_capacity(order as usize);
        for c in 0..order {
            let mut column = Vec::with_capacity(order as usize);
            for r in 0..order {
                // Cofactor of element (row c, column r), transposed into place.
                let minor = self.get_submatrix(&elements, order, c, r);
                let mut cofactor = self.determinant(&minor, order - 1);
                if (r + c) % 2 == 1 {
                    cofactor = self.neg(cofactor);
                }
                column.push(self.mul(cofactor, inv_det));
            }
            columns.push(self.vector_from(column));
        }
        self.build_matrix(shape.scalar, columns)
    }
}

// Helpers.
impl Builder<'_> {
    fn weighted_sum(
        &mut self,
        columns: &[Value],
        weights: Value,
        rows: u32,
    ) -> Result<Value, BuildError> {
        let weights = self.components(weights);
        let mut sum: Option<Value> = None;
        for (&column, &weight) in columns.iter().zip(&weights) {
            let splat = self.splat(weight, rows);
            let term = self.mul(column, splat);
            sum = Some(match sum {
                Some(sum) => self.add(sum, term),
                None => term,
            });
        }
        sum.ok_or(BuildError::ShapeMismatch {
            op: "matrix product",
            detail: "no columns".into(),
        })
    }

    /// Determinant of the `order`x`order` matrix with column-major
    /// `elements`, expanded along the first row.
    pub fn determinant(&mut self, elements: &[Value], order: u32) -> Value {
        debug_assert_eq!(elements.len(), (order * order) as usize);
        match order {
            1 => elements[0],
            2 => {
                let ad = self.mul(elements[0], elements[3]);
                let cb = self.mul(elements[2], elements[1]);
                self.sub(ad, cb)
            }
            _ => {
                let mut result = None;
                for c in 0..order {
                    let minor = self.get_submatrix(elements, order, 0, c);
                    let minor_det = self.determinant(&minor, order - 1);
                    let term = self.mul(elements[(c * order) as usize], minor_det);
                    result = Some(match result {
                        None => term,
                        Some(acc) if c % 2 == 1 => self.sub(acc, term),
                        Some(acc) => self.add(acc, term),
                    });
                }
                // order >= 3 here, so the loop ran.
                result.unwrap_or(elements[0])
            }
        }
    }

    /// `elements` with row `row` and column `column` removed, still
    /// column-major.
    pub fn get_submatrix(
        &self,
        elements: &[Value],
        order: u32,
        row: u32,
        column: u32,
    ) -> Vec<Value> {
        let mut submatrix = Vec::with_capacity(((order - 1) * (order - 1)) as usize);
        for c in (0..order).filter(|&c| c != column) {
            for r in (0..order).filter(|&r| r != row) {
                submatrix.push(elements[(c * order + r) as usize]);
            }
        }
        submatrix
    }
}
