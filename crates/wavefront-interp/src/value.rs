//! Per-lane values.

use half::f16;
use wavefront_ir::{Literal, Scalar, ScalarKind, Type, TypeInner, UniqueArena};

use crate::error::InterpError;

/// What a pointer value addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pointer {
    /// A function-local variable, by arena index.
    Local { var: u32 },
    /// Host memory at a byte address.
    Memory { address: u64 },
    /// The uniform argument registers, starting at argument `first`.
    Arguments { first: u32, offset: u32 },
}

/// The value of an expression in one lane.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    /// Half-precision value, held widened and always exactly representable.
    F16(f32),
    F32(f32),
    F64(f64),
    Composite(Vec<Value>),
    Pointer(Pointer),
}

impl From<Literal> for Value {
    fn from(lit: Literal) -> Self {
        match lit {
            Literal::Bool(v) => Self::Bool(v),
            Literal::I16(v) => Self::I16(v),
            Literal::U16(v) => Self::U16(v),
            Literal::I32(v) => Self::I32(v),
            Literal::U32(v) => Self::U32(v),
            Literal::I64(v) => Self::I64(v),
            Literal::U64(v) => Self::U64(v),
            Literal::F16(bits) => Self::F16(f16::from_bits(bits).to_f32()),
            Literal::F32(v) => Self::F32(v),
            Literal::F64(v) => Self::F64(v),
        }
    }
}

impl Value {
    /// The all-zero value of `inner`.
    pub fn zero(inner: &TypeInner, types: &UniqueArena<Type>) -> Self {
        match *inner {
            TypeInner::Void => Self::Void,
            TypeInner::Scalar(scalar) => Self::from_int(scalar, 0),
            TypeInner::Vector { size, scalar } => {
                Self::Composite(vec![Self::from_int(scalar, 0); size.count() as usize])
            }
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => {
                let column = Self::Composite(vec![Self::from_int(scalar, 0); rows.count() as usize]);
                Self::Composite(vec![column; columns.count() as usize])
            }
            TypeInner::Array { base, size } => {
                Self::Composite(vec![Self::zero(&types[base].inner, types); size as usize])
            }
            TypeInner::Struct { ref members } => Self::Composite(
                members
                    .iter()
                    .map(|m| Self::zero(&types[m.ty].inner, types))
                    .collect(),
            ),
            TypeInner::Pointer { .. } => Self::Pointer(Pointer::Memory { address: 0 }),
        }
    }

    /// A scalar of type `scalar` from an integer, wrapping.
    pub fn from_int(scalar: Scalar, value: i64) -> Self {
        Self::from(Literal::from_int(scalar, value))
    }

    /// A scalar of float type `scalar`, rounded to its precision.
    pub fn from_f64(scalar: Scalar, value: f64) -> Self {
        match scalar.width {
            2 => Self::F16(f16::from_f64(value).to_f32()),
            8 => Self::F64(value),
            _ => Self::F32(value as f32),
        }
    }

    /// The scalar type of a scalar value.
    pub fn scalar(&self) -> Option<Scalar> {
        Some(match self {
            Self::Bool(_) => Scalar::BOOL,
            Self::I16(_) => Scalar::I16,
            Self::U16(_) => Scalar::U16,
            Self::I32(_) => Scalar::I32,
            Self::U32(_) => Scalar::U32,
            Self::I64(_) => Scalar::I64,
            Self::U64(_) => Scalar::U64,
            Self::F16(_) => Scalar::F16,
            Self::F32(_) => Scalar::F32,
            Self::F64(_) => Scalar::F64,
            _ => return None,
        })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Integer value, sign- or zero-extended by kind. Booleans are 0 or 1.
    pub fn as_i64(&self) -> Option<i64> {
        Some(match *self {
            Self::Bool(v) => i64::from(v),
            Self::I16(v) => i64::from(v),
            Self::U16(v) => i64::from(v),
            Self::I32(v) => i64::from(v),
            Self::U32(v) => i64::from(v),
            Self::I64(v) => v,
            Self::U64(v) => v as i64,
            _ => return None,
        })
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_i64().map(|v| v as u32)
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().map(|v| v as u64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::F16(v) | Self::F32(v) => Some(f64::from(v)),
            Self::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        self.as_f64().map(|v| v as f32)
    }

    /// Components of a composite, or the value itself.
    pub fn components(&self) -> &[Value] {
        match self {
            Self::Composite(items) => items,
            other => std::slice::from_ref(other),
        }
    }

    /// Components as `f32`, for test assertions.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.components()
            .iter()
            .map(|c| c.as_f32().unwrap_or(f32::NAN))
            .collect()
    }

    /// Components as `u32`, for test assertions.
    pub fn to_u32_vec(&self) -> Vec<u32> {
        self.components()
            .iter()
            .map(|c| c.as_u32().unwrap_or(0))
            .collect()
    }

    /// Numeric conversion of a scalar to `to`.
    pub fn convert(&self, to: Scalar) -> Self {
        match (self.as_f64(), to.kind) {
            (Some(f), ScalarKind::Float) => Self::from_f64(to, f),
            (Some(f), ScalarKind::Bool) => Self::Bool(f != 0.0),
            (Some(f), ScalarKind::Sint) => Self::from_int(to, saturate_signed(f, to.bits())),
            (Some(f), ScalarKind::Uint) => Self::from_int(to, saturate_unsigned(f, to.bits())),
            (None, ScalarKind::Float) => {
                let v = match self {
                    Self::U64(v) => *v as f64,
                    other => other.as_i64().unwrap_or(0) as f64,
                };
                Self::from_f64(to, v)
            }
            (None, ScalarKind::Bool) => Self::Bool(self.as_i64().unwrap_or(0) != 0),
            (None, _) => Self::from_int(to, self.as_i64().unwrap_or(0)),
        }
    }

    /// Appends the little-endian byte image of the value.
    pub fn write_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Self::Void => {}
            Self::Bool(v) => out.extend_from_slice(&u32::from(*v).to_le_bytes()),
            Self::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::F16(v) => {
                out.extend_from_slice(&f16::from_f32(*v).to_le_bytes());
            }
            Self::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
            Self::Composite(items) => {
                for item in items {
                    item.write_bytes(out);
                }
            }
            Self::Pointer(Pointer::Memory { address }) => {
                out.extend_from_slice(&address.to_le_bytes())
            }
            Self::Pointer(_) => out.extend_from_slice(&0u64.to_le_bytes()),
        }
    }

    /// Decodes a value of `inner` from `bytes` at `*pos`, advancing it.
    /// Missing bytes read as zero.
    pub fn read_bytes(
        inner: &TypeInner,
        types: &UniqueArena<Type>,
        bytes: &[u8],
        pos: &mut usize,
    ) -> Self {
        let mut take = |n: usize| -> [u8; 8] {
            let mut buf = [0u8; 8];
            for (i, b) in buf.iter_mut().take(n).enumerate() {
                *b = bytes.get(*pos + i).copied().unwrap_or(0);
            }
            *pos += n;
            buf
        };
        match *inner {
            TypeInner::Void => Self::Void,
            TypeInner::Scalar(scalar) => {
                let width = if scalar.kind == ScalarKind::Bool {
                    4
                } else {
                    usize::from(scalar.width)
                };
                let raw = u64::from_le_bytes(take(width));
                Self::from_bits(scalar, raw)
            }
            TypeInner::Vector { size, scalar } => Self::Composite(
                (0..size.count())
                    .map(|_| Self::read_bytes(&TypeInner::Scalar(scalar), types, bytes, pos))
                    .collect(),
            ),
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => {
                let column = TypeInner::Vector { size: rows, scalar };
                Self::Composite(
                    (0..columns.count())
                        .map(|_| Self::read_bytes(&column, types, bytes, pos))
                        .collect(),
                )
            }
            TypeInner::Array { base, size } => Self::Composite(
                (0..size)
                    .map(|_| Self::read_bytes(&types[base].inner, types, bytes, pos))
                    .collect(),
            ),
            TypeInner::Struct { ref members } => Self::Composite(
                members
                    .iter()
                    .map(|m| Self::read_bytes(&types[m.ty].inner, types, bytes, pos))
                    .collect(),
            ),
            TypeInner::Pointer { .. } => Self::Pointer(Pointer::Memory {
                address: u64::from_le_bytes(take(8)),
            }),
        }
    }

    /// A scalar from its raw bit pattern.
    pub fn from_bits(scalar: Scalar, raw: u64) -> Self {
        match (scalar.kind, scalar.width) {
            (ScalarKind::Bool, _) => Self::Bool(raw as u32 != 0),
            (ScalarKind::Float, 2) => Self::F16(f16::from_bits(raw as u16).to_f32()),
            (ScalarKind::Float, 8) => Self::F64(f64::from_bits(raw)),
            (ScalarKind::Float, _) => Self::F32(f32::from_bits(raw as u32)),
            _ => Self::from_int(scalar, raw as i64),
        }
    }

    /// Raw bit pattern of a scalar.
    pub fn to_bits(&self) -> u64 {
        let mut bytes = Vec::with_capacity(8);
        self.write_bytes(&mut bytes);
        bytes.resize(8, 0);
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(buf)
    }

    /// Reinterprets the bits of `self` as `inner`.
    pub fn bitcast(&self, inner: &TypeInner, types: &UniqueArena<Type>) -> Self {
        let mut bytes = Vec::new();
        self.write_bytes(&mut bytes);
        Self::read_bytes(inner, types, &bytes, &mut 0)
    }

    /// The scalar value rounded to its own precision (half values are kept
    /// exactly representable).
    pub(crate) fn normalized(self) -> Self {
        match self {
            Self::F16(v) => Self::F16(f16::from_f32(v).to_f32()),
            other => other,
        }
    }

    /// Whether two values are bitwise equal (NaN equals itself).
    pub fn bit_eq(&self, other: &Value) -> bool {
        let mut a = Vec::new();
        let mut b = Vec::new();
        self.write_bytes(&mut a);
        other.write_bytes(&mut b);
        a == b
    }
}

/// Size in bytes of a value of `inner`.
pub fn type_size(inner: &TypeInner, types: &UniqueArena<Type>) -> u32 {
    match *inner {
        TypeInner::Void => 0,
        TypeInner::Scalar(s) => scalar_size(s),
        TypeInner::Vector { size, scalar } => size.count() * scalar_size(scalar),
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => columns.count() * rows.count() * scalar_size(scalar),
        TypeInner::Array { base, size } => size * type_size(&types[base].inner, types),
        TypeInner::Struct { ref members } => members
            .iter()
            .map(|m| type_size(&types[m.ty].inner, types))
            .sum(),
        TypeInner::Pointer { .. } => 8,
    }
}

fn scalar_size(scalar: Scalar) -> u32 {
    if scalar.kind == ScalarKind::Bool {
        4
    } else {
        u32::from(scalar.width)
    }
}

fn saturate_signed(f: f64, bits: u32) -> i64 {
    if f.is_nan() {
        return 0;
    }
    let max = ((1u64 << (bits - 1)) - 1) as f64;
    let min = -((1u64 << (bits - 1)) as f64);
    f.trunc().clamp(min, max) as i64
}

fn saturate_unsigned(f: f64, bits: u32) -> i64 {
    if f.is_nan() {
        return 0;
    }
    let max = if bits == 64 {
        u64::MAX as f64
    } else {
        ((1u64 << bits) - 1) as f64
    };
    f.trunc().clamp(0.0, max) as u64 as i64
}

/// Lane values for a requirement check: fails with a type mismatch.
pub(crate) fn expect<T>(value: Option<T>, op: &'static str, what: &str) -> Result<T, InterpError> {
    value.ok_or_else(|| InterpError::TypeMismatch {
        op,
        detail: format!("expected {what}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavefront_ir::VectorSize;

    #[test]
    fn bitcast_pairs() {
        let types = UniqueArena::new();
        let v = Value::F64(1.5);
        let pair = v.bitcast(
            &TypeInner::Vector {
                size: VectorSize::Bi,
                scalar: Scalar::U32,
            },
            &types,
        );
        let bits = 1.5f64.to_bits();
        assert_eq!(pair.to_u32_vec(), vec![bits as u32, (bits >> 32) as u32]);
        let back = pair.bitcast(&TypeInner::Scalar(Scalar::F64), &types);
        assert_eq!(back, Value::F64(1.5));
    }

    #[test]
    fn half_pair_packs_into_dword() {
        let types = UniqueArena::new();
        let halves = Value::Composite(vec![Value::F16(1.0), Value::F16(-2.0)]);
        let packed = halves.bitcast(&TypeInner::Scalar(Scalar::U32), &types);
        assert_eq!(packed, Value::U32(0xC000_3C00));
    }

    #[test]
    fn conversions_saturate() {
        assert_eq!(Value::F32(-3.7).convert(Scalar::I32), Value::I32(-3));
        assert_eq!(Value::F32(-3.7).convert(Scalar::U32), Value::U32(0));
        assert_eq!(Value::F32(f32::NAN).convert(Scalar::I32), Value::I32(0));
        assert_eq!(Value::U32(7).convert(Scalar::F16), Value::F16(7.0));
        assert_eq!(Value::I32(-1).convert(Scalar::U64), Value::U64(u64::MAX));
    }
}
