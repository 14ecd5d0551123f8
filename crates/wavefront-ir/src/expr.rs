//! Expressions: SSA values evaluated at their `Emit` point.
//!
//! Arithmetic and data-movement expressions are pure. [`Expression::Lane`]
//! values additionally read other lanes of the wave, and
//! [`Expression::Call`] values are lowered operations that a later pass or the
//! hardware completes; calls may have side effects and must be emitted exactly
//! once.

use half::f16;

use crate::arena::Handle;
use crate::call::Callee;
use crate::func::LocalVariable;
use crate::types::{Bytes, Scalar, ScalarKind, Type, VectorSize};

/// A literal constant value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    /// Half-precision value as raw binary16 bits.
    F16(u16),
    F32(f32),
    F64(f64),
}

impl Literal {
    /// Returns the scalar type of this literal.
    pub fn scalar(&self) -> Scalar {
        match *self {
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
        }
    }

    /// The literal's integer value, zero-extended for unsigned kinds.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Bool(b) => Some(i64::from(b)),
            Self::I16(v) => Some(i64::from(v)),
            Self::U16(v) => Some(i64::from(v)),
            Self::I32(v) => Some(i64::from(v)),
            Self::U32(v) => Some(i64::from(v)),
            Self::I64(v) => Some(v),
            Self::U64(v) => Some(v as i64),
            Self::F16(_) | Self::F32(_) | Self::F64(_) => None,
        }
    }

    /// The literal's floating-point value.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::F16(bits) => Some(f64::from(f16::from_bits(bits))),
            Self::F32(v) => Some(f64::from(v)),
            Self::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Builds a literal of `scalar` type from an integer value (wrapping).
    pub fn from_int(scalar: Scalar, value: i64) -> Self {
        match (scalar.kind, scalar.width) {
            (ScalarKind::Bool, _) => Self::Bool(value != 0),
            (ScalarKind::Sint, 2) => Self::I16(value as i16),
            (ScalarKind::Uint, 2) => Self::U16(value as u16),
            (ScalarKind::Sint, 8) => Self::I64(value),
            (ScalarKind::Uint, 8) => Self::U64(value as u64),
            (ScalarKind::Sint, _) => Self::I32(value as i32),
            (ScalarKind::Uint, _) => Self::U32(value as u32),
            (ScalarKind::Float, _) => Self::from_f64(scalar, value as f64),
        }
    }

    /// Builds a floating-point literal of `scalar` type.
    pub fn from_f64(scalar: Scalar, value: f64) -> Self {
        match scalar.width {
            2 => Self::F16(f16::from_f64(value).to_bits()),
            8 => Self::F64(value),
            _ => Self::F32(value as f32),
        }
    }
}

/// A unary operator.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum UnaryOp {
    Negate,
    LogicalNot,
    BitwiseNot,
}

/// A binary operator.
///
/// `Modulo` is the remainder with the sign of the dividend. Float
/// comparisons are ordered (false on NaN) except `NotEqual`, which is
/// unordered. `ShiftRight` is arithmetic on signed operands.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    LogicalAnd,
    LogicalOr,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOp {
    /// Returns `true` for operators producing a boolean.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::NotEqual
                | Self::Less
                | Self::LessEqual
                | Self::Greater
                | Self::GreaterEqual
        )
    }
}

/// A hardware arithmetic primitive, applied component-wise.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum MathFunction {
    Floor,
    Ceil,
    Trunc,
    /// Round to nearest even.
    Round,
    /// `min(x - floor(x), largest value below 1.0)`.
    Fract,
    Sqrt,
    InverseSqrt,
    Reciprocal,
    Exp2,
    Log2,
    Sin,
    Cos,
    Abs,
    Fma,
    /// IEEE minNum for floats, signedness from the kind for integers.
    Min,
    /// IEEE maxNum for floats, signedness from the kind for integers.
    Max,
    /// Median of three.
    Med3,
    CopySign,
    Ldexp,
    FrexpMant,
    FrexpExp,
    CountOneBits,
    ReverseBits,
    /// Index of the lowest set bit, or -1.
    FindLsb,
    /// Index of the highest set bit counted from bit 0, or -1.
    FindMsb,
    /// Index counted from the most significant bit of the first bit that
    /// differs from the sign bit, or -1.
    FindSMsb,
    /// Bit-field extract; `offset` and `count` are taken modulo 32.
    ExtractBits,
    /// Float class test against a mask of class bits (see `class` module).
    Class,
    /// Flushes denormals to signed zero.
    Canonicalize,
    /// Cube face index (0..5) of a direction vector.
    CubeId,
    /// Face-space s coordinate of a direction vector.
    CubeSc,
    /// Face-space t coordinate of a direction vector.
    CubeTc,
    /// Twice the absolute major-axis component.
    CubeMa,
    /// Packs two `f32` into a half-precision pair, rounding toward zero.
    CvtPkRtz,
}

/// Bits of the mask operand of [`MathFunction::Class`].
pub mod class {
    pub const SIGNALING_NAN: u32 = 1 << 0;
    pub const QUIET_NAN: u32 = 1 << 1;
    pub const NEGATIVE_INFINITY: u32 = 1 << 2;
    pub const NEGATIVE_NORMAL: u32 = 1 << 3;
    pub const NEGATIVE_DENORMAL: u32 = 1 << 4;
    pub const NEGATIVE_ZERO: u32 = 1 << 5;
    pub const POSITIVE_ZERO: u32 = 1 << 6;
    pub const POSITIVE_DENORMAL: u32 = 1 << 7;
    pub const POSITIVE_NORMAL: u32 = 1 << 8;
    pub const POSITIVE_INFINITY: u32 = 1 << 9;
}

/// Cross-lane primitives of the SIMD hardware.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum LaneOp {
    /// `[value]`: the value of the first active lane.
    ReadFirstLane,
    /// `[value, lane]`: the value of a uniform lane index.
    ReadLane,
    /// `[value, lane, old]`: `old` with one lane replaced by `value`.
    WriteLane,
    /// `[condition]`: 64-bit mask of active lanes where the condition holds.
    Ballot,
    /// `[mask, accumulator]`: count of set mask bits below the lane, low half.
    MbcntLo,
    /// `[mask, accumulator]`: count of set mask bits below the lane, high half.
    MbcntHi,
    /// `[source]`: data-parallel move.
    DppMov {
        ctrl: u32,
        row_mask: u32,
        bank_mask: u32,
        bound_ctrl: bool,
    },
    /// `[old, source]`: data-parallel move keeping `old` where not written.
    DppUpdate {
        ctrl: u32,
        row_mask: u32,
        bank_mask: u32,
        bound_ctrl: bool,
    },
    /// `[old, source, sel_lo, sel_hi]`: permute within each row of 16.
    PermLane16 {
        fetch_inactive: bool,
        bound_ctrl: bool,
    },
    /// `[old, source, sel_lo, sel_hi]`: permute across paired rows of 16.
    PermLaneX16 {
        fetch_inactive: bool,
        bound_ctrl: bool,
    },
    /// `[source]`: LDS swizzle with an encoded pattern.
    DsSwizzle { pattern: u32 },
    /// `[byte address, source]`: backward permute through LDS hardware.
    DsBPermute,
    /// `[active, inactive]`: the second operand in lanes disabled by exec.
    SetInactive,
    /// `[value]`: end of a whole-wave-mode section.
    Wwm,
    /// `[value]`: whole-quad-mode value.
    Wqm,
}

impl LaneOp {
    /// Returns `true` if the result depends on the execution mask.
    pub fn reads_exec(self) -> bool {
        matches!(self, Self::ReadFirstLane | Self::Ballot | Self::SetInactive)
    }
}

/// An expression in the IR.
///
/// Expressions are stored in per-function arenas and are referenced by
/// [`Handle<Expression>`].
#[derive(Clone, Debug)]
pub enum Expression {
    /// A literal constant.
    Literal(Literal),
    /// The all-zero value of a type.
    ZeroValue(Handle<Type>),
    /// Construct a composite from components.
    Compose {
        ty: Handle<Type>,
        components: Vec<Handle<Expression>>,
    },
    /// Reference to a function argument by index.
    FunctionArgument(u32),
    /// Reference to a local variable (produces a pointer).
    LocalVariable(Handle<LocalVariable>),
    /// Load a value through a pointer.
    Load { pointer: Handle<Expression> },
    /// Advance a pointer by a byte offset.
    Offset {
        pointer: Handle<Expression>,
        offset: Handle<Expression>,
    },
    /// Pointer to `count` dwords of the entry point's uniform arguments
    /// starting at argument `first`.
    ArgumentPointer { first: u32, count: u32 },
    /// Dynamic index into a vector or array.
    Access {
        base: Handle<Expression>,
        index: Handle<Expression>,
    },
    /// Static index into a composite.
    AccessIndex {
        base: Handle<Expression>,
        index: u32,
    },
    /// A copy of a vector with one component replaced.
    Insert {
        base: Handle<Expression>,
        value: Handle<Expression>,
        index: u32,
    },
    /// Select vector components by index.
    Swizzle {
        vector: Handle<Expression>,
        pattern: Vec<u32>,
    },
    /// Broadcast a scalar to a vector.
    Splat {
        size: VectorSize,
        value: Handle<Expression>,
    },
    /// Apply a unary operator.
    Unary {
        op: UnaryOp,
        expr: Handle<Expression>,
    },
    /// Apply a binary operator.
    Binary {
        op: BinaryOp,
        left: Handle<Expression>,
        right: Handle<Expression>,
    },
    /// Component-wise select.
    Select {
        condition: Handle<Expression>,
        accept: Handle<Expression>,
        reject: Handle<Expression>,
    },
    /// Numeric conversion (`convert: Some(width)`) or same-width bitcast
    /// between kinds (`convert: None`).
    As {
        expr: Handle<Expression>,
        kind: ScalarKind,
        convert: Option<Bytes>,
    },
    /// Reinterpret the bits of a value as another type of the same size.
    Bitcast {
        expr: Handle<Expression>,
        ty: Handle<Type>,
    },
    /// Hardware arithmetic primitive.
    Math {
        fun: MathFunction,
        arg: Handle<Expression>,
        arg1: Option<Handle<Expression>>,
        arg2: Option<Handle<Expression>>,
    },
    /// Cross-lane primitive.
    Lane {
        op: LaneOp,
        args: Vec<Handle<Expression>>,
    },
    /// Lowered operation completed downstream.
    Call {
        callee: Callee,
        args: Vec<Handle<Expression>>,
    },
}

impl Expression {
    /// Returns all expression handles directly referenced by this expression.
    pub fn operands(&self) -> Vec<Handle<Expression>> {
        match self {
            Self::Literal(_)
            | Self::ZeroValue(_)
            | Self::FunctionArgument(_)
            | Self::LocalVariable(_)
            | Self::ArgumentPointer { .. } => vec![],

            Self::Load { pointer } => vec![*pointer],
            Self::Unary { expr, .. } => vec![*expr],
            Self::Splat { value, .. } => vec![*value],
            Self::As { expr, .. } | Self::Bitcast { expr, .. } => vec![*expr],
            Self::Swizzle { vector, .. } => vec![*vector],
            Self::AccessIndex { base, .. } => vec![*base],

            Self::Offset { pointer, offset } => vec![*pointer, *offset],
            Self::Binary { left, right, .. } => vec![*left, *right],
            Self::Access { base, index } => vec![*base, *index],
            Self::Insert { base, value, .. } => vec![*base, *value],
            Self::Select {
                condition,
                accept,
                reject,
            } => vec![*condition, *accept, *reject],

            Self::Compose { components, .. } => components.clone(),
            Self::Lane { args, .. } | Self::Call { args, .. } => args.clone(),
            Self::Math {
                arg, arg1, arg2, ..
            } => {
                let mut ops = vec![*arg];
                ops.extend(arg1.iter().chain(arg2.iter()).copied());
                ops
            }
        }
    }

    /// Rewrites every operand handle through `f`.
    pub fn map_operands(&mut self, mut f: impl FnMut(Handle<Expression>) -> Handle<Expression>) {
        match self {
            Self::Literal(_)
            | Self::ZeroValue(_)
            | Self::FunctionArgument(_)
            | Self::LocalVariable(_)
            | Self::ArgumentPointer { .. } => {}

            Self::Load { pointer } => *pointer = f(*pointer),
            Self::Unary { expr, .. } => *expr = f(*expr),
            Self::Splat { value, .. } => *value = f(*value),
            Self::As { expr, .. } | Self::Bitcast { expr, .. } => *expr = f(*expr),
            Self::Swizzle { vector, .. } => *vector = f(*vector),
            Self::AccessIndex { base, .. } => *base = f(*base),

            Self::Offset { pointer, offset } => {
                *pointer = f(*pointer);
                *offset = f(*offset);
            }
            Self::Binary { left, right, .. } => {
                *left = f(*left);
                *right = f(*right);
            }
            Self::Access { base, index } => {
                *base = f(*base);
                *index = f(*index);
            }
            Self::Insert { base, value, .. } => {
                *base = f(*base);
                *value = f(*value);
            }
            Self::Select {
                condition,
                accept,
                reject,
            } => {
                *condition = f(*condition);
                *accept = f(*accept);
                *reject = f(*reject);
            }

            Self::Compose { components, .. } => {
                for c in components {
                    *c = f(*c);
                }
            }
            Self::Lane { args, .. } | Self::Call { args, .. } => {
                for a in args {
                    *a = f(*a);
                }
            }
            Self::Math {
                arg, arg1, arg2, ..
            } => {
                *arg = f(*arg);
                if let Some(a) = arg1 {
                    *a = f(*a);
                }
                if let Some(a) = arg2 {
                    *a = f(*a);
                }
            }
        }
    }

    /// Returns `true` if evaluating this expression has effects beyond its
    /// value, so it must not be removed or duplicated.
    pub fn has_side_effects(&self) -> bool {
        match self {
            Self::Call { callee, .. } => callee.has_side_effects(),
            _ => false,
        }
    }

    /// Returns the literal if this is a constant.
    pub fn as_literal(&self) -> Option<Literal> {
        match *self {
            Self::Literal(lit) => Some(lit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    #[test]
    fn literal_scalar_types() {
        assert_eq!(Literal::F32(1.0).scalar(), Scalar::F32);
        assert_eq!(Literal::U64(7).scalar(), Scalar::U64);
        assert_eq!(Literal::F16(0x3c00).as_f64(), Some(1.0));
        assert_eq!(Literal::U32(u32::MAX).as_i64(), Some(i64::from(u32::MAX)));
        assert_eq!(Literal::from_int(Scalar::U32, -1), Literal::U32(u32::MAX));
        assert_eq!(Literal::from_f64(Scalar::F16, 1.0), Literal::F16(0x3c00));
    }

    #[test]
    fn operands_and_map() {
        let mut exprs = Arena::new();
        let a = exprs.append(Expression::Literal(Literal::I32(1)));
        let b = exprs.append(Expression::Literal(Literal::I32(2)));
        let c = exprs.append(Expression::Literal(Literal::I32(3)));
        let mut e = Expression::Lane {
            op: LaneOp::ReadLane,
            args: vec![a, b],
        };
        assert_eq!(e.operands(), vec![a, b]);
        e.map_operands(|h| if h == b { c } else { h });
        assert_eq!(e.operands(), vec![a, c]);

        let m = Expression::Math {
            fun: MathFunction::Fma,
            arg: a,
            arg1: Some(b),
            arg2: Some(c),
        };
        assert_eq!(m.operands(), vec![a, b, c]);
    }

    #[test]
    fn pure_expressions_have_no_side_effects() {
        let mut exprs = Arena::new();
        let a = exprs.append(Expression::Literal(Literal::Bool(true)));
        let ballot = Expression::Lane {
            op: LaneOp::Ballot,
            args: vec![a],
        };
        assert!(!ballot.has_side_effects());
        assert!(LaneOp::Ballot.reads_exec());
        assert!(!LaneOp::DsBPermute.reads_exec());
        let kill = Expression::Call {
            callee: Callee::Kill,
            args: vec![],
        };
        assert!(kill.has_side_effects());
    }
}
