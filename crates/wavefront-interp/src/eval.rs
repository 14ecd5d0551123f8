//! Per-lane evaluation of pure expressions.

use wavefront_ir::{BinaryOp, MathFunction, Scalar, ScalarKind, UnaryOp, class};
use wavefront_ir::float16::f16_toward_zero;

use crate::error::InterpError;
use crate::value::{Value, expect};

/// Applies `f` per component, broadcasting a scalar operand against a
/// composite one.
pub(crate) fn zip2(
    a: &Value,
    b: &Value,
    f: &mut impl FnMut(&Value, &Value) -> Result<Value, InterpError>,
) -> Result<Value, InterpError> {
    match (a, b) {
        (Value::Composite(xs), Value::Composite(ys)) => Ok(Value::Composite(
            xs.iter()
                .zip(ys)
                .map(|(x, y)| zip2(x, y, f))
                .collect::<Result<_, _>>()?,
        )),
        (Value::Composite(xs), y) => Ok(Value::Composite(
            xs.iter().map(|x| zip2(x, y, f)).collect::<Result<_, _>>()?,
        )),
        (x, Value::Composite(ys)) => Ok(Value::Composite(
            ys.iter().map(|y| zip2(x, y, f)).collect::<Result<_, _>>()?,
        )),
        (x, y) => f(x, y),
    }
}

pub(crate) fn zip3(
    a: &Value,
    b: &Value,
    c: &Value,
    f: &mut impl FnMut(&Value, &Value, &Value) -> Result<Value, InterpError>,
) -> Result<Value, InterpError> {
    let len = [a, b, c]
        .iter()
        .filter_map(|v| match v {
            Value::Composite(items) => Some(items.len()),
            _ => None,
        })
        .max();
    match len {
        None => f(a, b, c),
        Some(n) => {
            let pick = |v: &Value, i: usize| match v {
                Value::Composite(items) => items.get(i).cloned().unwrap_or(Value::Void),
                other => other.clone(),
            };
            Ok(Value::Composite(
                (0..n)
                    .map(|i| zip3(&pick(a, i), &pick(b, i), &pick(c, i), f))
                    .collect::<Result<_, _>>()?,
            ))
        }
    }
}

pub(crate) fn map1(
    a: &Value,
    f: &mut impl FnMut(&Value) -> Result<Value, InterpError>,
) -> Result<Value, InterpError> {
    match a {
        Value::Composite(xs) => Ok(Value::Composite(
            xs.iter().map(|x| map1(x, f)).collect::<Result<_, _>>()?,
        )),
        x => f(x),
    }
}

fn float_result(like: &Value, v: f64) -> Value {
    match like {
        Value::F16(_) => Value::from_f64(Scalar::F16, v),
        Value::F64(_) => Value::F64(v),
        _ => Value::F32(v as f32),
    }
}

/// Applies an integer operation in the operand's own width and kind.
fn int_op(a: &Value, b: &Value, f: impl Fn(i64, i64, u32, bool) -> i64) -> Result<Value, InterpError> {
    let scalar = expect(a.scalar(), "binary", "scalar operand")?;
    let x = expect(a.as_i64(), "binary", "integer operand")?;
    let y = expect(b.as_i64(), "binary", "integer operand")?;
    let signed = scalar.kind == ScalarKind::Sint;
    Ok(Value::from_int(scalar, f(x, y, scalar.bits(), signed)))
}

/// Sign- or zero-extends the low `bits` of `v`.
fn extend(v: i64, bits: u32, signed: bool) -> i64 {
    if bits >= 64 {
        return v;
    }
    let shift = 64 - bits;
    if signed {
        (v << shift) >> shift
    } else {
        ((v as u64) << shift >> shift) as i64
    }
}

pub(crate) fn unary(op: UnaryOp, a: &Value) -> Result<Value, InterpError> {
    map1(a, &mut |x| {
        Ok(match (op, x) {
            (UnaryOp::LogicalNot, Value::Bool(v)) | (UnaryOp::BitwiseNot, Value::Bool(v)) => {
                Value::Bool(!v)
            }
            (UnaryOp::Negate, v) if v.as_f64().is_some() => {
                float_result(v, -v.as_f64().unwrap_or(0.0))
            }
            (UnaryOp::Negate, v) => {
                let s = expect(v.scalar(), "negate", "scalar")?;
                Value::from_int(s, expect(v.as_i64(), "negate", "integer")?.wrapping_neg())
            }
            (UnaryOp::BitwiseNot, v) => {
                let s = expect(v.scalar(), "not", "scalar")?;
                Value::from_int(s, !expect(v.as_i64(), "not", "integer")?)
            }
            (UnaryOp::LogicalNot, _) => {
                return Err(InterpError::TypeMismatch {
                    op: "logical not",
                    detail: "expected bool".into(),
                });
            }
        })
    })
}

pub(crate) fn binary(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, InterpError> {
    zip2(a, b, &mut |x, y| binary_scalar(op, x, y))
}

fn binary_scalar(op: BinaryOp, x: &Value, y: &Value) -> Result<Value, InterpError> {
    if let (Value::Bool(p), Value::Bool(q)) = (x, y) {
        let (p, q) = (*p, *q);
        return Ok(Value::Bool(match op {
            BinaryOp::LogicalAnd | BinaryOp::BitwiseAnd => p && q,
            BinaryOp::LogicalOr | BinaryOp::BitwiseOr => p || q,
            BinaryOp::BitwiseXor | BinaryOp::NotEqual => p != q,
            BinaryOp::Equal => p == q,
            _ => {
                return Err(InterpError::TypeMismatch {
                    op: "binary",
                    detail: format!("{op:?} on booleans"),
                });
            }
        }));
    }

    if let (Some(p), Some(q)) = (x.as_f64(), y.as_f64()) {
        let r = match op {
            BinaryOp::Add => p + q,
            BinaryOp::Subtract => p - q,
            BinaryOp::Multiply => p * q,
            BinaryOp::Divide => p / q,
            BinaryOp::Modulo => p % q,
            BinaryOp::Equal => return Ok(Value::Bool(p == q)),
            BinaryOp::NotEqual => return Ok(Value::Bool(p != q)),
            BinaryOp::Less => return Ok(Value::Bool(p < q)),
            BinaryOp::LessEqual => return Ok(Value::Bool(p <= q)),
            BinaryOp::Greater => return Ok(Value::Bool(p > q)),
            BinaryOp::GreaterEqual => return Ok(Value::Bool(p >= q)),
            _ => {
                return Err(InterpError::TypeMismatch {
                    op: "binary",
                    detail: format!("{op:?} on floats"),
                });
            }
        };
        // f32 arithmetic is exact when carried out in f64 and rounded once.
        return Ok(float_result(x, r));
    }

    let signed = x.scalar().map(|s| s.kind) == Some(ScalarKind::Sint);
    let cmp = |f: fn(i64, i64) -> bool, g: fn(u64, u64) -> bool| -> Result<Value, InterpError> {
        let p = expect(x.as_i64(), "compare", "integer")?;
        let q = expect(y.as_i64(), "compare", "integer")?;
        Ok(Value::Bool(if signed { f(p, q) } else { g(p as u64, q as u64) }))
    };
    match op {
        BinaryOp::Equal => cmp(|a, b| a == b, |a, b| a == b),
        BinaryOp::NotEqual => cmp(|a, b| a != b, |a, b| a != b),
        BinaryOp::Less => cmp(|a, b| a < b, |a, b| a < b),
        BinaryOp::LessEqual => cmp(|a, b| a <= b, |a, b| a <= b),
        BinaryOp::Greater => cmp(|a, b| a > b, |a, b| a > b),
        BinaryOp::GreaterEqual => cmp(|a, b| a >= b, |a, b| a >= b),
        BinaryOp::Add => int_op(x, y, |a, b, _, _| a.wrapping_add(b)),
        BinaryOp::Subtract => int_op(x, y, |a, b, _, _| a.wrapping_sub(b)),
        BinaryOp::Multiply => int_op(x, y, |a, b, _, _| a.wrapping_mul(b)),
        BinaryOp::Divide => int_op(x, y, |a, b, _, signed| {
            if b == 0 {
                0
            } else if signed {
                a.wrapping_div(b)
            } else {
                (a as u64 / b as u64) as i64
            }
        }),
        BinaryOp::Modulo => int_op(x, y, |a, b, _, signed| {
            if b == 0 {
                0
            } else if signed {
                a.wrapping_rem(b)
            } else {
                (a as u64 % b as u64) as i64
            }
        }),
        BinaryOp::BitwiseAnd => int_op(x, y, |a, b, _, _| a & b),
        BinaryOp::BitwiseOr => int_op(x, y, |a, b, _, _| a | b),
        BinaryOp::BitwiseXor => int_op(x, y, |a, b, _, _| a ^ b),
        BinaryOp::ShiftLeft => int_op(x, y, |a, b, bits, _| a.wrapping_shl((b as u32) % bits)),
        BinaryOp::ShiftRight => int_op(x, y, |a, b, bits, signed| {
            let amount = (b as u32) % bits;
            if signed {
                extend(a, bits, true) >> amount
            } else {
                (extend(a, bits, false) as u64 >> amount) as i64
            }
        }),
        BinaryOp::LogicalAnd | BinaryOp::LogicalOr => Err(InterpError::TypeMismatch {
            op: "binary",
            detail: format!("{op:?} on integers"),
        }),
    }
}

pub(crate) fn select(cond: &Value, accept: &Value, reject: &Value) -> Result<Value, InterpError> {
    match cond {
        Value::Bool(c) => Ok(if *c { accept } else { reject }.clone()),
        Value::Composite(cs) => {
            let pick = |v: &Value, i: usize| v.components().get(i).cloned().unwrap_or(Value::Void);
            Ok(Value::Composite(
                cs.iter()
                    .enumerate()
                    .map(|(i, c)| select(c, &pick(accept, i), &pick(reject, i)))
                    .collect::<Result<_, _>>()?,
            ))
        }
        _ => Err(InterpError::TypeMismatch {
            op: "select",
            detail: "condition is not boolean".into(),
        }),
    }
}

/// Largest float below 1.0 in the precision of `like`.
fn below_one(like: &Value) -> f64 {
    match like {
        Value::F16(_) => 1.0 - 2f64.powi(-11),
        Value::F64(_) => 1.0 - 2f64.powi(-53),
        _ => f64::from(f32::from_bits(0x3f7f_ffff)),
    }
}

fn is_denormal(like: &Value, v: f64) -> bool {
    let min_normal = match like {
        Value::F16(_) => 2f64.powi(-14),
        Value::F64(_) => f64::MIN_POSITIVE,
        _ => f64::from(f32::MIN_POSITIVE),
    };
    v != 0.0 && v.abs() < min_normal
}

fn class_bits(like: &Value, v: f64) -> u32 {
    if v.is_nan() {
        // Only quiet NaNs are produced by the evaluator.
        class::QUIET_NAN
    } else if v.is_infinite() {
        if v < 0.0 {
            class::NEGATIVE_INFINITY
        } else {
            class::POSITIVE_INFINITY
        }
    } else if v == 0.0 {
        if v.is_sign_negative() {
            class::NEGATIVE_ZERO
        } else {
            class::POSITIVE_ZERO
        }
    } else if is_denormal(like, v) {
        if v < 0.0 {
            class::NEGATIVE_DENORMAL
        } else {
            class::POSITIVE_DENORMAL
        }
    } else if v < 0.0 {
        class::NEGATIVE_NORMAL
    } else {
        class::POSITIVE_NORMAL
    }
}

fn frexp(v: f64) -> (f64, i32) {
    if v == 0.0 || !v.is_finite() {
        return (v, 0);
    }
    let mut exp = v.abs().log2().floor() as i32 + 1;
    let mut mant = v / 2f64.powi(exp);
    // Correct for rounding in log2 near powers of two.
    if mant.abs() >= 1.0 {
        mant /= 2.0;
        exp += 1;
    } else if mant.abs() < 0.5 {
        mant *= 2.0;
        exp -= 1;
    }
    (mant, exp)
}

fn median(a: f64, b: f64, c: f64) -> f64 {
    a.min(b).max(a.max(b).min(c))
}

/// Face index, face-space s and t, and twice the major axis magnitude of a
/// cube direction.
pub(crate) fn cube_face(x: f32, y: f32, z: f32) -> (f32, f32, f32, f32) {
    let (ax, ay, az) = (x.abs(), y.abs(), z.abs());
    if az >= ax && az >= ay {
        if z < 0.0 {
            (5.0, -x, -y, 2.0 * az)
        } else {
            (4.0, x, -y, 2.0 * az)
        }
    } else if ay >= ax {
        if y < 0.0 {
            (3.0, x, -z, 2.0 * ay)
        } else {
            (2.0, x, z, 2.0 * ay)
        }
    } else if x < 0.0 {
        (1.0, z, -y, 2.0 * ax)
    } else {
        (0.0, -z, -y, 2.0 * ax)
    }
}

pub(crate) fn math(
    fun: MathFunction,
    a: &Value,
    b: Option<&Value>,
    c: Option<&Value>,
) -> Result<Value, InterpError> {
    let void = Value::Void;
    let b = b.unwrap_or(&void);
    let c = c.unwrap_or(&void);
    match fun {
        MathFunction::CubeId | MathFunction::CubeSc | MathFunction::CubeTc | MathFunction::CubeMa => {
            let v = a.to_f32_vec();
            if v.len() < 3 {
                return Err(InterpError::TypeMismatch {
                    op: "cube",
                    detail: "expected a three-component direction".into(),
                });
            }
            let (id, sc, tc, ma) = cube_face(v[0], v[1], v[2]);
            Ok(Value::F32(match fun {
                MathFunction::CubeId => id,
                MathFunction::CubeSc => sc,
                MathFunction::CubeTc => tc,
                _ => ma,
            }))
        }
        MathFunction::CvtPkRtz => {
            let lo = expect(a.as_f32(), "cvt_pkrtz", "f32")?;
            let hi = expect(b.as_f32(), "cvt_pkrtz", "f32")?;
            let half = |v: f32| Value::F16(f16_toward_zero(v).to_f32());
            Ok(Value::Composite(vec![half(lo), half(hi)]))
        }
        _ => zip3(a, b, c, &mut |x, y, z| math_scalar(fun, x, y, z)),
    }
}

fn math_scalar(fun: MathFunction, x: &Value, y: &Value, z: &Value) -> Result<Value, InterpError> {
    if let Some(v) = x.as_f64() {
        let f = |r: f64| Ok(float_result(x, r));
        let y_f = || expect(y.as_f64(), "math", "float operand");
        let z_f = || expect(z.as_f64(), "math", "float operand");
        return match fun {
            MathFunction::Floor => f(v.floor()),
            MathFunction::Ceil => f(v.ceil()),
            MathFunction::Trunc => f(v.trunc()),
            MathFunction::Round => f(v.round_ties_even()),
            MathFunction::Fract => f((v - v.floor()).min(below_one(x))),
            MathFunction::Sqrt => f(v.sqrt()),
            MathFunction::InverseSqrt => f(1.0 / v.sqrt()),
            MathFunction::Reciprocal => f(1.0 / v),
            MathFunction::Exp2 => f(v.exp2()),
            MathFunction::Log2 => f(v.log2()),
            MathFunction::Sin => f(v.sin()),
            MathFunction::Cos => f(v.cos()),
            MathFunction::Abs => f(v.abs()),
            MathFunction::Fma => f(v.mul_add(y_f()?, z_f()?)),
            MathFunction::Min => f(v.min(y_f()?)),
            MathFunction::Max => f(v.max(y_f()?)),
            MathFunction::Med3 => f(median(v, y_f()?, z_f()?)),
            MathFunction::CopySign => f(v.copysign(y_f()?)),
            MathFunction::Ldexp => {
                let e = expect(y.as_i64(), "ldexp", "integer exponent")?;
                f(v * 2f64.powi(e.clamp(-2000, 2000) as i32))
            }
            MathFunction::FrexpMant => f(frexp(v).0),
            MathFunction::FrexpExp => Ok(Value::I32(frexp(v).1)),
            MathFunction::Class => {
                let mask = expect(y.as_u32(), "class", "u32 mask")?;
                Ok(Value::Bool(class_bits(x, v) & mask != 0))
            }
            MathFunction::Canonicalize => f(if is_denormal(x, v) { 0.0f64.copysign(v) } else { v }),
            _ => Err(InterpError::TypeMismatch {
                op: "math",
                detail: format!("{fun:?} on a float"),
            }),
        };
    }

    let scalar = expect(x.scalar(), "math", "scalar operand")?;
    let bits = scalar.bits();
    let signed = scalar.kind == ScalarKind::Sint;
    let v = expect(x.as_i64(), "math", "integer operand")?;
    let raw = (v as u64) & if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
    let int = |r: i64| Ok(Value::from_int(scalar, r));
    let y_i = || expect(y.as_i64(), "math", "integer operand");
    let z_i = || expect(z.as_i64(), "math", "integer operand");
    let ord = |p: i64, q: i64| if signed { p.cmp(&q) } else { (p as u64).cmp(&(q as u64)) };
    match fun {
        MathFunction::Abs => int(v.wrapping_abs()),
        MathFunction::Min => {
            let w = y_i()?;
            int(if ord(v, w).is_le() { v } else { w })
        }
        MathFunction::Max => {
            let w = y_i()?;
            int(if ord(v, w).is_ge() { v } else { w })
        }
        MathFunction::Med3 => {
            let mut three = [v, y_i()?, z_i()?];
            three.sort_by(|p, q| ord(*p, *q));
            int(three[1])
        }
        MathFunction::CountOneBits => int(i64::from(raw.count_ones())),
        MathFunction::ReverseBits => int((raw.reverse_bits() >> (64 - bits)) as i64),
        MathFunction::FindLsb => Ok(Value::I32(if raw == 0 {
            -1
        } else {
            raw.trailing_zeros() as i32
        })),
        MathFunction::FindMsb => Ok(Value::I32(if raw == 0 {
            -1
        } else {
            (63 - raw.leading_zeros()) as i32
        })),
        MathFunction::FindSMsb => {
            let value = extend(v, bits, true);
            let probe = if value < 0 { !value } else { value };
            Ok(Value::I32(if probe == 0 {
                -1
            } else {
                (probe.leading_zeros() - (64 - bits)) as i32
            }))
        }
        MathFunction::ExtractBits => {
            let offset = (y_i()? as u32) & 31;
            let count = (z_i()? as u32) & 31;
            if count == 0 {
                return int(0);
            }
            let width = count.min(32 - offset);
            let field = (raw >> offset) & ((1u64 << width) - 1);
            int(extend(field as i64, width, signed))
        }
        _ => Err(InterpError::TypeMismatch {
            op: "math",
            detail: format!("{fun:?} on an integer"),
        }),
    }
}

/// Numeric conversion or same-width reinterpretation to `kind`.
pub(crate) fn convert(a: &Value, kind: ScalarKind, width: Option<u8>) -> Result<Value, InterpError> {
    map1(a, &mut |x| {
        let from = expect(x.scalar(), "as", "scalar")?;
        Ok(match width {
            Some(width) => x.convert(Scalar { kind, width }),
            None => Value::from_bits(from.with_kind(kind), x.to_bits()),
        })
    })
}
