//! Arithmetic lowering.
//!
//! Transcendental functions are decomposed into the hardware primitives
//! (`exp2`, `log2`, `sqrt`, `rcp`, `sin`, `cos`) with fixed constants held as
//! `f64` bit patterns, so results do not depend on the host's float
//! environment.

use wavefront_ir::{BinaryOp, Expression, Handle, MathFunction, Scalar, ScalarKind, UnaryOp, class};

use crate::Builder;
use crate::error::BuildError;

type Value = Handle<Expression>;

const PI: u64 = 0x4009_21FB_6000_0000;
const PI_BY_TWO: u64 = 0x3FF9_21FB_6000_0000;
const PI_BY_FOUR_MINUS_ONE: u64 = 0xBFCB_7812_8000_0000;
const RECIP_LN2: u64 = 0x3FF7_1547_6000_0000;
const HALF_LN2: u64 = 0x3FD6_2E43_0000_0000;
const LN2: u64 = 0x3FE6_2E43_0000_0000;

/// Magnitude below which a value quantized to half precision becomes zero.
const F16_MIN_NORMAL_THRESHOLD: f64 = 0.000_030_517_578_125;

const ASIN_COEF_P0: u64 = 0x3FB6_293C_8000_0000;
const ASIN_COEF_P1: u64 = 0xBF9F_C635_E000_0000;
const ACOS_COEF_P0: u64 = 0x3FB4_D1B0_E000_0000;
const ACOS_COEF_P1: u64 = 0xBF98_334B_E000_0000;

/// Odd minimax polynomial for `atan` on [0, 1], lowest order first.
const ATAN_COEFS: [u64; 6] = [
    0x3FEF_FFD0_4000_0000,
    0xBFD5_49B4_0000_0000,
    0x3FC8_C608_4000_0000,
    0xBFBD_CE8B_6000_0000,
    0x3FAA_F560_4000_0000,
    0xBF88_0148_E000_0000,
];

/// Rounding of a narrowing float conversion.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RoundingMode {
    NearestEven,
    TowardZero,
}

// Helpers.
impl Builder<'_> {
    fn fconst(&mut self, like: Value, value: f64) -> Value {
        self.const_float_like(like, value)
    }

    fn fbits(&mut self, like: Value, bits: u64) -> Value {
        self.const_f64_bits(like, bits)
    }

    fn cmp(&mut self, op: BinaryOp, a: Value, b: Value) -> Value {
        self.binary(op, a, b)
    }

    /// `numerator / denominator` through the reciprocal. Denominators above
    /// 2^96 are scaled down first so the reciprocal stays normal.
    pub fn fdiv_fast(&mut self, numerator: Value, denominator: Value) -> Value {
        if self.scalar_of(denominator).width == 8 {
            return self.div(numerator, denominator);
        }
        let abs = self.math1(MathFunction::Abs, denominator);
        let big = self.fconst(denominator, 2f64.powi(96));
        let is_big = self.cmp(BinaryOp::Greater, abs, big);
        let down = self.fconst(denominator, 2f64.powi(-32));
        let one = self.fconst(denominator, 1.0);
        let scale = self.select(is_big, down, one);
        let scaled = self.mul(denominator, scale);
        let recip = self.math1(MathFunction::Reciprocal, scaled);
        let quotient = self.mul(numerator, recip);
        self.mul(quotient, scale)
    }

    /// Tests `value` against a mask of [`class`] bits.
    pub fn class_test(&mut self, value: Value, flags: u32) -> Value {
        let mask = self.const_u32(flags);
        self.math2(MathFunction::Class, value, mask)
    }

    /// Flushes denormal results to signed zero when the stage's float mode
    /// for this width flushes denormals.
    pub fn canonicalize(&mut self, value: Value) -> Value {
        let bits = self.scalar_of(value).bits();
        let stage = self.stage();
        if self.state().shader_modes(stage).denorm_mode(bits).flushes() {
            self.math1(MathFunction::Canonicalize, value)
        } else {
            value
        }
    }

    /// Replaces `result` by the first NaN among `operands`.
    fn propagate_nan(&mut self, operands: &[Value], result: Value) -> Value {
        let mut value = result;
        for &operand in operands.iter().rev() {
            let is_nan = self.create_is_nan(operand);
            value = self.select(is_nan, operand, value);
        }
        value
    }

    /// `sqrt(1 - |x|) * (π/2 + |x| * (π/4 - 1 + |x| * (p0 + |x| * p1)))`,
    /// the shared core of asin and acos.
    pub fn asin_acos_common(&mut self, x: Value, coef_p0: u64, coef_p1: u64) -> Value {
        let ax = self.math1(MathFunction::Abs, x);
        let one = self.fconst(x, 1.0);
        let p1 = self.fbits(x, coef_p1);
        let p0 = self.fbits(x, coef_p0);
        let t = self.mul(ax, p1);
        let t = self.add(t, p0);
        let t = self.mul(ax, t);
        let c = self.fbits(x, PI_BY_FOUR_MINUS_ONE);
        let t = self.add(t, c);
        let t = self.mul(ax, t);
        let c = self.fbits(x, PI_BY_TWO);
        let poly = self.add(t, c);
        let rest = self.sub(one, ax);
        let root = self.math1(MathFunction::Sqrt, rest);
        self.mul(root, poly)
    }
}

// Cube maps and conversions.
impl Builder<'_> {
    /// Face-space (s, t) coordinates in [0, 1] of a cube direction.
    pub fn create_cube_face_coord(&mut self, coord: Value) -> Result<Value, BuildError> {
        self.expect_float("cube_face_coord", coord)?;
        let sc = self.math1(MathFunction::CubeSc, coord);
        let tc = self.math1(MathFunction::CubeTc, coord);
        let ma = self.math1(MathFunction::CubeMa, coord);
        let recip = self.math1(MathFunction::Reciprocal, ma);
        let half = self.const_f32(0.5);
        let s = self.math3(MathFunction::Fma, sc, recip, half);
        let t = self.math3(MathFunction::Fma, tc, recip, half);
        Ok(self.vector_from(vec![s, t]))
    }

    /// Face index (0..5, as a float) of a cube direction.
    pub fn create_cube_face_index(&mut self, coord: Value) -> Result<Value, BuildError> {
        self.expect_float("cube_face_index", coord)?;
        Ok(self.math1(MathFunction::CubeId, coord))
    }

    /// Narrows `value` to `dest` with an explicit rounding mode.
    ///
    /// Only 32-to-16-bit narrowing has a round-toward-zero instruction;
    /// everything else converts with the default rounding.
    pub fn create_fp_trunc_with_rounding(
        &mut self,
        value: Value,
        dest: Scalar,
        rounding: RoundingMode,
    ) -> Result<Value, BuildError> {
        let from = self.expect_float("fp_trunc", value)?;
        if rounding == RoundingMode::NearestEven || from.width != 4 || dest.width != 2 {
            return Ok(self.convert(value, dest));
        }
        self.scalarize_in_pairs(value, |b, pair| {
            let lo = b.extract(pair, 0);
            let hi = b.extract(pair, 1);
            Ok(b.math2(MathFunction::CvtPkRtz, lo, hi))
        })
    }

    /// Rounds a 32-bit float to the nearest half-precision value, flushing
    /// results below the half-precision normal range to signed zero and
    /// keeping NaNs.
    pub fn create_quantize_to_fp16(&mut self, value: Value) -> Result<Value, BuildError> {
        let scalar = self.expect_float("quantize_to_fp16", value)?;
        if scalar.width != 4 {
            return Err(self.unexpected("quantize_to_fp16", "32-bit float", &self.inner_of(value)));
        }
        let half = self.create_fp_trunc_with_rounding(value, Scalar::F16, RoundingMode::TowardZero)?;
        let wide = self.convert(half, Scalar::F32);
        let abs = self.math1(MathFunction::Abs, wide);
        let threshold = self.fconst(value, F16_MIN_NORMAL_THRESHOLD);
        let tiny = self.cmp(BinaryOp::Less, abs, threshold);
        let zero = self.fconst(value, 0.0);
        let signed_zero = self.math2(MathFunction::CopySign, zero, value);
        let flushed = self.select(tiny, signed_zero, wide);
        let is_nan = self.create_is_nan(value);
        Ok(self.select(is_nan, value, flushed))
    }
}

// Modulo and fused operations.
impl Builder<'_> {
    /// Signed modulo with the sign of the divisor.
    pub fn create_smod(&mut self, dividend: Value, divisor: Value) -> Result<Value, BuildError> {
        self.expect_int("smod", dividend)?;
        let rem = self.binary(BinaryOp::Modulo, dividend, divisor);
        let zero = self.const_int_like(rem, 0);
        let nonzero = self.cmp(BinaryOp::NotEqual, rem, zero);
        let signs = self.binary(BinaryOp::BitwiseXor, rem, divisor);
        let signs = self.bitcast_kind(signs, ScalarKind::Sint);
        let szero = self.const_int_like(signs, 0);
        let differ = self.cmp(BinaryOp::Less, signs, szero);
        let fix = self.binary(BinaryOp::LogicalAnd, nonzero, differ);
        let adjusted = self.add(rem, divisor);
        Ok(self.select(fix, adjusted, rem))
    }

    /// `dividend - divisor * floor(dividend / divisor)`.
    pub fn create_fmod(&mut self, dividend: Value, divisor: Value) -> Result<Value, BuildError> {
        self.expect_float("fmod", dividend)?;
        let quotient = self.div(dividend, divisor);
        let floor = self.math1(MathFunction::Floor, quotient);
        let product = self.mul(divisor, floor);
        Ok(self.sub(dividend, product))
    }

    /// `a * b + c`, fused where the target has a fast fused multiply-add for
    /// the width.
    pub fn create_fma(&mut self, a: Value, b: Value, c: Value) -> Result<Value, BuildError> {
        let scalar = self.expect_float("fma", a)?;
        if scalar.width != 4 || self.state().target.fma_f32 {
            Ok(self.math3(MathFunction::Fma, a, b, c))
        } else {
            let product = self.mul(a, b);
            Ok(self.add(product, c))
        }
    }
}

// Trigonometry.
impl Builder<'_> {
    pub fn create_tan(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_float("tan", x)?;
        let sin = self.math1(MathFunction::Sin, x);
        let cos = self.math1(MathFunction::Cos, x);
        Ok(self.fdiv_fast(sin, cos))
    }

    /// `sign(x) * (π/2 - common(|x|))`.
    pub fn create_asin(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_float("asin", x)?;
        let common = self.asin_acos_common(x, ASIN_COEF_P0, ASIN_COEF_P1);
        let half_pi = self.fbits(x, PI_BY_TWO);
        let magnitude = self.sub(half_pi, common);
        Ok(self.math2(MathFunction::CopySign, magnitude, x))
    }

    /// `common(|x|)` for x >= 0, `π - common(|x|)` otherwise.
    pub fn create_acos(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_float("acos", x)?;
        let common = self.asin_acos_common(x, ACOS_COEF_P0, ACOS_COEF_P1);
        let pi = self.fbits(x, PI);
        let mirrored = self.sub(pi, common);
        let zero = self.fconst(x, 0.0);
        let negative = self.cmp(BinaryOp::Less, x, zero);
        Ok(self.select(negative, mirrored, common))
    }

    /// Arc tangent: reduces |x| > 1 through `atan(1/x) = π/2 - atan(x)` and
    /// evaluates an odd polynomial on [0, 1].
    pub fn create_atan(&mut self, y_over_x: Value) -> Result<Value, BuildError> {
        self.expect_float("atan", y_over_x)?;
        let x = y_over_x;
        let ax = self.math1(MathFunction::Abs, x);
        let one = self.fconst(x, 1.0);
        let invert = self.cmp(BinaryOp::Greater, ax, one);
        let recip = self.fdiv_fast(one, ax);
        let t = self.select(invert, recip, ax);
        let t2 = self.mul(t, t);

        let mut poly = self.fbits(x, ATAN_COEFS[ATAN_COEFS.len() - 1]);
        for &coef in ATAN_COEFS.iter().rev().skip(1) {
            let c = self.fbits(x, coef);
            let scaled = self.mul(poly, t2);
            poly = self.add(scaled, c);
        }
        let reduced = self.mul(t, poly);
        let half_pi = self.fbits(x, PI_BY_TWO);
        let complement = self.sub(half_pi, reduced);
        let magnitude = self.select(invert, complement, reduced);
        Ok(self.math2(MathFunction::CopySign, magnitude, x))
    }

    /// Arc tangent of `y / x` in the quadrant given by the signs of both.
    pub fn create_atan2(&mut self, y: Value, x: Value) -> Result<Value, BuildError> {
        self.expect_float("atan2", y)?;
        let ratio = self.fdiv_fast(y, x);
        let base = self.create_atan(ratio)?;

        let zero = self.fconst(x, 0.0);
        let pi = self.fbits(x, PI);
        let y_neg = self.cmp(BinaryOp::Less, y, zero);
        let neg_pi = self.neg(pi);
        let shift = self.select(y_neg, neg_pi, pi);
        let shifted = self.add(base, shift);
        let x_neg = self.cmp(BinaryOp::Less, x, zero);
        let result = self.select(x_neg, shifted, base);

        let half_pi = self.fbits(x, PI_BY_TWO);
        let vertical = self.math2(MathFunction::CopySign, half_pi, y);
        let x_zero = self.cmp(BinaryOp::Equal, x, zero);
        Ok(self.select(x_zero, vertical, result))
    }

    pub fn create_sinh(&mut self, x: Value) -> Result<Value, BuildError> {
        let (pos, neg) = self.exp_pair("sinh", x)?;
        let diff = self.sub(pos, neg);
        let half = self.fconst(x, 0.5);
        Ok(self.mul(diff, half))
    }

    pub fn create_cosh(&mut self, x: Value) -> Result<Value, BuildError> {
        let (pos, neg) = self.exp_pair("cosh", x)?;
        let sum = self.add(pos, neg);
        let half = self.fconst(x, 0.5);
        Ok(self.mul(sum, half))
    }

    /// `(e^x - e^-x) / (e^x + e^-x)` on x clamped to [-9, 9], where the
    /// result already rounds to ±1. The clamp would turn NaN into 1, so a
    /// NaN input is passed through.
    pub fn create_tanh(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_float("tanh", x)?;
        let hi = self.fconst(x, 9.0);
        let lo = self.fconst(x, -9.0);
        let clamped = self.math2(MathFunction::Min, x, hi);
        let clamped = self.math2(MathFunction::Max, clamped, lo);
        let (pos, neg) = self.exp_pair("tanh", clamped)?;
        let num = self.sub(pos, neg);
        let den = self.add(pos, neg);
        let result = self.fdiv_fast(num, den);
        Ok(self.propagate_nan(&[x], result))
    }

    /// `sign(x) * ln(|x| + sqrt(x² + 1))`.
    pub fn create_asinh(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_float("asinh", x)?;
        let ax = self.math1(MathFunction::Abs, x);
        let one = self.fconst(x, 1.0);
        let sq = self.mul(x, x);
        let sum = self.add(sq, one);
        let root = self.math1(MathFunction::Sqrt, sum);
        let arg = self.add(ax, root);
        let ln = self.create_log(arg)?;
        Ok(self.math2(MathFunction::CopySign, ln, x))
    }

    /// `ln(x + sqrt(x² - 1))`.
    pub fn create_acosh(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_float("acosh", x)?;
        let one = self.fconst(x, 1.0);
        let sq = self.mul(x, x);
        let diff = self.sub(sq, one);
        let root = self.math1(MathFunction::Sqrt, diff);
        let arg = self.add(x, root);
        self.create_log(arg)
    }

    /// `½·ln2 · log2((1 + x) / (1 - x))`.
    pub fn create_atanh(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_float("atanh", x)?;
        let one = self.fconst(x, 1.0);
        let num = self.add(one, x);
        let den = self.sub(one, x);
        let ratio = self.fdiv_fast(num, den);
        let log = self.math1(MathFunction::Log2, ratio);
        let scale = self.fbits(x, HALF_LN2);
        Ok(self.mul(log, scale))
    }

    /// `e^x` and `e^-x`.
    fn exp_pair(&mut self, op: &'static str, x: Value) -> Result<(Value, Value), BuildError> {
        self.expect_float(op, x)?;
        let pos = self.create_exp(x)?;
        let minus = self.neg(x);
        let neg = self.create_exp(minus)?;
        Ok((pos, neg))
    }
}

// Exponentials.
impl Builder<'_> {
    /// `x^y` as `exp2(y * log2(x))`; `2^y` goes straight to `exp2`.
    pub fn create_power(&mut self, x: Value, y: Value) -> Result<Value, BuildError> {
        self.expect_float("power", x)?;
        if let Expression::Literal(lit) = self.function().expressions[x] {
            if lit.as_f64() == Some(2.0) {
                return Ok(self.math1(MathFunction::Exp2, y));
            }
        }
        let log = self.math1(MathFunction::Log2, x);
        let product = self.mul(y, log);
        Ok(self.math1(MathFunction::Exp2, product))
    }

    pub fn create_exp(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_float("exp", x)?;
        let scale = self.fbits(x, RECIP_LN2);
        let scaled = self.mul(x, scale);
        Ok(self.math1(MathFunction::Exp2, scaled))
    }

    pub fn create_log(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_float("log", x)?;
        let log2 = self.math1(MathFunction::Log2, x);
        let scale = self.fbits(x, LN2);
        Ok(self.mul(log2, scale))
    }

    pub fn create_inverse_sqrt(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_float("inverse_sqrt", x)?;
        Ok(self.math1(MathFunction::InverseSqrt, x))
    }
}

// Sign, rounding and small helpers.
impl Builder<'_> {
    pub fn create_sabs(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_int("sabs", x)?;
        let x = self.bitcast_kind(x, ScalarKind::Sint);
        let negated = self.neg(x);
        Ok(self.math2(MathFunction::Max, x, negated))
    }

    /// 1.0, -1.0 or the input for zeros and NaN.
    pub fn create_fsign(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_float("fsign", x)?;
        let zero = self.fconst(x, 0.0);
        let one = self.fconst(x, 1.0);
        let minus_one = self.fconst(x, -1.0);
        let negative = self.cmp(BinaryOp::Less, x, zero);
        let inner = self.select(negative, minus_one, x);
        let positive = self.cmp(BinaryOp::Greater, x, zero);
        Ok(self.select(positive, one, inner))
    }

    pub fn create_ssign(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_int("ssign", x)?;
        let x = self.bitcast_kind(x, ScalarKind::Sint);
        let one = self.const_int_like(x, 1);
        let minus_one = self.const_int_like(x, -1);
        let upper = self.math2(MathFunction::Min, x, one);
        Ok(self.math2(MathFunction::Max, upper, minus_one))
    }

    pub fn create_fract(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_float("fract", x)?;
        Ok(self.math1(MathFunction::Fract, x))
    }

    /// Hermite interpolation `t²(3 - 2t)` with
    /// `t = clamp((x - edge0) / (edge1 - edge0), 0, 1)`.
    pub fn create_smooth_step(
        &mut self,
        edge0: Value,
        edge1: Value,
        x: Value,
    ) -> Result<Value, BuildError> {
        self.expect_float("smooth_step", x)?;
        let num = self.sub(x, edge0);
        let den = self.sub(edge1, edge0);
        let ratio = self.fdiv_fast(num, den);
        let zero = self.fconst(ratio, 0.0);
        let one = self.fconst(ratio, 1.0);
        let t = self.create_fclamp(ratio, zero, one)?;
        let two = self.fconst(t, 2.0);
        let three = self.fconst(t, 3.0);
        let twice = self.mul(two, t);
        let factor = self.sub(three, twice);
        let sq = self.mul(t, t);
        Ok(self.mul(sq, factor))
    }

    pub fn create_ldexp(&mut self, x: Value, exp: Value) -> Result<Value, BuildError> {
        self.expect_float("ldexp", x)?;
        Ok(self.math2(MathFunction::Ldexp, x, exp))
    }

    /// Mantissa in [0.5, 1) with the sign of the input.
    pub fn create_extract_significand(&mut self, value: Value) -> Result<Value, BuildError> {
        self.expect_float("extract_significand", value)?;
        Ok(self.math1(MathFunction::FrexpMant, value))
    }

    pub fn create_extract_exponent(&mut self, value: Value) -> Result<Value, BuildError> {
        self.expect_float("extract_exponent", value)?;
        Ok(self.math1(MathFunction::FrexpExp, value))
    }
}

// Vector geometry.
impl Builder<'_> {
    pub fn create_dot_product(&mut self, a: Value, b: Value) -> Result<Value, BuildError> {
        self.expect_scalar_or_vector("dot", a)?;
        if self.component_count(a) != self.component_count(b) {
            return Err(BuildError::ShapeMismatch {
                op: "dot",
                detail: format!(
                    "{} components against {}",
                    self.component_count(a),
                    self.component_count(b)
                ),
            });
        }
        let product = self.mul(a, b);
        let mut parts = self.components(product).into_iter();
        let Some(mut sum) = parts.next() else {
            return Ok(product);
        };
        for part in parts {
            sum = self.add(sum, part);
        }
        Ok(sum)
    }

    pub fn create_cross_product(&mut self, x: Value, y: Value) -> Result<Value, BuildError> {
        self.expect_float("cross", x)?;
        if self.component_count(x) != 3 || self.component_count(y) != 3 {
            return Err(BuildError::ShapeMismatch {
                op: "cross",
                detail: "operands must be three-component vectors".into(),
            });
        }
        let a = self.components(x);
        let b = self.components(y);
        let mut out = Vec::with_capacity(3);
        for i in 0..3 {
            let (j, k) = ((i + 1) % 3, (i + 2) % 3);
            let l = self.mul(a[j], b[k]);
            let r = self.mul(a[k], b[j]);
            out.push(self.sub(l, r));
        }
        Ok(self.vector_from(out))
    }

    /// `x * rsq(dot(x, x))`; a scalar normalizes to its sign.
    pub fn create_normalize_vector(&mut self, x: Value) -> Result<Value, BuildError> {
        self.expect_float("normalize", x)?;
        if !self.inner_of(x).is_vector() {
            return self.create_fsign(x);
        }
        let dot = self.create_dot_product(x, x)?;
        let rsq = self.math1(MathFunction::InverseSqrt, dot);
        Ok(self.mul(x, rsq))
    }

    /// `n` if `dot(nref, i) < 0`, else `-n`.
    pub fn create_face_forward(&mut self, n: Value, i: Value, nref: Value) -> Result<Value, BuildError> {
        let dot = self.create_dot_product(nref, i)?;
        let zero = self.fconst(dot, 0.0);
        let facing = self.cmp(BinaryOp::Less, dot, zero);
        let flipped = self.neg(n);
        Ok(self.select(facing, n, flipped))
    }

    /// `i - 2 * dot(n, i) * n`.
    pub fn create_reflect(&mut self, i: Value, n: Value) -> Result<Value, BuildError> {
        let dot = self.create_dot_product(n, i)?;
        let two = self.fconst(dot, 2.0);
        let scale = self.mul(dot, two);
        let offset = self.mul(n, scale);
        Ok(self.sub(i, offset))
    }

    /// Refraction of `i` through a surface with normal `n` and index ratio
    /// `eta`; zero on total internal reflection.
    pub fn create_refract(&mut self, i: Value, n: Value, eta: Value) -> Result<Value, BuildError> {
        let dot = self.create_dot_product(n, i)?;
        let one = self.fconst(dot, 1.0);
        let dot_sq = self.mul(dot, dot);
        let rest = self.sub(one, dot_sq);
        let eta_sq = self.mul(eta, eta);
        let scaled = self.mul(eta_sq, rest);
        let k = self.sub(one, scaled);

        let root = self.math1(MathFunction::Sqrt, k);
        let eta_dot = self.mul(eta, dot);
        let coef = self.add(eta_dot, root);
        let bent = self.mul(i, eta);
        let along = self.mul(n, coef);
        let refracted = self.sub(bent, along);

        let zero = self.fconst(dot, 0.0);
        let reflects = self.cmp(BinaryOp::Less, k, zero);
        let ty = self.type_of(i);
        let null = self.zero_value(ty);
        Ok(self.select(reflects, null, refracted))
    }
}

// Min, max and clamping.
impl Builder<'_> {
    /// `min(max(x, min_val), max_val)`; a NaN operand gives NaN, the first
    /// in operand order winning.
    pub fn create_fclamp(&mut self, x: Value, min_val: Value, max_val: Value) -> Result<Value, BuildError> {
        self.expect_float("fclamp", x)?;
        let lower = self.math2(MathFunction::Max, x, min_val);
        let clamped = self.math2(MathFunction::Min, lower, max_val);
        let clamped = self.canonicalize(clamped);
        Ok(self.propagate_nan(&[x, min_val, max_val], clamped))
    }

    pub fn create_fmin(&mut self, a: Value, b: Value) -> Result<Value, BuildError> {
        self.expect_float("fmin", a)?;
        let min = self.math2(MathFunction::Min, a, b);
        Ok(self.canonicalize(min))
    }

    pub fn create_fmax(&mut self, a: Value, b: Value) -> Result<Value, BuildError> {
        self.expect_float("fmax", a)?;
        let max = self.math2(MathFunction::Max, a, b);
        Ok(self.canonicalize(max))
    }

    pub fn create_fmin3(&mut self, a: Value, b: Value, c: Value) -> Result<Value, BuildError> {
        self.expect_float("fmin3", a)?;
        let ab = self.math2(MathFunction::Min, a, b);
        let min = self.math2(MathFunction::Min, ab, c);
        let min = self.canonicalize(min);
        Ok(self.propagate_nan(&[a, b, c], min))
    }

    pub fn create_fmax3(&mut self, a: Value, b: Value, c: Value) -> Result<Value, BuildError> {
        self.expect_float("fmax3", a)?;
        let ab = self.math2(MathFunction::Max, a, b);
        let max = self.math2(MathFunction::Max, ab, c);
        let max = self.canonicalize(max);
        Ok(self.propagate_nan(&[a, b, c], max))
    }

    pub fn create_fmid3(&mut self, a: Value, b: Value, c: Value) -> Result<Value, BuildError> {
        self.expect_float("fmid3", a)?;
        let mid = self.math3(MathFunction::Med3, a, b, c);
        let mid = self.canonicalize(mid);
        Ok(self.propagate_nan(&[a, b, c], mid))
    }

    /// `x + (y - x) * a`.
    pub fn create_fmix(&mut self, x: Value, y: Value, a: Value) -> Result<Value, BuildError> {
        self.expect_float("fmix", x)?;
        let diff = self.sub(y, x);
        self.create_fma(diff, a, x)
    }

    pub fn create_is_inf(&mut self, x: Value) -> Value {
        self.class_test(x, class::NEGATIVE_INFINITY | class::POSITIVE_INFINITY)
    }

    pub fn create_is_nan(&mut self, x: Value) -> Value {
        self.class_test(x, class::SIGNALING_NAN | class::QUIET_NAN)
    }
}

// Bit fields.
impl Builder<'_> {
    /// Replaces `count` bits of `base` at `offset` with the low bits of
    /// `insert`. A zero count leaves `base` unchanged.
    pub fn create_insert_bit_field(
        &mut self,
        base: Value,
        insert: Value,
        offset: Value,
        count: Value,
    ) -> Result<Value, BuildError> {
        self.expect_int("insert_bit_field", base)?;
        self.debug_check_bit_field("insert_bit_field", base, offset, count);
        let bits = i64::from(self.scalar_of(base).bits());
        let offset = self.convert_like(offset, base);
        let count = self.convert_like(count, base);

        let one = self.const_int_like(base, 1);
        let all = self.const_int_like(base, -1);
        let full = self.const_int_like(base, bits);
        let shifted = self.binary(BinaryOp::ShiftLeft, one, count);
        let low = self.sub(shifted, one);
        let is_full = self.cmp(BinaryOp::Equal, count, full);
        let low = self.select(is_full, all, low);
        let mask = self.binary(BinaryOp::ShiftLeft, low, offset);

        let keep_mask = self.unary(UnaryOp::BitwiseNot, mask);
        let kept = self.binary(BinaryOp::BitwiseAnd, base, keep_mask);
        let moved = self.binary(BinaryOp::ShiftLeft, insert, offset);
        let moved = self.binary(BinaryOp::BitwiseAnd, moved, mask);
        let merged = self.binary(BinaryOp::BitwiseOr, kept, moved);

        let zero = self.const_int_like(count, 0);
        let empty = self.cmp(BinaryOp::Equal, count, zero);
        Ok(self.select(empty, base, merged))
    }

    /// Extracts `count` bits at `offset`, sign-extending when `is_signed`.
    /// A zero count gives zero.
    pub fn create_extract_bit_field(
        &mut self,
        base: Value,
        offset: Value,
        count: Value,
        is_signed: bool,
    ) -> Result<Value, BuildError> {
        let scalar = self.expect_int("extract_bit_field", base)?;
        self.debug_check_bit_field("extract_bit_field", base, offset, count);
        let kind = if is_signed {
            ScalarKind::Sint
        } else {
            ScalarKind::Uint
        };
        let typed = self.bitcast_kind(base, kind);
        let field = self.math3(MathFunction::ExtractBits, typed, offset, count);
        // The primitive takes the count modulo 32.
        let count32 = self.convert_like(count, typed);
        let thirty_two = self.const_int_like(count32, 32);
        let whole = self.cmp(BinaryOp::Equal, count32, thirty_two);
        let field = self.select(whole, typed, field);
        Ok(self.bitcast_kind(field, scalar.kind))
    }

    /// Bit index, counted from bit 0, of the most significant bit that
    /// differs from the sign bit; -1 for 0 and -1.
    pub fn create_find_smsb(&mut self, value: Value) -> Result<Value, BuildError> {
        self.expect_int("find_smsb", value)?;
        let value = self.bitcast_kind(value, ScalarKind::Sint);
        let from_top = self.math1(MathFunction::FindSMsb, value);
        let minus_one = self.const_int_like(from_top, -1);
        let top = self.const_int_like(from_top, 31);
        let none = self.cmp(BinaryOp::Equal, from_top, minus_one);
        let index = self.sub(top, from_top);
        Ok(self.select(none, minus_one, index))
    }

    /// Literal offsets and counts must describe a field inside `base`.
    fn debug_check_bit_field(&self, what: &str, base: Value, offset: Value, count: Value) {
        let bits = u64::from(self.scalar_of(base).bits());
        if let (Some(offset), Some(count)) = (self.const_u32_of(offset), self.const_u32_of(count)) {
            debug_assert!(
                u64::from(offset) + u64::from(count) <= bits,
                "{what}: offset {offset} + count {count} overflows a {bits}-bit value"
            );
        }
    }

    /// `value` converted to the element type of `like`, keeping its shape.
    fn convert_like(&mut self, value: Value, like: Value) -> Value {
        let scalar = self.scalar_of(like);
        let value = self.convert(value, scalar);
        let count = self.component_count(like);
        if count > 1 && !self.inner_of(value).is_vector() {
            self.splat(value, count)
        } else {
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{Harness, approx};
    use wavefront_interp::Value;
    use wavefront_ir::{Literal, Scalar};

    #[test]
    fn fmod_takes_the_sign_of_the_divisor() {
        let pairs = [(5.5f32, 2.0f32), (-5.5, 2.0), (5.5, -2.0), (-5.5, -2.0), (1.0, 3.0)];
        let mut h = Harness::new();
        let results: Vec<_> = pairs
            .iter()
            .map(|&(a, b)| {
                let a = h.b().const_f32(a);
                let b = h.b().const_f32(b);
                h.b().create_fmod(a, b).unwrap()
            })
            .collect();
        let exec = h.run();
        for (&(a, b), r) in pairs.iter().zip(results) {
            let got = exec.lane(r, 0).and_then(Value::as_f32).unwrap();
            assert_eq!(got, a - b * (a / b).floor(), "fmod({a}, {b})");
            assert!(got == 0.0 || got.is_sign_negative() == b.is_sign_negative());
        }
    }

    #[test]
    fn smod_follows_the_divisor() {
        let mut h = Harness::new();
        let cases = [(7, 3, 1), (-7, 3, 2), (7, -3, -2), (-7, -3, -1), (6, -3, 0)];
        let results: Vec<_> = cases
            .iter()
            .map(|&(a, b, _)| {
                let a = h.b().const_i32(a);
                let b = h.b().const_i32(b);
                h.b().create_smod(a, b).unwrap()
            })
            .collect();
        let exec = h.run();
        for (&(a, b, want), r) in cases.iter().zip(results) {
            assert_eq!(exec.lane(r, 0), Some(&Value::I32(want)), "smod({a}, {b})");
        }
    }

    #[test]
    fn inverse_trig_is_close() {
        let inputs = [-0.9f32, -0.5, 0.0, 0.3, 0.75, 1.0];
        let mut h = Harness::new();
        let built: Vec<_> = inputs
            .iter()
            .map(|&x| {
                let v = h.b().const_f32(x);
                let asin = h.b().create_asin(v).unwrap();
                let acos = h.b().create_acos(v).unwrap();
                let atan = h.b().create_atan(v).unwrap();
                (asin, acos, atan)
            })
            .collect();
        let exec = h.run();
        for (&x, (asin, acos, atan)) in inputs.iter().zip(built) {
            approx(exec.lane(asin, 0), x.asin(), 1e-3);
            approx(exec.lane(acos, 0), x.acos(), 1e-3);
            approx(exec.lane(atan, 0), x.atan(), 1e-4);
        }
    }

    #[test]
    fn atan2_quadrants() {
        let cases = [(1.0f32, 1.0f32), (1.0, -1.0), (-1.0, -1.0), (-2.0, 0.5), (3.0, 0.0)];
        let mut h = Harness::new();
        let results: Vec<_> = cases
            .iter()
            .map(|&(y, x)| {
                let y = h.b().const_f32(y);
                let x = h.b().const_f32(x);
                h.b().create_atan2(y, x).unwrap()
            })
            .collect();
        let exec = h.run();
        for (&(y, x), r) in cases.iter().zip(results) {
            approx(exec.lane(r, 0), y.atan2(x), 1e-4);
        }
    }

    #[test]
    fn hyperbolics_and_logs() {
        let mut h = Harness::new();
        let x = h.b().const_f32(0.5);
        let sinh = h.b().create_sinh(x).unwrap();
        let cosh = h.b().create_cosh(x).unwrap();
        let tanh = h.b().create_tanh(x).unwrap();
        let asinh = h.b().create_asinh(x).unwrap();
        let atanh = h.b().create_atanh(x).unwrap();
        let big = h.b().const_f32(40.0);
        let tanh_big = h.b().create_tanh(big).unwrap();
        let two = h.b().const_f32(2.0);
        let acosh = h.b().create_acosh(two).unwrap();
        let three = h.b().const_f32(3.0);
        let pow = h.b().create_power(three, two).unwrap();
        let exec = h.run();
        approx(exec.lane(sinh, 0), 0.5f32.sinh(), 1e-5);
        approx(exec.lane(cosh, 0), 0.5f32.cosh(), 1e-5);
        approx(exec.lane(tanh, 0), 0.5f32.tanh(), 1e-5);
        approx(exec.lane(asinh, 0), 0.5f32.asinh(), 1e-5);
        approx(exec.lane(atanh, 0), 0.5f32.atanh(), 1e-5);
        approx(exec.lane(acosh, 0), 2f32.acosh(), 1e-5);
        approx(exec.lane(tanh_big, 0), 1.0, 1e-6);
        approx(exec.lane(pow, 0), 9.0, 1e-4);
    }

    #[test]
    fn refract_is_zero_on_total_internal_reflection() {
        let mut h = Harness::new();
        let i = h.vec3(0.8, -0.6, 0.0);
        let n = h.vec3(0.0, 1.0, 0.0);
        let eta_tir = h.b().const_f32(1.5);
        let eta_ok = h.b().const_f32(0.9);
        let tir = h.b().create_refract(i, n, eta_tir).unwrap();
        let ok = h.b().create_refract(i, n, eta_ok).unwrap();
        let exec = h.run();
        assert_eq!(exec.lane(tir, 0).unwrap().to_f32_vec(), vec![0.0, 0.0, 0.0]);

        let d = -0.6f32;
        let k = 1.0 - 0.81 * (1.0 - d * d);
        let coef = 0.9 * d + k.sqrt();
        let want = [0.9 * 0.8, 0.9 * -0.6 - coef, 0.0];
        let got = exec.lane(ok, 0).unwrap().to_f32_vec();
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-5, "{got:?} vs {want:?}");
        }
    }

    #[test]
    fn tanh_of_nan_is_nan() {
        let mut h = Harness::new();
        let nan = h.b().const_f32(f32::NAN);
        let neg = h.b().const_f32(-40.0);
        let tanh_nan = h.b().create_tanh(nan).unwrap();
        let tanh_neg = h.b().create_tanh(neg).unwrap();
        let exec = h.run();
        let got = exec.lane(tanh_nan, 0).and_then(Value::as_f32).unwrap();
        assert!(got.is_nan(), "tanh(NaN) = {got}");
        approx(exec.lane(tanh_neg, 0), -1.0, 1e-6);
    }

    #[test]
    fn clamp_propagates_the_first_nan() {
        let mut h = Harness::new();
        let nan = h.b().const_f32(f32::NAN);
        let lo = h.b().const_f32(0.0);
        let hi = h.b().const_f32(1.0);
        let x = h.b().const_f32(2.0);
        let clamped = h.b().create_fclamp(x, lo, hi).unwrap();
        let nan_x = h.b().create_fclamp(nan, lo, hi).unwrap();
        let nan_bound = h.b().create_fmax3(x, nan, hi).unwrap();
        let mid = h.b().create_fmid3(x, lo, hi).unwrap();
        let exec = h.run();
        approx(exec.lane(clamped, 0), 1.0, 0.0);
        assert!(exec.lane(nan_x, 0).and_then(Value::as_f32).unwrap().is_nan());
        assert!(exec.lane(nan_bound, 0).and_then(Value::as_f32).unwrap().is_nan());
        approx(exec.lane(mid, 0), 1.0, 0.0);
    }

    #[test]
    fn bit_fields() {
        let mut h = Harness::new();
        let base = h.b().const_u32(0xFFFF_0000);
        let insert = h.b().const_u32(0xA);
        let offset = h.b().const_u32(4);
        let count = h.b().const_u32(4);
        let zero = h.b().const_u32(0);
        let inserted = h.b().create_insert_bit_field(base, insert, offset, count).unwrap();
        let untouched = h.b().create_insert_bit_field(base, insert, offset, zero).unwrap();
        let sixteen = h.b().const_u32(16);
        let signed = h.b().create_extract_bit_field(base, sixteen, count, true).unwrap();
        let empty = h.b().create_extract_bit_field(base, sixteen, zero, false).unwrap();
        let smsb_in = h.b().literal(Literal::I32(0x00F0));
        let smsb = h.b().create_find_smsb(smsb_in).unwrap();
        let neg_in = h.b().const_i32(-1);
        let smsb_neg = h.b().create_find_smsb(neg_in).unwrap();
        let exec = h.run();
        assert_eq!(exec.lane(inserted, 0), Some(&Value::U32(0xFFFF_00A0)));
        assert_eq!(exec.lane(untouched, 0), Some(&Value::U32(0xFFFF_0000)));
        assert_eq!(exec.lane(signed, 0), Some(&Value::U32(0xFFFF_FFFF)));
        assert_eq!(exec.lane(empty, 0), Some(&Value::U32(0)));
        assert_eq!(exec.lane(smsb, 0), Some(&Value::I32(7)));
        assert_eq!(exec.lane(smsb_neg, 0), Some(&Value::I32(-1)));
    }

    #[test]
    fn full_width_fields_are_allowed() {
        let mut h = Harness::new();
        let base = h.b().const_u32(0x8000_0001);
        let zero = h.b().const_u32(0);
        let width = h.b().const_u32(32);
        let whole = h.b().create_extract_bit_field(base, zero, width, false).unwrap();
        let exec = h.run();
        assert_eq!(exec.lane(whole, 0), Some(&Value::U32(0x8000_0001)));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "overflows a 32-bit value")]
    fn inserting_past_the_top_bit_is_rejected() {
        let mut h = Harness::new();
        let base = h.b().const_u32(0);
        let insert = h.b().const_u32(1);
        let offset = h.b().const_u32(28);
        let count = h.b().const_u32(8);
        let _ = h.b().create_insert_bit_field(base, insert, offset, count);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "extract_bit_field: offset 16 + count 17")]
    fn extracting_past_the_top_bit_is_rejected() {
        let mut h = Harness::new();
        let base = h.b().const_i32(-1);
        let offset = h.b().const_u32(16);
        let count = h.b().const_u32(17);
        let _ = h.b().create_extract_bit_field(base, offset, count, true);
    }

    #[test]
    fn quantize_flushes_small_values() {
        let mut h = Harness::new();
        let small = h.b().const_f32(1e-6);
        let normal = h.b().const_f32(1.0 / 3.0);
        let q_small = h.b().create_quantize_to_fp16(small).unwrap();
        let q_normal = h.b().create_quantize_to_fp16(normal).unwrap();
        let exec = h.run();
        approx(exec.lane(q_small, 0), 0.0, 0.0);
        // 1/3 truncated to 10 mantissa bits.
        approx(exec.lane(q_normal, 0), 0.333_251_95, 0.0);
        assert_eq!(
            exec.lane(q_normal, 0).and_then(Value::scalar),
            Some(Scalar::F32)
        );
    }

    #[test]
    fn geometry() {
        let mut h = Harness::new();
        let x = h.vec3(1.0, 0.0, 0.0);
        let y = h.vec3(0.0, 1.0, 0.0);
        let cross = h.b().create_cross_product(x, y).unwrap();
        let v = h.vec3(3.0, 0.0, 4.0);
        let norm = h.b().create_normalize_vector(v).unwrap();
        let refl = h.b().create_reflect(v, y).unwrap();
        let dot = h.b().create_dot_product(v, v).unwrap();
        let exec = h.run();
        assert_eq!(exec.lane(cross, 0).unwrap().to_f32_vec(), vec![0.0, 0.0, 1.0]);
        let n = exec.lane(norm, 0).unwrap().to_f32_vec();
        assert!((n[0] - 0.6).abs() < 1e-6 && (n[2] - 0.8).abs() < 1e-6);
        assert_eq!(exec.lane(refl, 0).unwrap().to_f32_vec(), vec![3.0, 0.0, 4.0]);
        approx(exec.lane(dot, 0), 25.0, 0.0);
    }

    #[test]
    fn cube_face_coordinates() {
        let mut h = Harness::new();
        let dir = h.vec3(0.5, -0.25, -1.0);
        let coord = h.b().create_cube_face_coord(dir).unwrap();
        let face = h.b().create_cube_face_index(dir).unwrap();
        let exec = h.run();
        // -Z face: sc = -x, tc = -y, ma = 2.
        assert_eq!(exec.lane(coord, 0).unwrap().to_f32_vec(), vec![0.25, 0.625]);
        approx(exec.lane(face, 0), 5.0, 0.0);
    }
}
