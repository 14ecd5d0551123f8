//! Half-precision narrowing that `half` does not provide.

use half::f16;

/// `value` narrowed to binary16, rounding toward zero instead of to the
/// nearest value. Out-of-range magnitudes saturate to the largest finite
/// half; NaN and infinities pass through.
pub fn f16_toward_zero(value: f32) -> f16 {
    let nearest = f16::from_f32(value);
    if !value.is_finite() || nearest.to_f32().abs() <= value.abs() {
        return nearest;
    }
    // Nearest rounded away from zero. Half magnitudes order like their
    // bit patterns, so the previous pattern is one step toward zero.
    f16::from_bits(nearest.to_bits() - 1)
}
