//! Fixed-point `log2`/`exp2` via an 8-bit table with linear interpolation.
//!
//! `log2(x)` takes `x` as Q16.16 (`x = 2^16 * value`) and returns `log2(value)`
//! as Q5.27. `exp2(x)` is its inverse: `x` is read as Q5.27 and the result is
//! returned as a PMFP-style `(mantissa, shift)` pair, since the reconstructed
//! value can span a far wider range than fits in a plain `u32`.
//!
//! Linear interpolation between 256 table entries gives on the order of
//! 16-18 bits of precision (not the ~22 bits a quadratic-corrected table
//! would reach) — adequate for the dB/AGC/compensation uses in this crate,
//! which operate at a few Hz to 10 Hz. See `DESIGN.md` for why the simpler
//! table was chosen here.

use crate::reciprocal::{EXP2_TABLE, LOG2_TABLE};

/// `log2(x)` for `x` in Q16.16, result in Q5.27. Saturates to `i32::MIN` for
/// `x == 0` (there is no finite fixed-point representation of `-infinity`).
pub fn log2(x: u32) -> i32 {
    if x == 0 {
        return i32::MIN;
    }

    let n = x.leading_zeros();
    let mantissa = x << n; // in [2^31, 2^32)
    let exponent = 15 - n as i32;

    let frac_bits = mantissa - 0x8000_0000;
    let idx = (frac_bits >> 23) as usize;
    let rem = frac_bits & 0x007F_FFFF;

    let low = LOG2_TABLE[idx] as i64;
    let high = LOG2_TABLE[idx + 1] as i64;
    let interp = low + (((high - low) * rem as i64) >> 23);

    ((exponent as i64) << 27)
        .saturating_add(interp)
        .clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Inverse of [`log2`]: `x` is Q5.27, result is `(mantissa, shift)` with
/// `mantissa` in `[2^31, 2^32)` such that the reconstructed Q16.16 value is
/// `mantissa * 2^shift` (a left shift for positive `shift`, a right shift
/// for negative `shift`) -- see [`crate::pmfp::denormalise`], which applies
/// exactly this convention while saturating on overflow.
pub fn exp2(x: i32) -> (u32, i32) {
    let k = x >> 27; // floor division by 2^27 (arithmetic shift)
    let rem = x.wrapping_sub(k << 27) as u32; // in [0, 2^27)

    let idx = (rem >> 19) as usize; // top 8 of 27 bits
    let weight = (rem & 0x0007_FFFF) as i64; // low 19 bits

    let low = EXP2_TABLE[idx] as i64;
    let high = EXP2_TABLE[idx + 1] as i64;
    let mantissa = (low + (((high - low) * weight) >> 19)) as u32;

    (mantissa, k - 15)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn log2_of_one_is_zero() {
        assert_eq!(log2(1 << 16), 0);
    }

    #[test]
    fn log2_of_two_is_one() {
        // value=2.0 => log2=1.0 => Q5.27 representation is 1<<27.
        assert_eq!(log2(2 << 16), 1 << 27);
    }

    proptest! {
        #[test]
        fn log2_exp2_round_trip(x in (1u32..=(1u32<<30))) {
            let l = log2(x);
            let (mantissa, shift) = exp2(l);
            // Reconstruct the Q16.16 value: mantissa * 2^shift.
            let rebuilt = if shift >= 0 {
                (mantissa as u64) << shift
            } else {
                (mantissa as u64) >> (-shift)
            };
            let relative_error = ((rebuilt as f64) - (x as f64)).abs() / (x as f64);
            prop_assert!(relative_error < 1e-4, "x={x} rebuilt={rebuilt} err={relative_error}");
        }
    }
}
