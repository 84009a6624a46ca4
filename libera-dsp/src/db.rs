//! Conversion between linear fixed-point magnitudes and dB, expressed as
//! integer micro-dB (`1 dB == 1_000_000`) to avoid floating point on the
//! hot path.

use crate::log_exp::log2;
use crate::reciprocal::{FROM_DB_Q27_PER_DB_MICRO, TO_DB_NUM, TO_DB_SHIFT};

/// `20 * log10(x)` for `x` in Q16.16, returned as micro-dB (`i32`).
///
/// `x == 0` saturates to `i32::MIN` micro-dB rather than `-infinity`.
pub fn to_db(x: u32) -> i32 {
    if x == 0 {
        return i32::MIN;
    }
    let l = log2(x) as i64; // Q5.27
    let scaled = (l * TO_DB_NUM) >> TO_DB_SHIFT;
    scaled.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Inverse of [`to_db`]: `db_micro` is micro-dB, result is a PMFP-style
/// `(mantissa, shift)` pair representing the Q16.16 linear magnitude
/// `mantissa * 2^shift` (see [`crate::pmfp::denormalise`]).
pub fn from_db(db_micro: i32) -> (u32, i32) {
    let q27 = ((db_micro as i64) * FROM_DB_Q27_PER_DB_MICRO) >> 27;
    crate::log_exp::exp2(q27.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
}
