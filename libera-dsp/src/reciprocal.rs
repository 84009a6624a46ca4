//! Fixed-point reciprocal: `reciprocal(d)` returns `(invD, shift)` such that
//! `invD * d ≈ 2^shift`, with `invD` normalized into `[2^31, 2^32)` and
//! `shift` in `31..=63`. An 8-bit lookup seed is refined by two
//! Newton-Raphson passes to full 32-bit precision -- this is the one
//! routine every downstream division in the conversion pipeline is built
//! from, so its rounding has to be reproducible bit-for-bit across runs.

use crate::mul::mul_uu;

include!(concat!(env!("OUT_DIR"), "/tables.rs"));

/// Computes `(invD, shift)` with `invD * d ≈ 2^shift`, `invD` in `[2^31,
/// 2^32)`.
///
/// # Panics
/// Panics if `d == 0` — the caller is expected to have already guarded
/// against a zero divisor (e.g. zero intensity), since a reciprocal of zero
/// is a programmer error, not a runtime condition to saturate through.
pub fn reciprocal(d: u32) -> (u32, i32) {
    assert!(d != 0, "reciprocal of zero");

    let n = d.leading_zeros();
    // `d` normalized so its top bit is set: in [2^31, 2^32).
    let d_norm = d << n;
    let mut shift = 63 - n as i32;

    if d_norm == 0x8000_0000 {
        // The one-bit quotient is exact, but the general Newton-Raphson
        // iteration below overflows a 32-bit invD right at this point (it
        // would want to return 2^32). Return the exact value directly on a
        // shift one short of the general case.
        shift -= 1;
        return (d_norm, shift);
    }

    let idx = ((d_norm >> 23) & 0xFF) as usize;
    let mut x = RECIP_SEED[idx];

    // Two Newton-Raphson passes solving `1/x - d_norm = 0`:
    // `x' = x * (2 - d_norm * x)`, carried out with `x` representing
    // `2^63 * x` throughout (mul_uu(a, b) == floor(a*b / 2^32)), so each
    // pass is `x' = 2 * mul_uu(x, -mul_uu(d_norm, x))`. Each pass roughly
    // doubles the number of correct bits, taking the 8-bit seed to full
    // 32-bit precision.
    for _ in 0..2 {
        let inner = mul_uu(d_norm, x);
        x = mul_uu(x, inner.wrapping_neg()) << 1;
    }

    (x, shift)
}
