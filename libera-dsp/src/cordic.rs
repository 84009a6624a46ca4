//! Cartesian-to-polar magnitude via the CORDIC algorithm: purely integer
//! shift-and-add arithmetic, well suited to a tight per-sample loop.
//!
//! Each iteration doubles the number of correct bits (to within a constant
//! scaling factor that is not compensated for here, since only relative
//! magnitudes matter downstream): 20 iterations, the default used by the
//! conversion pipeline, is comfortably enough for the ~18-bit ADC inputs
//! this operates on.

/// Default iteration count used by the IQ-to-ABCD conversion pipeline.
pub const DEFAULT_ITERATIONS: u32 = 20;

/// Magnitude of `(x, y)`, scaled by a constant factor of roughly `1.1644`
/// that callers comparing ratios (rather than absolute magnitudes) can
/// ignore.
pub fn cordic_magnitude(x: i32, y: i32, iterations: u32) -> i32 {
    let mut x = x.unsigned_abs();
    let mut y = y.unsigned_abs();

    // Halve both operands (as unsigned values, so i32::MIN's absolute value
    // doesn't overflow) to leave headroom for the ~1.16x growth below.
    x >>= 1;
    y >>= 1;

    if y > x {
        core::mem::swap(&mut x, &mut y);
    }

    let mut x = x as i64;
    let mut y = y as i64;
    for i in 1..=iterations {
        let old_x = x;
        x += y >> i;
        y -= old_x >> i;
        y = y.abs();
    }

    x as i32
}
