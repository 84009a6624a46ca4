//! IQ → ABCD → XYQS conversion pipeline (`spec.md` §4.4, `liberaApp/convert.cpp`).

use libera_dsp::mul::{mul_uu, mul_us};
use libera_dsp::reciprocal::reciprocal;

use crate::ioctl::IqAtom;
use crate::waveform::{AbcdRow, XyqsRow};

/// Default CORDIC iteration count used on the conversion hot path.
pub const CORDIC_ITERATIONS: u32 = libera_dsp::cordic::DEFAULT_ITERATIONS;

/// Converts one IQ row into button amplitudes via CORDIC magnitude
/// (`spec.md` §4.4 "IQ→ABCD").
pub fn iq_to_abcd(iq: &IqAtom) -> AbcdRow {
    AbcdRow {
        a: libera_dsp::cordic_magnitude(iq.ai, iq.aq, CORDIC_ITERATIONS),
        b: libera_dsp::cordic_magnitude(iq.bi, iq.bq, CORDIC_ITERATIONS),
        c: libera_dsp::cordic_magnitude(iq.ci, iq.cq, CORDIC_ITERATIONS),
        d: libera_dsp::cordic_magnitude(iq.di, iq.dq, CORDIC_ITERATIONS),
    }
}

pub fn iq_to_abcd_rows(iq: &[IqAtom], out: &mut [AbcdRow]) {
    for (row, dst) in iq.iter().zip(out.iter_mut()) {
        *dst = iq_to_abcd(row);
    }
}

/// Beam geometry: diagonal buttons (accelerator rings) or vertical/
/// horizontal striplines (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    Diagonal,
    Vertical,
}

/// Calibration factors applied in ABCD→XYQS conversion (`spec.md` §4.4,
/// `liberaApp/convert.cpp` static state).
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    pub geometry: Geometry,
    /// Horizontal/vertical scale, nm per unit intensity ratio.
    pub k_x: i32,
    pub k_y: i32,
    pub x0: i32,
    pub y0: i32,
    pub q0: i32,
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration {
            geometry: Geometry::Diagonal,
            k_x: 10_000_000, // 10mm in nm
            k_y: 10_000_000,
            x0: 0,
            y0: 0,
            q0: 0,
        }
    }
}

const Q_SCALE: i32 = 100_000_000; // 100 * K_SCALE, K_SCALE = 1e6

/// `K * M / S` without loss of precision, realised as a chained unsigned
/// multiply against the reciprocal of `S` followed by a signed multiply
/// (`spec.md` §4.4 `delta_to_position`). `inv_s`/`shift` come from
/// [`reciprocal`] applied to `S`.
fn delta_to_position(k: i32, m: i32, inv_s: u32, shift: i32) -> i32 {
    let scaled_k = mul_uu((k as u32) << 2, inv_s);
    mul_us(scaled_k, m << (62 - shift))
}

/// Converts one ABCD row into position/intensity/skew (`spec.md` §4.4
/// "ABCD→XYQS"). `S == 0` (no beam signal) is handled as a degenerate case:
/// position collapses to the configured zero offsets rather than dividing
/// by zero.
pub fn abcd_to_xyqs(abcd: &AbcdRow, cal: &Calibration) -> XyqsRow {
    let a = abcd.a >> 2;
    let b = abcd.b >> 2;
    let c = abcd.c >> 2;
    let d = abcd.d >> 2;
    let s = a + b + c + d;

    if s <= 0 {
        return XyqsRow {
            x: -cal.x0,
            y: -cal.y0,
            q: -cal.q0,
            s: 0,
        };
    }

    let (inv_s, shift) = reciprocal(s as u32);

    let (dx, dy) = match cal.geometry {
        Geometry::Diagonal => (
            delta_to_position(cal.k_x, a - b - c + d, inv_s, shift),
            delta_to_position(cal.k_y, a + b - c - d, inv_s, shift),
        ),
        Geometry::Vertical => (
            delta_to_position(cal.k_x, d - b, inv_s, shift) << 1,
            delta_to_position(cal.k_y, a - c, inv_s, shift) << 1,
        ),
    };
    let q = delta_to_position(Q_SCALE, a - b + c - d, inv_s, shift);

    XyqsRow {
        x: dx - cal.x0,
        y: dy - cal.y0,
        q: q - cal.q0,
        s,
    }
}

pub fn abcd_to_xyqs_rows(abcd: &[AbcdRow], cal: &Calibration, out: &mut [XyqsRow]) {
    for (row, dst) in abcd.iter().zip(out.iter_mut()) {
        *dst = abcd_to_xyqs(row, cal);
    }
}

/// Per-RF-channel gain correction applied before the demultiplexing
/// permutation (`spec.md` §4.4 "Gain correction"): `out = (gain * x) >> 30`,
/// `gain` Q30-scaled and expected `<= 2^30` (an attenuating factor, never
/// amplifying).
pub fn gain_correct(gain: i32, value: i32) -> i32 {
    (((gain as i64) * (value as i64)) >> 30) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iq_to_abcd_recovers_magnitude_within_cordic_gain() {
        // 3-4-5 triangle scaled up to keep precision in the fixed-point path.
        let iq = IqAtom {
            ai: 300_000,
            aq: 400_000,
            bi: 1_300_000,
            bq: 0,
            ci: 0,
            cq: 0,
            di: 2_500_000,
            dq: 0,
        };
        let abcd = iq_to_abcd(&iq);
        const GAIN: f64 = 1.164_435_3 / 2.0;
        assert!((abcd.a as f64 / GAIN - 500_000.0).abs() / 500_000.0 < 0.05);
        assert!((abcd.b as f64 / GAIN - 1_300_000.0).abs() / 1_300_000.0 < 0.05);
        assert_eq!(abcd.c, 0);
        assert!((abcd.d as f64 / GAIN - 2_500_000.0).abs() / 2_500_000.0 < 0.05);
    }

    #[test]
    fn centred_beam_reports_zero_minus_offsets() {
        let abcd = AbcdRow {
            a: 1_000_000,
            b: 1_000_000,
            c: 1_000_000,
            d: 1_000_000,
        };
        let cal = Calibration {
            x0: 17,
            y0: -23,
            q0: 5,
            ..Default::default()
        };
        let xyqs = abcd_to_xyqs(&abcd, &cal);
        assert_eq!(xyqs.x, -17);
        assert_eq!(xyqs.y, 23);
        assert_eq!(xyqs.q, -5);
        assert_eq!(xyqs.s, 4 * (1_000_000 >> 2));
    }

    #[test]
    fn zero_intensity_does_not_panic() {
        let abcd = AbcdRow::default();
        let cal = Calibration::default();
        let xyqs = abcd_to_xyqs(&abcd, &cal);
        assert_eq!(xyqs.s, 0);
    }

    #[test]
    fn offset_beam_moves_x_in_diagonal_geometry() {
        // D is larger than B, A=C: beam displaced toward D/A edge.
        let abcd = AbcdRow {
            a: 1_100_000,
            b: 900_000,
            c: 900_000,
            d: 1_100_000,
        };
        let cal = Calibration::default();
        let xyqs = abcd_to_xyqs(&abcd, &cal);
        assert!(xyqs.x > 0);
    }

    #[test]
    fn gain_correct_unity_is_identity() {
        assert_eq!(gain_correct(1 << 30, 12345), 12345);
    }

    #[test]
    fn gain_correct_half_halves_value() {
        assert_eq!(gain_correct(1 << 29, 1 << 20), 1 << 19);
    }
}
