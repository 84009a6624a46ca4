//! Attenuator / AGC manager (`spec.md` §4.5, `liberaApp/attenuator.cpp`).
//!
//! Tracks `selected`/`delta`/`corrected`/`current` attenuation state in
//! micro-dB (dB × 10⁶, [`DB_SCALE`]) and a per-setting offset calibration
//! table, and runs a simple hysteresis AGC off the peak raw ADC sample.

use std::sync::Arc;

use libera_dsp::db::from_db;
use libera_dsp::pmfp::Pmfp;
use libera_settings::export::{ElementType, Published, PvSink};

use crate::error::Result;
use crate::hardware::{HardwareProxy, MAX_ATTENUATION};

pub const DB_SCALE: i32 = 1_000_000;

/// `A₀`, the nominal attenuation used as the AGC reference point
/// (`SPEC_FULL.md` §3.3): 45 dB, overridable at startup via the persistent
/// config key `A0`.
pub const NOMINAL_ATTENUATION_DB_MICRO: i32 = 45 * DB_SCALE;

fn clip_attenuation(value: i32) -> i32 {
    value.clamp(0, MAX_ATTENUATION)
}

/// Selected/delta/corrected/effective attenuation state plus AGC hysteresis
/// thresholds (`spec.md` §2.5, §4.5).
pub struct Manager {
    selected: i32,
    delta: i32,
    /// Last effective (`selected + delta`, clipped) value actually written
    /// to hardware; used to detect no-op updates.
    current: i32,
    corrected: i32,
    offsets: Vec<i32>,
    a0: i32,
    agc_enabled: bool,
    up_threshold: i32,
    down_threshold: i32,
    readback: Arc<Published<i32>>,
}

impl Manager {
    /// `offset_table_len` should cover `0..=MAX_ATTENUATION`; missing
    /// entries default to zero offset.
    pub fn new(offset_table_len: usize) -> Self {
        let mut mgr = Manager {
            selected: 0,
            delta: 0,
            current: 0,
            corrected: 0,
            offsets: vec![0; offset_table_len],
            a0: NOMINAL_ATTENUATION_DB_MICRO,
            agc_enabled: false,
            up_threshold: 90,
            down_threshold: 60,
            readback: Published::new(ElementType::Int32),
        };
        mgr.recompute_corrected();
        mgr
    }

    pub fn readback(&self) -> Arc<Published<i32>> {
        self.readback.clone()
    }

    pub fn corrected(&self) -> i32 {
        self.corrected
    }

    pub fn current(&self) -> i32 {
        self.current
    }

    pub fn set_a0(&mut self, a0_db_micro: i32) {
        self.a0 = a0_db_micro;
    }

    pub fn a0(&self) -> i32 {
        self.a0
    }

    pub fn set_agc(&mut self, enabled: bool, up_threshold: i32, down_threshold: i32) {
        self.agc_enabled = enabled;
        self.up_threshold = up_threshold;
        self.down_threshold = down_threshold;
    }

    fn offset_for(&self, effective: i32) -> i32 {
        self.offsets.get(effective as usize).copied().unwrap_or(0)
    }

    fn recompute_corrected(&mut self) {
        self.corrected = self.current * DB_SCALE + self.offset_for(self.current);
    }

    /// Applies `selected + delta` (clipped) as the new effective
    /// attenuation if it changed, writing it to hardware and publishing
    /// the readback. Returns whether anything changed.
    fn apply(&mut self, hw: &mut HardwareProxy) -> Result<bool> {
        let effective = clip_attenuation(self.selected + self.delta);
        if effective == self.current {
            return Ok(false);
        }
        self.current = effective;
        self.recompute_corrected();
        hw.write_attenuation(effective)?;
        self.readback.write(self.corrected);
        Ok(true)
    }

    pub fn set_selected(&mut self, a: i32, hw: &mut HardwareProxy) -> Result<bool> {
        self.selected = a;
        self.apply(hw)
    }

    pub fn set_delta(&mut self, d: i32, hw: &mut HardwareProxy) -> Result<bool> {
        self.delta = d;
        self.apply(hw)
    }

    pub fn set_offsets(&mut self, offsets: Vec<i32>) {
        self.offsets = offsets;
        self.recompute_corrected();
        self.readback.write(self.corrected);
    }

    /// Hysteresis AGC step driven by the peak sample of the raw ADC block
    /// (`spec.md` §4.5 `on_max_adc`). Returns whether the attenuation
    /// setting changed (the caller forwards this as an `AttenuationChanged`
    /// event).
    pub fn on_max_adc(&mut self, peak: i32, hw: &mut HardwareProxy) -> Result<bool> {
        if !self.agc_enabled {
            return Ok(false);
        }
        let percent = 100 * peak / 32768;
        if percent >= self.up_threshold {
            self.selected = clip_attenuation(self.selected + 1);
        } else if percent <= self.down_threshold {
            self.selected = clip_attenuation(self.selected - 1);
        } else {
            return Ok(false);
        }
        self.apply(hw)
    }

    /// `denormalise(intensity_scale * 10^((corrected - A₀)/20) * S)`
    /// (`spec.md` §4.5 `compute_scaled_current`): converts the raw
    /// intensity `S` into a calibrated beam current reading.
    pub fn compute_scaled_current(&self, intensity_scale: Pmfp, s: i32) -> i32 {
        let db_factor = Pmfp::from_fn(|| from_db(self.corrected - self.a0), 0);
        let sign = s.signum();
        let magnitude = Pmfp::new(s.unsigned_abs(), 0);
        let scaled = intensity_scale * db_factor * magnitude;
        sign * (scaled.denormalise() as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockBackend;
    use crate::hardware::HardwareFacade;

    fn facade() -> HardwareFacade {
        HardwareFacade::new(Box::new(MockBackend::new()))
    }

    #[test]
    fn set_selected_writes_and_publishes_on_change() {
        let hw = facade();
        let mut mgr = Manager::new(64);
        let mut proxy = hw.lock();
        let changed = mgr.set_selected(20, &mut proxy).unwrap();
        assert!(changed);
        assert_eq!(mgr.current(), 20);
        assert_eq!(mgr.corrected(), 20 * DB_SCALE);
        assert_eq!(mgr.readback().read(), Some(20 * DB_SCALE));
    }

    #[test]
    fn unchanged_effective_attenuation_is_a_no_op() {
        let hw = facade();
        let mut mgr = Manager::new(64);
        let mut proxy = hw.lock();
        assert!(mgr.set_selected(10, &mut proxy).unwrap());
        assert!(!mgr.set_selected(10, &mut proxy).unwrap());
    }

    #[test]
    fn selected_plus_delta_clips_to_valid_range() {
        let hw = facade();
        let mut mgr = Manager::new(64);
        let mut proxy = hw.lock();
        mgr.set_selected(MAX_ATTENUATION, &mut proxy).unwrap();
        mgr.set_delta(10, &mut proxy).unwrap();
        assert_eq!(mgr.current(), MAX_ATTENUATION);
    }

    #[test]
    fn offset_table_shifts_corrected_value() {
        let hw = facade();
        let mut mgr = Manager::new(64);
        let mut offsets = vec![0; 64];
        offsets[20] = 1234;
        mgr.set_offsets(offsets);
        let mut proxy = hw.lock();
        mgr.set_selected(20, &mut proxy).unwrap();
        assert_eq!(mgr.corrected(), 20 * DB_SCALE + 1234);
    }

    #[test]
    fn agc_disabled_never_adjusts_selection() {
        let hw = facade();
        let mut mgr = Manager::new(64);
        let mut proxy = hw.lock();
        mgr.set_selected(30, &mut proxy).unwrap();
        let changed = mgr.on_max_adc(32000, &mut proxy).unwrap();
        assert!(!changed);
        assert_eq!(mgr.current(), 30);
    }

    #[test]
    fn agc_steps_up_above_high_threshold() {
        let hw = facade();
        let mut mgr = Manager::new(64);
        mgr.set_agc(true, 90, 60);
        let mut proxy = hw.lock();
        mgr.set_selected(30, &mut proxy).unwrap();
        // 32000/32768 ~= 97.6%, above the 90% threshold.
        let changed = mgr.on_max_adc(32000, &mut proxy).unwrap();
        assert!(changed);
        assert_eq!(mgr.current(), 31);
    }

    #[test]
    fn agc_steps_down_below_low_threshold() {
        let hw = facade();
        let mut mgr = Manager::new(64);
        mgr.set_agc(true, 90, 60);
        let mut proxy = hw.lock();
        mgr.set_selected(30, &mut proxy).unwrap();
        let changed = mgr.on_max_adc(1000, &mut proxy).unwrap();
        assert!(changed);
        assert_eq!(mgr.current(), 29);
    }

    #[test]
    fn agc_scenario_from_spec_section_8() {
        // `spec.md` §8 scenario 5, verbatim: up=70, down=20, selected=30,
        // three independent trials from the same starting point.
        let hw = facade();
        let fresh_at_30 = |hw: &HardwareFacade| {
            let mut mgr = Manager::new(64);
            mgr.set_agc(true, 70, 20);
            let mut proxy = hw.lock();
            mgr.set_selected(30, &mut proxy).unwrap();
            mgr
        };

        // peak ~85% -> increments to 31.
        let mut mgr = fresh_at_30(&hw);
        let mut proxy = hw.lock();
        assert!(mgr.on_max_adc(28_000, &mut proxy).unwrap());
        assert_eq!(mgr.current(), 31);
        drop(proxy);

        // peak ~3% -> decrements to 29.
        let mut mgr = fresh_at_30(&hw);
        let mut proxy = hw.lock();
        assert!(mgr.on_max_adc(1_000, &mut proxy).unwrap());
        assert_eq!(mgr.current(), 29);
        drop(proxy);

        // peak ~31% -> strictly between the thresholds, unchanged.
        let mut mgr = fresh_at_30(&hw);
        let mut proxy = hw.lock();
        assert!(!mgr.on_max_adc(10_000, &mut proxy).unwrap());
        assert_eq!(mgr.current(), 30);
    }

    #[test]
    fn compute_scaled_current_at_nominal_attenuation_is_near_identity() {
        let mgr = Manager::new(64);
        // current defaults to 0, but a0 is also the nominal 45dB: override
        // current's corrected value to match a0 by construction below.
        let mut mgr = mgr;
        mgr.a0 = 0;
        mgr.corrected = 0; // 10^(0/20) == 1
        let unity = Pmfp::new(1 << 31, 0);
        let s = 1 << 20;
        let out = mgr.compute_scaled_current(unity, s);
        assert!((out as f64 - s as f64).abs() / s as f64 < 0.05);
    }
}
