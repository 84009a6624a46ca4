//! Slow-acquisition loop (`SPEC_FULL.md` §2.7,
//! `original_source/liberaApp/src/slowAcquisition.cpp`).
//!
//! Runs at the FPGA's native 10 Hz slow-acquisition rate: reads one ABCD/
//! XYQS sample straight from hardware, derives power/current/normalised
//! ABCD/max-ADC from it under the interlock rendezvous, then ticks the
//! interlock state machine and notifies the AGC of the new ADC peak.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use libera_dsp::db::to_db;
use libera_dsp::pmfp::Pmfp;

use crate::attenuator::Manager as AttenuatorManager;
use crate::convert::{abcd_to_xyqs, Calibration};
use crate::dsc::Loop as DscLoop;
use crate::error::Result;
use crate::hardware::HardwareFacade;
use crate::interlock::{Machine as InterlockMachine, ReadyGate};
use crate::waveform::{AbcdRow, XyqsRow};

/// `SCALE = 2^8 * 10^7` from `ComputeNormalisedABCD`: the normalised ABCD
/// values report button intensity as a fraction of `S`, scaled by `1e7`.
const NORMALISE_SCALE: u32 = 10_000_000;

/// Backoff between retries after a `DeviceUnavailable` read, roughly one
/// slow-acquisition sample period (`SPEC_FULL.md` §3.6).
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Snapshot of one slow-acquisition sample, as published to the rest of the
/// system (`spec.md` §4.1 table's `SA:*` rows).
#[derive(Debug, Clone, Copy, Default)]
pub struct Sample {
    pub abcd: AbcdRow,
    pub abcd_normalised: AbcdRow,
    pub xyqs: XyqsRow,
    /// Power in dBm, micro-dB units.
    pub power: i32,
    /// Current in 10*nA units (`original_source`'s `int Current`).
    pub current: i32,
    pub max_adc: i32,
}

/// `AN = 1e7 * A / S` for one button (`ComputeNormalisedABCD`), expressed as
/// a [`Pmfp`] chain rather than the original's hand-rolled shift-tracking.
fn normalise_button(value: i32, s_inv: Pmfp) -> i32 {
    let ratio = Pmfp::new(value.max(0) as u32, 0) * s_inv;
    let scaled = ratio * Pmfp::new(NORMALISE_SCALE, 0);
    scaled.denormalise() as i32
}

fn compute_normalised_abcd(abcd: &AbcdRow, s: i32) -> AbcdRow {
    if s <= 0 {
        return AbcdRow::default();
    }
    let s_inv = Pmfp::new(s as u32, 0).reciprocal();
    AbcdRow {
        a: normalise_button(abcd.a, s_inv),
        b: normalise_button(abcd.b, s_inv),
        c: normalise_button(abcd.c, s_inv),
        d: normalise_button(abcd.d, s_inv),
    }
}

/// The slow-acquisition loop's fixed calibration state
/// (`InitialisePowerAndCurrent`): `S_0`, the recorded intensity at the
/// nominal attenuation/input power point, and its reciprocal kept ready for
/// [`AttenuatorManager::compute_scaled_current`].
pub struct Loop {
    hardware: Arc<HardwareFacade>,
    attenuator: Arc<Mutex<AttenuatorManager>>,
    interlock: Arc<Mutex<InterlockMachine>>,
    dsc: Arc<Mutex<DscLoop>>,
    ready_gate: Arc<ReadyGate>,
    calibration: Calibration,
    s0_inv: Pmfp,
    p0: i32,
    last_sample: Mutex<Sample>,
}

impl Loop {
    /// `s0_sa` is the `S0SA` persistent config value: the recorded `S` level
    /// at 45 dB attenuation and 0 dBm input power. `dsc` is the compensation
    /// loop whose IIR this loop flags for reset whenever the AGC changes the
    /// attenuation (`ScWriteAttenuation` in `attenuation.cpp`/`conditioning.cpp`
    /// runs from this same call site upstream: `NotifyMaxAdc` is called from
    /// `SLOW_ACQUISITION::Thread`).
    pub fn new(
        hardware: Arc<HardwareFacade>,
        attenuator: Arc<Mutex<AttenuatorManager>>,
        interlock: Arc<Mutex<InterlockMachine>>,
        dsc: Arc<Mutex<DscLoop>>,
        ready_gate: Arc<ReadyGate>,
        calibration: Calibration,
        s0_sa: i32,
    ) -> Self {
        let a0 = attenuator.lock().unwrap().a0();
        let p0 = to_db(s0_sa.max(1) as u32) + a0;
        let s0_inv = Pmfp::new(s0_sa.max(1) as u32, 0).reciprocal();
        Loop {
            hardware,
            attenuator,
            interlock,
            dsc,
            ready_gate,
            calibration,
            s0_inv,
            p0,
            last_sample: Mutex::new(Sample::default()),
        }
    }

    pub fn last_sample(&self) -> Sample {
        *self.last_sample.lock().unwrap()
    }

    /// `PowerAndCurrentFromS`: `Power = 20*log(S) + A - P_0`, current via
    /// the attenuator manager's calibrated scaling.
    fn power_and_current(&self, s: i32) -> (i32, i32) {
        let corrected = self.attenuator.lock().unwrap().corrected();
        let power = if s > 0 {
            to_db(s as u32) + corrected - self.p0
        } else {
            i32::MIN
        };
        let current = self
            .attenuator
            .lock()
            .unwrap()
            .compute_scaled_current(self.s0_inv, s);
        (power, current)
    }

    /// One iteration of the 10 Hz loop body (`SLOW_ACQUISITION::Thread`'s
    /// per-sample work). Retries with [`RETRY_BACKOFF`] on
    /// `DeviceUnavailable` rather than propagating it, since a transient
    /// driver hiccup should not kill the whole loop; `running` lets the
    /// caller break out of a long retry stall on shutdown.
    pub fn run_once(&self, running: &AtomicBool) -> Result<Sample> {
        let (abcd, _hw_xyqs) = loop {
            match self.hardware.read_sa() {
                Ok(pair) => break pair,
                Err(crate::error::Error::DeviceUnavailable(_)) => {
                    if !running.load(Ordering::Relaxed) {
                        return Err(crate::error::Error::DeviceUnavailable(
                            "shutting down".into(),
                        ));
                    }
                    std::thread::sleep(RETRY_BACKOFF);
                }
                Err(e) => return Err(e),
            }
        };

        let guard = self
            .ready_gate
            .enter(running)
            .ok_or_else(|| crate::error::Error::DeviceUnavailable("shutting down".into()))?;

        let xyqs = abcd_to_xyqs(&abcd, &self.calibration);
        let abcd_normalised = compute_normalised_abcd(&abcd, xyqs.s);
        let (power, current) = self.power_and_current(xyqs.s);
        let max_adc = self
            .hardware
            .read_adc()?
            .iter()
            .flat_map(|row| [row.ch_a, row.ch_b, row.ch_c, row.ch_d])
            .map(i32::from)
            .max()
            .unwrap_or(0);

        guard.release();

        let sample = Sample {
            abcd,
            abcd_normalised,
            xyqs,
            power,
            current,
            max_adc,
        };
        *self.last_sample.lock().unwrap() = sample;

        self.interlock
            .lock()
            .unwrap()
            .on_tick(xyqs.x, xyqs.y, current);

        let mut hw = self.hardware.lock();
        let attenuation_changed = self
            .attenuator
            .lock()
            .unwrap()
            .on_max_adc(max_adc, &mut hw)?;
        if attenuation_changed {
            // Mirrors `ScWriteAttenuation`: hold the interlock off and flag
            // the compensation loop's IIR for a clean restart now that the
            // RF path's gain has stepped, then commit the write.
            self.interlock.lock().unwrap().holdoff_interlock();
            self.dsc.lock().unwrap().notify_attenuation_changed();
            hw.commit_dsc()?;
        }

        Ok(sample)
    }

    /// Runs until `running` is cleared (`InitialiseSlowAcquisition`'s thread
    /// loop, `SPEC_FULL.md` §2.7).
    pub fn run(&self, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            if self.run_once(running).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockBackend;
    use crate::ioctl::AdcAtom;

    #[test]
    fn normalise_button_of_quarter_share_is_quarter_of_scale() {
        let s_inv = Pmfp::new(4, 0).reciprocal();
        let an = normalise_button(1, s_inv);
        let expected = NORMALISE_SCALE / 4;
        assert!((an as i64 - expected as i64).abs() < (expected as i64 / 100).max(1));
    }

    #[test]
    fn compute_normalised_abcd_of_zero_intensity_is_zero() {
        let abcd = AbcdRow { a: 1, b: 2, c: 3, d: 4 };
        let out = compute_normalised_abcd(&abcd, 0);
        assert_eq!(out, AbcdRow::default());
    }

    #[test]
    fn run_once_ticks_interlock_and_publishes_sample() {
        let mut backend = MockBackend::new();
        backend.sa_queue.push_back((
            AbcdRow {
                a: 1_000_000,
                b: 1_000_000,
                c: 1_000_000,
                d: 1_000_000,
            },
            XyqsRow::default(),
        ));
        backend.adc_queue.push_back(vec![AdcAtom {
            ch_a: 100,
            ch_b: 200,
            ch_c: 32000,
            ch_d: 50,
        }]);
        let hw = Arc::new(HardwareFacade::new(Box::new(backend)));
        let attenuator = Arc::new(Mutex::new(AttenuatorManager::new(64)));
        let interlock = Arc::new(Mutex::new(InterlockMachine::new()));
        interlock.lock().unwrap().enable();
        let dsc = Arc::new(Mutex::new(DscLoop::new(
            crate::switching::HardwareVariant::Electron,
            0.3,
        )));
        let gate = Arc::new(ReadyGate::new());
        let sa_loop = Loop::new(
            hw,
            attenuator,
            interlock,
            dsc,
            gate,
            Calibration::default(),
            1_000_000,
        );
        let running = AtomicBool::new(true);
        let sample = sa_loop.run_once(&running).unwrap();
        assert_eq!(sample.xyqs.s, 4 * (1_000_000 >> 2));
        assert_eq!(sample.max_adc, 32000);
    }

    #[test]
    fn agc_driven_attenuation_change_holds_off_interlock_and_flags_dsc_iir() {
        let mut backend = MockBackend::new();
        backend.sa_queue.push_back((
            AbcdRow {
                a: 1_000_000,
                b: 1_000_000,
                c: 1_000_000,
                d: 1_000_000,
            },
            XyqsRow::default(),
        ));
        // Peak near full scale drives the AGC to step attenuation up.
        backend.adc_queue.push_back(vec![AdcAtom {
            ch_a: 32000,
            ch_b: 0,
            ch_c: 0,
            ch_d: 0,
        }]);
        let hw = Arc::new(HardwareFacade::new(Box::new(backend)));
        let attenuator = Arc::new(Mutex::new(AttenuatorManager::new(64)));
        attenuator.lock().unwrap().set_agc(true, 90, 60);
        let interlock = Arc::new(Mutex::new(InterlockMachine::new()));
        interlock.lock().unwrap().enable();
        let dsc = Arc::new(Mutex::new(DscLoop::new(
            crate::switching::HardwareVariant::Electron,
            0.3,
        )));
        let gate = Arc::new(ReadyGate::new());
        let sa_loop = Loop::new(
            hw,
            attenuator.clone(),
            interlock.clone(),
            dsc.clone(),
            gate,
            Calibration::default(),
            1_000_000,
        );
        let running = AtomicBool::new(true);
        sa_loop.run_once(&running).unwrap();
        assert_eq!(interlock.lock().unwrap().state(), crate::interlock::State::HoldingOff);
        assert!(dsc.lock().unwrap().take_pending_holdoff());
    }
}
