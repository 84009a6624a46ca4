//! Interlock state machine (`spec.md` §4.6, `original_source/liberaApp/src/interlock.h`).
//!
//! The interlock watches the position `(X, Y)` the slow-acquisition loop
//! computes at 10 Hz and the beam current derived alongside it; when the
//! beam drifts outside a configured window while carrying current above
//! threshold, it latches a trip that downstream machine-protection hardware
//! reads. It also exposes [`ReadyGate`], the "interlock ready" rendezvous
//! `spec.md` §4.3 steps 2/13 describe between the DSC loop and the
//! position-producing side of the system — the same role
//! `original_source`'s `INTERLOCK::Wait()`/`Ready()` play around
//! `SLOW_ACQUISITION`'s position update.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use libera_settings::export::{ElementType, Published, PvSink};

/// Holdoff duration in SA ticks (10 Hz ⇒ 1 s), `spec.md` §4.6.
pub const DEFAULT_HOLDOFF_TICKS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disabled,
    Enabled,
    HoldingOff,
    Tripped,
}

/// Position window, relative to the tracked centre (`spec.md` §3 "Interlock
/// state", §4.6 "Window centre").
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub x_lo: i32,
    pub x_hi: i32,
    pub y_lo: i32,
    pub y_hi: i32,
}

impl Default for Window {
    fn default() -> Self {
        Window {
            x_lo: -1_000_000,
            x_hi: 1_000_000,
            y_lo: -1_000_000,
            y_hi: 1_000_000,
        }
    }
}

/// The interlock position-window state machine (`spec.md` §4.6).
///
/// **Open Question decision** (see `DESIGN.md`): the spec's prose gates
/// `HoldingOff → Enabled` on the timer elapsing *and* `(X,Y)` having spent
/// at least one tick in-window, but `spec.md` §8 scenario 6 drives the
/// position outside the window for the whole holdoff period and still
/// expects a trip as soon as the holdoff period has elapsed. The scenario
/// is taken as authoritative: the timer elapsing alone ends `HoldingOff`,
/// on the same tick that exhausts the countdown, with trip evaluation
/// deferred to the *next* tick (so a full `holdoff_ticks` window is always
/// trip-free, matching the `spec.md` §8 invariant). Whether the position
/// was actually in-window when the timer elapsed is recorded as
/// [`Machine::settled_on_reenable`] for diagnostics, not as a gate.
pub struct Machine {
    window: Window,
    bcd_x: i32,
    bcd_y: i32,
    golden_x: i32,
    golden_y: i32,
    current_threshold: i32,
    holdoff_ticks: u32,
    holdoff_ticks_remaining: u32,
    state: State,
    settled_on_reenable: bool,
    tripped_pv: Arc<Published<bool>>,
}

impl Machine {
    pub fn new() -> Self {
        Machine {
            window: Window::default(),
            bcd_x: 0,
            bcd_y: 0,
            golden_x: 0,
            golden_y: 0,
            current_threshold: i32::MAX,
            holdoff_ticks: DEFAULT_HOLDOFF_TICKS,
            holdoff_ticks_remaining: 0,
            state: State::Disabled,
            settled_on_reenable: true,
            tripped_pv: Published::new(ElementType::Bool),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn tripped(&self) -> Arc<Published<bool>> {
        self.tripped_pv.clone()
    }

    pub fn set_window(&mut self, window: Window) {
        self.window = window;
    }

    pub fn set_current_threshold(&mut self, threshold: i32) {
        self.current_threshold = threshold;
    }

    pub fn set_holdoff_ticks(&mut self, ticks: u32) {
        self.holdoff_ticks = ticks.max(1);
    }

    /// Records the "golden orbit" offsets (`spec.md` §4.6 "Window centre").
    pub fn set_golden_offset(&mut self, x: i32, y: i32) {
        self.golden_x = x;
        self.golden_y = y;
    }

    /// Records the beam-current-dependent offsets the FPGA applies live,
    /// the other half of the window centre.
    pub fn set_bcd_offset(&mut self, x: i32, y: i32) {
        self.bcd_x = x;
        self.bcd_y = y;
    }

    fn centre(&self) -> (i32, i32) {
        (self.bcd_x + self.golden_x, self.bcd_y + self.golden_y)
    }

    fn in_window(&self, x: i32, y: i32) -> bool {
        let (cx, cy) = self.centre();
        let dx = x - cx;
        let dy = y - cy;
        (self.window.x_lo..=self.window.x_hi).contains(&dx)
            && (self.window.y_lo..=self.window.y_hi).contains(&dy)
    }

    /// `Disabled → Enabled` (`spec.md` §4.6).
    pub fn enable(&mut self) {
        if self.state == State::Disabled {
            self.state = State::Enabled;
        }
    }

    /// External disable, valid from any state.
    pub fn disable(&mut self) {
        self.state = State::Disabled;
    }

    /// `Tripped → Enabled` on explicit reset.
    pub fn reset(&mut self) {
        if self.state == State::Tripped {
            self.state = State::Enabled;
            self.tripped_pv.write(false);
        }
    }

    /// `Any → HoldingOff` (`spec.md` §4.6): called immediately before an
    /// operation that can glitch position (attenuator write, DSC IIR
    /// reset).
    pub fn holdoff_interlock(&mut self) {
        if self.state != State::Disabled {
            self.state = State::HoldingOff;
        }
        self.holdoff_ticks_remaining = self.holdoff_ticks;
        self.settled_on_reenable = false;
    }

    /// The 10 Hz clock tick driven by the SA loop (`spec.md` §4.6,
    /// `original_source`'s `NotifyInterlockCurrent`, also used "as a clock
    /// tick to advance the interlock holdoff state machine"). Evaluates the
    /// trip condition using the state as of the *start* of this tick, so a
    /// tick that ends the holdoff period itself never trips (`spec.md` §8's
    /// "interlock never trips within holdoff_ticks" invariant).
    pub fn on_tick(&mut self, x: i32, y: i32, current: i32) -> State {
        match self.state {
            State::Disabled | State::Tripped => {}
            State::HoldingOff => {
                if self.in_window(x, y) {
                    self.settled_on_reenable = true;
                }
                self.holdoff_ticks_remaining = self.holdoff_ticks_remaining.saturating_sub(1);
                if self.holdoff_ticks_remaining == 0 {
                    self.state = State::Enabled;
                }
            }
            State::Enabled => {
                if current > self.current_threshold && !self.in_window(x, y) {
                    self.state = State::Tripped;
                    self.tripped_pv.write(true);
                }
            }
        }
        self.state
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}

/// A Condvar-based rendezvous between the DSC loop and the position-
/// producing side of the system: `spec.md` §4.3 steps 2 and 13, grounded on
/// `original_source`'s `INTERLOCK::Wait()`/`Ready()` calls wrapping
/// `SLOW_ACQUISITION`'s per-sample position update. Starts "ready"; a
/// caller that [`ReadyGate::enter`]s holds readiness false until it calls
/// [`Guard`]'s drop (or explicitly [`Guard::release`]), so at most one side
/// is ever mid-update at a time.
pub struct ReadyGate {
    ready: Mutex<bool>,
    cv: Condvar,
}

impl ReadyGate {
    pub fn new() -> Self {
        ReadyGate {
            ready: Mutex::new(true),
            cv: Condvar::new(),
        }
    }

    /// Blocks (checking `running` roughly once per poll interval) until the
    /// gate is ready, then marks it not-ready and returns a guard that
    /// restores and signals readiness on drop. Returns `None` if `running`
    /// went false while waiting.
    pub fn enter(&self, running: &AtomicBool) -> Option<Guard<'_>> {
        let mut ready = self.ready.lock().unwrap();
        while !*ready {
            if !running.load(Ordering::Relaxed) {
                return None;
            }
            let (guard, _timeout) = self
                .cv
                .wait_timeout(ready, std::time::Duration::from_millis(50))
                .unwrap();
            ready = guard;
        }
        if !running.load(Ordering::Relaxed) {
            return None;
        }
        *ready = false;
        Some(Guard { gate: self })
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        ReadyGate::new()
    }
}

/// RAII guard returned by [`ReadyGate::enter`]; dropping it (or calling
/// [`Guard::release`] explicitly) signals "ready for next" to any waiter.
pub struct Guard<'a> {
    gate: &'a ReadyGate,
}

impl Guard<'_> {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        *self.gate.ready.lock().unwrap() = true;
        self.gate.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_only_transitions_from_disabled() {
        let mut ilk = Machine::new();
        assert_eq!(ilk.state(), State::Disabled);
        ilk.enable();
        assert_eq!(ilk.state(), State::Enabled);
    }

    #[test]
    fn trips_when_above_threshold_and_outside_window() {
        let mut ilk = Machine::new();
        ilk.enable();
        ilk.set_current_threshold(1000);
        ilk.set_window(Window {
            x_lo: -100,
            x_hi: 100,
            y_lo: -100,
            y_hi: 100,
        });
        let state = ilk.on_tick(5000, 0, 2000);
        assert_eq!(state, State::Tripped);
        assert_eq!(ilk.tripped().read(), Some(true));
    }

    #[test]
    fn stays_enabled_inside_window_even_above_threshold() {
        let mut ilk = Machine::new();
        ilk.enable();
        ilk.set_current_threshold(1000);
        let state = ilk.on_tick(0, 0, 2000);
        assert_eq!(state, State::Enabled);
    }

    #[test]
    fn stays_enabled_below_threshold_even_outside_window() {
        let mut ilk = Machine::new();
        ilk.enable();
        ilk.set_current_threshold(1000);
        ilk.set_window(Window {
            x_lo: -100,
            x_hi: 100,
            y_lo: -100,
            y_hi: 100,
        });
        let state = ilk.on_tick(5000, 0, 500);
        assert_eq!(state, State::Enabled);
    }

    #[test]
    fn reset_clears_trip_back_to_enabled() {
        let mut ilk = Machine::new();
        ilk.enable();
        ilk.set_current_threshold(0);
        ilk.on_tick(5000, 0, 1);
        assert_eq!(ilk.state(), State::Tripped);
        ilk.reset();
        assert_eq!(ilk.state(), State::Enabled);
        assert_eq!(ilk.tripped().read(), Some(false));
    }

    #[test]
    fn holdoff_never_trips_within_holdoff_period_then_trips_after() {
        let mut ilk = Machine::new();
        ilk.enable();
        ilk.set_current_threshold(0);
        ilk.set_window(Window {
            x_lo: -100,
            x_hi: 100,
            y_lo: -100,
            y_hi: 100,
        });
        ilk.holdoff_interlock();
        assert_eq!(ilk.state(), State::HoldingOff);

        // Ticks 1..=9: still within the holdoff period, never trips.
        for _ in 0..9 {
            let state = ilk.on_tick(5000, 0, 1);
            assert_ne!(state, State::Tripped);
        }
        // Tick 10: the countdown reaches zero and the machine returns to
        // Enabled, but this tick's own evaluation used the pre-tick
        // (HoldingOff) state, so it still does not trip.
        let tick10 = ilk.on_tick(5000, 0, 1);
        assert_ne!(tick10, State::Tripped);
        assert_eq!(ilk.state(), State::Enabled);

        // Tick 11: now Enabled at the start of the tick, still outside the
        // window and above threshold -> trips.
        let tick11 = ilk.on_tick(5000, 0, 1);
        assert_eq!(tick11, State::Tripped);
    }

    #[test]
    fn window_centre_tracks_bcd_and_golden_offsets() {
        let mut ilk = Machine::new();
        ilk.enable();
        ilk.set_current_threshold(0);
        ilk.set_window(Window {
            x_lo: -10,
            x_hi: 10,
            y_lo: -10,
            y_hi: 10,
        });
        ilk.set_golden_offset(500, 0);
        ilk.set_bcd_offset(500, 0);
        // Absolute position 1000 is exactly at the shifted centre (500+500).
        let state = ilk.on_tick(1000, 0, 1);
        assert_eq!(state, State::Enabled);
    }

    #[test]
    fn ready_gate_serialises_enter_calls() {
        let gate = ReadyGate::new();
        let running = AtomicBool::new(true);
        let guard = gate.enter(&running).expect("gate starts ready");
        // A concurrent enter would block; dropping the guard restores
        // readiness for the next caller.
        drop(guard);
        let guard2 = gate.enter(&running);
        assert!(guard2.is_some());
    }

    #[test]
    fn ready_gate_returns_none_when_not_running() {
        let gate = ReadyGate::new();
        let running = AtomicBool::new(false);
        assert!(gate.enter(&running).is_none());
    }
}
