//! Trigger/event fan-out (`spec.md` §4.7, §5 "Event dispatcher").
//!
//! One thread owns the FPGA's event-mask wait loop and invokes every
//! registered handler, in ascending priority order, for each event it
//! receives. Handlers must not block for longer than the inter-event
//! interval; anything that takes longer is expected to hand its payload to a
//! [`LatestSlot`] and return immediately, letting a separate worker thread
//! pick the work up — "coalescing delivery", per §5's "Event-latest slot".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

/// The hardware event kinds the dispatch thread can see (`spec.md` §6
/// "Event bitmask"), named after `crate::ioctl::event`'s bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Interlock,
    Postmortem,
    TriggerGet,
    TriggerSet,
}

impl Event {
    /// Decodes a raw event-mask word (`crate::ioctl::event`'s bits) into the
    /// set of events it carries, in the fixed priority order this module
    /// dispatches them (`Interlock` first: it is the one event kind the core
    /// itself reacts to, ahead of the out-of-scope mode consumers'
    /// trigger/postmortem bits).
    pub fn decode_mask(mask: u32) -> Vec<Event> {
        let mut events = Vec::new();
        if mask & crate::ioctl::event::INTERLOCK != 0 {
            events.push(Event::Interlock);
        }
        if mask & crate::ioctl::event::POSTMORTEM != 0 {
            events.push(Event::Postmortem);
        }
        if mask & crate::ioctl::event::TRIGGER_GET != 0 {
            events.push(Event::TriggerGet);
        }
        if mask & crate::ioctl::event::TRIGGER_SET != 0 {
            events.push(Event::TriggerSet);
        }
        events
    }
}

type HandlerFn = Box<dyn FnMut(Event) + Send>;

/// A single registered handler: lower `priority` values run first for a
/// given event (`spec.md` §4.7 "Handlers registered with a priority").
struct Registration {
    priority: i32,
    /// Insertion order, used to keep registrations at equal priority stable
    /// rather than re-sorting them arbitrarily on every dispatch.
    sequence: u64,
    handler: HandlerFn,
}

/// Sequential, priority-ordered callback fan-out, run entirely on the
/// thread that calls [`Dispatcher::dispatch`] (`spec.md` §5 "Event
/// dispatcher ... one thread; serialises callbacks").
#[derive(Default)]
pub struct Dispatcher {
    registrations: Vec<Registration>,
    next_sequence: u64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher::default()
    }

    /// Registers `handler` to run at `priority` for every dispatched event.
    /// Handlers that only care about one event kind should match on it
    /// themselves and no-op otherwise; keeping a single fan-out list (rather
    /// than one per event kind) is what lets priority ordering span event
    /// kinds too.
    pub fn register(&mut self, priority: i32, handler: impl FnMut(Event) + Send + 'static) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.registrations.push(Registration {
            priority,
            sequence,
            handler: Box::new(handler),
        });
        self.registrations
            .sort_by_key(|r| (r.priority, r.sequence));
    }

    /// Invokes every registered handler for `event`, in priority order, on
    /// the calling thread.
    pub fn dispatch(&mut self, event: Event) {
        for registration in &mut self.registrations {
            (registration.handler)(event);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.registrations.len()
    }
}

/// A single-entry "latest value wins" coalescing mailbox (`spec.md` §4.7,
/// §5 "Event-latest slot": "a single atomic cell plus a semaphore"). A
/// publisher that calls [`LatestSlot::publish`] while a previous value is
/// still unconsumed overwrites it rather than queueing; a consumer that
/// calls [`LatestSlot::take`] blocks until a value is available.
pub struct LatestSlot<T> {
    value: Mutex<Option<T>>,
    cv: Condvar,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        LatestSlot {
            value: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    /// Publishes a fresh value, discarding whatever was previously pending.
    pub fn publish(&self, value: T) {
        *self.value.lock().unwrap() = Some(value);
        self.cv.notify_one();
    }

    /// Blocks until a value is available, then takes it, polling `running`
    /// roughly every 50ms so a worker thread can shut down promptly without
    /// a dedicated wakeup.
    pub fn take(&self, running: &AtomicBool) -> Option<T> {
        let mut guard = self.value.lock().unwrap();
        loop {
            if let Some(value) = guard.take() {
                return Some(value);
            }
            if !running.load(Ordering::Relaxed) {
                return None;
            }
            let (next, _timeout) = self
                .cv
                .wait_timeout(guard, std::time::Duration::from_millis(50))
                .unwrap();
            guard = next;
        }
    }

    /// Non-blocking variant of [`LatestSlot::take`], for a worker that polls
    /// between other duties rather than dedicating a thread to this slot.
    pub fn try_take(&self) -> Option<T> {
        self.value.lock().unwrap().take()
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        LatestSlot::new()
    }
}
