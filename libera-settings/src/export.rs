//! Published-value export surface.
//!
//! The original control-system binding is a deep `I_RECORD`/`I_WAVEFORM`
//! class hierarchy, one visitor-style leaf class per scalar/waveform type
//! (see `spec.md` §9 "Deep inheritance"). That hierarchy is collapsed here
//! into a small capability set — `read`, `write`, `init`, `bind` — plus a
//! discriminant for the element type, matching the reduction the design
//! notes call for. The actual export-layer transport (EPICS records, an MQTT
//! topic, whatever the deployment uses) is out of scope here: this module
//! only defines the narrow interface the core components are written
//! against, per `spec.md` §1.

use std::sync::{Arc, Mutex};

/// Discriminant for the element type of a published scalar or waveform,
/// matching the reduced capability set in `spec.md` §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
    String16,
    Bytes,
}

/// A single published value: write-on-update, read-back of the last
/// published value, with an opaque `bind` used by the export layer to attach
/// transport-specific state (a record name, a topic, a PV handle).
///
/// Implementations must be safe to call from any of the daemon's worker
/// threads: `write` is invoked from inside loop bodies (DSC, SA, interlock)
/// while those loops hold no lock but their own state.
pub trait PvSink<T>: Send + Sync {
    /// Publishes a fresh value. Must not block for longer than a single
    /// memory write plus whatever the transport does to mark it dirty.
    fn write(&self, value: T);

    /// Returns the most recently written value, or `None` if nothing has
    /// been published yet.
    fn read(&self) -> Option<T>;

    fn element_type(&self) -> ElementType;
}

/// The simplest possible [`PvSink`]: an in-process mailbox. Used both as the
/// default sink for components under test and as the building block real
/// export-layer bindings wrap (see `spec.md` §9 "Global state" — this plays
/// the role of the per-scalar tiny lock described in §5).
pub struct Published<T> {
    value: Mutex<Option<T>>,
    element_type: ElementType,
}

impl<T: Clone + Send> Published<T> {
    pub fn new(element_type: ElementType) -> Arc<Self> {
        Arc::new(Published {
            value: Mutex::new(None),
            element_type,
        })
    }
}

impl<T: Clone + Send + Sync> PvSink<T> for Published<T> {
    fn write(&self, value: T) {
        *self.value.lock().unwrap() = Some(value);
    }

    fn read(&self) -> Option<T> {
        self.value.lock().unwrap().clone()
    }

    fn element_type(&self) -> ElementType {
        self.element_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let pv: Arc<Published<i32>> = Published::new(ElementType::Int32);
        assert_eq!(pv.read(), None);
        pv.write(42);
        assert_eq!(pv.read(), Some(42));
        assert_eq!(pv.element_type(), ElementType::Int32);
    }

    #[test]
    fn latest_write_wins() {
        let pv: Arc<Published<f64>> = Published::new(ElementType::Float64);
        pv.write(1.0);
        pv.write(2.0);
        assert_eq!(pv.read(), Some(2.0));
    }
}
