//! Typed row-oriented waveform containers (`spec.md` §2.3, §3).
//!
//! A single generic buffer type parameterised over the row type backs the
//! IQ, ABCD and XYQS waveforms: all three share the same
//! `{max_size, current_length, active_length, data, timestamp}` shape and
//! capture-from-source semantics, differing only in row layout. This
//! mirrors the `WAVEFORMS<T>` template in `liberaApp/waveform.h`, reduced
//! from its EPICS-binding form to the plain container `spec.md` describes.

use crate::ioctl::{IqAtom, Timestamp};

/// Four signed button intensities, `0 <= X < 2^31` after CORDIC conversion
/// (`spec.md` §3 "ABCD row").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbcdRow {
    pub a: i32,
    pub b: i32,
    pub c: i32,
    pub d: i32,
}

/// Position coordinates in nanometres plus intensity, `S >= 0` (`spec.md`
/// §3 "XYQS row").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XyqsRow {
    pub x: i32,
    pub y: i32,
    pub q: i32,
    pub s: i32,
}

/// A reusable, row-oriented waveform buffer.
///
/// `active_length` tracks how many of the first `current_length` rows
/// actually hold freshly captured data; it may only be advanced by the
/// component that performs the capture (`spec.md` §3 "Waveform buffer"
/// invariant). `current_length` is the logical size in force (it can be
/// smaller than `max_size` when a capture requests fewer rows than the
/// buffer's capacity).
pub struct Waveform<T> {
    max_size: usize,
    current_length: usize,
    active_length: usize,
    data: Vec<T>,
    timestamp: Timestamp,
}

impl<T: Copy + Default> Waveform<T> {
    pub fn new(max_size: usize) -> Self {
        Waveform {
            max_size,
            current_length: max_size,
            active_length: 0,
            data: vec![T::default(); max_size],
            timestamp: Timestamp::default(),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn current_length(&self) -> usize {
        self.current_length
    }

    pub fn active_length(&self) -> usize {
        self.active_length
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Sets the logical length of the buffer in force for the next capture.
    /// Clamped to `max_size`; shrinking also clamps any existing
    /// `active_length`.
    pub fn set_current_length(&mut self, length: usize) {
        self.current_length = length.min(self.max_size);
        self.active_length = self.active_length.min(self.current_length);
    }

    /// A read-only view over the currently active rows.
    pub fn active(&self) -> &[T] {
        &self.data[..self.active_length]
    }

    /// Captures `rows` into the buffer, truncating to `current_length` and
    /// recording `timestamp`. This is the only way `active_length` advances,
    /// per the ownership invariant in `spec.md` §3.
    pub fn capture(&mut self, rows: &[T], timestamp: Timestamp) {
        let n = rows.len().min(self.current_length);
        self.data[..n].copy_from_slice(&rows[..n]);
        self.active_length = n;
        self.timestamp = timestamp;
    }

    /// Direct mutable access to the full backing store, for callers (such as
    /// the DSC loop) that read hardware data straight into the buffer rather
    /// than building a `Vec` first. The caller is responsible for calling
    /// [`Waveform::mark_captured`] afterwards.
    pub fn raw_mut(&mut self) -> &mut [T] {
        &mut self.data[..self.current_length]
    }

    pub fn mark_captured(&mut self, active_length: usize, timestamp: Timestamp) {
        self.active_length = active_length.min(self.current_length);
        self.timestamp = timestamp;
    }
}

/// A single column (e.g. all `A` values) of a row buffer, as a read-only
/// view built by a caller-supplied projection.
pub fn column_view<T, U>(rows: &[T], project: impl Fn(&T) -> U) -> Vec<U> {
    rows.iter().map(project).collect()
}

pub type IqWaveform = Waveform<IqAtom>;
pub type AbcdWaveform = Waveform<AbcdRow>;
pub type XyqsWaveform = Waveform<XyqsRow>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffer_has_zero_active_length() {
        let w: IqWaveform = Waveform::new(2048);
        assert_eq!(w.max_size(), 2048);
        assert_eq!(w.current_length(), 2048);
        assert_eq!(w.active_length(), 0);
        assert!(w.active().is_empty());
    }

    #[test]
    fn capture_sets_active_length_and_timestamp() {
        let mut w: AbcdWaveform = Waveform::new(4);
        let rows = [
            AbcdRow {
                a: 1,
                b: 2,
                c: 3,
                d: 4,
            },
            AbcdRow {
                a: 5,
                b: 6,
                c: 7,
                d: 8,
            },
        ];
        let ts = Timestamp {
            system_time_ns: 123,
            machine_time_ticks: 456,
        };
        w.capture(&rows, ts);
        assert_eq!(w.active_length(), 2);
        assert_eq!(w.active(), &rows);
        assert_eq!(w.timestamp(), ts);
    }

    #[test]
    fn capture_truncates_to_current_length() {
        let mut w: AbcdWaveform = Waveform::new(4);
        w.set_current_length(2);
        let rows = vec![AbcdRow::default(); 4];
        w.capture(&rows, Timestamp::default());
        assert_eq!(w.active_length(), 2);
    }

    #[test]
    fn shrinking_current_length_clamps_active_length() {
        let mut w: AbcdWaveform = Waveform::new(4);
        w.capture(&vec![AbcdRow::default(); 4], Timestamp::default());
        assert_eq!(w.active_length(), 4);
        w.set_current_length(1);
        assert_eq!(w.active_length(), 1);
    }

    #[test]
    fn column_view_projects_a_field() {
        let rows = vec![
            AbcdRow {
                a: 1,
                b: 0,
                c: 0,
                d: 0,
            },
            AbcdRow {
                a: 2,
                b: 0,
                c: 0,
                d: 0,
            },
        ];
        let a_column = column_view(&rows, |r| r.a);
        assert_eq!(a_column, vec![1, 2]);
    }
}
