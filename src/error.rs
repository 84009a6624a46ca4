//! Error kinds for the conditioning daemon (`spec.md` §7).
//!
//! A closed enum rather than an open-ended error crate: §7 enumerates the
//! full set of error kinds the system can produce, and every fallible
//! operation in this crate maps onto one of them. Mirrors the
//! `EmulationError` pattern used for the host-emulation board in the pack
//! (hand-rolled `Display`, `From<io::Error>`, no dynamic dispatch).

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    /// The underlying hardware read/write failed (device closed, driver
    /// gone, ioctl failed).
    DeviceUnavailable(String),
    /// The primary configuration device reports an ABI this build does not
    /// support (see `spec.md` §9: only `__EBPP_H_2` numbering is supported).
    DriverVersionMismatch(String),
    /// A caller-supplied parameter was out of range or otherwise invalid.
    InvalidParameter(String),
    /// An operation was attempted while the owning state machine was in the
    /// wrong state for it.
    SequenceError(String),
    /// Fixed-point overflow while synthesising the two-tap FIR form of a
    /// compensation coefficient.
    Overflow,
    /// A blocking wait (trigger, interlock-ready) exceeded its deadline.
    Timeout,
    /// A read returned fewer rows/bytes than requested.
    Incomplete { expected: usize, actual: usize },
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DeviceUnavailable(msg) => write!(f, "device unavailable: {msg}"),
            Error::DriverVersionMismatch(msg) => write!(f, "driver version mismatch: {msg}"),
            Error::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Error::SequenceError(msg) => write!(f, "operation out of sequence: {msg}"),
            Error::Overflow => write!(f, "fixed-point overflow"),
            Error::Timeout => write!(f, "timed out waiting for event"),
            Error::Incomplete { expected, actual } => {
                write!(f, "incomplete read: expected {expected}, got {actual}")
            }
            Error::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
