//! Deterministic numerics for the beam-position conditioning pipeline.
//!
//! This crate is split by performance domain: [`mul`], [`reciprocal`],
//! [`log_exp`], [`db`], [`pmfp`] and [`cordic`] are all integer/fixed-point
//! and built to run once per sample on the IQ-to-ABCD-to-XYQS conversion
//! path; [`complex`] is plain `f64` arithmetic for the low-rate
//! compensation-matrix estimation loop, where a few Hz of update rate makes
//! the extra accuracy worth more than the cost.

pub mod complex;
pub mod cordic;
pub mod db;
pub mod log_exp;
pub mod mul;
pub mod pmfp;
pub mod reciprocal;

pub use complex::Complex;
pub use cordic::cordic_magnitude;
pub use db::{from_db, to_db};
pub use log_exp::{exp2, log2};
pub use pmfp::{denormalise, Pmfp};
pub use reciprocal::reciprocal;
