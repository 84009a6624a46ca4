//! Driver ioctl codes, event bitmask, configuration keys and on-the-wire
//! atom layouts, preserved bit-exactly from the hardware driver ABI (see
//! `spec.md` §6 and §9).
//!
//! Two incompatible ABI generations exist upstream, selected by a build flag
//! that reshuffles several of these codes. Per the Open Question resolution
//! in `DESIGN.md`, this module implements only the later (`EBPP_H_2`)
//! numbering; there is no feature flag to select the earlier one.

#![allow(dead_code)]

/// Event bitmask bits (`spec.md` §6 "Event bitmask").
pub mod event {
    pub const INTERLOCK: u32 = 1 << 3;
    pub const POSTMORTEM: u32 = 1 << 4;
    pub const TRIGGER_GET: u32 = 1 << 6;
    pub const TRIGGER_SET: u32 = 1 << 7;
}

/// Configuration key codes for `read_config`/`write_config` (`spec.md` §6
/// "Configuration keys"). These are EBPP_H_2 numbers; see the module
/// doc-comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ConfigKey {
    TrigMode = 0,
    McPll = 1,
    ScPll = 2,
    XOffset = 128,
    YOffset = 129,
    Kx = 131,
    Ky = 132,
    IlkXLow = 133,
    IlkXHigh = 134,
    IlkYLow = 135,
    IlkYHigh = 136,
    IlkMode = 137,
    IlkOverflowLimit = 138,
    IlkOverflowDuration = 139,
    IlkGainLimit = 140,
    SrEnable = 148,
    SrAveragingStop = 150,
    SrAverageWindow = 151,
    SrStart = 152,
    SrWindow = 153,
    PmOffset = 163,
}

/// One `(AI, AQ, BI, BQ, CI, CQ, DI, DQ)` row of the decimated turn-by-turn
/// IQ stream (`spec.md` §6 "Atom layouts", `libera_atom_dd_t`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct IqAtom {
    pub ai: i32,
    pub aq: i32,
    pub bi: i32,
    pub bq: i32,
    pub ci: i32,
    pub cq: i32,
    pub di: i32,
    pub dq: i32,
}

impl IqAtom {
    /// Raw field access in on-wire order, for the switch-marker scan and
    /// digest loops that index by button/I-Q rather than by name.
    pub fn as_array(&self) -> [i32; 8] {
        [
            self.ai, self.aq, self.bi, self.bq, self.ci, self.cq, self.di, self.dq,
        ]
    }

    /// The switch-transition marker bit: the LSB of the I sample for button
    /// A (`spec.md` §4.3 step 4).
    pub fn switch_marker(&self) -> bool {
        self.ai & 1 == 1
    }
}

/// One raw 4-channel ADC sample, in `ChD, ChC, ChB, ChA` order — the reverse
/// of ABCD (`spec.md` §6, `libera_atom_adc_t`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct AdcAtom {
    pub ch_d: i16,
    pub ch_c: i16,
    pub ch_b: i16,
    pub ch_a: i16,
}

/// One slow-acquisition atom: 4 button amplitudes, 4 synthetic
/// `{S, Q, X, Y}` values, 2 feedback values, 6 reserved words (`spec.md`
/// §6, `libera_atom_sa_t`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SaAtom {
    pub va: i32,
    pub vb: i32,
    pub vc: i32,
    pub vd: i32,
    pub sum: i32,
    pub q: i32,
    pub x: i32,
    pub y: i32,
    pub cx: i32,
    pub cy: i32,
    pub reserved: [i32; 6],
}

/// Machine-time/system-time timestamp pair (`spec.md` §3 "Timestamp").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub system_time_ns: u64,
    pub machine_time_ticks: u64,
}
