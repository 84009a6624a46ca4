//! Command-line surface (`spec.md` §6 "CLI"), grounded on
//! `original_source/liberaApp/src/iocMain.cpp`'s `ProcessOptions`/
//! `ParseConfigInt`.
//!
//! The ten `-c KEY=VAL` runtime parameters are launch-time overrides the
//! original always received from its `runioc` launch script rather than
//! ever persisting; this crate keeps that distinction: they flow straight
//! into the subsystems they configure in `main.rs`, and none of them touch
//! the `libera-settings`-backed persistent store.

use std::path::PathBuf;

use clap::Parser;

/// Digital signal conditioning daemon for a beam-position-monitor front
/// end (`spec.md` §1).
#[derive(Parser, Debug)]
#[command(name = "liberad", version, about)]
pub struct Args {
    /// Writes the process id to this file on startup; removed on clean
    /// shutdown.
    #[arg(short = 'p', long = "pidfile", value_name = "PIDFILE")]
    pub pid_file: Option<PathBuf>,

    /// Run without an interactive console.
    #[arg(short = 'n', long = "non-interactive")]
    pub non_interactive: bool,

    /// Sets a runtime parameter, `KEY=VALUE`; may be repeated. Valid keys:
    /// `TT`, `TW`, `FR`, `BN`, `SC`, `HA`, `LP`, `NT`, `S0FT`, `S0SA`.
    #[arg(short = 'c', value_name = "KEY=VALUE", value_parser = parse_config_param)]
    pub config: Vec<ConfigParam>,

    /// Machine revolution frequency, in Hz.
    #[arg(short = 'f', long = "rev-freq", value_name = "HZ")]
    pub revolution_frequency: Option<f64>,

    /// Path to the persistent state file.
    #[arg(short = 's', long = "state-file", value_name = "FILE")]
    pub state_file: Option<PathBuf>,

    /// Name of the hardware device to open.
    #[arg(short = 'd', long = "device", value_name = "NAME")]
    pub device_name: Option<String>,

    /// Disable NTP status monitoring.
    #[arg(short = 'N', long = "no-ntp")]
    pub disable_ntp: bool,
}

/// One parsed `-c KEY=VALUE` runtime parameter (`ParseConfigInt`'s lookup
/// table, `spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigParam {
    /// `TT`: length of the short turn-by-turn buffer.
    TurnByTurnLength(i64),
    /// `TW`: turn-by-turn readout window length.
    TurnByTurnWindow(i64),
    /// `FR`: free-running capture window length.
    FreeRunLength(i64),
    /// `BN`: length of the /1024-decimated buffer.
    DecimatedLength(i64),
    /// `SC`: number of switch cycles read per DSC digest round.
    SwitchCycles(i64),
    /// `HA`: harmonic number (bunches per revolution).
    Harmonic(i64),
    /// `LP`: LMTD prescale factor.
    LmtdPrescale(i64),
    /// `NT`: turns (samples) per switch position.
    TurnsPerSwitch(i64),
    /// `S0FT`: S0 power-scaling reference for first-turn mode.
    S0FirstTurn(i64),
    /// `S0SA`: S0 power-scaling reference for slow-acquisition mode.
    S0SlowAcquisition(i64),
}

impl ConfigParam {
    pub fn key(&self) -> &'static str {
        match self {
            ConfigParam::TurnByTurnLength(_) => "TT",
            ConfigParam::TurnByTurnWindow(_) => "TW",
            ConfigParam::FreeRunLength(_) => "FR",
            ConfigParam::DecimatedLength(_) => "BN",
            ConfigParam::SwitchCycles(_) => "SC",
            ConfigParam::Harmonic(_) => "HA",
            ConfigParam::LmtdPrescale(_) => "LP",
            ConfigParam::TurnsPerSwitch(_) => "NT",
            ConfigParam::S0FirstTurn(_) => "S0FT",
            ConfigParam::S0SlowAcquisition(_) => "S0SA",
        }
    }

    pub fn value(&self) -> i64 {
        match *self {
            ConfigParam::TurnByTurnLength(v)
            | ConfigParam::TurnByTurnWindow(v)
            | ConfigParam::FreeRunLength(v)
            | ConfigParam::DecimatedLength(v)
            | ConfigParam::SwitchCycles(v)
            | ConfigParam::Harmonic(v)
            | ConfigParam::LmtdPrescale(v)
            | ConfigParam::TurnsPerSwitch(v)
            | ConfigParam::S0FirstTurn(v)
            | ConfigParam::S0SlowAcquisition(v) => v,
        }
    }
}

/// `clap` value parser for `-c KEY=VALUE` (`ParseConfigInt`): splits on the
/// first `=`, validates `KEY` against the known set, parses `VALUE` as a
/// signed integer.
fn parse_config_param(raw: &str) -> Result<ConfigParam, String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("ill-formed config definition: {raw:?} (expected KEY=VALUE)"))?;
    let value: i64 = value
        .trim()
        .parse()
        .map_err(|_| format!("configuration value not a number: \"{key}={value}\""))?;
    match key.trim() {
        "TT" => Ok(ConfigParam::TurnByTurnLength(value)),
        "TW" => Ok(ConfigParam::TurnByTurnWindow(value)),
        "FR" => Ok(ConfigParam::FreeRunLength(value)),
        "BN" => Ok(ConfigParam::DecimatedLength(value)),
        "SC" => Ok(ConfigParam::SwitchCycles(value)),
        "HA" => Ok(ConfigParam::Harmonic(value)),
        "LP" => Ok(ConfigParam::LmtdPrescale(value)),
        "NT" => Ok(ConfigParam::TurnsPerSwitch(value)),
        "S0FT" => Ok(ConfigParam::S0FirstTurn(value)),
        "S0SA" => Ok(ConfigParam::S0SlowAcquisition(value)),
        other => Err(format!("unknown configuration value \"{other}\"")),
    }
}
