//! Instrument Capabilities
//!
//! Capability traits the sweep controller drives. A tunable laser mainframe
//! implements [`LaserDevice`]; an optical power meter implements [`PowerMeter`].
//! Real drivers, the simulation and the degraded `Unavailable` device all sit
//! behind these same traits.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Addresses laser channels by slot number
//!
//! Callers decide what a failure means. The sweep controller never aborts on a
//! device error; it substitutes a sentinel reading (see [`crate::hardware::sentinel`]).
//!
//! # Example
//!
//! ```rust,ignore
//! async fn park<L: LaserDevice + ?Sized>(laser: &L, slot: u8) -> Result<()> {
//!     laser.set_sweep_state(slot, SweepAction::Stop).await?;
//!     laser.set_output(slot, false).await
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::SweepConfig;

/// Laser sweep engine mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SweepMode {
    /// Continuous sweep at constant speed
    #[default]
    Continuous,
    /// Stepped sweep with a dwell per step
    Step,
}

impl SweepMode {
    /// Mnemonic used on the instrument bus
    pub fn scpi_token(self) -> &'static str {
        match self {
            SweepMode::Continuous => "CONT",
            SweepMode::Step => "STEP",
        }
    }
}

/// Sweep engine command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    /// Halt the sweep
    Stop,
    /// Launch the sweep
    Start,
    /// Pause a stepped sweep
    PauseStepped,
    /// Resume a paused stepped sweep
    ContinueStepped,
}

impl SweepAction {
    /// Numeric state code, in the order the sweep engine enumerates them
    pub fn code(self) -> u8 {
        match self {
            SweepAction::Stop => 0,
            SweepAction::Start => 1,
            SweepAction::PauseStepped => 2,
            SweepAction::ContinueStepped => 3,
        }
    }
}

impl fmt::Display for SweepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepAction::Stop => write!(f, "Stop"),
            SweepAction::Start => write!(f, "Start"),
            SweepAction::PauseStepped => write!(f, "Pause (Stepped)"),
            SweepAction::ContinueStepped => write!(f, "Continue (Stepped)"),
        }
    }
}

/// Parameters loaded into the laser's sweep engine before launch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepParameters {
    /// Sweep mode
    pub mode: SweepMode,
    /// Start wavelength (nm)
    pub start_nm: f64,
    /// Stop wavelength (nm)
    pub stop_nm: f64,
    /// Step size (nm)
    pub step_nm: f64,
    /// Repetitions executed by the laser itself
    pub cycles: u32,
    /// Dwell per step (ms)
    pub dwell_ms: u32,
    /// Sweep speed (nm/s)
    pub speed_nm_per_s: f64,
}

impl SweepParameters {
    /// Single-repetition parameters for one controller cycle.
    ///
    /// The controller repeats cycles itself, so the laser is always asked for one.
    pub fn single_cycle(config: &SweepConfig) -> Self {
        Self {
            mode: config.mode,
            start_nm: config.start_nm,
            stop_nm: config.stop_nm,
            step_nm: config.step_nm,
            cycles: 1,
            dwell_ms: config.dwell_ms,
            speed_nm_per_s: config.speed_nm_per_s,
        }
    }
}

/// Capability: Tunable Laser Source
///
/// Multi-slot laser mainframes with a built-in sweep engine.
///
/// # Contract
/// - Wavelengths are in nanometres
/// - `configure_sweep` only loads parameters; nothing moves until `Start`
/// - `wavelength` during a sweep returns the instantaneous value
#[async_trait]
pub trait LaserDevice: Send + Sync {
    /// Current wavelength of `slot` in nm
    async fn wavelength(&self, slot: u8) -> Result<f64>;

    /// Tune `slot` to `nm`
    async fn set_wavelength(&self, slot: u8, nm: f64) -> Result<()>;

    /// Load sweep parameters into the sweep engine of `slot`
    async fn configure_sweep(&self, slot: u8, params: &SweepParameters) -> Result<()>;

    /// Drive the sweep engine of `slot`
    async fn set_sweep_state(&self, slot: u8, action: SweepAction) -> Result<()>;

    /// Switch optical output of `slot`
    async fn set_output(&self, slot: u8, on: bool) -> Result<()>;

    /// Switch every output of the mainframe off
    async fn disable_all_outputs(&self) -> Result<()>;
}

/// Capability: Optical Power Readout
///
/// # Contract
/// - Returns power in dBm
/// - Reading should be fast (<100ms typical); the polling loop waits on it
#[async_trait]
pub trait PowerMeter: Send + Sync {
    /// Read the current optical power in dBm
    async fn read_power_dbm(&self) -> Result<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_action_codes_follow_engine_order() {
        assert_eq!(SweepAction::Stop.code(), 0);
        assert_eq!(SweepAction::Start.code(), 1);
        assert_eq!(SweepAction::PauseStepped.code(), 2);
        assert_eq!(SweepAction::ContinueStepped.code(), 3);
        assert_eq!(SweepAction::PauseStepped.to_string(), "Pause (Stepped)");
    }

    #[test]
    fn test_single_cycle_parameters() {
        let config = SweepConfig {
            cycles: 5,
            mode: SweepMode::Step,
            ..Default::default()
        };
        let params = SweepParameters::single_cycle(&config);
        assert_eq!(params.cycles, 1);
        assert_eq!(params.mode.scpi_token(), "STEP");
        assert_eq!(params.start_nm, config.start_nm);
        assert_eq!(params.speed_nm_per_s, config.speed_nm_per_s);
    }

    struct FixedMeter(f64);

    #[async_trait]
    impl PowerMeter for FixedMeter {
        async fn read_power_dbm(&self) -> Result<f64> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn test_power_meter_trait_object() {
        let meter: Box<dyn PowerMeter> = Box::new(FixedMeter(-3.5));
        assert_eq!(meter.read_power_dbm().await.unwrap(), -3.5);
    }
}
