//! Sentinel readings and the degraded device.
//!
//! A failed query yields [`SENTINEL_WAVELENGTH_NM`] or [`SENTINEL_POWER_DBM`]
//! instead of an error. The values are indistinguishable from real readings once
//! stored; cycles only keep a count of how many readings were substituted.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::capabilities::{LaserDevice, PowerMeter, SweepAction, SweepParameters};

/// Wavelength reported when the laser cannot be queried
pub const SENTINEL_WAVELENGTH_NM: f64 = 0.0;

/// Power reported when the meter cannot be queried
pub const SENTINEL_POWER_DBM: f64 = -99.99;

/// Readings below this are treated as "not a wavelength" when estimating sweep time
pub const MIN_PLAUSIBLE_WAVELENGTH_NM: f64 = 100.0;

/// Whether `nm` can be used as a launch wavelength
pub fn is_plausible_wavelength(nm: f64) -> bool {
    nm.is_finite() && nm >= MIN_PLAUSIBLE_WAVELENGTH_NM
}

/// Stand-in for an instrument that failed to connect.
///
/// Every operation fails, so the controller runs on sentinels. Set-type
/// operations fail too and are logged by the caller.
#[derive(Debug, Clone)]
pub struct Unavailable {
    device: String,
    reason: String,
}

impl Unavailable {
    /// Create a degraded device for `device`, remembering why it is down
    pub fn new(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            reason: reason.into(),
        }
    }

    fn error(&self) -> anyhow::Error {
        anyhow!("{} unavailable: {}", self.device, self.reason)
    }
}

#[async_trait]
impl LaserDevice for Unavailable {
    async fn wavelength(&self, _slot: u8) -> Result<f64> {
        Err(self.error())
    }

    async fn set_wavelength(&self, _slot: u8, _nm: f64) -> Result<()> {
        Err(self.error())
    }

    async fn configure_sweep(&self, _slot: u8, _params: &SweepParameters) -> Result<()> {
        Err(self.error())
    }

    async fn set_sweep_state(&self, _slot: u8, _action: SweepAction) -> Result<()> {
        Err(self.error())
    }

    async fn set_output(&self, _slot: u8, _on: bool) -> Result<()> {
        Err(self.error())
    }

    async fn disable_all_outputs(&self) -> Result<()> {
        Err(self.error())
    }
}

#[async_trait]
impl PowerMeter for Unavailable {
    async fn read_power_dbm(&self) -> Result<f64> {
        Err(self.error())
    }
}
