//! Thorlabs PM300 optical power meter driver
//!
//! `READ?` returns the current reading in watts; the driver converts it to dBm
//! relative to 1 mW.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::capabilities::PowerMeter;
use super::scpi::ScpiTransport;

/// Substring identifying the PM300 family
pub const IDN_MARKER: &str = "P300";

/// Convert a reading in watts to dBm
pub fn watts_to_dbm(watts: f64) -> f64 {
    10.0 * (watts / 1e-3).log10()
}

/// Driver for a Thorlabs PM300 power meter
pub struct ThorlabsPm300 {
    transport: Arc<dyn ScpiTransport>,
}

impl ThorlabsPm300 {
    /// Identify the instrument and return a driver for it
    pub async fn connect(transport: Arc<dyn ScpiTransport>) -> Result<Self> {
        let identity = transport.query("*IDN?").await?;
        if !identity.contains(IDN_MARKER) {
            bail!("unexpected instrument identity '{}'", identity);
        }
        tracing::info!(identity = %identity, "PM300 power meter identified");
        Ok(Self { transport })
    }

    /// Current reading in watts
    pub async fn read_power_w(&self) -> Result<f64> {
        self.transport.query_f64("READ?").await
    }
}

#[async_trait]
impl PowerMeter for ThorlabsPm300 {
    async fn read_power_dbm(&self) -> Result<f64> {
        let watts = self.read_power_w().await?;
        if !(watts.is_finite() && watts > 0.0) {
            bail!("non-positive power reading {} W", watts);
        }
        Ok(watts_to_dbm(watts))
    }
}
