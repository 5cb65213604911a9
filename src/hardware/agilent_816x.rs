//! Agilent/Keysight 816x Lightwave Measurement System driver
//!
//! Drives the tunable laser modules of an 8163/8164 mainframe over SCPI.
//!
//! # Protocol Overview
//!
//! - Identification: `*IDN?` must mention the 816x family
//! - Wavelength query: `:sour{slot}:wav?` returns metres
//! - Output: `:sour{slot}:pow:stat 0|1`
//! - Sweep engine: `:sour{slot}:wav:swe:<param> <value><unit>`, started and stopped
//!   with `:sour{slot}:wav:swe:stat <code>`
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let transport = Arc::new(TcpScpiClient::connect("192.168.1.2", 10001, timeout).await?);
//! let laser = Agilent816x::connect(transport).await?;
//! laser.configure_sweep(1, &params).await?;
//! laser.set_sweep_state(1, SweepAction::Start).await?;
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::capabilities::{LaserDevice, SweepAction, SweepParameters};
use super::scpi::ScpiTransport;

/// Substring every 816x mainframe reports in its identification string
pub const IDN_MARKER: &str = "816";

/// Slots addressed by [`LaserDevice::disable_all_outputs`]
pub const MAINFRAME_SLOTS: u8 = 5;

/// Driver for a multi-slot 816x laser mainframe
pub struct Agilent816x {
    transport: Arc<dyn ScpiTransport>,
    identity: String,
}

impl Agilent816x {
    /// Identify the instrument and return a driver for it.
    ///
    /// Fails when the identification string is not an 816x mainframe.
    pub async fn connect(transport: Arc<dyn ScpiTransport>) -> Result<Self> {
        let identity = transport.query("*IDN?").await?;
        if !identity.contains(IDN_MARKER) {
            bail!("unexpected instrument identity '{}'", identity);
        }
        tracing::info!(identity = %identity, "816x laser mainframe identified");
        Ok(Self {
            transport,
            identity,
        })
    }

    /// Identification string reported at connect time
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Optical power setpoint of `slot` in dBm
    pub async fn power_dbm(&self, slot: u8) -> Result<f64> {
        self.transport.query_f64(&format!(":sour{slot}:pow?")).await
    }

    /// Set the optical power of `slot` in dBm
    pub async fn set_power_dbm(&self, slot: u8, dbm: f64) -> Result<()> {
        self.transport.write(&format!(":sour{slot}:pow {dbm}")).await
    }

    /// Whether the output of `slot` is on
    pub async fn output_enabled(&self, slot: u8) -> Result<bool> {
        let response = self.transport.query(&format!(":sour{slot}:pow:stat?")).await?;
        Ok(!response.contains('0'))
    }
}

#[async_trait]
impl LaserDevice for Agilent816x {
    async fn wavelength(&self, slot: u8) -> Result<f64> {
        let metres = self.transport.query_f64(&format!(":sour{slot}:wav?")).await?;
        Ok(metres * 1e9)
    }

    async fn set_wavelength(&self, slot: u8, nm: f64) -> Result<()> {
        self.transport.write(&format!(":sour{slot}:wav {nm}nm")).await
    }

    async fn configure_sweep(&self, slot: u8, params: &SweepParameters) -> Result<()> {
        let prefix = format!(":sour{slot}:wav:swe");
        let commands = [
            format!("{prefix}:mode {}", params.mode.scpi_token()),
            format!("{prefix}:start {}nm", params.start_nm),
            format!("{prefix}:stop {}nm", params.stop_nm),
            format!("{prefix}:step {}nm", params.step_nm),
            format!("{prefix}:cycl {}", params.cycles),
            format!("{prefix}:dwel {}ms", params.dwell_ms),
            format!("{prefix}:spe {}nm/s", params.speed_nm_per_s),
        ];
        for command in &commands {
            self.transport.write(command).await?;
        }
        Ok(())
    }

    async fn set_sweep_state(&self, slot: u8, action: SweepAction) -> Result<()> {
        tracing::debug!(slot, %action, "Sweep engine command");
        self.transport
            .write(&format!(":sour{slot}:wav:swe:stat {}", action.code()))
            .await
    }

    async fn set_output(&self, slot: u8, on: bool) -> Result<()> {
        self.transport
            .write(&format!(":sour{slot}:pow:stat {}", u8::from(on)))
            .await
    }

    async fn disable_all_outputs(&self) -> Result<()> {
        // Every slot is tried even after a failure; the first error is reported
        let mut first_error = None;
        for slot in 0..MAINFRAME_SLOTS {
            if let Err(e) = self.set_output(slot, false).await {
                tracing::warn!(slot, error = %e, "Failed to disable output");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SweepConfig;
    use crate::hardware::scpi::testing::RecordingTransport;

    async fn connected(transport: RecordingTransport) -> (Arc<RecordingTransport>, Agilent816x) {
        let transport = Arc::new(transport.with_reply("*IDN?", "Agilent Technologies,8164B,DE123,V5.25"));
        let laser = Agilent816x::connect(transport.clone()).await.unwrap();
        (transport, laser)
    }

    #[tokio::test]
    async fn test_rejects_foreign_identity() {
        let transport = Arc::new(RecordingTransport::default().with_reply("*IDN?", "THORLABS,PM300"));
        assert!(Agilent816x::connect(transport).await.is_err());
    }

    #[tokio::test]
    async fn test_wavelength_is_converted_to_nm() {
        let (_, laser) =
            connected(RecordingTransport::default().with_reply(":sour1:wav?", "1.55012E-006")).await;
        let nm = laser.wavelength(1).await.unwrap();
        assert!((nm - 1550.12).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_configure_sweep_command_sequence() {
        let (transport, laser) = connected(RecordingTransport::default()).await;
        let params = SweepParameters::single_cycle(&SweepConfig::default());
        laser.configure_sweep(1, &params).await.unwrap();
        laser.set_sweep_state(1, SweepAction::Start).await.unwrap();

        let sent = transport.sent();
        assert_eq!(
            &sent[1..],
            &[
                ":sour1:wav:swe:mode CONT",
                ":sour1:wav:swe:start 1540nm",
                ":sour1:wav:swe:stop 1560nm",
                ":sour1:wav:swe:step 1nm",
                ":sour1:wav:swe:cycl 1",
                ":sour1:wav:swe:dwel 0ms",
                ":sour1:wav:swe:spe 10nm/s",
                ":sour1:wav:swe:stat 1",
            ]
        );
    }

    #[tokio::test]
    async fn test_disable_all_covers_every_slot() {
        let (transport, laser) = connected(RecordingTransport::default()).await;
        laser.disable_all_outputs().await.unwrap();
        let sent = transport.sent();
        assert_eq!(sent.len(), 1 + MAINFRAME_SLOTS as usize);
        assert_eq!(sent[1], ":sour0:pow:stat 0");
        assert_eq!(sent[5], ":sour4:pow:stat 0");
    }

    #[tokio::test]
    async fn test_disable_all_continues_past_failed_slot() {
        let (transport, laser) = connected(
            RecordingTransport::default()
                .with_failing_write(":sour1:pow:stat 0")
                .with_failing_write(":sour3:pow:stat 0"),
        )
        .await;

        let err = laser.disable_all_outputs().await.unwrap_err();
        assert!(err.to_string().contains(":sour1:pow:stat 0"));

        let sent = transport.sent();
        assert_eq!(sent.len(), 1 + MAINFRAME_SLOTS as usize);
        assert_eq!(sent[5], ":sour4:pow:stat 0");
    }

    #[tokio::test]
    async fn test_output_state_query() {
        let (_, laser) =
            connected(RecordingTransport::default().with_reply(":sour2:pow:stat?", "1")).await;
        assert!(laser.output_enabled(2).await.unwrap());
        assert_eq!(laser.identity(), "Agilent Technologies,8164B,DE123,V5.25");
    }
}
