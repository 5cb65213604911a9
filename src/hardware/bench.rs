//! Instrument bench assembly
//!
//! Builds the laser / power-meter pair described by [`InstrumentsConfig`]. An
//! instrument that fails to connect is reported once as
//! [`SweepError::DeviceUnavailable`] and replaced by the degraded
//! [`Unavailable`] device, so a sweep still runs on sentinel readings.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use super::agilent_816x::Agilent816x;
use super::capabilities::{LaserDevice, PowerMeter};
use super::scpi::TcpScpiClient;
use super::sentinel::Unavailable;
use super::simulated::{SimClock, SimulatedLaser, SimulatedPowerMeter, TransmissionModel};
use super::thorlabs_pm300::ThorlabsPm300;
use crate::config::{InstrumentConfig, InstrumentKind, InstrumentsConfig, SweepConfig};
use crate::error::SweepError;

/// Noise applied by the simulated power meter (dB)
const SIMULATED_NOISE_DB: f64 = 0.1;

/// Seed of the simulated power meter's noise generator
const SIMULATED_NOISE_SEED: u64 = 1540;

/// The two instruments a sweep needs, ready to hand to the controller
pub struct Bench {
    /// Tunable laser
    pub laser: Arc<dyn LaserDevice>,
    /// Power meter
    pub power_meter: Arc<dyn PowerMeter>,
    simulated_laser: Option<Arc<SimulatedLaser>>,
    faults: Vec<SweepError>,
}

impl Bench {
    /// Assemble a bench from instrument settings.
    ///
    /// Never fails: unreachable instruments are swapped for [`Unavailable`].
    pub async fn connect(instruments: &InstrumentsConfig, sweep: &SweepConfig, clock: SimClock) -> Self {
        let mut faults = Vec::new();

        let (laser, simulated_laser): (Arc<dyn LaserDevice>, _) = match instruments.laser.kind {
            InstrumentKind::Simulated => {
                let sim = Arc::new(SimulatedLaser::new(clock.clone()));
                (sim.clone() as Arc<dyn LaserDevice>, Some(sim))
            }
            InstrumentKind::Tcp => match connect_laser(&instruments.laser).await {
                Ok(laser) => (laser, None),
                Err(e) => {
                    let fault = unavailable("laser", &e);
                    faults.push(fault);
                    let degraded: Arc<dyn LaserDevice> =
                        Arc::new(Unavailable::new("laser", e.to_string()));
                    (degraded, None)
                }
            },
        };

        let power_meter: Arc<dyn PowerMeter> = match instruments.power_meter.kind {
            InstrumentKind::Simulated => {
                // A simulated meter next to a real laser watches an idle stand-in
                let followed = simulated_laser
                    .clone()
                    .unwrap_or_else(|| Arc::new(SimulatedLaser::new(clock.clone())));
                Arc::new(
                    SimulatedPowerMeter::new(followed, sweep.slot, TransmissionModel::gaussian_for(sweep))
                        .with_noise(SIMULATED_NOISE_DB, SIMULATED_NOISE_SEED),
                )
            }
            InstrumentKind::Tcp => match connect_power_meter(&instruments.power_meter).await {
                Ok(meter) => meter,
                Err(e) => {
                    let fault = unavailable("power meter", &e);
                    faults.push(fault);
                    Arc::new(Unavailable::new("power meter", e.to_string()))
                }
            },
        };

        let bench = Self {
            laser,
            power_meter,
            simulated_laser,
            faults,
        };
        info!(status = %bench.status(), "Bench assembled");
        bench
    }

    /// Fully simulated bench sharing `clock`, with a custom launch delay and response
    pub fn simulated(
        sweep: &SweepConfig,
        clock: SimClock,
        start_delay: Duration,
        model: TransmissionModel,
    ) -> Self {
        let laser = Arc::new(SimulatedLaser::new(clock).with_start_delay(start_delay));
        let meter = SimulatedPowerMeter::new(laser.clone(), sweep.slot, model);
        Self {
            laser: laser.clone(),
            power_meter: Arc::new(meter),
            simulated_laser: Some(laser),
            faults: Vec::new(),
        }
    }

    /// Simulated laser behind [`Bench::laser`], if any
    pub fn simulated_laser(&self) -> Option<&Arc<SimulatedLaser>> {
        self.simulated_laser.as_ref()
    }

    /// Connection failures recorded while assembling the bench
    pub fn faults(&self) -> &[SweepError] {
        &self.faults
    }

    /// Whether the laser connected
    pub fn laser_ok(&self) -> bool {
        !self.has_fault("laser")
    }

    /// Whether the power meter connected
    pub fn power_meter_ok(&self) -> bool {
        !self.has_fault("power meter")
    }

    /// One-line device status for the status sink
    pub fn status(&self) -> String {
        let laser = if self.laser_ok() { "OK" } else { "Error" };
        let meter = if self.power_meter_ok() { "OK" } else { "Error" };
        format!("Laser {laser}. Power Meter {meter}.")
    }

    fn has_fault(&self, name: &str) -> bool {
        self.faults
            .iter()
            .any(|f| matches!(f, SweepError::DeviceUnavailable { device, .. } if device == name))
    }
}

fn unavailable(device: &str, cause: &anyhow::Error) -> SweepError {
    let fault = SweepError::DeviceUnavailable {
        device: device.to_string(),
        reason: format!("{cause:#}"),
    };
    warn!(error = %fault, "Continuing with degraded device");
    fault
}

async fn connect_laser(config: &InstrumentConfig) -> Result<Arc<dyn LaserDevice>> {
    let transport = TcpScpiClient::connect(&config.host, config.port, config.timeout).await?;
    let laser = Agilent816x::connect(Arc::new(transport)).await?;
    Ok(Arc::new(laser))
}

async fn connect_power_meter(config: &InstrumentConfig) -> Result<Arc<dyn PowerMeter>> {
    let transport = TcpScpiClient::connect(&config.host, config.port, config.timeout).await?;
    let meter = ThorlabsPm300::connect(Arc::new(transport)).await?;
    Ok(Arc::new(meter))
}
