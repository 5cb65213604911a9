//! Simulated Hardware
//!
//! Provides a simulated tunable laser and power meter for running sweeps without
//! physical hardware. All simulated devices use async-safe operations
//! (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Simulations
//!
//! - `SimulatedLaser` - Sweep engine that holds at the start wavelength for a
//!   launch delay, then ramps at the configured speed and clamps at the stop
//! - `SimulatedPowerMeter` - Reads the laser's instantaneous wavelength and
//!   returns a [`TransmissionModel`] response in dBm
//!
//! # Time
//!
//! Both devices read time from a shared [`SimClock`]. A wall clock gives live
//! behaviour; a manual clock lets tests step time exactly and turns meter
//! latency into a clock advance instead of a sleep.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;

use crate::config::SweepConfig;
use crate::hardware::capabilities::{LaserDevice, PowerMeter, SweepAction, SweepParameters};

/// Number of output slots on the simulated mainframe
pub const SIMULATED_SLOTS: u8 = 5;

// =============================================================================
// SimClock - Shared time source
// =============================================================================

#[derive(Debug, Clone)]
enum ClockSource {
    Wall,
    Manual {
        base: Instant,
        offset_ns: Arc<AtomicU64>,
    },
}

/// Time source shared by simulated devices and whoever drives the controller
#[derive(Debug, Clone)]
pub struct SimClock {
    source: ClockSource,
}

impl SimClock {
    /// Real time
    pub fn wall() -> Self {
        Self {
            source: ClockSource::Wall,
        }
    }

    /// Time that only moves when [`SimClock::advance`] is called
    pub fn manual() -> Self {
        Self {
            source: ClockSource::Manual {
                base: Instant::now(),
                offset_ns: Arc::new(AtomicU64::new(0)),
            },
        }
    }

    /// Current instant
    pub fn now(&self) -> Instant {
        match &self.source {
            ClockSource::Wall => Instant::now(),
            ClockSource::Manual { base, offset_ns } => {
                *base + Duration::from_nanos(offset_ns.load(Ordering::SeqCst))
            }
        }
    }

    /// Whether time is driven by [`SimClock::advance`]
    pub fn is_manual(&self) -> bool {
        matches!(self.source, ClockSource::Manual { .. })
    }

    /// Move a manual clock forward. No effect on a wall clock.
    pub fn advance(&self, by: Duration) {
        if let ClockSource::Manual { offset_ns, .. } = &self.source {
            let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
            offset_ns.fetch_add(nanos, Ordering::SeqCst);
        }
    }

    /// Spend `by` of simulated time: advance a manual clock, sleep on a wall clock
    pub async fn spend(&self, by: Duration) {
        if by.is_zero() {
            return;
        }
        if self.is_manual() {
            self.advance(by);
        } else {
            sleep(by).await;
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::wall()
    }
}

// =============================================================================
// SimulatedLaser - Simulated sweep engine
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct ActiveSweep {
    params: SweepParameters,
    started_at: Instant,
}

#[derive(Debug, Default)]
struct LaserState {
    parked_nm: BTreeMap<u8, f64>,
    loaded: BTreeMap<u8, SweepParameters>,
    active: BTreeMap<u8, ActiveSweep>,
    outputs: BTreeMap<u8, bool>,
}

/// Simulated tunable laser with a continuous sweep engine
///
/// Simulates a laser mainframe with:
/// - A launch delay during which the reported wavelength stays at the start
/// - Linear ramp at the configured speed, clamped at the stop wavelength
/// - Wavelength frozen wherever the sweep is stopped
/// - Per-slot output state
///
/// # Example
///
/// ```rust,ignore
/// let clock = SimClock::manual();
/// let laser = SimulatedLaser::new(clock.clone()).with_start_delay(Duration::ZERO);
/// laser.configure_sweep(1, &params).await?;
/// laser.set_sweep_state(1, SweepAction::Start).await?;
/// clock.advance(Duration::from_secs(1));
/// assert_eq!(laser.wavelength(1).await?, 1550.0);
/// ```
pub struct SimulatedLaser {
    clock: SimClock,
    start_delay: Duration,
    launch_offset_nm: f64,
    state: RwLock<LaserState>,
    sweep_starts: AtomicUsize,
}

impl SimulatedLaser {
    /// Create a simulated laser with a 2 s launch delay
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            start_delay: Duration::from_millis(2000),
            launch_offset_nm: 0.0,
            state: RwLock::new(LaserState::default()),
            sweep_starts: AtomicUsize::new(0),
        }
    }

    /// Time between the start command and the first wavelength change
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Jump added to the wavelength the moment the ramp begins
    pub fn with_launch_offset(mut self, offset_nm: f64) -> Self {
        self.launch_offset_nm = offset_nm;
        self
    }

    /// Number of `Start` commands received
    pub fn sweep_starts(&self) -> usize {
        self.sweep_starts.load(Ordering::SeqCst)
    }

    /// Whether the sweep engine of `slot` is running
    pub async fn is_sweeping(&self, slot: u8) -> bool {
        self.state.read().await.active.contains_key(&slot)
    }

    /// Output state of `slot`
    pub async fn output_enabled(&self, slot: u8) -> bool {
        self.state
            .read()
            .await
            .outputs
            .get(&slot)
            .copied()
            .unwrap_or(false)
    }

    fn swept_wavelength(&self, sweep: &ActiveSweep, now: Instant) -> f64 {
        let params = &sweep.params;
        let elapsed = now.saturating_duration_since(sweep.started_at);
        if elapsed < self.start_delay {
            return params.start_nm;
        }
        let ramp_s = (elapsed - self.start_delay).as_secs_f64();
        let direction = (params.stop_nm - params.start_nm).signum();
        let nm = params.start_nm + direction * (self.launch_offset_nm + ramp_s * params.speed_nm_per_s);
        if direction >= 0.0 {
            nm.min(params.stop_nm)
        } else {
            nm.max(params.stop_nm)
        }
    }

    fn check_slot(slot: u8) -> Result<()> {
        if slot >= SIMULATED_SLOTS {
            bail!("SimulatedLaser: slot {} out of range (0-{})", slot, SIMULATED_SLOTS - 1);
        }
        Ok(())
    }
}

#[async_trait]
impl LaserDevice for SimulatedLaser {
    async fn wavelength(&self, slot: u8) -> Result<f64> {
        Self::check_slot(slot)?;
        let state = self.state.read().await;
        if let Some(sweep) = state.active.get(&slot) {
            return Ok(self.swept_wavelength(sweep, self.clock.now()));
        }
        Ok(state.parked_nm.get(&slot).copied().unwrap_or(0.0))
    }

    async fn set_wavelength(&self, slot: u8, nm: f64) -> Result<()> {
        Self::check_slot(slot)?;
        self.state.write().await.parked_nm.insert(slot, nm);
        Ok(())
    }

    async fn configure_sweep(&self, slot: u8, params: &SweepParameters) -> Result<()> {
        Self::check_slot(slot)?;
        if params.speed_nm_per_s <= 0.0 {
            bail!("SimulatedLaser: sweep speed must be positive");
        }
        self.state.write().await.loaded.insert(slot, *params);
        Ok(())
    }

    async fn set_sweep_state(&self, slot: u8, action: SweepAction) -> Result<()> {
        Self::check_slot(slot)?;
        let now = self.clock.now();
        let mut state = self.state.write().await;
        match action {
            SweepAction::Start => {
                let Some(params) = state.loaded.get(&slot).copied() else {
                    bail!("SimulatedLaser: no sweep configured on slot {}", slot);
                };
                state.active.insert(
                    slot,
                    ActiveSweep {
                        params,
                        started_at: now,
                    },
                );
                self.sweep_starts.fetch_add(1, Ordering::SeqCst);
            }
            SweepAction::Stop => {
                if let Some(sweep) = state.active.remove(&slot) {
                    let frozen = self.swept_wavelength(&sweep, now);
                    state.parked_nm.insert(slot, frozen);
                }
            }
            SweepAction::PauseStepped | SweepAction::ContinueStepped => {
                bail!("SimulatedLaser: stepped sweeps are not simulated");
            }
        }
        Ok(())
    }

    async fn set_output(&self, slot: u8, on: bool) -> Result<()> {
        Self::check_slot(slot)?;
        self.state.write().await.outputs.insert(slot, on);
        Ok(())
    }

    async fn disable_all_outputs(&self) -> Result<()> {
        let mut state = self.state.write().await;
        for slot in 0..SIMULATED_SLOTS {
            state.outputs.insert(slot, false);
        }
        Ok(())
    }
}

// =============================================================================
// SimulatedPowerMeter - Wavelength-dependent response
// =============================================================================

/// Transmission of the simulated device under test
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransmissionModel {
    /// Gaussian transmission peak above a floor, in linear power
    Gaussian {
        /// Peak centre (nm)
        center_nm: f64,
        /// Standard deviation (nm)
        width_nm: f64,
        /// Peak height (mW)
        peak_mw: f64,
        /// Background (mW)
        floor_mw: f64,
    },
    /// Constant power
    Flat {
        /// Power (dBm)
        dbm: f64,
    },
    /// Power linear in wavelength
    Linear {
        /// Wavelength where `dbm_at_reference` applies (nm)
        reference_nm: f64,
        /// Power at the reference wavelength (dBm)
        dbm_at_reference: f64,
        /// Slope (dB/nm)
        slope_db_per_nm: f64,
    },
}

impl TransmissionModel {
    /// Peak at mid-span, one tenth of the span wide, 1 mW high
    pub fn gaussian_for(config: &SweepConfig) -> Self {
        let span = (config.stop_nm - config.start_nm).abs();
        TransmissionModel::Gaussian {
            center_nm: config.start_nm.min(config.stop_nm) + 0.5 * span,
            width_nm: 0.1 * span,
            peak_mw: 1.0,
            floor_mw: 0.01,
        }
    }

    /// Response at `nm` in dBm
    pub fn response_dbm(&self, nm: f64) -> f64 {
        match *self {
            TransmissionModel::Gaussian {
                center_nm,
                width_nm,
                peak_mw,
                floor_mw,
            } => {
                let shape = if width_nm > 0.0 {
                    (-(nm - center_nm).powi(2) / (2.0 * width_nm.powi(2))).exp()
                } else {
                    0.0
                };
                mw_to_dbm(peak_mw * shape + floor_mw)
            }
            TransmissionModel::Flat { dbm } => dbm,
            TransmissionModel::Linear {
                reference_nm,
                dbm_at_reference,
                slope_db_per_nm,
            } => dbm_at_reference + (nm - reference_nm) * slope_db_per_nm,
        }
    }
}

/// Convert linear power in mW to dBm
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

/// Simulated power meter watching a [`SimulatedLaser`]
pub struct SimulatedPowerMeter {
    laser: Arc<SimulatedLaser>,
    slot: u8,
    model: TransmissionModel,
    noise_db: f64,
    latency: Duration,
    rng: Mutex<StdRng>,
    reads: AtomicUsize,
}

impl SimulatedPowerMeter {
    /// Noise-free meter with zero latency
    pub fn new(laser: Arc<SimulatedLaser>, slot: u8, model: TransmissionModel) -> Self {
        Self {
            laser,
            slot,
            model,
            noise_db: 0.0,
            latency: Duration::ZERO,
            rng: Mutex::new(StdRng::seed_from_u64(0x5EED)),
            reads: AtomicUsize::new(0),
        }
    }

    /// Add uniform noise of +/- `noise_db` with a fixed seed
    pub fn with_noise(mut self, noise_db: f64, seed: u64) -> Self {
        self.noise_db = noise_db.abs();
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Time spent per reading
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of readings taken
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PowerMeter for SimulatedPowerMeter {
    async fn read_power_dbm(&self) -> Result<f64> {
        self.laser.clock.spend(self.latency).await;
        let nm = self.laser.wavelength(self.slot).await?;
        let mut dbm = self.model.response_dbm(nm);
        if self.noise_db > 0.0 {
            dbm += self.rng.lock().await.gen_range(-self.noise_db..=self.noise_db);
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(dbm)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn params(start: f64, stop: f64, speed: f64) -> SweepParameters {
        SweepParameters::single_cycle(&SweepConfig {
            start_nm: start,
            stop_nm: stop,
            speed_nm_per_s: speed,
            ..Default::default()
        })
    }

    #[test]
    fn test_manual_clock_only_moves_on_advance() {
        let clock = SimClock::manual();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now() - t0, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_laser_holds_during_start_delay_then_ramps() {
        let clock = SimClock::manual();
        let laser = SimulatedLaser::new(clock.clone()).with_start_delay(Duration::from_secs(2));
        laser.configure_sweep(1, &params(1540.0, 1560.0, 10.0)).await.unwrap();
        laser.set_sweep_state(1, SweepAction::Start).await.unwrap();

        clock.advance(Duration::from_millis(1999));
        assert_eq!(laser.wavelength(1).await.unwrap(), 1540.0);

        clock.advance(Duration::from_millis(1001));
        assert!((laser.wavelength(1).await.unwrap() - 1550.0).abs() < 1e-9);

        clock.advance(Duration::from_secs(10));
        assert_eq!(laser.wavelength(1).await.unwrap(), 1560.0);
    }

    #[tokio::test]
    async fn test_laser_stop_freezes_wavelength() {
        let clock = SimClock::manual();
        let laser = SimulatedLaser::new(clock.clone()).with_start_delay(Duration::ZERO);
        laser.configure_sweep(2, &params(1540.0, 1560.0, 10.0)).await.unwrap();
        laser.set_sweep_state(2, SweepAction::Start).await.unwrap();
        clock.advance(Duration::from_millis(500));
        laser.set_sweep_state(2, SweepAction::Stop).await.unwrap();
        clock.advance(Duration::from_secs(5));

        assert!(!laser.is_sweeping(2).await);
        assert!((laser.wavelength(2).await.unwrap() - 1545.0).abs() < 1e-9);
        assert_eq!(laser.sweep_starts(), 1);
    }

    #[tokio::test]
    async fn test_laser_downward_sweep_clamps_at_stop() {
        let clock = SimClock::manual();
        let laser = SimulatedLaser::new(clock.clone()).with_start_delay(Duration::ZERO);
        laser.configure_sweep(1, &params(1560.0, 1550.0, 5.0)).await.unwrap();
        laser.set_sweep_state(1, SweepAction::Start).await.unwrap();
        clock.advance(Duration::from_secs(1));
        assert!((laser.wavelength(1).await.unwrap() - 1555.0).abs() < 1e-9);
        clock.advance(Duration::from_secs(60));
        assert_eq!(laser.wavelength(1).await.unwrap(), 1550.0);
    }

    #[tokio::test]
    async fn test_laser_start_without_configuration_fails() {
        let laser = SimulatedLaser::new(SimClock::manual());
        assert!(laser.set_sweep_state(1, SweepAction::Start).await.is_err());
        assert!(laser.wavelength(SIMULATED_SLOTS).await.is_err());
    }

    #[tokio::test]
    async fn test_laser_outputs() {
        let laser = SimulatedLaser::new(SimClock::manual());
        laser.set_output(1, true).await.unwrap();
        laser.set_output(3, true).await.unwrap();
        assert!(laser.output_enabled(1).await);

        laser.disable_all_outputs().await.unwrap();
        assert!(!laser.output_enabled(1).await);
        assert!(!laser.output_enabled(3).await);
    }

    #[test]
    fn test_gaussian_response_peaks_mid_span() {
        let model = TransmissionModel::gaussian_for(&SweepConfig::default());
        let peak = model.response_dbm(1550.0);
        assert!((peak - mw_to_dbm(1.01)).abs() < 1e-9);
        assert!(model.response_dbm(1540.0) < peak);
        assert!((model.response_dbm(1545.0) - model.response_dbm(1555.0)).abs() < 1e-9);
    }

    #[test]
    fn test_linear_response() {
        let model = TransmissionModel::Linear {
            reference_nm: 1540.0,
            dbm_at_reference: -10.0,
            slope_db_per_nm: 0.5,
        };
        assert_eq!(model.response_dbm(1540.0), -10.0);
        assert_eq!(model.response_dbm(1560.0), 0.0);
    }

    #[tokio::test]
    async fn test_meter_follows_laser_and_spends_latency() {
        let clock = SimClock::manual();
        let laser = Arc::new(SimulatedLaser::new(clock.clone()).with_start_delay(Duration::ZERO));
        laser.configure_sweep(1, &params(1540.0, 1560.0, 10.0)).await.unwrap();
        laser.set_sweep_state(1, SweepAction::Start).await.unwrap();

        let meter = SimulatedPowerMeter::new(
            laser.clone(),
            1,
            TransmissionModel::Linear {
                reference_nm: 1540.0,
                dbm_at_reference: -20.0,
                slope_db_per_nm: 1.0,
            },
        )
        .with_latency(Duration::from_millis(100));

        let t0 = clock.now();
        let dbm = meter.read_power_dbm().await.unwrap();
        assert_eq!(clock.now() - t0, Duration::from_millis(100));
        assert!((dbm - -19.0).abs() < 1e-9);
        assert_eq!(meter.reads(), 1);
    }

    #[tokio::test]
    async fn test_meter_noise_is_bounded() {
        let laser = Arc::new(SimulatedLaser::new(SimClock::manual()));
        let meter = SimulatedPowerMeter::new(laser, 1, TransmissionModel::Flat { dbm: -7.0 })
            .with_noise(0.2, 42);
        for _ in 0..50 {
            let dbm = meter.read_power_dbm().await.unwrap();
            assert!((-7.2..=-6.8).contains(&dbm), "reading {dbm} out of bounds");
        }
    }
}
