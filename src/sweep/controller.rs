//! Sweep controller - acquisition state machine
//!
//! Drives one [`SweepSession`] through the requested number of cycles. Time is
//! passed in by the caller: every transition happens inside [`SweepController::tick`]
//! or [`SweepController::stop`], so a timer loop, a test or a script can all
//! schedule it.
//!
//! # State Machine
//!
//! ```text
//!            start_sweep()
//! ┌──────┐ ─────────────▶ ┌────────────────────┐  wavelength left start
//! │ Idle │                │ AwaitingSweepStart │ ─────── or timeout ──────┐
//! └──────┘          ┌───▶ └────────────────────┘                          ▼
//!                   │                                               ┌─────────┐
//!                   │ cycles remain                                 │ Polling │ ◀─┐ elapsed <
//!                   │                                               └────┬────┘ ──┘ estimate
//!           ┌───────┴─────────┐       elapsed >= estimate               │
//!           │ FinalizingCycle │ ◀────────────────────────────────────────┘
//!           └───────┬─────────┘
//!                   │ all cycles done
//!                   ▼
//!               ┌──────┐         stop() from any active state ──▶ ┌─────────┐
//!               │ Done │                                          │ Aborted │
//!               └──────┘                                          └─────────┘
//! ```
//!
//! # Degraded operation
//!
//! A failed instrument read never stops the machine. The reading is replaced
//! by [`SENTINEL_WAVELENGTH_NM`] or [`SENTINEL_POWER_DBM`], a warning is logged
//! for the first substitution in a cycle and the cycle's `degraded_readings`
//! counter is incremented. Failed commands are logged and otherwise ignored.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::processor;
use super::session::{PreviousSessions, Sample, SweepSession};
use crate::config::{RunConfig, SweepConfig};
use crate::error::{AppResult, SweepError};
use crate::hardware::capabilities::{LaserDevice, PowerMeter, SweepAction, SweepParameters};
use crate::hardware::sentinel::{is_plausible_wavelength, SENTINEL_POWER_DBM, SENTINEL_WAVELENGTH_NM};
use crate::presentation::Presenter;
use crate::storage::result_file;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No run started yet
    Idle,
    /// Sweep commanded, waiting for the wavelength to leave the start
    AwaitingSweepStart,
    /// Sampling power until the estimated sweep end
    Polling,
    /// A cycle was just finalized
    FinalizingCycle,
    /// All requested cycles completed
    Done,
    /// Stopped on request
    Aborted,
}

impl ControllerState {
    /// Whether a run is in progress
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ControllerState::AwaitingSweepStart
                | ControllerState::Polling
                | ControllerState::FinalizingCycle
        )
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerState::Idle => write!(f, "idle"),
            ControllerState::AwaitingSweepStart => write!(f, "awaiting sweep start"),
            ControllerState::Polling => write!(f, "polling"),
            ControllerState::FinalizingCycle => write!(f, "finalizing cycle"),
            ControllerState::Done => write!(f, "done"),
            ControllerState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Timing of the cycle being acquired
#[derive(Debug, Clone, Copy)]
struct CycleProgress {
    requested_at: Instant,
    last_wavelength_nm: f64,
    launched_at: Option<Instant>,
    estimated_duration_s: f64,
}

/// Expected sweep duration from the observed launch wavelength.
///
/// Falls back to the configured range when the launch reading is not a
/// plausible wavelength (e.g. a sentinel).
pub fn estimate_duration_s(launch_nm: f64, config: &SweepConfig) -> f64 {
    let span = if is_plausible_wavelength(launch_nm) {
        (config.stop_nm - launch_nm).abs()
    } else {
        (config.stop_nm - config.start_nm).abs()
    };
    span / config.speed_nm_per_s
}

fn seconds_between(later: Instant, earlier: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_secs_f64()
}

fn log_command_failure(action: &str, result: anyhow::Result<()>) {
    if let Err(e) = result {
        warn!(action, error = %e, "Instrument command failed");
    }
}

/// The acquisition state machine
pub struct SweepController {
    laser: Arc<dyn LaserDevice>,
    power_meter: Arc<dyn PowerMeter>,
    presenter: Arc<dyn Presenter>,
    config: SweepConfig,
    run: RunConfig,
    recovery_file: Option<PathBuf>,
    state: ControllerState,
    session: SweepSession,
    previous: PreviousSessions,
    progress: Option<CycleProgress>,
}

impl SweepController {
    /// Idle controller with default run behaviour and no recovery file
    pub fn new(
        laser: Arc<dyn LaserDevice>,
        power_meter: Arc<dyn PowerMeter>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        Self {
            laser,
            power_meter,
            presenter,
            config: SweepConfig::default(),
            run: RunConfig::default(),
            recovery_file: None,
            state: ControllerState::Idle,
            session: SweepSession::new(),
            previous: PreviousSessions::new(),
            progress: None,
        }
    }

    /// Set run behaviour
    pub fn with_run_config(mut self, run: RunConfig) -> Self {
        self.run = run;
        self
    }

    /// Rewrite `path` after every finalized cycle
    pub fn with_recovery_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.recovery_file = Some(path.into());
        self
    }

    /// Current state
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Sweep configuration of the current or last run
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Read-only view of the current session
    pub fn session(&self) -> &SweepSession {
        &self.session
    }

    /// Owned copy of the current session
    pub fn snapshot(&self) -> SweepSession {
        self.session.clone()
    }

    /// Archived cycles
    pub fn previous(&self) -> &PreviousSessions {
        &self.previous
    }

    /// Archive the current session's finalized cycles
    pub fn keep_current(&mut self) {
        self.previous.keep(&self.session);
    }

    /// Discard archived cycles
    pub fn clear_previous(&mut self) {
        self.previous.clear();
    }

    /// Append the cycles of a result file to the archive.
    ///
    /// On error the archive is left unchanged.
    pub fn load_previous(&mut self, path: &Path) -> AppResult<usize> {
        let cycles = result_file::load(path)?;
        let count = cycles.len();
        self.previous.extend(cycles);
        self.presenter.status("Data loaded!");
        Ok(count)
    }

    /// Begin a new run.
    ///
    /// Accepted only when no run is active. The previous session is archived
    /// first when `keep_previous` is set.
    pub async fn start_sweep(&mut self, config: SweepConfig, now: Instant) -> AppResult<()> {
        if self.state.is_active() {
            return Err(SweepError::InvalidTransition {
                from: self.state.to_string(),
                action: "start a sweep".to_string(),
            });
        }
        config.validate()?;

        if self.run.keep_previous && !self.session.is_empty() {
            self.previous.keep(&self.session);
        }
        self.session = SweepSession::new();
        self.config = config;

        info!(
            session = %self.session.id(),
            slot = self.config.slot,
            start_nm = self.config.start_nm,
            stop_nm = self.config.stop_nm,
            speed_nm_per_s = self.config.speed_nm_per_s,
            cycles = self.config.cycles,
            "Starting measurement"
        );
        self.presenter.status("Measuring...");

        if self.run.enable_output_on_start {
            log_command_failure(
                "enable output",
                self.laser.set_output(self.config.slot, true).await,
            );
        }
        self.prepare_cycle(now).await;
        Ok(())
    }

    /// Advance the state machine to `now`
    pub async fn tick(&mut self, now: Instant) -> ControllerState {
        match self.state {
            ControllerState::AwaitingSweepStart => self.await_launch(now).await,
            ControllerState::Polling => self.poll(now).await,
            ControllerState::FinalizingCycle => self.next_cycle_or_finish(now).await,
            ControllerState::Idle | ControllerState::Done | ControllerState::Aborted => {}
        }
        self.state
    }

    /// Abort the run, keeping the cycle in progress as a finalized cycle.
    ///
    /// No effect when no run is active.
    pub async fn stop(&mut self, now: Instant) -> ControllerState {
        match self.state {
            ControllerState::Idle | ControllerState::Done | ControllerState::Aborted => {
                debug!(state = %self.state, "Stop ignored");
                return self.state;
            }
            ControllerState::AwaitingSweepStart => {
                let nm = self.read_wavelength().await;
                if let Some(progress) = self.progress.as_mut() {
                    progress.last_wavelength_nm = nm;
                }
                self.launch(now).await;
                self.finalize_cycle(now).await;
            }
            ControllerState::Polling => self.finalize_cycle(now).await,
            ControllerState::FinalizingCycle => {}
        }
        self.finish(ControllerState::Aborted).await;
        self.state
    }

    async fn prepare_cycle(&mut self, now: Instant) {
        let slot = self.config.slot;
        let params = SweepParameters::single_cycle(&self.config);
        log_command_failure(
            "configure sweep",
            self.laser.configure_sweep(slot, &params).await,
        );
        log_command_failure(
            "set wavelength",
            self.laser.set_wavelength(slot, self.config.start_nm).await,
        );
        log_command_failure(
            "start sweep",
            self.laser.set_sweep_state(slot, SweepAction::Start).await,
        );

        let index = self.session.begin_cycle().index;
        self.progress = Some(CycleProgress {
            requested_at: now,
            last_wavelength_nm: SENTINEL_WAVELENGTH_NM,
            launched_at: None,
            estimated_duration_s: 0.0,
        });
        self.state = ControllerState::AwaitingSweepStart;
        info!(cycle = index + 1, of = self.config.cycles, "Sweep cycle commanded");
    }

    fn has_departed(&self, nm: f64) -> bool {
        if self.config.stop_nm >= self.config.start_nm {
            nm > self.config.start_nm
        } else {
            is_plausible_wavelength(nm) && nm < self.config.start_nm
        }
    }

    async fn await_launch(&mut self, now: Instant) {
        let nm = self.read_wavelength().await;
        let Some(progress) = self.progress.as_mut() else {
            return;
        };
        progress.last_wavelength_nm = nm;
        let requested_at = progress.requested_at;

        if self.has_departed(nm) {
            self.launch(now).await;
            return;
        }

        let waited = now.saturating_duration_since(requested_at);
        if waited >= self.config.start_timeout {
            let timeout = SweepError::SweepTimeout {
                waited_s: waited.as_secs_f64(),
            };
            warn!(error = %timeout, last_wavelength_nm = nm, "Launching without detected sweep start");
            self.presenter.status(&timeout.to_string());
            self.launch(now).await;
        }
    }

    async fn launch(&mut self, now: Instant) {
        let power = self.read_power().await;
        let Some(progress) = self.progress.as_mut() else {
            return;
        };
        let launch_nm = progress.last_wavelength_nm;
        let estimated = estimate_duration_s(launch_nm, &self.config);
        progress.launched_at = Some(now);
        progress.estimated_duration_s = estimated;

        if let Some(cycle) = self.session.current_mut() {
            cycle.launch_wavelength_nm = launch_nm;
            cycle.samples.push(Sample {
                t_s: 0.0,
                power_dbm: power,
            });
        }
        self.state = ControllerState::Polling;
        info!(launch_nm, estimated_duration_s = estimated, "Sweep launched");
        self.render_live();
    }

    async fn poll(&mut self, now: Instant) {
        let Some(progress) = self.progress else {
            return;
        };
        let Some(launched_at) = progress.launched_at else {
            return;
        };

        let elapsed = seconds_between(now, launched_at);
        if elapsed >= progress.estimated_duration_s {
            self.finalize_cycle(now).await;
            return;
        }

        let power = self.read_power().await;
        let t_s = self.push_sample(elapsed, power);
        debug!(t_s, power_dbm = power, "Sample");
        self.render_live();
    }

    async fn finalize_cycle(&mut self, now: Instant) {
        let launched_at = self
            .progress
            .and_then(|p| p.launched_at)
            .unwrap_or(now);
        let elapsed = seconds_between(now, launched_at);

        let stop_nm = self.read_wavelength().await;
        let power = self.read_power().await;
        let elapsed = self.push_sample(elapsed, power);
        if let Some(cycle) = self.session.current_mut() {
            cycle.stop_wavelength_nm = stop_nm;
            cycle.duration_s = elapsed;
        }

        log_command_failure(
            "stop sweep",
            self.laser
                .set_sweep_state(self.config.slot, SweepAction::Stop)
                .await,
        );

        self.progress = None;
        if let Some(cycle) = self.session.finalize_current() {
            info!(
                cycle = cycle.index + 1,
                samples = cycle.len(),
                stop_nm,
                duration_s = elapsed,
                degraded = cycle.degraded_readings,
                "Sweep cycle finalized"
            );
        }
        self.persist_recovery();
        self.state = ControllerState::FinalizingCycle;
    }

    async fn next_cycle_or_finish(&mut self, now: Instant) {
        let requested = usize::try_from(self.config.cycles).unwrap_or(usize::MAX);
        if self.session.completed_cycles() < requested {
            self.prepare_cycle(now).await;
        } else {
            self.finish(ControllerState::Done).await;
        }
    }

    async fn finish(&mut self, final_state: ControllerState) {
        let slot = self.config.slot;
        log_command_failure(
            "stop sweep",
            self.laser.set_sweep_state(slot, SweepAction::Stop).await,
        );
        if self.run.disable_outputs_on_finish {
            log_command_failure("disable outputs", self.laser.disable_all_outputs().await);
        }

        processor::process_session(&mut self.session);
        self.persist_recovery();
        self.state = final_state;

        let previous = (!self.previous.is_empty()).then_some(&self.previous);
        self.presenter.render_final_frame(&self.session, previous);
        self.presenter.status(match final_state {
            ControllerState::Aborted => "Measurement aborted.",
            _ => "Measurement finished.",
        });
        info!(
            state = %final_state,
            cycles = self.session.completed_cycles(),
            samples = self.session.total_samples(),
            "Measurement ended"
        );
    }

    /// Append a sample, never earlier than the previous one; returns the timestamp used
    fn push_sample(&mut self, t_s: f64, power_dbm: f64) -> f64 {
        let Some(cycle) = self.session.current_mut() else {
            return t_s;
        };
        let t_s = cycle.samples.last().map_or(t_s, |last| t_s.max(last.t_s));
        cycle.samples.push(Sample { t_s, power_dbm });
        t_s
    }

    fn render_live(&self) {
        if self.run.live_plot {
            self.presenter.render_live_frame(&self.session);
        }
    }

    fn persist_recovery(&self) {
        let Some(path) = &self.recovery_file else {
            return;
        };
        if let Err(e) = result_file::persist(&self.session, path) {
            warn!(path = %path.display(), error = %e, "Could not write recovery file");
        }
    }

    async fn read_wavelength(&mut self) -> f64 {
        match self.laser.wavelength(self.config.slot).await {
            Ok(nm) => nm,
            Err(e) => {
                self.note_degraded("wavelength", &e);
                SENTINEL_WAVELENGTH_NM
            }
        }
    }

    async fn read_power(&mut self) -> f64 {
        match self.power_meter.read_power_dbm().await {
            Ok(dbm) => dbm,
            Err(e) => {
                self.note_degraded("power", &e);
                SENTINEL_POWER_DBM
            }
        }
    }

    fn note_degraded(&mut self, reading: &str, error: &anyhow::Error) {
        let Some(cycle) = self.session.current_mut() else {
            return;
        };
        if cycle.degraded_readings == 0 {
            warn!(cycle = cycle.index + 1, reading, error = %error, "Substituting sentinel reading");
        } else {
            debug!(cycle = cycle.index + 1, reading, error = %error, "Substituting sentinel reading");
        }
        cycle.degraded_readings += 1;
    }
}
