//! Presentation sinks
//!
//! The controller never draws anything itself. It hands read-only views of the
//! session to a [`Presenter`]:
//!
//! - `render_live_frame` after every sample while live plotting is on
//! - `render_final_frame` once post-processing is done, with the archived
//!   sessions for overlay when there are any
//! - `status` for the one-line messages a user should see
//!
//! [`TracingPresenter`] writes structured log events, [`BroadcastPresenter`]
//! forwards [`SweepEvent`]s to any number of subscribers (a plotting frontend,
//! a recorder), and [`NullPresenter`] discards everything.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::sweep::session::{Cycle, PreviousSessions, Sample, SweepSession};

/// Sink for session snapshots and status messages
pub trait Presenter: Send + Sync {
    /// Session changed while acquiring
    fn render_live_frame(&self, session: &SweepSession);

    /// Session finished and post-processed
    fn render_final_frame(&self, session: &SweepSession, previous: Option<&PreviousSessions>);

    /// User-visible status line
    fn status(&self, message: &str);
}

/// Condensed view of one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    /// Cycle position
    pub index: usize,
    /// Sample count
    pub samples: usize,
    /// Launch wavelength (nm)
    pub launch_nm: f64,
    /// Stop wavelength (nm)
    pub stop_nm: f64,
    /// Highest power reading (dBm)
    pub peak_power_dbm: Option<f64>,
    /// Wavelength of the highest reading, when processed (nm)
    pub peak_wavelength_nm: Option<f64>,
    /// Readings replaced by sentinels
    pub degraded_readings: usize,
}

impl CycleSummary {
    /// Summarize `cycle`
    pub fn of(cycle: &Cycle) -> Self {
        let peak = cycle
            .samples
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.power_dbm.total_cmp(&b.power_dbm));
        Self {
            index: cycle.index,
            samples: cycle.len(),
            launch_nm: cycle.launch_wavelength_nm,
            stop_nm: cycle.stop_wavelength_nm,
            peak_power_dbm: peak.map(|(_, s)| s.power_dbm),
            peak_wavelength_nm: peak.and_then(|(i, _)| cycle.wavelengths_nm.get(i).copied()),
            degraded_readings: cycle.degraded_readings,
        }
    }
}

/// Events published by [`BroadcastPresenter`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SweepEvent {
    /// Newest sample of the cycle being acquired
    LiveFrame {
        /// Run identifier
        session_id: Uuid,
        /// Cycle being acquired
        cycle: usize,
        /// Samples taken so far in this cycle
        samples: usize,
        /// The newest sample
        latest: Option<Sample>,
    },
    /// Processed session, ready to plot
    FinalFrame {
        /// Run identifier
        session_id: Uuid,
        /// Cycles of the run
        cycles: Vec<Cycle>,
        /// Archived cycles for overlay
        previous: Vec<Cycle>,
    },
    /// Status line
    Status {
        /// Message text
        message: String,
    },
}

/// Writes frames and status lines as tracing events
#[derive(Debug, Clone, Default)]
pub struct TracingPresenter {
    legend: bool,
}

impl TracingPresenter {
    /// Presenter summarizing the final frame as one line
    pub fn new() -> Self {
        Self::default()
    }

    /// Log one labelled line per cycle in the final frame
    pub fn with_legend(mut self, legend: bool) -> Self {
        self.legend = legend;
        self
    }
}

impl Presenter for TracingPresenter {
    fn render_live_frame(&self, session: &SweepSession) {
        if let Some(cycle) = session.current() {
            if let Some(sample) = cycle.samples.last() {
                debug!(
                    cycle = cycle.index,
                    t_s = sample.t_s,
                    power_dbm = sample.power_dbm,
                    "Sample"
                );
            }
        }
    }

    fn render_final_frame(&self, session: &SweepSession, previous: Option<&PreviousSessions>) {
        let overlay = previous.map_or(0, PreviousSessions::len);
        if self.legend {
            for cycle in session.cycles() {
                let summary = CycleSummary::of(cycle);
                info!(
                    label = %format!("Cycle {}", summary.index + 1),
                    samples = summary.samples,
                    launch_nm = summary.launch_nm,
                    stop_nm = summary.stop_nm,
                    peak_power_dbm = ?summary.peak_power_dbm,
                    peak_wavelength_nm = ?summary.peak_wavelength_nm,
                    degraded = summary.degraded_readings,
                    "Cycle result"
                );
            }
        }
        info!(
            session = %session.id(),
            cycles = session.completed_cycles(),
            samples = session.total_samples(),
            previous_cycles = overlay,
            "Sweep result"
        );
    }

    fn status(&self, message: &str) {
        info!(status = message, "Status");
    }
}

/// Publishes [`SweepEvent`]s on a broadcast channel
///
/// Sending never blocks; events are dropped when nobody is subscribed and
/// slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct BroadcastPresenter {
    tx: broadcast::Sender<SweepEvent>,
}

impl BroadcastPresenter {
    /// Presenter with room for `capacity` queued events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New receiver for subsequent events
    pub fn subscribe(&self) -> broadcast::Receiver<SweepEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: SweepEvent) {
        // Err only means no receiver is listening
        let _ = self.tx.send(event);
    }
}

impl Presenter for BroadcastPresenter {
    fn render_live_frame(&self, session: &SweepSession) {
        if let Some(cycle) = session.current() {
            self.publish(SweepEvent::LiveFrame {
                session_id: session.id(),
                cycle: cycle.index,
                samples: cycle.len(),
                latest: cycle.samples.last().copied(),
            });
        }
    }

    fn render_final_frame(&self, session: &SweepSession, previous: Option<&PreviousSessions>) {
        self.publish(SweepEvent::FinalFrame {
            session_id: session.id(),
            cycles: session.cycles().to_vec(),
            previous: previous.map(|p| p.cycles().to_vec()).unwrap_or_default(),
        });
    }

    fn status(&self, message: &str) {
        self.publish(SweepEvent::Status {
            message: message.to_string(),
        });
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn render_live_frame(&self, _session: &SweepSession) {}

    fn render_final_frame(&self, _session: &SweepSession, _previous: Option<&PreviousSessions>) {}

    fn status(&self, _message: &str) {}
}
