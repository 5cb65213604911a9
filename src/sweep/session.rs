//! Sweep session data model
//!
//! A [`SweepSession`] is the ordered list of finalized [`Cycle`]s of one run,
//! plus the cycle currently being acquired. [`PreviousSessions`] holds cycles
//! archived from earlier runs or loaded from disk for overlay comparison.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One power reading, timestamped relative to the cycle launch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since launch
    pub t_s: f64,
    /// Power (dBm)
    pub power_dbm: f64,
}

/// One sweep repetition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    /// Zero-based position within its session
    pub index: usize,
    /// Wavelength observed at launch (nm)
    pub launch_wavelength_nm: f64,
    /// Wavelength observed at stop (nm)
    pub stop_wavelength_nm: f64,
    /// Stop time minus launch time (s)
    pub duration_s: f64,
    /// Samples in acquisition order
    pub samples: Vec<Sample>,
    /// One wavelength per sample, filled by the result processor
    pub wavelengths_nm: Vec<f64>,
    /// Readings replaced by sentinels while acquiring this cycle
    pub degraded_readings: usize,
}

impl Cycle {
    /// Empty cycle awaiting launch
    pub fn new(index: usize) -> Self {
        Self {
            index,
            launch_wavelength_nm: 0.0,
            stop_wavelength_nm: 0.0,
            duration_s: 0.0,
            samples: Vec::new(),
            wavelengths_nm: Vec::new(),
            degraded_readings: 0,
        }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample has been taken
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Relative timestamps
    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.t_s)
    }

    /// Power readings
    pub fn powers(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.power_dbm)
    }

    /// Whether every sample has a wavelength
    pub fn is_processed(&self) -> bool {
        self.wavelengths_nm.len() == self.samples.len()
    }
}

/// Cycles of the current run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    cycles: Vec<Cycle>,
    current: Option<Cycle>,
}

impl SweepSession {
    /// Empty session stamped with the current time
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            cycles: Vec::new(),
            current: None,
        }
    }

    /// Session built from already finalized cycles, e.g. a loaded result file
    pub fn from_cycles(cycles: Vec<Cycle>) -> Self {
        Self {
            cycles,
            ..Self::new()
        }
    }

    /// Unique run identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wall-clock start of the run
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Finalized cycles
    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    /// Mutable access to finalized cycles (post-processing)
    pub fn cycles_mut(&mut self) -> &mut [Cycle] {
        &mut self.cycles
    }

    /// Cycle being acquired, if any
    pub fn current(&self) -> Option<&Cycle> {
        self.current.as_ref()
    }

    /// Mutable access to the cycle being acquired
    pub fn current_mut(&mut self) -> Option<&mut Cycle> {
        self.current.as_mut()
    }

    /// Open a new cycle; discards an unfinished one
    pub fn begin_cycle(&mut self) -> &mut Cycle {
        let index = self.cycles.len();
        self.current.insert(Cycle::new(index))
    }

    /// Move the current cycle into the finalized list
    pub fn finalize_current(&mut self) -> Option<&Cycle> {
        let cycle = self.current.take()?;
        self.cycles.push(cycle);
        self.cycles.last()
    }

    /// Number of finalized cycles
    pub fn completed_cycles(&self) -> usize {
        self.cycles.len()
    }

    /// Samples across finalized cycles
    pub fn total_samples(&self) -> usize {
        self.cycles.iter().map(Cycle::len).sum()
    }

    /// Whether the session holds no finalized cycle
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }
}

impl Default for SweepSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Archive of earlier cycles kept for comparison
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreviousSessions {
    cycles: Vec<Cycle>,
}

impl PreviousSessions {
    /// Empty archive
    pub fn new() -> Self {
        Self::default()
    }

    /// Archive the finalized cycles of `session`
    pub fn keep(&mut self, session: &SweepSession) {
        self.extend(session.cycles().iter().cloned());
    }

    /// Append cycles, renumbering them after those already held
    pub fn extend(&mut self, cycles: impl IntoIterator<Item = Cycle>) {
        for mut cycle in cycles {
            cycle.index = self.cycles.len();
            self.cycles.push(cycle);
        }
    }

    /// Discard everything
    pub fn clear(&mut self) {
        self.cycles.clear();
    }

    /// Archived cycles
    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    /// Number of archived cycles
    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    /// Whether the archive is empty
    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }
}
