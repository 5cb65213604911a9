//! Configuration System using Figment
//!
//! Strongly-typed configuration for sweep runs. Configuration is merged from:
//! 1. Built-in defaults (a simulated bench sweeping 1540-1560 nm)
//! 2. A TOML file (default `config/laser_sweep.toml`)
//! 3. Environment variables prefixed with `LASER_SWEEP_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use laser_sweep::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("Sweeping {} -> {} nm", config.sweep.start_nm, config.sweep.stop_nm);
//! # Ok::<(), laser_sweep::error::SweepError>(())
//! ```

use crate::error::{AppResult, SweepError};
use crate::hardware::capabilities::SweepMode;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/laser_sweep.toml";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "LASER_SWEEP_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sweep parameters
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Run behaviour (archiving, live plotting, laser shutdown)
    #[serde(default)]
    pub run: RunConfig,
    /// Result and recovery file locations
    #[serde(default)]
    pub storage: StorageConfig,
    /// Instrument connections
    #[serde(default)]
    pub instruments: InstrumentsConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Laser Sweep".to_string(),
            log_level: "info".to_string(),
            log_format: default_log_format(),
        }
    }
}

/// Parameters of one measurement run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SweepConfig {
    /// Laser source slot (channel)
    pub slot: u8,
    /// Configured sweep start in nm
    pub start_nm: f64,
    /// Configured sweep stop in nm
    pub stop_nm: f64,
    /// Sweep speed in nm/s
    pub speed_nm_per_s: f64,
    /// Number of sweep repetitions
    pub cycles: u32,
    /// Period of the polling loop
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Give up waiting for the sweep to leave the start wavelength after this long
    #[serde(with = "humantime_serde")]
    pub start_timeout: Duration,
    /// Step size in nm (stepped mode)
    pub step_nm: f64,
    /// Dwell per step in ms (stepped mode)
    pub dwell_ms: u32,
    /// Sweep engine mode
    pub mode: SweepMode,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            slot: 1,
            start_nm: 1540.0,
            stop_nm: 1560.0,
            speed_nm_per_s: 10.0,
            cycles: 1,
            poll_interval: Duration::from_millis(1),
            start_timeout: Duration::from_secs(10),
            step_nm: 1.0,
            dwell_ms: 0,
            mode: SweepMode::Continuous,
        }
    }
}

impl SweepConfig {
    /// Sweep duration implied by the configured range and speed.
    pub fn nominal_duration_s(&self) -> f64 {
        (self.stop_nm - self.start_nm) / self.speed_nm_per_s
    }

    /// Validate sweep parameters
    pub fn validate(&self) -> AppResult<()> {
        if !self.start_nm.is_finite() || !self.stop_nm.is_finite() {
            return Err(SweepError::Configuration(format!(
                "Sweep range must be finite, got {} -> {} nm",
                self.start_nm, self.stop_nm
            )));
        }
        if self.start_nm == self.stop_nm {
            return Err(SweepError::Configuration(format!(
                "Sweep start and stop are both {} nm",
                self.start_nm
            )));
        }
        if !self.speed_nm_per_s.is_finite() || self.speed_nm_per_s <= 0.0 {
            return Err(SweepError::Configuration(format!(
                "Sweep speed must be positive and finite, got {} nm/s",
                self.speed_nm_per_s
            )));
        }
        if self.cycles == 0 {
            return Err(SweepError::Configuration(
                "At least one sweep cycle is required".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(SweepError::Configuration(
                "Poll interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Run behaviour toggles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Archive the current session into the previous-session store before a new run
    pub keep_previous: bool,
    /// Emit a live frame after every sample
    pub live_plot: bool,
    /// Switch every laser output off when the run ends
    pub disable_outputs_on_finish: bool,
    /// Switch the sweep slot's output on when the run starts
    pub enable_output_on_start: bool,
    /// Label cycles in the final frame
    pub legend: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            keep_previous: false,
            live_plot: true,
            disable_outputs_on_finish: false,
            enable_output_on_start: true,
            legend: true,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// File rewritten after every finished cycle
    pub recovery_file: PathBuf,
    /// Directory for results saved without an explicit directory
    pub output_dir: PathBuf,
    /// Directory of the last saved or loaded result
    pub last_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            recovery_file: PathBuf::from("temp_results.txt"),
            output_dir: PathBuf::from("data"),
            last_dir: None,
        }
    }
}

/// Transport used to reach an instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    /// In-process simulation
    #[default]
    Simulated,
    /// SCPI over a raw TCP socket
    Tcp,
}

/// Connection settings for one instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Transport
    pub kind: InstrumentKind,
    /// Host name or IP address (tcp)
    pub host: String,
    /// TCP port (tcp)
    pub port: u16,
    /// Per-query I/O timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            kind: InstrumentKind::Simulated,
            host: "192.168.1.2".to_string(),
            port: 10001,
            timeout: Duration::from_secs(2),
        }
    }
}

/// Laser and power meter connections
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InstrumentsConfig {
    /// Tunable laser mainframe
    pub laser: InstrumentConfig,
    /// Optical power meter
    pub power_meter: InstrumentConfig,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl AppConfig {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables override file values, e.g.
    /// `LASER_SWEEP_SWEEP__CYCLES=3`.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(SweepError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(SweepError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        self.sweep.validate()
    }

    /// Write the effective configuration as TOML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let text = self.to_toml_string()?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Render the configuration as TOML text
    pub fn to_toml_string(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SweepError::Configuration(format!("Cannot serialize config: {e}")))
    }
}
