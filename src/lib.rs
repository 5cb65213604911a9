//! # Laser Sweep Core Library
//!
//! Automates a laser-wavelength sweep power measurement: a tunable laser is
//! driven through a wavelength sweep while a power meter is sampled, and the
//! readings are turned into power-versus-wavelength curves.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based configuration (TOML file plus `LASER_SWEEP_*`
//!   environment overrides) with validation.
//! - **`error`**: The `SweepError` enum for centralized error handling.
//! - **`hardware`**: `LaserDevice` and `PowerMeter` capability traits, SCPI drivers for
//!   the Agilent 816x and Thorlabs PM300, a simulated bench and the degraded
//!   `Unavailable` device.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`presentation`**: The `Presenter` sink the controller reports to.
//! - **`storage`**: Tab-separated result and recovery files.
//! - **`sweep`**: The acquisition state machine, its data model, the result
//!   processor and the polling loop.

pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod presentation;
pub mod storage;
pub mod sweep;
