//! Hardware Abstraction Layer
//!
//! Capability traits for the sweep instruments plus their implementations.
//!
//! # Module Structure
//!
//! - `capabilities` - `LaserDevice` and `PowerMeter` traits
//! - `sentinel` - Sentinel readings and the degraded `Unavailable` device
//! - `simulated` - Simulated laser and power meter on a shared clock
//! - `scpi` - SCPI over TCP transport
//! - `agilent_816x` - Agilent 816x tunable laser mainframe
//! - `thorlabs_pm300` - Thorlabs PM300 power meter
//! - `bench` - Assembles the instrument pair from configuration

pub mod agilent_816x;
pub mod bench;
pub mod capabilities;
pub mod scpi;
pub mod sentinel;
pub mod simulated;
pub mod thorlabs_pm300;

pub use bench::Bench;
pub use capabilities::{LaserDevice, PowerMeter, SweepAction, SweepMode, SweepParameters};
pub use sentinel::{SENTINEL_POWER_DBM, SENTINEL_WAVELENGTH_NM};
pub use simulated::{SimClock, SimulatedLaser, SimulatedPowerMeter, TransmissionModel};
