//! Sweep acquisition
//!
//! - `session` - Cycles, sessions and the previous-session archive
//! - `processor` - Timestamp to wavelength interpolation
//! - `controller` - The acquisition state machine
//! - `runner` - Periodic polling loop with cooperative stop

pub mod controller;
pub mod processor;
pub mod runner;
pub mod session;

pub use controller::{ControllerState, SweepController};
pub use runner::{stop_channel, StopHandle, StopSignal};
pub use session::{Cycle, PreviousSessions, Sample, SweepSession};
