//! Result processor
//!
//! Converts the relative timestamps of each cycle into wavelengths, assuming the
//! laser moved at constant speed between the observed launch and stop.

use tracing::debug;

use super::session::{Cycle, SweepSession};

/// Wavelength for each timestamp on the line through (0, launch) and (duration, stop).
///
/// A cycle without positive finite duration has no defined slope; every sample
/// is then placed at the launch wavelength.
pub fn wavelength_axis(
    launch_nm: f64,
    stop_nm: f64,
    duration_s: f64,
    times: impl Iterator<Item = f64>,
) -> Vec<f64> {
    let slope = if duration_s.is_finite() && duration_s > 0.0 {
        (stop_nm - launch_nm) / duration_s
    } else {
        0.0
    };
    times.map(|t| launch_nm + t * slope).collect()
}

/// Fill `cycle.wavelengths_nm`, one entry per sample
pub fn process_cycle(cycle: &mut Cycle) {
    if cycle.duration_s.is_nan() || cycle.duration_s <= 0.0 {
        debug!(cycle = cycle.index, "Zero-duration cycle, holding launch wavelength");
    }
    cycle.wavelengths_nm = wavelength_axis(
        cycle.launch_wavelength_nm,
        cycle.stop_wavelength_nm,
        cycle.duration_s,
        cycle.times(),
    );
}

/// Process every finalized cycle of `session`
pub fn process_session(session: &mut SweepSession) {
    for cycle in session.cycles_mut() {
        process_cycle(cycle);
    }
}
