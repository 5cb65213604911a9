//! Degraded operation with unreachable instruments
//!
//! A bench pointed at a closed port must still produce a complete run made of
//! sentinel readings, and say so in the logs.

use laser_sweep::config::{InstrumentKind, InstrumentsConfig, SweepConfig};
use laser_sweep::hardware::{Bench, SimClock, SENTINEL_POWER_DBM, SENTINEL_WAVELENGTH_NM};
use laser_sweep::presentation::NullPresenter;
use laser_sweep::sweep::{ControllerState, SweepController};
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn unreachable_bench(clock: &SimClock) -> Bench {
    let port = closed_port().await;
    let mut instruments = InstrumentsConfig::default();
    for device in [&mut instruments.laser, &mut instruments.power_meter] {
        device.kind = InstrumentKind::Tcp;
        device.host = "127.0.0.1".to_string();
        device.port = port;
        device.timeout = Duration::from_millis(200);
    }
    Bench::connect(&instruments, &SweepConfig::default(), clock.clone()).await
}

// =============================================================================
// Bench assembly
// =============================================================================

#[tokio::test]
#[traced_test]
async fn test_closed_port_reports_both_devices() {
    let clock = SimClock::manual();
    let bench = unreachable_bench(&clock).await;

    assert_eq!(bench.status(), "Laser Error. Power Meter Error.");
    assert_eq!(bench.faults().len(), 2);
    assert!(bench.simulated_laser().is_none());
    assert!(logs_contain("Continuing with degraded device"));
}

// =============================================================================
// Sentinel run
// =============================================================================

#[tokio::test]
#[traced_test]
async fn test_sweep_completes_on_sentinels() {
    let clock = SimClock::manual();
    let bench = unreachable_bench(&clock).await;
    let mut controller = SweepController::new(
        bench.laser.clone(),
        bench.power_meter.clone(),
        Arc::new(NullPresenter),
    );
    let config = SweepConfig {
        cycles: 2,
        start_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    controller.start_sweep(config, clock.now()).await.unwrap();

    let mut ticks = 0;
    while controller.state().is_active() && ticks < 10_000 {
        clock.advance(Duration::from_millis(10));
        controller.tick(clock.now()).await;
        ticks += 1;
    }

    assert_eq!(controller.state(), ControllerState::Done);
    let cycles = controller.session().cycles();
    assert_eq!(cycles.len(), 2);
    for cycle in cycles {
        assert_eq!(cycle.launch_wavelength_nm, SENTINEL_WAVELENGTH_NM);
        assert_eq!(cycle.stop_wavelength_nm, SENTINEL_WAVELENGTH_NM);
        assert!(cycle.powers().all(|p| p == SENTINEL_POWER_DBM));
        assert!(cycle.degraded_readings >= cycle.len());
        // Duration falls back to the configured range
        assert!((cycle.duration_s - 2.0).abs() < 0.011);
        assert_eq!(cycle.wavelengths_nm.len(), cycle.len());
    }

    assert!(logs_contain("Substituting sentinel reading"));
    assert!(logs_contain("Sweep start not detected"));
    assert!(logs_contain("Instrument command failed"));
}
