//! End-to-end sweep scenarios on the simulated bench
//!
//! Time is driven by a manual `SimClock`, so every run is deterministic and
//! finishes instantly.

use laser_sweep::config::{RunConfig, SweepConfig};
use laser_sweep::hardware::{Bench, SimClock, TransmissionModel};
use laser_sweep::presentation::{BroadcastPresenter, NullPresenter, SweepEvent};
use laser_sweep::storage::result_file;
use laser_sweep::sweep::{ControllerState, PreviousSessions, SweepController};
use std::sync::Arc;
use std::time::Duration;

const STEP: Duration = Duration::from_millis(10);

/// Linear response: -20 dBm at 1540 nm, +0.5 dB/nm
const RESPONSE: TransmissionModel = TransmissionModel::Linear {
    reference_nm: 1540.0,
    dbm_at_reference: -20.0,
    slope_db_per_nm: 0.5,
};

fn wavelength_from_power(dbm: f64) -> f64 {
    1540.0 + (dbm + 20.0) / 0.5
}

fn bench(clock: &SimClock) -> Bench {
    Bench::simulated(&SweepConfig::default(), clock.clone(), Duration::ZERO, RESPONSE)
}

fn controller(bench: &Bench) -> SweepController {
    SweepController::new(
        bench.laser.clone(),
        bench.power_meter.clone(),
        Arc::new(NullPresenter),
    )
}

/// Tick every `STEP` until the run ends or `max_ticks` pass
async fn drive(controller: &mut SweepController, clock: &SimClock, max_ticks: usize) -> ControllerState {
    for _ in 0..max_ticks {
        clock.advance(STEP);
        if !controller.tick(clock.now()).await.is_active() {
            break;
        }
    }
    controller.state()
}

// =============================================================================
// Single and multi-cycle runs
// =============================================================================

#[tokio::test]
async fn test_single_cycle_1540_to_1560() {
    let clock = SimClock::manual();
    let bench = bench(&clock);
    let mut controller = controller(&bench);

    controller
        .start_sweep(SweepConfig::default(), clock.now())
        .await
        .unwrap();
    assert_eq!(drive(&mut controller, &clock, 1000).await, ControllerState::Done);

    let session = controller.session();
    assert_eq!(session.completed_cycles(), 1);
    let cycle = &session.cycles()[0];

    assert!((cycle.launch_wavelength_nm - 1540.0).abs() < 0.2);
    assert_eq!(cycle.stop_wavelength_nm, 1560.0);
    assert_eq!(cycle.samples.len(), cycle.wavelengths_nm.len());
    assert!(cycle.len() > 100);

    // Monotonic timestamps and wavelengths
    let times: Vec<f64> = cycle.times().collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
    assert!(cycle.wavelengths_nm.windows(2).all(|w| w[0] <= w[1]));
    let last = cycle.wavelengths_nm.last().copied().unwrap();
    assert!((last - 1560.0).abs() < 1e-9);

    // Interpolated wavelengths agree with what the laser actually did
    for (sample, nm) in cycle.samples.iter().zip(&cycle.wavelengths_nm) {
        let actual = wavelength_from_power(sample.power_dbm);
        assert!(
            (actual - nm).abs() < 0.15,
            "t={} interpolated {} actual {}",
            sample.t_s,
            nm,
            actual
        );
    }
    assert_eq!(cycle.degraded_readings, 0);
}

#[tokio::test]
async fn test_three_cycles_end_in_done() {
    let clock = SimClock::manual();
    let bench = bench(&clock);
    let mut controller = controller(&bench);
    let config = SweepConfig {
        cycles: 3,
        ..Default::default()
    };

    controller.start_sweep(config, clock.now()).await.unwrap();
    let state = drive(&mut controller, &clock, 5000).await;

    assert_eq!(state, ControllerState::Done);
    assert_eq!(controller.session().completed_cycles(), 3);
    assert_eq!(bench.simulated_laser().map(|l| l.sweep_starts()), Some(3));
    for cycle in controller.session().cycles() {
        assert_eq!(cycle.samples.len(), cycle.wavelengths_nm.len());
        assert!(!cycle.is_empty());
    }

    // Further ticks change nothing
    clock.advance(Duration::from_secs(5));
    assert_eq!(controller.tick(clock.now()).await, ControllerState::Done);
    assert_eq!(controller.session().completed_cycles(), 3);
}

#[tokio::test]
async fn test_slow_launch_is_detected_after_start_delay() {
    let clock = SimClock::manual();
    let bench = Bench::simulated(
        &SweepConfig::default(),
        clock.clone(),
        Duration::from_secs(2),
        RESPONSE,
    );
    let mut controller = controller(&bench);
    controller
        .start_sweep(SweepConfig::default(), clock.now())
        .await
        .unwrap();

    clock.advance(Duration::from_millis(1500));
    assert_eq!(
        controller.tick(clock.now()).await,
        ControllerState::AwaitingSweepStart
    );
    clock.advance(Duration::from_millis(600));
    assert_eq!(controller.tick(clock.now()).await, ControllerState::Polling);

    let cycle = controller.session().current().unwrap();
    assert!((cycle.launch_wavelength_nm - 1541.0).abs() < 1e-6);
    assert_eq!(cycle.len(), 1);
}

// =============================================================================
// Stop handling
// =============================================================================

#[tokio::test]
async fn test_abort_mid_polling() {
    let clock = SimClock::manual();
    let bench = bench(&clock);
    let mut controller = controller(&bench);
    let config = SweepConfig {
        cycles: 3,
        ..Default::default()
    };
    controller.start_sweep(config, clock.now()).await.unwrap();

    // Run into the middle of the second cycle
    while controller.session().completed_cycles() < 1 {
        clock.advance(STEP);
        controller.tick(clock.now()).await;
    }
    while controller.state() != ControllerState::Polling {
        clock.advance(STEP);
        controller.tick(clock.now()).await;
    }
    for _ in 0..50 {
        clock.advance(STEP);
        controller.tick(clock.now()).await;
    }
    assert_eq!(controller.state(), ControllerState::Polling);

    clock.advance(Duration::from_millis(5));
    assert_eq!(controller.stop(clock.now()).await, ControllerState::Aborted);

    let cycles = controller.session().cycles();
    assert_eq!(cycles.len(), 2);
    let aborted = &cycles[1];
    assert!((aborted.duration_s - 0.505).abs() < 1e-9);
    assert_eq!(aborted.times().last(), Some(aborted.duration_s));
    assert!(aborted.stop_wavelength_nm < 1560.0);
    assert!(aborted.is_processed());
    assert!(!bench.simulated_laser().unwrap().is_sweeping(1).await);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let clock = SimClock::manual();
    let bench = bench(&clock);
    let mut controller = controller(&bench);

    assert_eq!(controller.stop(clock.now()).await, ControllerState::Idle);

    controller
        .start_sweep(SweepConfig::default(), clock.now())
        .await
        .unwrap();
    drive(&mut controller, &clock, 1000).await;
    assert_eq!(controller.state(), ControllerState::Done);

    let before = controller.snapshot();
    assert_eq!(controller.stop(clock.now()).await, ControllerState::Done);
    assert_eq!(controller.stop(clock.now()).await, ControllerState::Done);
    assert_eq!(controller.session().completed_cycles(), before.completed_cycles());
    assert_eq!(controller.session().total_samples(), before.total_samples());
}

#[tokio::test]
async fn test_immediate_abort_produces_zero_duration_cycle() {
    let clock = SimClock::manual();
    let bench = bench(&clock);
    let mut controller = controller(&bench);

    controller
        .start_sweep(SweepConfig::default(), clock.now())
        .await
        .unwrap();
    assert_eq!(controller.stop(clock.now()).await, ControllerState::Aborted);

    let cycle = &controller.session().cycles()[0];
    assert_eq!(cycle.duration_s, 0.0);
    assert_eq!(cycle.samples.len(), cycle.wavelengths_nm.len());
    assert!(cycle
        .wavelengths_nm
        .iter()
        .all(|nm| *nm == cycle.launch_wavelength_nm));
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn test_persist_then_load_roundtrip() {
    let clock = SimClock::manual();
    let bench = bench(&clock);
    let mut controller = controller(&bench);
    let config = SweepConfig {
        cycles: 2,
        ..Default::default()
    };
    controller.start_sweep(config, clock.now()).await.unwrap();
    drive(&mut controller, &clock, 5000).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result.txt");
    result_file::persist(controller.session(), &path).unwrap();

    let mut previous = PreviousSessions::new();
    previous.extend(result_file::load(&path).unwrap());

    let saved = controller.session().cycles();
    assert_eq!(previous.len(), saved.len());
    for (loaded, cycle) in previous.cycles().iter().zip(saved) {
        assert_eq!(loaded.len(), cycle.len());
        for (a, b) in loaded.samples.iter().zip(&cycle.samples) {
            assert!((a.t_s - b.t_s).abs() <= 1e-4);
            assert!((a.power_dbm - b.power_dbm).abs() <= 1e-4);
        }
        for (a, b) in loaded.wavelengths_nm.iter().zip(&cycle.wavelengths_nm) {
            assert!((a - b).abs() <= 1e-4);
        }
    }
}

#[tokio::test]
async fn test_recovery_file_follows_each_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let recovery = dir.path().join("temp_results.txt");

    let clock = SimClock::manual();
    let bench = bench(&clock);
    let mut controller = controller(&bench).with_recovery_file(&recovery);
    let config = SweepConfig {
        cycles: 2,
        ..Default::default()
    };
    controller.start_sweep(config, clock.now()).await.unwrap();

    while controller.state() != ControllerState::FinalizingCycle {
        clock.advance(STEP);
        controller.tick(clock.now()).await;
    }
    assert_eq!(result_file::load(&recovery).unwrap().len(), 1);

    drive(&mut controller, &clock, 5000).await;
    assert_eq!(result_file::load(&recovery).unwrap().len(), 2);
}

#[tokio::test]
async fn test_malformed_previous_file_leaves_archive_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.txt");
    let bad = dir.path().join("bad.txt");

    let clock = SimClock::manual();
    let bench = bench(&clock);
    let mut controller = controller(&bench).with_run_config(RunConfig {
        live_plot: false,
        ..Default::default()
    });
    controller
        .start_sweep(SweepConfig::default(), clock.now())
        .await
        .unwrap();
    drive(&mut controller, &clock, 1000).await;
    result_file::persist(controller.session(), &good).unwrap();
    std::fs::write(&bad, "0_Time (s)\t0_Wavelength (nm)\t0_Power (dBm)\nx\ty\tz\n").unwrap();

    assert_eq!(controller.load_previous(&good).unwrap(), 1);
    assert!(controller.load_previous(&bad).is_err());
    assert_eq!(controller.previous().len(), 1);

    assert_eq!(controller.load_previous(&good).unwrap(), 1);
    assert_eq!(controller.previous().len(), 2);
}

// =============================================================================
// Presentation
// =============================================================================

#[tokio::test]
async fn test_event_stream_of_two_runs() {
    let clock = SimClock::manual();
    let bench = bench(&clock);
    let presenter = Arc::new(BroadcastPresenter::new(10_000));
    let mut events = presenter.subscribe();
    let mut controller = SweepController::new(
        bench.laser.clone(),
        bench.power_meter.clone(),
        presenter.clone(),
    )
    .with_run_config(RunConfig {
        keep_previous: true,
        ..Default::default()
    });

    for _ in 0..2 {
        controller
            .start_sweep(SweepConfig::default(), clock.now())
            .await
            .unwrap();
        drive(&mut controller, &clock, 1000).await;
    }

    let mut statuses = Vec::new();
    let mut live_frames = 0;
    let mut finals = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            SweepEvent::Status { message } => statuses.push(message),
            SweepEvent::LiveFrame { latest, .. } => {
                assert!(latest.is_some());
                live_frames += 1;
            }
            SweepEvent::FinalFrame {
                cycles, previous, ..
            } => finals.push((cycles.len(), previous.len())),
        }
    }

    assert_eq!(
        statuses,
        vec![
            "Measuring...",
            "Measurement finished.",
            "Measuring...",
            "Measurement finished.",
        ]
    );
    assert!(live_frames > 200);
    assert_eq!(finals, vec![(1, 0), (1, 1)]);
}
