//! Polling loop
//!
//! Calls [`SweepController::tick`] once per poll interval until the run ends or
//! a stop is requested through a [`StopHandle`]. Ticks never overlap: each one
//! runs to completion, including its instrument queries, before the next is
//! scheduled. A stop request is observed between ticks.
//!
//! With a manual [`SimClock`] the loop does not wait in real time; it advances
//! the clock by one poll interval per tick and runs as fast as the runtime allows.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::info;

use super::controller::{ControllerState, SweepController};
use crate::hardware::simulated::SimClock;

/// Requests a cooperative stop of a running loop
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Ask the loop to stop at the next tick boundary
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Whether a stop was requested
    pub fn is_stop_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving side of a [`StopHandle`]
#[derive(Debug)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected stop handle and signal
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

async fn next_tick(ticker: &mut Interval, clock: &SimClock, period: Duration) {
    if clock.is_manual() {
        clock.advance(period);
        tokio::task::yield_now().await;
    } else {
        ticker.tick().await;
    }
}

/// Drive `controller` until it leaves the active states.
///
/// Returns the final state: `Done` when every cycle completed, `Aborted` when
/// stopped, or the unchanged state when no run was active.
pub async fn run(
    controller: &mut SweepController,
    clock: &SimClock,
    poll_interval: Duration,
    mut stop: StopSignal,
) -> ControllerState {
    let period = if poll_interval.is_zero() {
        Duration::from_millis(1)
    } else {
        poll_interval
    };
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut listening = true;
    let mut ticks: u64 = 0;

    while controller.state().is_active() {
        if *stop.rx.borrow_and_update() {
            break;
        }
        tokio::select! {
            biased;
            changed = stop.rx.changed(), if listening => {
                // A dropped handle can no longer request a stop
                if changed.is_err() {
                    listening = false;
                }
            }
            _ = next_tick(&mut ticker, clock, period) => {
                controller.tick(clock.now()).await;
                ticks += 1;
            }
        }
    }

    let state = if controller.state().is_active() {
        info!(ticks, "Stop requested");
        controller.stop(clock.now()).await
    } else {
        controller.state()
    };
    info!(ticks, state = %state, "Polling loop finished");
    state
}
