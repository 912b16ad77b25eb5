//! Global tick driver.
//!
//! One control step: sample every online backend, hand the core to the
//! plant hook, flush staged outputs. Backend failures raise alarms inside
//! the registry phases and never abort a step; the plant must keep running
//! on whatever inputs remain readable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::info;

use crate::runtime::Controller;
use crate::stats::{Phase, TickStats};

/// The plant-control hook, opaque to this core. Runs between the input
/// and output sweeps of every control step, on the driver task.
pub trait Plant: Send + Sync {
    fn run(&self, controller: &Controller);
}

/// Run the per-step pump until shutdown is notified.
pub async fn run_tick_driver(
    controller: Arc<Controller>,
    plant: Option<Arc<dyn Plant>>,
    period: Duration,
    stats: Arc<TickStats>,
    shutdown: Arc<Notify>,
) {
    info!(period_ms = period.as_millis() as u64, "tick driver started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.notified() => {
                info!(ticks = stats.tick_count(), "tick driver shutting down");
                return;
            }
        }
        tick_once(&controller, plant.as_deref(), &stats);
    }
}

/// One control step: input → plant → output, with per-phase timing.
pub(crate) fn tick_once(controller: &Controller, plant: Option<&dyn Plant>, stats: &TickStats) {
    let started = Instant::now();
    let input_ok = controller.registry().input().is_ok();
    stats.record(Phase::Input, started.elapsed(), input_ok);

    let started = Instant::now();
    if let Some(plant) = plant {
        plant.run(controller);
    }
    stats.record(Phase::Plant, started.elapsed(), true);

    let started = Instant::now();
    let output_ok = controller.registry().output().is_ok();
    stats.record(Phase::Output, started.elapsed(), output_ok);

    stats.tick_done();
}
