//! Periodic refresh schedulers.
//!
//! Both schedulers tick on the configured refresh interval, fan out one unit per task,
//! join them all and only then publish. The stop signal is checked between cycles, so a
//! running cycle always completes.

mod metrics;
mod stats;

pub use metrics::*;
pub use stats::*;

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Timing shared by both schedulers.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub refresh_interval: Duration,
    /// Jitter floor applied inside each per-task unit before it calls the API.
    pub request_delay: Duration,
    pub max_allowed_staleness_steps: u32,
}

/// One scheduler's cycle body.
pub trait Cycle {
    fn name(&self) -> &'static str;

    fn run_cycle(&mut self) -> impl Future<Output = ()> + Send;
}

/// Run `cycle` immediately and then every `period` until `stop` fires.
pub async fn run_until_stopped<C: Cycle + Send>(
    mut cycle: C,
    period: Duration,
    mut stop: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop.recv() => {
                tracing::info!("Stopping {} scheduler...", cycle.name());
                break;
            }
            _ = interval.tick() => {
                cycle.run_cycle().await;
            }
        }
    }
}
