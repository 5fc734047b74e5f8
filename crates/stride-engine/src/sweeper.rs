//! Periodic expiry of overdue runs.

use tokio_util::sync::CancellationToken;

use crate::engine::RunEngine;

/// Sweep on the configured interval until `stop` fires.
pub(crate) async fn run(engine: RunEngine, stop: CancellationToken) {
    let every = engine.config().sweep_interval;
    tracing::info!(interval_ms = every.as_millis() as u64, "run expiry sweeper started");

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                tracing::info!("run expiry sweeper stopping");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = engine.sweep_expired().await {
                    tracing::error!(error = %e, "run expiry sweep failed");
                }
            }
        }
    }
}
