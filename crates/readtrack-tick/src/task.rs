//! Periodic background tasks with cooperative shutdown.

use std::future::Future;

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{TickConfig, TickMetrics, TickScheduler};

/// Work that runs on a fixed interval until shutdown.
///
/// Implementors own their error handling: a failed run is logged and the
/// loop carries on with the next tick.
pub trait PeriodicTask: Send + 'static {
    /// Short name used in log fields.
    fn name(&self) -> &'static str;

    /// One run.
    fn tick(&mut self) -> impl Future<Output = ()> + Send;

    /// Final run after shutdown is requested. Defaults to one more
    /// [`tick`](Self::tick).
    fn drain(&mut self) -> impl Future<Output = ()> + Send {
        self.tick()
    }
}

/// Handle to a loop started by [`spawn_periodic`].
#[derive(Debug)]
pub struct LoopHandle {
    name: &'static str,
    token: CancellationToken,
    join: JoinHandle<TickMetrics>,
}

impl LoopHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stops the loop and waits for its drain run to finish.
    ///
    /// A run that is already in progress completes first; no run is
    /// interrupted halfway.
    ///
    /// # Errors
    /// Returns the [`JoinError`] if the task panicked.
    pub async fn shutdown(self) -> Result<TickMetrics, JoinError> {
        self.token.cancel();
        self.join.await
    }
}

/// Spawns `task` on the current runtime.
///
/// The loop stops when `shutdown` (or the returned handle) is cancelled,
/// then calls [`PeriodicTask::drain`] once before exiting. A disabled
/// config (zero interval) never ticks but still drains.
pub fn spawn_periodic<T: PeriodicTask>(
    mut task: T,
    config: TickConfig,
    shutdown: &CancellationToken,
) -> LoopHandle {
    let token = shutdown.child_token();
    let cancelled = token.clone();
    let name = task.name();

    let join = tokio::spawn(async move {
        let mut scheduler = TickScheduler::new(config);
        match scheduler.period() {
            Some(interval) => info!(
                task = name,
                interval_ms = interval.as_millis() as u64,
                "periodic task started"
            ),
            None => info!(task = name, "periodic task disabled, drain only"),
        }

        loop {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => break,
                tick = scheduler.wait_for_tick() => {
                    debug!(task = name, tick = tick.tick, "periodic run");
                    task.tick().await;
                    scheduler.record_tick_end();
                }
            }
        }

        task.drain().await;
        info!(
            task = name,
            runs = scheduler.tick_count(),
            "periodic task stopped"
        );
        scheduler.metrics().clone()
    });

    LoopHandle { name, token, join }
}
