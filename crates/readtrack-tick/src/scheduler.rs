//! Fixed-interval scheduler used by every background loop.

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a run takes longer than its interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TickPolicy {
    /// Skip the missed run(s) and schedule the next one from now.
    #[default]
    Skip,
    /// Keep the original cadence; the next run fires at its planned time,
    /// which may be immediately.
    Drop,
}

/// Configuration for one periodic loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Time between runs. [`Duration::ZERO`] disables the loop: it never
    /// ticks, but still drains on shutdown.
    pub interval: Duration,
    /// Overrun handling policy.
    pub policy: TickPolicy,
    /// Fraction of the interval (0.0–1.0) above which a run logs a warning.
    pub budget_warn_threshold: f64,
    /// Collect run-time averages and maxima.
    pub metrics_enabled: bool,
    /// Random delay (0..max) added before the *first* run so loops created
    /// together don't all hit the disk at the same instant.
    pub initial_jitter: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval: Duration::ZERO,
            policy: TickPolicy::default(),
            budget_warn_threshold: 0.80,
            metrics_enabled: true,
            initial_jitter: Duration::ZERO,
        }
    }
}

impl TickConfig {
    /// A config that runs every `interval` with default settings.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Adds up to `jitter` of random delay before the first run.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.initial_jitter = jitter;
        self
    }

    /// Clamp any out-of-range values so the config is safe to use.
    pub fn validated(mut self) -> Self {
        if !(0.0..=1.0).contains(&self.budget_warn_threshold) {
            warn!(
                threshold = self.budget_warn_threshold,
                "budget_warn_threshold out of range, clamping"
            );
            self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        }
        self
    }

    /// The interval, or `None` when the loop is disabled.
    pub fn period(&self) -> Option<Duration> {
        (!self.interval.is_zero()).then_some(self.interval)
    }
}

// ---------------------------------------------------------------------------
// Tick info and metrics
// ---------------------------------------------------------------------------

/// Returned by [`TickScheduler::wait_for_tick`] for each run.
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing run number (starts at 1).
    pub tick: u64,
    /// `true` if this run fired noticeably late.
    pub overrun: bool,
    /// Runs skipped because of the overrun (0 in normal operation).
    pub ticks_skipped: u64,
}

/// Runtime metrics for a scheduler.
#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Exponential moving average of run time (α = 0.1).
    pub avg_tick_time: Duration,
    pub max_tick_time: Duration,
    /// Last run time divided by the interval. >1.0 means overrun.
    pub budget_utilization: f64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-interval scheduler.
///
/// Sits inside a `tokio::select!` next to a cancellation branch:
///
/// ```ignore
/// loop {
///     tokio::select! {
///         biased;
///         _ = token.cancelled() => break,
///         _ = scheduler.wait_for_tick() => {
///             task.tick().await;
///             scheduler.record_tick_end();
///         }
///     }
/// }
/// ```
///
/// All timing uses Tokio's clock, so `start_paused` tests control it fully.
pub struct TickScheduler {
    config: TickConfig,
    period: Option<Duration>,
    tick_count: u64,
    next_tick: Option<Instant>,
    /// Set by `wait_for_tick`, consumed by `record_tick_end`.
    tick_start: Option<Instant>,
    metrics: TickMetrics,
}

impl TickScheduler {
    /// Creates a scheduler. The first run is due one interval (plus jitter)
    /// from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let period = config.period();

        let next_tick = period.map(|d| {
            let jitter = if config.initial_jitter.is_zero() {
                Duration::ZERO
            } else {
                let max = config.initial_jitter.as_millis().max(1) as u64;
                Duration::from_millis(rand::rng().random_range(0..max))
            };
            Instant::now() + d + jitter
        });

        match period {
            None => debug!("tick scheduler created disabled"),
            Some(d) => debug!(
                interval_ms = d.as_millis() as u64,
                policy = ?config.policy,
                "tick scheduler created"
            ),
        }

        Self {
            config,
            period,
            tick_count: 0,
            next_tick,
            tick_start: None,
            metrics: TickMetrics::default(),
        }
    }

    /// Wait until the next run is due.
    ///
    /// When disabled this future pends forever; `select!` keeps processing
    /// its other branches.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (next, period) = match (self.next_tick, self.period) {
            (Some(next), Some(period)) => (next, period),
            _ => std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = Instant::now();
        self.tick_count += 1;
        self.tick_start = Some(now);

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > period / 10;
        let mut ticks_skipped = 0u64;

        self.next_tick = Some(match self.config.policy {
            TickPolicy::Skip => {
                if overrun {
                    ticks_skipped = (late_by.as_nanos() / period.as_nanos()) as u64;
                    if ticks_skipped > 0 {
                        warn!(
                            tick = self.tick_count,
                            skipped = ticks_skipped,
                            late_ms = late_by.as_millis() as u64,
                            "run overrun, skipping ahead"
                        );
                    }
                }
                now + period
            }
            TickPolicy::Drop => {
                if overrun {
                    warn!(
                        tick = self.tick_count,
                        late_ms = late_by.as_millis() as u64,
                        "run overrun, keeping original schedule"
                    );
                }
                next + period
            }
        });

        if overrun {
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_skipped += ticks_skipped;
        self.metrics.total_ticks += 1;

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    /// Record that the current run has finished.
    ///
    /// Without this call no budget warnings or timing metrics are produced.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = start.elapsed();

        if let Some(period) = self.period {
            let utilization = elapsed.as_secs_f64() / period.as_secs_f64();
            self.metrics.budget_utilization = utilization;

            if utilization >= self.config.budget_warn_threshold {
                warn!(
                    tick = self.tick_count,
                    elapsed_ms = elapsed.as_millis() as u64,
                    interval_ms = period.as_millis() as u64,
                    utilization_pct = format!("{:.1}", utilization * 100.0),
                    "run approaching its interval"
                );
            }
        }

        if self.config.metrics_enabled {
            if elapsed > self.metrics.max_tick_time {
                self.metrics.max_tick_time = elapsed;
            }
            let alpha = 0.1;
            let prev = self.metrics.avg_tick_time.as_secs_f64();
            let curr = elapsed.as_secs_f64();
            self.metrics.avg_tick_time =
                Duration::from_secs_f64(prev * (1.0 - alpha) + curr * alpha);
        }
    }

    /// Whether this scheduler never ticks.
    pub fn is_disabled(&self) -> bool {
        self.period.is_none()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    /// The interval, or `None` when disabled.
    pub fn period(&self) -> Option<Duration> {
        self.period
    }
}
