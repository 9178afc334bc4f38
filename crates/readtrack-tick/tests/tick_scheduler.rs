//! Integration tests for the tick scheduler and periodic loops.
//!
//! Uses `start_paused = true` so Tokio's clock auto-advances whenever all
//! tasks are idle. Every test is deterministic and instant.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use readtrack_tick::{PeriodicTask, TickConfig, TickPolicy, TickScheduler, spawn_periodic};
use tokio_util::sync::CancellationToken;

// =========================================================================
// Helpers
// =========================================================================

fn every_second() -> TickConfig {
    TickConfig::every(Duration::from_secs(1))
}

#[derive(Default, Clone)]
struct Counters {
    ticks: Arc<AtomicU64>,
    drains: Arc<AtomicU64>,
}

impl Counters {
    fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn drains(&self) -> u64 {
        self.drains.load(Ordering::SeqCst)
    }
}

/// Counts runs; each tick takes `work` of (virtual) time.
struct CountingTask {
    counters: Counters,
    work: Duration,
}

impl PeriodicTask for CountingTask {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn tick(&mut self) {
        tokio::time::sleep(self.work).await;
        self.counters.ticks.fetch_add(1, Ordering::SeqCst);
    }

    async fn drain(&mut self) {
        self.counters.drains.fetch_add(1, Ordering::SeqCst);
    }
}

/// Relies on the default `drain`, which runs one more tick.
struct DefaultDrainTask {
    runs: Arc<AtomicU64>,
}

impl PeriodicTask for DefaultDrainTask {
    fn name(&self) -> &'static str {
        "default-drain"
    }

    async fn tick(&mut self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }
}

fn counting(work: Duration) -> (CountingTask, Counters) {
    let counters = Counters::default();
    (
        CountingTask {
            counters: counters.clone(),
            work,
        },
        counters,
    )
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config_is_disabled() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.interval, Duration::ZERO);
    assert_eq!(cfg.period(), None);
    assert_eq!(cfg.policy, TickPolicy::Skip);
}

#[test]
fn test_every_sets_period() {
    assert_eq!(every_second().period(), Some(Duration::from_secs(1)));
}

#[test]
fn test_validated_clamps_warn_threshold() {
    let cfg = TickConfig {
        budget_warn_threshold: 3.0,
        ..every_second()
    }
    .validated();
    assert_eq!(cfg.budget_warn_threshold, 1.0);
}

// =========================================================================
// Scheduler
// =========================================================================

#[test]
fn test_scheduler_initial_state() {
    let s = TickScheduler::new(every_second());
    assert_eq!(s.tick_count(), 0);
    assert!(!s.is_disabled());
    assert_eq!(s.metrics().total_ticks, 0);
    assert_eq!(s.metrics().max_tick_time, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_fires_after_one_interval() {
    let start = tokio::time::Instant::now();
    let mut s = TickScheduler::new(every_second());

    let info = s.wait_for_tick().await;

    assert_eq!(info.tick, 1);
    assert!(!info.overrun);
    assert_eq!(start.elapsed(), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_ticks_increment_monotonically() {
    let mut s = TickScheduler::new(every_second());

    for expected in 1..=4 {
        assert_eq!(s.wait_for_tick().await.tick, expected);
    }
    assert_eq!(s.metrics().total_ticks, 4);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_scheduler_never_fires() {
    let mut s = TickScheduler::new(TickConfig::default());
    assert!(s.is_disabled());

    let result = tokio::time::timeout(Duration::from_secs(3600), s.wait_for_tick()).await;
    assert!(result.is_err(), "disabled scheduler should pend forever");
}

#[tokio::test(start_paused = true)]
async fn test_initial_jitter_delays_first_tick_within_bound() {
    let start = tokio::time::Instant::now();
    let mut s = TickScheduler::new(every_second().with_jitter(Duration::from_millis(500)));

    s.wait_for_tick().await;

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_tracks_run_time() {
    let mut s = TickScheduler::new(every_second());

    s.wait_for_tick().await;
    tokio::time::advance(Duration::from_millis(200)).await;
    s.record_tick_end();

    assert_eq!(s.metrics().max_tick_time, Duration::from_millis(200));
    assert!((s.metrics().budget_utilization - 0.2).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_without_wait_is_noop() {
    let mut s = TickScheduler::new(every_second());
    s.record_tick_end();
    assert_eq!(s.metrics().max_tick_time, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_disabled_skips_timing() {
    let mut s = TickScheduler::new(TickConfig {
        metrics_enabled: false,
        ..every_second()
    });

    s.wait_for_tick().await;
    tokio::time::advance(Duration::from_millis(300)).await;
    s.record_tick_end();

    assert_eq!(s.metrics().avg_tick_time, Duration::ZERO);
    assert_eq!(s.metrics().max_tick_time, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_skip_policy_slow_run_counts_skipped_ticks() {
    let mut s = TickScheduler::new(every_second());

    s.wait_for_tick().await;
    // The run takes 2.5 intervals; the next deadline is long gone.
    tokio::time::advance(Duration::from_millis(2500)).await;
    s.record_tick_end();

    let info = s.wait_for_tick().await;
    assert!(info.overrun);
    assert!(info.ticks_skipped >= 1);
    assert_eq!(s.metrics().total_overruns, 1);
}

#[tokio::test(start_paused = true)]
async fn test_drop_policy_keeps_original_cadence() {
    let start = tokio::time::Instant::now();
    let mut s = TickScheduler::new(TickConfig {
        policy: TickPolicy::Drop,
        ..every_second()
    });

    s.wait_for_tick().await;
    tokio::time::advance(Duration::from_millis(1500)).await;
    // Late second run fires immediately...
    let info = s.wait_for_tick().await;
    assert!(info.overrun);
    assert_eq!(info.ticks_skipped, 0);
    // ...and the third stays on the 1s grid.
    s.wait_for_tick().await;
    assert_eq!(start.elapsed(), Duration::from_secs(3));
}

// =========================================================================
// spawn_periodic
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_spawn_periodic_ticks_then_drains_once() {
    let shutdown = CancellationToken::new();
    let (task, counters) = counting(Duration::ZERO);

    let handle = spawn_periodic(task, every_second(), &shutdown);
    tokio::time::sleep(Duration::from_millis(3500)).await;
    let metrics = handle.shutdown().await.unwrap();

    assert_eq!(counters.ticks(), 3);
    assert_eq!(counters.drains(), 1);
    assert_eq!(metrics.total_ticks, 3);
}

#[tokio::test(start_paused = true)]
async fn test_spawn_periodic_disabled_only_drains() {
    let shutdown = CancellationToken::new();
    let (task, counters) = counting(Duration::ZERO);

    let handle = spawn_periodic(task, TickConfig::default(), &shutdown);
    tokio::time::sleep(Duration::from_secs(600)).await;
    handle.shutdown().await.unwrap();

    assert_eq!(counters.ticks(), 0);
    assert_eq!(counters.drains(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_parent_token_cancel_stops_loop() {
    let shutdown = CancellationToken::new();
    let (task, counters) = counting(Duration::ZERO);

    let handle = spawn_periodic(task, every_second(), &shutdown);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    shutdown.cancel();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(handle.is_finished());
    assert_eq!(counters.ticks(), 1);
    assert_eq!(counters.drains(), 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_in_progress_run() {
    let shutdown = CancellationToken::new();
    let (task, counters) = counting(Duration::from_secs(5));

    let handle = spawn_periodic(task, every_second(), &shutdown);
    // First run starts at 1s and lasts until 6s.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(counters.ticks(), 0);

    handle.shutdown().await.unwrap();

    assert_eq!(counters.ticks(), 1, "the in-progress run completes");
    assert_eq!(counters.drains(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_default_drain_runs_one_more_tick() {
    let shutdown = CancellationToken::new();
    let runs = Arc::new(AtomicU64::new(0));

    let handle = spawn_periodic(
        DefaultDrainTask { runs: runs.clone() },
        every_second(),
        &shutdown,
    );
    assert_eq!(handle.name(), "default-drain");
    tokio::time::sleep(Duration::from_millis(2500)).await;
    handle.shutdown().await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 3);
}
