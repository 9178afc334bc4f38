//! Periodic background loops for readtrack.
//!
//! Three loops keep the platform consistent: the session cleanup sweep,
//! the telemetry flush, and the upload scan. Each is a [`PeriodicTask`]
//! driven by a [`TickScheduler`] and started with [`spawn_periodic`].
//!
//! # Shutdown
//!
//! Every loop watches a child of a shared `CancellationToken`. Cancelling
//! stops the ticking, lets an in-progress run finish, then runs
//! [`PeriodicTask::drain`] once. Buffers use the drain to persist whatever
//! is still in memory.
//!
//! # Disabled loops
//!
//! An interval of zero disables ticking entirely; the loop waits for
//! cancellation and drains. Tests use this to drive runs by hand.

mod scheduler;
mod task;

pub use scheduler::{TickConfig, TickInfo, TickMetrics, TickPolicy, TickScheduler};
pub use task::{LoopHandle, PeriodicTask, spawn_periodic};
