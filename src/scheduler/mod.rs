//! Deferred-task scheduler.
//!
//! Registers named operations and runs each one at or after a target time,
//! using the platform's deferred-execution facility as the primary trigger
//! and an in-process tick-driven fallback that keeps the task alive if the
//! platform is late, suspended, or lost its callback across a relaunch.

pub mod operation;
pub mod queue;
pub mod runner;
pub mod ticks;

pub use operation::{Completion, TaskOperation};
pub use queue::{TaskPriority, TaskQueue};
pub use runner::{SchedulerSnapshot, TaskScheduler, Trigger};
pub use ticks::TickSource;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Scheduling surface handed to application code.
///
/// Depend on this rather than [`TaskScheduler`] so callers can be tested
/// against [`RecordingScheduler`](crate::mocks::RecordingScheduler).
#[async_trait]
pub trait TaskScheduling: Send + Sync {
    /// Register (or replace) the operation for `identifier`.
    fn register(&self, identifier: &str, queue: TaskQueue, operation: TaskOperation) -> Result<()>;

    /// Ensure `identifier` runs at or after `earliest_begin`.
    fn schedule(&self, identifier: &str, earliest_begin: Option<DateTime<Utc>>) -> Result<()>;

    /// Earliest-begin time of the pending platform request, if any.
    async fn ongoing_task(&self, identifier: &str) -> Option<DateTime<Utc>>;

    /// Withdraw every firing opportunity for `identifier`.
    fn cancel_task(&self, identifier: &str);

    /// Re-arm fallbacks for requests that survived a relaunch.
    ///
    /// Only call this after registering every task that may be pending.
    async fn prepare_fallbacks_for_existing_requests(&self) -> usize;
}

#[async_trait]
impl TaskScheduling for TaskScheduler {
    fn register(&self, identifier: &str, queue: TaskQueue, operation: TaskOperation) -> Result<()> {
        TaskScheduler::register(self, identifier, queue, operation)
    }

    fn schedule(&self, identifier: &str, earliest_begin: Option<DateTime<Utc>>) -> Result<()> {
        TaskScheduler::schedule(self, identifier, earliest_begin)
    }

    async fn ongoing_task(&self, identifier: &str) -> Option<DateTime<Utc>> {
        TaskScheduler::ongoing_task(self, identifier).await
    }

    fn cancel_task(&self, identifier: &str) {
        TaskScheduler::cancel_task(self, identifier);
    }

    async fn prepare_fallbacks_for_existing_requests(&self) -> usize {
        TaskScheduler::prepare_fallbacks_for_existing_requests(self).await
    }
}
