//! Execution queue selection for task invocations.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Priority class for background invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Work the user is actively waiting on.
    UserInteractive,
    /// Work the user started and expects soon.
    UserInitiated,
    /// Long-running work with visible progress (sync, downloads).
    Utility,
    /// Maintenance the user never sees (cleanup, indexing).
    Background,
}

/// Which execution context an invocation should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "priority", rename_all = "snake_case")]
pub enum TaskQueue {
    /// Serial main lane: one `Main` invocation at a time across all tasks.
    Main,
    /// Shared pool at the given priority; invocations run concurrently.
    Background(TaskPriority),
}

impl std::fmt::Display for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Background(priority) => write!(f, "background({priority:?})"),
        }
    }
}

/// Resolved execution context for a registered queue.
#[derive(Debug, Clone)]
pub(crate) enum ExecutionContext {
    /// Invocation must hold the main-lane permit while its work runs.
    MainLane(Arc<Semaphore>),
    /// Invocation runs directly on the runtime pool. Priority is reported in
    /// logs only; tokio has no per-task priority.
    Pool,
}

impl ExecutionContext {
    pub(crate) fn resolve(queue: TaskQueue, main_lane: &Arc<Semaphore>) -> Self {
        match queue {
            TaskQueue::Main => Self::MainLane(Arc::clone(main_lane)),
            TaskQueue::Background(_) => Self::Pool,
        }
    }

    /// Wait until this context admits a new invocation.
    ///
    /// The returned permit (if any) must be held for the duration of the work.
    pub(crate) async fn enter(&self) -> Option<OwnedSemaphorePermit> {
        match self {
            // The main lane semaphore is never closed, so an error here only
            // means "run without the lane" rather than "do not run".
            Self::MainLane(lane) => Arc::clone(lane).acquire_owned().await.ok(),
            Self::Pool => None,
        }
    }
}
