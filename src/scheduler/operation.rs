//! Task operations and the completion token handed to them.
//!
//! A [`TaskOperation`] is an immutable bundle of the work to run and an
//! optional hook for forced expiration. The scheduler passes each run a
//! [`Completion`] instead of letting the work capture the scheduler, so
//! registrations never hold a reference back into scheduler state.

use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type WorkFn = dyn Fn(Completion) -> BoxFuture<'static, ()> + Send + Sync;
type CancelledFn = dyn Fn() + Send + Sync;

/// Work to run for a task plus an optional expiration hook.
///
/// Cloning is cheap; clones share the same closures.
#[derive(Clone)]
pub struct TaskOperation {
    work: Arc<WorkFn>,
    on_cancelled: Option<Arc<CancelledFn>>,
}

impl TaskOperation {
    /// Create an operation from an async work closure.
    ///
    /// The closure receives a [`Completion`]; calling
    /// [`Completion::complete`] tells the scheduler this run is finished.
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: Fn(Completion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            work: Arc::new(move |completion| Box::pin(work(completion))),
            on_cancelled: None,
        }
    }

    /// Attach a hook invoked when the platform expires a running invocation.
    ///
    /// Not invoked on an explicit local cancel.
    pub fn with_on_cancelled<F>(mut self, on_cancelled: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_cancelled = Some(Arc::new(on_cancelled));
        self
    }

    pub(crate) fn start(&self, completion: Completion) -> BoxFuture<'static, ()> {
        (self.work)(completion)
    }

    pub(crate) fn notify_cancelled(&self) {
        if let Some(hook) = &self.on_cancelled {
            hook();
        }
    }
}

impl fmt::Debug for TaskOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOperation")
            .field("on_cancelled", &self.on_cancelled.is_some())
            .finish_non_exhaustive()
    }
}

/// One-shot token a running invocation uses to report that it has finished.
///
/// Dropping the token without calling [`complete`](Self::complete) leaves
/// both trigger paths armed, so the task will be attempted again.
pub struct Completion {
    on_complete: Box<dyn FnOnce() + Send + Sync>,
    cancel: CancellationToken,
}

impl Completion {
    pub(crate) fn new(on_complete: Box<dyn FnOnce() + Send + Sync>, cancel: CancellationToken) -> Self {
        Self {
            on_complete,
            cancel,
        }
    }

    /// Signal that this run is finished.
    pub fn complete(self) {
        (self.on_complete)();
    }

    /// Whether the scheduler has asked this run to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the scheduler asks this run to stop.
    ///
    /// Cancellation is cooperative: work that never checks keeps running.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Clone of the cooperative cancellation token for this run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
