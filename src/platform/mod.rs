//! Platform deferred-execution capability.
//!
//! Provides the [`DeferredExecutionPort`] trait the scheduler is written
//! against. Hosts with a native background-task facility implement it over
//! that facility; everywhere else [`memory::MemoryPort`] keeps requests in
//! memory and the scheduler's foreground fallback becomes the only trigger.

pub mod memory;

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::scheduler::queue::TaskQueue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A request held by the platform: run `identifier` no earlier than
/// `earliest_begin` (`None` means as soon as permitted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredRequest {
    /// Stable task identifier.
    pub identifier: String,
    /// Earliest time the platform may start the task.
    pub earliest_begin: Option<DateTime<Utc>>,
}

impl DeferredRequest {
    /// Build a request.
    pub fn new(identifier: impl Into<String>, earliest_begin: Option<DateTime<Utc>>) -> Self {
        Self {
            identifier: identifier.into(),
            earliest_begin,
        }
    }
}

/// Callback the platform invokes when it decides to run a task.
pub type LaunchHandler = Arc<dyn Fn(BackgroundInvocation) + Send + Sync>;

/// Capability interface over the platform's deferred-execution facility.
#[async_trait]
pub trait DeferredExecutionPort: Send + Sync {
    /// Install the launch handler for `identifier`.
    ///
    /// Must be safe to call repeatedly; a later call replaces the handler.
    /// Returns `false` when the platform refuses the identifier (for example
    /// because it is missing from a static allow-list).
    fn install_callback(&self, identifier: &str, queue: TaskQueue, on_fire: LaunchHandler)
    -> bool;

    /// Submit (or replace) the request for `request.identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Submission`](crate::error::TaskError::Submission)
    /// when the platform rejects the request.
    fn submit(&self, request: DeferredRequest) -> Result<()>;

    /// Requests the platform is still holding.
    async fn pending_requests(&self) -> Vec<DeferredRequest>;

    /// Withdraw any pending request for `identifier`. No-op if none.
    fn cancel(&self, identifier: &str);
}

/// How a platform-triggered invocation ended, as seen by the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// The scheduler reported completion.
    Completed {
        /// `false` after expiration or when work ended without completing.
        success: bool,
    },
    /// The invocation was dropped without any report.
    Abandoned,
}

/// A single platform-triggered run handed to a [`LaunchHandler`].
///
/// The platform keeps the paired [`InvocationMonitor`] to expire the run and
/// observe how it ended.
#[derive(Debug)]
pub struct BackgroundInvocation {
    identifier: String,
    expiration: CancellationToken,
    report: oneshot::Sender<bool>,
}

impl BackgroundInvocation {
    /// Create an invocation and the monitor the platform side keeps.
    pub fn new(identifier: impl Into<String>) -> (Self, InvocationMonitor) {
        let identifier = identifier.into();
        let expiration = CancellationToken::new();
        let (report, outcome) = oneshot::channel();
        let monitor = InvocationMonitor {
            identifier: identifier.clone(),
            expiration: expiration.clone(),
            outcome,
        };
        (
            Self {
                identifier,
                expiration,
                report,
            },
            monitor,
        )
    }

    /// Identifier this invocation is for.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Token cancelled when the platform forcibly ends this run.
    pub fn expiration(&self) -> CancellationToken {
        self.expiration.clone()
    }

    /// Report the end of this run to the platform.
    pub fn set_completed(self, success: bool) {
        // The platform may have stopped listening; nothing left to tell it.
        let _ = self.report.send(success);
    }
}

/// Platform-side handle to a [`BackgroundInvocation`].
#[derive(Debug)]
pub struct InvocationMonitor {
    identifier: String,
    expiration: CancellationToken,
    outcome: oneshot::Receiver<bool>,
}

impl InvocationMonitor {
    /// Identifier of the monitored invocation.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Forcibly end the invocation (the platform's expiration signal).
    pub fn expire(&self) {
        self.expiration.cancel();
    }

    /// Outcome if the invocation has already reported.
    pub fn try_outcome(&mut self) -> Option<InvocationOutcome> {
        match self.outcome.try_recv() {
            Ok(success) => Some(InvocationOutcome::Completed { success }),
            Err(oneshot::error::TryRecvError::Closed) => Some(InvocationOutcome::Abandoned),
            Err(oneshot::error::TryRecvError::Empty) => None,
        }
    }

    /// Wait for the invocation to report.
    pub async fn outcome(self) -> InvocationOutcome {
        match self.outcome.await {
            Ok(success) => InvocationOutcome::Completed { success },
            Err(_) => InvocationOutcome::Abandoned,
        }
    }
}

/// Create the port for this build.
///
/// No native deferred-execution facility is bound in this crate, so every
/// target gets the in-memory port. Hosts that have one construct the
/// scheduler with their own [`DeferredExecutionPort`] instead.
pub fn create_port(config: &SchedulerConfig) -> Arc<dyn DeferredExecutionPort> {
    Arc::new(memory::MemoryPort::new(
        config.memory_port.max_pending_requests,
    ))
}
