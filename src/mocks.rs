//! Test doubles for the port and the scheduling facade.
//!
//! [`RecordingPort`] stands in for a platform facility: it records every
//! call, keeps a pending-request list, and can [`deliver`](RecordingPort::deliver)
//! a launch the way the platform would. [`RecordingScheduler`] records calls
//! made through [`TaskScheduling`].

use crate::error::{Result, TaskError};
use crate::platform::{
    BackgroundInvocation, DeferredExecutionPort, DeferredRequest, InvocationMonitor, LaunchHandler,
};
use crate::scheduler::{TaskOperation, TaskQueue, TaskScheduling};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Call recorded by [`RecordingPort`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortAction {
    Register { identifier: String, queue: TaskQueue },
    Submit(DeferredRequest),
    PendingRequests,
    Cancel { identifier: String },
}

/// Scriptable in-memory port that records calls.
pub struct RecordingPort {
    actions: Mutex<Vec<PortAction>>,
    install_result: bool,
    submit_error: Mutex<Option<String>>,
    pending: Mutex<Vec<DeferredRequest>>,
    handlers: Mutex<HashMap<String, LaunchHandler>>,
}

impl RecordingPort {
    /// Port that accepts everything and holds nothing.
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            install_result: true,
            submit_error: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Value returned from `install_callback`.
    pub fn with_install_result(mut self, accepted: bool) -> Self {
        self.install_result = accepted;
        self
    }

    /// Seed the pending list, e.g. to simulate state that survived a relaunch.
    pub fn with_pending(self, requests: Vec<DeferredRequest>) -> Self {
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = requests;
        self
    }

    /// Reject every following submission with `reason`.
    pub fn fail_submissions(&self, reason: impl Into<String>) {
        *self
            .submit_error
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
    }

    /// Accept submissions again.
    pub fn accept_submissions(&self) {
        *self
            .submit_error
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Calls recorded so far.
    pub fn actions(&self) -> Vec<PortAction> {
        self.actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear_actions(&self) {
        self.actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Current pending list, without recording a call.
    pub fn pending(&self) -> Vec<DeferredRequest> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Launch `identifier` as the platform would.
    ///
    /// Consumes the pending request and calls the installed handler. Returns
    /// `None` if no handler was installed or no request is pending, since a
    /// platform only launches requests it still holds.
    pub fn deliver(&self, identifier: &str) -> Option<InvocationMonitor> {
        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identifier)
            .cloned()?;
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let held = pending.len();
            pending.retain(|request| request.identifier != identifier);
            if pending.len() == held {
                return None;
            }
        }

        let (invocation, monitor) = BackgroundInvocation::new(identifier);
        handler(invocation);
        Some(monitor)
    }

    fn record(&self, action: PortAction) {
        self.actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(action);
    }
}

impl Default for RecordingPort {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeferredExecutionPort for RecordingPort {
    fn install_callback(&self, identifier: &str, queue: TaskQueue, on_fire: LaunchHandler) -> bool {
        self.record(PortAction::Register {
            identifier: identifier.to_owned(),
            queue,
        });
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identifier.to_owned(), on_fire);
        self.install_result
    }

    fn submit(&self, request: DeferredRequest) -> Result<()> {
        self.record(PortAction::Submit(request.clone()));
        if let Some(reason) = self
            .submit_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(TaskError::Submission {
                identifier: request.identifier,
                reason,
            });
        }

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|existing| existing.identifier != request.identifier);
        pending.push(request);
        Ok(())
    }

    async fn pending_requests(&self) -> Vec<DeferredRequest> {
        self.record(PortAction::PendingRequests);
        self.pending()
    }

    fn cancel(&self, identifier: &str) {
        self.record(PortAction::Cancel {
            identifier: identifier.to_owned(),
        });
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|request| request.identifier != identifier);
    }
}

/// Call recorded by [`RecordingScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerAction {
    Register {
        identifier: String,
        queue: TaskQueue,
    },
    Schedule {
        identifier: String,
        earliest_begin: Option<DateTime<Utc>>,
    },
    OngoingTask {
        identifier: String,
    },
    CancelTask {
        identifier: String,
    },
    PrepareFallbacks,
}

/// [`TaskScheduling`] double that records calls and runs nothing.
pub struct RecordingScheduler {
    actions: Mutex<Vec<SchedulerAction>>,
    ongoing: Option<DateTime<Utc>>,
}

impl RecordingScheduler {
    /// `ongoing` is returned from every `ongoing_task` call.
    pub fn new(ongoing: Option<DateTime<Utc>>) -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            ongoing,
        }
    }

    pub fn actions(&self) -> Vec<SchedulerAction> {
        self.actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, action: SchedulerAction) {
        self.actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(action);
    }
}

#[async_trait]
impl TaskScheduling for RecordingScheduler {
    fn register(&self, identifier: &str, queue: TaskQueue, _operation: TaskOperation) -> Result<()> {
        self.record(SchedulerAction::Register {
            identifier: identifier.to_owned(),
            queue,
        });
        Ok(())
    }

    fn schedule(&self, identifier: &str, earliest_begin: Option<DateTime<Utc>>) -> Result<()> {
        self.record(SchedulerAction::Schedule {
            identifier: identifier.to_owned(),
            earliest_begin,
        });
        Ok(())
    }

    async fn ongoing_task(&self, identifier: &str) -> Option<DateTime<Utc>> {
        self.record(SchedulerAction::OngoingTask {
            identifier: identifier.to_owned(),
        });
        self.ongoing
    }

    fn cancel_task(&self, identifier: &str) {
        self.record(SchedulerAction::CancelTask {
            identifier: identifier.to_owned(),
        });
    }

    async fn prepare_fallbacks_for_existing_requests(&self) -> usize {
        self.record(SchedulerAction::PrepareFallbacks);
        0
    }
}
