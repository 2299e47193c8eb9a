//! In-memory deferred-execution port for platforms with no native facility.

use super::{DeferredExecutionPort, DeferredRequest, LaunchHandler};
use crate::error::{Result, TaskError};
use crate::scheduler::queue::TaskQueue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

/// Port that only remembers requests; it never fires anything itself.
///
/// Requests do not survive the process, so relaunch reconciliation finds
/// nothing here and reliability rests entirely on the foreground fallback.
#[derive(Debug)]
pub struct MemoryPort {
    requests: Mutex<BTreeMap<String, Option<DateTime<Utc>>>>,
    max_pending: usize,
}

impl MemoryPort {
    /// Create a port accepting at most `max_pending` distinct identifiers.
    pub fn new(max_pending: usize) -> Self {
        Self {
            requests: Mutex::new(BTreeMap::new()),
            max_pending,
        }
    }

    /// Number of requests currently held.
    pub fn len(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether no requests are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryPort {
    fn default() -> Self {
        Self::new(crate::config::MemoryPortConfig::default().max_pending_requests)
    }
}

#[async_trait]
impl DeferredExecutionPort for MemoryPort {
    fn install_callback(
        &self,
        identifier: &str,
        _queue: TaskQueue,
        _on_fire: LaunchHandler,
    ) -> bool {
        debug!(identifier, "memory port: callback installation is a no-op");
        true
    }

    fn submit(&self, request: DeferredRequest) -> Result<()> {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        if !requests.contains_key(&request.identifier) && requests.len() >= self.max_pending {
            return Err(TaskError::Submission {
                identifier: request.identifier,
                reason: format!("too many pending requests (limit {})", self.max_pending),
            });
        }
        requests.insert(request.identifier, request.earliest_begin);
        Ok(())
    }

    async fn pending_requests(&self) -> Vec<DeferredRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(identifier, earliest)| DeferredRequest::new(identifier.clone(), *earliest))
            .collect()
    }

    fn cancel(&self, identifier: &str) {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(identifier);
    }
}
