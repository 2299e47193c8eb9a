//! Shared helpers for integration tests.

use deferred_tasks::{Completion, TaskOperation, TaskScheduler};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Operation that bumps `counter` and signals completion.
pub(crate) fn counting_operation(counter: &Arc<AtomicUsize>) -> TaskOperation {
    let counter = Arc::clone(counter);
    TaskOperation::new(move |completion: Completion| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            completion.complete();
        }
    })
}

/// Tracks how many runs overlap.
#[derive(Default)]
pub(crate) struct OverlapProbe {
    pub(crate) started: AtomicUsize,
    current: AtomicUsize,
    pub(crate) max_overlap: AtomicUsize,
}

/// Operation that holds its run open for `hold` while recording overlap.
pub(crate) fn overlapping_operation(probe: &Arc<OverlapProbe>, hold: Duration) -> TaskOperation {
    let probe = Arc::clone(probe);
    TaskOperation::new(move |completion: Completion| {
        let probe = Arc::clone(&probe);
        async move {
            probe.started.fetch_add(1, Ordering::SeqCst);
            let now = probe.current.fetch_add(1, Ordering::SeqCst) + 1;
            probe.max_overlap.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(hold).await;
            probe.current.fetch_sub(1, Ordering::SeqCst);
            completion.complete();
        }
    })
}

pub(crate) async fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("invocation finished in time")
            .expect("invocation task");
    }
}

/// Poll until `check` holds, failing after a few seconds.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

pub(crate) fn idle(scheduler: &TaskScheduler, identifier: &str) -> bool {
    !scheduler.is_running(identifier)
}
