use crate::helpers::{counting_operation, join_all};
use chrono::{TimeDelta, Utc};
use deferred_tasks::mocks::{PortAction, RecordingPort};
use deferred_tasks::{DeferredExecutionPort, TaskQueue, TaskScheduler};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn pending_request_survives_scheduler_restart() {
    // The platform outlives the process; the scheduler does not.
    let port = Arc::new(RecordingPort::new());
    let due = Utc::now() + TimeDelta::minutes(15);
    let first_runs = Arc::new(AtomicUsize::new(0));
    {
        let first = TaskScheduler::new(Arc::clone(&port) as Arc<dyn DeferredExecutionPort>)
            .expect("scheduler");
        first
            .register("sync", TaskQueue::Main, counting_operation(&first_runs))
            .unwrap();
        first.schedule("sync", Some(due)).unwrap();
    }
    port.clear_actions();

    let runs = Arc::new(AtomicUsize::new(0));
    let second = TaskScheduler::new(Arc::clone(&port) as Arc<dyn DeferredExecutionPort>)
        .expect("scheduler");
    second
        .register("sync", TaskQueue::Main, counting_operation(&runs))
        .unwrap();
    assert!(!second.is_armed("sync"));
    assert_eq!(second.prepare_fallbacks_for_existing_requests().await, 1);
    assert!(second.is_armed("sync"));

    assert!(second.fire_due(due - TimeDelta::seconds(1)).is_empty());
    join_all(second.fire_due(due)).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(first_runs.load(Ordering::SeqCst), 0);
    assert!(
        !port
            .actions()
            .iter()
            .any(|action| matches!(action, PortAction::Submit(_))),
        "reconciliation must not resubmit"
    );
    assert!(port.pending().is_empty());
}

#[tokio::test]
async fn reconciliation_arms_unregistered_requests_until_registered() {
    let due = Utc::now();
    let port = Arc::new(
        RecordingPort::new().with_pending(vec![deferred_tasks::DeferredRequest::new(
            "late",
            Some(due),
        )]),
    );
    let scheduler = TaskScheduler::new(Arc::clone(&port) as Arc<dyn DeferredExecutionPort>)
        .expect("scheduler");

    assert_eq!(scheduler.prepare_fallbacks_for_existing_requests().await, 1);
    assert!(scheduler.fire_due(due).is_empty(), "no operation yet");

    let runs = Arc::new(AtomicUsize::new(0));
    scheduler
        .register("late", TaskQueue::Main, counting_operation(&runs))
        .unwrap();
    join_all(scheduler.fire_due(due)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
