use crate::helpers::{counting_operation, eventually, join_all};
use chrono::{TimeDelta, Utc};
use deferred_tasks::platform::memory::MemoryPort;
use deferred_tasks::{TaskError, TaskPriority, TaskQueue, TaskScheduler, TickSource};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn quota_rejection_still_runs_via_fallback() {
    let port = Arc::new(MemoryPort::new(1));
    let scheduler = TaskScheduler::new(port.clone()).expect("scheduler");
    let sync_runs = Arc::new(AtomicUsize::new(0));
    let cleanup_runs = Arc::new(AtomicUsize::new(0));
    let now = Utc::now();
    let due = now + TimeDelta::seconds(5);

    scheduler
        .register(
            "sync",
            TaskQueue::Background(TaskPriority::Utility),
            counting_operation(&sync_runs),
        )
        .unwrap();
    scheduler
        .register(
            "cleanup",
            TaskQueue::Background(TaskPriority::Background),
            counting_operation(&cleanup_runs),
        )
        .unwrap();

    scheduler.schedule("sync", Some(due)).unwrap();
    let err = scheduler
        .schedule("cleanup", Some(due))
        .expect_err("memory port quota is one");
    assert!(matches!(err, TaskError::Submission { ref identifier, .. } if identifier == "cleanup"));
    assert_eq!(scheduler.ongoing_task("sync").await, Some(due));
    assert_eq!(scheduler.ongoing_task("cleanup").await, None);

    assert!(scheduler.fire_due(now).is_empty());
    join_all(scheduler.fire_due(due)).await;

    assert_eq!(sync_runs.load(Ordering::SeqCst), 1);
    assert_eq!(cleanup_runs.load(Ordering::SeqCst), 1);
    assert!(port.is_empty(), "completion withdraws the held request");

    assert!(scheduler.fire_due(due + TimeDelta::seconds(1)).is_empty());
}

#[tokio::test]
async fn live_tick_source_runs_due_task() {
    let port = Arc::new(MemoryPort::default());
    let scheduler = TaskScheduler::new(port).expect("scheduler");
    let runs = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();
    let (ticks, tick_loop) = TickSource::interval(Duration::from_millis(10), cancel.child_token());
    let driver = scheduler.spawn_fallback_driver(&ticks, cancel.child_token());

    scheduler
        .register("refresh", TaskQueue::Main, counting_operation(&runs))
        .unwrap();
    scheduler
        .schedule("refresh", Some(Utc::now() + TimeDelta::milliseconds(30)))
        .unwrap();

    eventually(|| runs.load(Ordering::SeqCst) == 1).await;
    eventually(|| !scheduler.is_armed("refresh")).await;

    // Later ticks must not run it again.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    cancel.cancel();
    let (tick_result, driver_result) = tokio::join!(tick_loop, driver);
    tick_result.expect("tick loop");
    driver_result.expect("driver");
}

#[tokio::test]
async fn cancelled_task_never_runs_on_live_ticks() {
    let port = Arc::new(MemoryPort::default());
    let scheduler = TaskScheduler::new(port.clone()).expect("scheduler");
    let runs = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();
    let (ticks, _tick_loop) = TickSource::interval(Duration::from_millis(5), cancel.child_token());
    let _driver = scheduler.spawn_fallback_driver(&ticks, cancel.child_token());

    scheduler
        .register("sync", TaskQueue::Main, counting_operation(&runs))
        .unwrap();
    scheduler
        .schedule("sync", Some(Utc::now() + TimeDelta::milliseconds(40)))
        .unwrap();
    scheduler.cancel_task("sync");
    scheduler.cancel_task("sync");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(port.is_empty());
    cancel.cancel();
}
