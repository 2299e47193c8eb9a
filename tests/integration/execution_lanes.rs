use crate::helpers::{OverlapProbe, join_all, overlapping_operation};
use chrono::Utc;
use deferred_tasks::platform::memory::MemoryPort;
use deferred_tasks::{TaskPriority, TaskQueue, TaskScheduler};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn main_queue_tasks_run_one_at_a_time() {
    let scheduler = TaskScheduler::new(Arc::new(MemoryPort::default())).expect("scheduler");
    let probe = Arc::new(OverlapProbe::default());
    let now = Utc::now();

    for identifier in ["ui.badge", "ui.widget", "ui.banner"] {
        scheduler
            .register(
                identifier,
                TaskQueue::Main,
                overlapping_operation(&probe, Duration::from_millis(20)),
            )
            .unwrap();
        scheduler.schedule(identifier, Some(now)).unwrap();
    }

    let handles = scheduler.fire_due(now);
    assert_eq!(handles.len(), 3);
    join_all(handles).await;

    assert_eq!(probe.started.load(Ordering::SeqCst), 3);
    assert_eq!(probe.max_overlap.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn background_tasks_run_concurrently() {
    let scheduler = TaskScheduler::new(Arc::new(MemoryPort::default())).expect("scheduler");
    let probe = Arc::new(OverlapProbe::default());
    let now = Utc::now();

    for identifier in ["sync", "cleanup"] {
        scheduler
            .register(
                identifier,
                TaskQueue::Background(TaskPriority::Utility),
                overlapping_operation(&probe, Duration::from_millis(50)),
            )
            .unwrap();
        scheduler.schedule(identifier, Some(now)).unwrap();
    }

    join_all(scheduler.fire_due(now)).await;
    assert_eq!(probe.started.load(Ordering::SeqCst), 2);
    assert_eq!(probe.max_overlap.load(Ordering::SeqCst), 2);
}
