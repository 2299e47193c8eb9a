use crate::helpers::{counting_operation, eventually, idle};
use chrono::{TimeDelta, Utc};
use deferred_tasks::mocks::RecordingPort;
use deferred_tasks::platform::InvocationOutcome;
use deferred_tasks::{DeferredExecutionPort, TaskPriority, TaskQueue, TaskScheduler};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn launch_from_foreign_thread_runs_on_runtime() {
    let port = Arc::new(RecordingPort::new());
    let scheduler = TaskScheduler::with_runtime(
        Arc::clone(&port) as Arc<dyn DeferredExecutionPort>,
        tokio::runtime::Handle::current(),
    );
    let runs = Arc::new(AtomicUsize::new(0));
    let due = Utc::now() + TimeDelta::hours(1);

    scheduler
        .register(
            "sync",
            TaskQueue::Background(TaskPriority::Utility),
            counting_operation(&runs),
        )
        .unwrap();
    scheduler.schedule("sync", Some(due)).unwrap();

    let platform = Arc::clone(&port);
    let monitor = std::thread::spawn(move || platform.deliver("sync"))
        .join()
        .expect("platform thread")
        .expect("handler installed");

    assert_eq!(
        monitor.outcome().await,
        InvocationOutcome::Completed { success: true }
    );
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!scheduler.is_armed("sync"));
    eventually(|| idle(&scheduler, "sync")).await;
    assert!(scheduler.fire_due(due).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_paths_on_many_threads_run_once() {
    let port = Arc::new(RecordingPort::new());
    let scheduler = TaskScheduler::new(Arc::clone(&port) as Arc<dyn DeferredExecutionPort>)
        .expect("scheduler");
    let runs = Arc::new(AtomicUsize::new(0));
    let now = Utc::now();

    scheduler
        .register("sync", TaskQueue::Main, counting_operation(&runs))
        .unwrap();
    scheduler.schedule("sync", Some(now)).unwrap();

    let ticker = scheduler.clone();
    let tick_thread = std::thread::spawn(move || ticker.fire_due(now));
    let platform = Arc::clone(&port);
    let launch_thread = std::thread::spawn(move || platform.deliver("sync"));

    let handles = tick_thread.join().expect("tick thread");
    // `None` means the fallback finished first and withdrew the request.
    let monitor = launch_thread.join().expect("launch thread");

    for handle in handles {
        handle.await.expect("invocation");
    }
    if let Some(monitor) = monitor {
        assert_eq!(
            monitor.outcome().await,
            InvocationOutcome::Completed { success: true }
        );
    }
    eventually(|| idle(&scheduler, "sync")).await;

    // Whichever path won, the task ran exactly once and nothing is left armed.
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!scheduler.is_armed("sync"));
    assert!(scheduler.fire_due(now).is_empty());
}
