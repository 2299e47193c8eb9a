//! Demo binary: schedules one task a few seconds out and waits for it.
//!
//! Usage: `deferred-tasks-demo [CONFIG_PATH] [DELAY_SECS]`
//!
//! Tracing goes to stderr; the final scheduler snapshot is printed to stdout
//! as JSON.

use chrono::{TimeDelta, Utc};
use deferred_tasks::{
    Completion, SchedulerConfig, TaskOperation, TaskPriority, TaskQueue, TaskScheduler, TickSource,
    platform,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const DEMO_TASK: &str = "demo.refresh";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("deferred_tasks=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(SchedulerConfig::default_config_path);
    let delay_secs: i64 = match args.next() {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid DELAY_SECS {raw:?}: {e}"))?,
        None => 3,
    };

    let config = SchedulerConfig::load_or_default(&config_path)?;
    tracing::info!(path = %config_path.display(), ?config, "loaded scheduler config");

    let scheduler = TaskScheduler::new(platform::create_port(&config))?;
    let done = Arc::new(Notify::new());

    let finished = Arc::clone(&done);
    scheduler.register(
        DEMO_TASK,
        TaskQueue::Background(TaskPriority::Utility),
        TaskOperation::new(move |completion: Completion| {
            let finished = Arc::clone(&finished);
            async move {
                tracing::info!("demo task running");
                tokio::time::sleep(Duration::from_millis(200)).await;
                completion.complete();
                finished.notify_one();
            }
        })
        .with_on_cancelled(|| tracing::warn!("demo task expired")),
    )?;

    let restored = scheduler.prepare_fallbacks_for_existing_requests().await;
    tracing::info!(restored, "reconciled existing requests");

    let due = Utc::now() + TimeDelta::seconds(delay_secs);
    if let Err(e) = scheduler.schedule(DEMO_TASK, Some(due)) {
        if !e.is_recoverable() {
            return Err(e.into());
        }
        tracing::warn!("continuing on fallback only: {e}");
    }
    tracing::info!(
        ongoing = ?scheduler.ongoing_task(DEMO_TASK).await,
        "demo task scheduled"
    );

    let cancel = CancellationToken::new();
    let (ticks, tick_loop) = TickSource::interval(config.tick_interval(), cancel.child_token());
    let driver = scheduler.spawn_fallback_driver(&ticks, cancel.child_token());

    let wait = Duration::from_secs(delay_secs.unsigned_abs() + 30);
    tokio::select! {
        _ = done.notified() => tracing::info!("demo task finished"),
        _ = tokio::time::sleep(wait) => tracing::warn!("gave up waiting for demo task"),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted; cancelling demo task");
            scheduler.cancel_task(DEMO_TASK);
        }
    }

    cancel.cancel();
    let _ = tokio::join!(tick_loop, driver);

    println!("{}", serde_json::to_string_pretty(&scheduler.snapshot())?);
    Ok(())
}
