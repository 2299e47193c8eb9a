//! Recurring time source for the foreground fallback path.
//!
//! A [`TickSource`] publishes wall-clock instants on a broadcast channel.
//! [`TickSource::interval`] drives it from a tokio interval; tests use
//! [`TickSource::manual`] and call [`TickSource::tick`] with a fake clock.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Ticks buffered per subscriber before the oldest are dropped.
const TICK_CHANNEL_CAPACITY: usize = 16;

/// Broadcast source of "current time" ticks.
#[derive(Debug, Clone)]
pub struct TickSource {
    tx: broadcast::Sender<DateTime<Utc>>,
}

impl TickSource {
    /// Create a source that only ticks when [`tick`](Self::tick) is called.
    pub fn manual() -> Self {
        let (tx, _rx) = broadcast::channel(TICK_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Create a source ticking with `Utc::now()` every `period`.
    ///
    /// The background loop stops when `cancel` fires. Must be called from
    /// within a tokio runtime.
    pub fn interval(period: Duration, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let source = Self::manual();
        let tx = source.tx.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("tick source cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        // No subscribers is fine; ticks are simply dropped.
                        let _ = tx.send(Utc::now());
                    }
                }
            }
        });
        (source, handle)
    }

    /// Publish `now` to every subscriber. Returns the number of receivers.
    pub fn tick(&self, now: DateTime<Utc>) -> usize {
        self.tx.send(now).unwrap_or(0)
    }

    /// Subscribe to future ticks.
    pub fn subscribe(&self) -> broadcast::Receiver<DateTime<Utc>> {
        self.tx.subscribe()
    }
}
