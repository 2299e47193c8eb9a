//! Deferred-task scheduling with a foreground fallback.
//!
//! Client code registers named operations and asks for each to run once at
//! or after a target time. Two trigger paths race for every request:
//!
//! - **Platform path**: a [`platform::DeferredExecutionPort`] submits the
//!   request to the host's background-execution facility.
//! - **Fallback path**: a recurring [`scheduler::TickSource`] checks armed
//!   tasks in-process and starts any that are due.
//!
//! Whichever fires first runs the operation; its completion signal withdraws
//! the other. At most one invocation per identifier is ever in flight.
//!
//! # Startup
//!
//! ```rust,ignore
//! let port = platform::create_port(&config);
//! let scheduler = TaskScheduler::new(port)?;
//! scheduler.register("sync", TaskQueue::Background(TaskPriority::Utility), op)?;
//! scheduler.prepare_fallbacks_for_existing_requests().await;
//! let (ticks, _) = TickSource::interval(config.tick_interval(), cancel.clone());
//! scheduler.spawn_fallback_driver(&ticks, cancel.child_token());
//! ```

pub mod config;
pub mod error;
pub mod mocks;
pub mod platform;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use error::{Result, TaskError};
pub use platform::{DeferredExecutionPort, DeferredRequest};
pub use scheduler::{
    Completion, TaskOperation, TaskPriority, TaskQueue, TaskScheduler, TaskScheduling, TickSource,
};
