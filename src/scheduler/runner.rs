//! Deferred-task orchestrator.
//!
//! [`TaskScheduler`] races two trigger paths for every scheduled task: the
//! platform's deferred-execution facility (through a
//! [`DeferredExecutionPort`]) and an in-process fallback driven by a
//! recurring [`TickSource`]. Whichever fires first runs the operation; its
//! completion withdraws the other.
//!
//! All bookkeeping lives in one mutex-guarded [`SchedulerState`]. The
//! "is this identifier running" check and the claim that marks it running
//! happen in the same critical section, so two paths firing at the same
//! instant start at most one invocation.

use crate::error::{Result, TaskError};
use crate::platform::{BackgroundInvocation, DeferredExecutionPort, DeferredRequest, LaunchHandler};
use crate::scheduler::operation::{Completion, TaskOperation};
use crate::scheduler::queue::{ExecutionContext, TaskQueue};
use crate::scheduler::ticks::TickSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Which path started an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// The in-process tick-driven fallback.
    Fallback,
    /// The platform's deferred-execution facility.
    Platform,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fallback => write!(f, "fallback"),
            Self::Platform => write!(f, "platform"),
        }
    }
}

/// Public snapshot used by diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Registered identifiers and their queues.
    pub registered: Vec<RegisteredTask>,
    /// Identifiers with an active fallback arm.
    pub armed: Vec<ArmedTask>,
    /// Identifiers with an invocation in flight.
    pub running: Vec<RunningTask>,
}

/// Snapshot entry for a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredTask {
    pub identifier: String,
    pub queue: TaskQueue,
}

/// Snapshot entry for a fallback arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmedTask {
    pub identifier: String,
    pub earliest_begin: Option<DateTime<Utc>>,
}

/// Snapshot entry for an in-flight invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningTask {
    pub identifier: String,
    pub run_id: String,
    pub trigger: Trigger,
}

struct Registration {
    operation: TaskOperation,
    queue: TaskQueue,
    context: ExecutionContext,
}

/// Foreground fallback subscription for one identifier.
#[derive(Debug, Clone, Copy)]
struct FallbackArm {
    earliest_begin: Option<DateTime<Utc>>,
    generation: u64,
}

impl FallbackArm {
    /// A missing date means "as soon as permitted": due on the next tick.
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.earliest_begin.is_none_or(|earliest| now >= earliest)
    }
}

struct RunningInvocation {
    run_id: Uuid,
    trigger: Trigger,
    cancel: CancellationToken,
    /// Present while a platform-triggered run has not yet reported.
    platform_invocation: Option<BackgroundInvocation>,
}

/// Everything needed to start one invocation, captured under the lock.
struct Claim {
    identifier: String,
    run_id: Uuid,
    trigger: Trigger,
    /// Arm generation this run fired for; `None` if nothing was armed.
    generation: Option<u64>,
    operation: TaskOperation,
    queue: TaskQueue,
    context: ExecutionContext,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SchedulerState {
    registrations: HashMap<String, Registration>,
    arms: HashMap<String, FallbackArm>,
    running: HashMap<String, RunningInvocation>,
    next_generation: u64,
}

impl SchedulerState {
    fn arm(&mut self, identifier: &str, earliest_begin: Option<DateTime<Utc>>) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.arms.insert(
            identifier.to_owned(),
            FallbackArm {
                earliest_begin,
                generation,
            },
        );
        generation
    }

    /// Mark `identifier` running and return what is needed to start it.
    ///
    /// Returns `None` if nothing is registered or a run is already in flight.
    fn try_claim(&mut self, identifier: &str, trigger: Trigger) -> Option<Claim> {
        if self.running.contains_key(identifier) {
            debug!(identifier, %trigger, "skipping firing; invocation already running");
            return None;
        }
        let Some(registration) = self.registrations.get(identifier) else {
            debug!(identifier, %trigger, "skipping firing; no operation registered");
            return None;
        };

        let claim = Claim {
            identifier: identifier.to_owned(),
            run_id: Uuid::new_v4(),
            trigger,
            generation: self.arms.get(identifier).map(|arm| arm.generation),
            operation: registration.operation.clone(),
            queue: registration.queue,
            context: registration.context.clone(),
            cancel: CancellationToken::new(),
        };
        self.running.insert(
            identifier.to_owned(),
            RunningInvocation {
                run_id: claim.run_id,
                trigger,
                cancel: claim.cancel.clone(),
                platform_invocation: None,
            },
        );
        Some(claim)
    }

    fn running_run(&mut self, identifier: &str, run_id: Uuid) -> Option<&mut RunningInvocation> {
        self.running
            .get_mut(identifier)
            .filter(|running| running.run_id == run_id)
    }
}

struct Inner {
    port: Arc<dyn DeferredExecutionPort>,
    runtime: Handle,
    main_lane: Arc<Semaphore>,
    state: Mutex<SchedulerState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fire_due(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let claims: Vec<Claim> = {
            let mut state = self.lock();
            let mut due: Vec<String> = state
                .arms
                .iter()
                .filter(|(_, arm)| arm.is_due(now))
                .map(|(identifier, _)| identifier.clone())
                .collect();
            due.sort();
            due.iter()
                .filter_map(|identifier| state.try_claim(identifier, Trigger::Fallback))
                .collect()
        };

        claims
            .into_iter()
            .map(|claim| self.launch(claim, None))
            .collect()
    }

    fn on_platform_launch(self: &Arc<Self>, invocation: BackgroundInvocation) {
        let identifier = invocation.identifier().to_owned();
        let expiration = invocation.expiration();

        let claim = {
            let mut state = self.lock();
            if !state.registrations.contains_key(&identifier) {
                drop(state);
                warn!(identifier = %identifier, "platform launched a task with no registered operation");
                invocation.set_completed(false);
                return;
            }
            match state.try_claim(&identifier, Trigger::Platform) {
                Some(claim) => {
                    if let Some(running) = state.running_run(&identifier, claim.run_id) {
                        running.platform_invocation = Some(invocation);
                    }
                    claim
                }
                None => {
                    drop(state);
                    // The in-flight run covers this launch.
                    invocation.set_completed(true);
                    return;
                }
            }
        };

        // The platform path has no caller to hand the handle to.
        drop(self.launch(claim, Some(expiration)));
    }

    fn launch(
        self: &Arc<Self>,
        claim: Claim,
        expiration: Option<CancellationToken>,
    ) -> JoinHandle<()> {
        let Claim {
            identifier,
            run_id,
            trigger,
            generation,
            operation,
            queue,
            context,
            cancel,
        } = claim;

        info!(identifier = %identifier, %run_id, %trigger, %queue, "starting deferred task");

        let weak = Arc::downgrade(self);
        let completion = {
            let weak = Weak::clone(&weak);
            let identifier = identifier.clone();
            Completion::new(
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.complete(&identifier, run_id, generation);
                    }
                }),
                cancel,
            )
        };
        let guard = RunGuard {
            inner: weak,
            identifier,
            run_id,
        };

        self.runtime.spawn(async move {
            let run = {
                let operation = operation.clone();
                async move {
                    let _permit = context.enter().await;
                    operation.start(completion).await;
                }
            };

            match expiration {
                Some(expiration) => {
                    tokio::select! {
                        _ = run => {}
                        _ = expiration.cancelled() => guard.expire(&operation),
                    }
                }
                None => run.await,
            }
            drop(guard);
        })
    }

    /// Completion signal from a run: release the claim and neutralise both
    /// paths for the firing.
    ///
    /// A due tick may start a new run while this run's work future winds down.
    fn complete(&self, identifier: &str, run_id: Uuid, generation: Option<u64>) {
        let mut state = self.lock();

        let is_current = state.running_run(identifier, run_id).is_some();
        let released = if is_current {
            state.running.remove(identifier)
        } else {
            None
        };
        if let Some(invocation) = released.and_then(|running| running.platform_invocation) {
            invocation.set_completed(true);
        }

        let same_firing = match (generation, state.arms.get(identifier)) {
            (Some(fired), Some(arm)) => arm.generation == fired,
            _ => false,
        };
        if same_firing {
            state.arms.remove(identifier);
            // Under the state lock so a concurrent `schedule` cannot slip a
            // fresh submission in between.
            self.port.cancel(identifier);
        }

        info!(identifier, %run_id, neutralised = same_firing, "deferred task completed");
    }

    fn expire(&self, identifier: &str, run_id: Uuid, operation: &TaskOperation) {
        let invocation = {
            let mut state = self.lock();
            state.running_run(identifier, run_id).and_then(|running| {
                running.cancel.cancel();
                running.platform_invocation.take()
            })
        };

        // Completion already reported this run; the hook is only for runs
        // the platform ends before they finish.
        let Some(invocation) = invocation else {
            debug!(identifier, %run_id, "expiration after completion ignored");
            return;
        };
        warn!(identifier, %run_id, "platform expired running task");
        operation.notify_cancelled();
        invocation.set_completed(false);
    }

    fn finish(&self, identifier: &str, run_id: Uuid) {
        let leftover = {
            let mut state = self.lock();
            let is_current = state
                .running
                .get(identifier)
                .is_some_and(|running| running.run_id == run_id);
            if is_current {
                state
                    .running
                    .remove(identifier)
                    .and_then(|running| running.platform_invocation)
            } else {
                None
            }
        };

        if let Some(invocation) = leftover {
            debug!(identifier, %run_id, "work ended without signalling completion");
            invocation.set_completed(false);
        }
    }
}

/// Releases the running claim when an invocation task ends without having
/// signalled completion, including on panic.
struct RunGuard {
    inner: Weak<Inner>,
    identifier: String,
    run_id: Uuid,
}

impl RunGuard {
    fn expire(&self, operation: &TaskOperation) {
        if let Some(inner) = self.inner.upgrade() {
            inner.expire(&self.identifier, self.run_id, operation);
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.finish(&self.identifier, self.run_id);
        }
    }
}

/// Orchestrates deferred tasks over a platform port plus a foreground fallback.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl TaskScheduler {
    /// Create a scheduler bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Runtime`] when called outside a tokio runtime.
    pub fn new(port: Arc<dyn DeferredExecutionPort>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| TaskError::Runtime(e.to_string()))?;
        Ok(Self::with_runtime(port, runtime))
    }

    /// Create a scheduler that spawns invocations on `runtime`.
    ///
    /// Use this when platform callbacks arrive on threads outside the runtime.
    pub fn with_runtime(port: Arc<dyn DeferredExecutionPort>, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                port,
                runtime,
                main_lane: Arc::new(Semaphore::new(1)),
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Register (or replace) the operation for `identifier`.
    ///
    /// Installs a platform launch handler for the identifier. Nothing runs
    /// until [`schedule`](Self::schedule) is called or a pending platform
    /// request fires. Replacing an operation does not cancel an in-flight run.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidIdentifier`] for an empty identifier.
    pub fn register(&self, identifier: &str, queue: TaskQueue, operation: TaskOperation) -> Result<()> {
        if identifier.trim().is_empty() {
            return Err(TaskError::InvalidIdentifier(identifier.to_owned()));
        }

        let context = ExecutionContext::resolve(queue, &self.inner.main_lane);
        let replaced = self
            .inner
            .lock()
            .registrations
            .insert(
                identifier.to_owned(),
                Registration {
                    operation,
                    queue,
                    context,
                },
            )
            .is_some();

        let weak = Arc::downgrade(&self.inner);
        let on_fire: LaunchHandler = Arc::new(move |invocation: BackgroundInvocation| {
            match weak.upgrade() {
                Some(inner) => inner.on_platform_launch(invocation),
                None => invocation.set_completed(false),
            }
        });
        if !self.inner.port.install_callback(identifier, queue, on_fire) {
            warn!(identifier, "platform refused launch handler; only the fallback path will fire");
        }

        debug!(identifier, %queue, replaced, "registered deferred task");
        Ok(())
    }

    /// Ensure `identifier` runs at or after `earliest_begin`.
    ///
    /// Arms the foreground fallback first, then submits to the platform. A
    /// rejected submission is returned to the caller but leaves the fallback
    /// armed, so the task still runs while the process is alive.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotRegistered`] (with no side effects) for an
    /// unknown identifier, or the port's [`TaskError::Submission`].
    pub fn schedule(&self, identifier: &str, earliest_begin: Option<DateTime<Utc>>) -> Result<()> {
        let mut state = self.inner.lock();
        if !state.registrations.contains_key(identifier) {
            return Err(TaskError::NotRegistered(identifier.to_owned()));
        }

        let generation = state.arm(identifier, earliest_begin);
        debug!(identifier, ?earliest_begin, generation, "armed foreground fallback");

        self.inner
            .port
            .submit(DeferredRequest::new(identifier, earliest_begin))
            .inspect_err(|e| {
                warn!(identifier, "platform submission failed, relying on fallback: {e}");
            })
    }

    /// Withdraw the platform request, tear down the fallback arm, and ask any
    /// in-flight run to stop. Idempotent.
    ///
    /// A running invocation only sees a cooperative signal
    /// ([`Completion::cancelled`]); its expiration hook is not called.
    pub fn cancel_task(&self, identifier: &str) {
        let mut state = self.inner.lock();
        self.inner.port.cancel(identifier);
        let disarmed = state.arms.remove(identifier).is_some();
        let signalled = match state.running.get(identifier) {
            Some(running) => {
                running.cancel.cancel();
                true
            }
            None => false,
        };
        debug!(identifier, disarmed, signalled, "cancelled deferred task");
    }

    /// Earliest-begin time of the platform's pending request for `identifier`.
    ///
    /// `None` when nothing is pending or the request has no date.
    pub async fn ongoing_task(&self, identifier: &str) -> Option<DateTime<Utc>> {
        self.inner
            .port
            .pending_requests()
            .await
            .into_iter()
            .find(|request| request.identifier == identifier)
            .and_then(|request| request.earliest_begin)
    }

    /// Re-arm fallbacks for every request the platform still holds.
    ///
    /// Call once at startup after all `register` calls. Nothing is
    /// resubmitted. Returns the number of fallbacks armed.
    pub async fn prepare_fallbacks_for_existing_requests(&self) -> usize {
        let pending = self.inner.port.pending_requests().await;
        let mut state = self.inner.lock();
        for request in &pending {
            state.arm(&request.identifier, request.earliest_begin);
            if !state.registrations.contains_key(&request.identifier) {
                debug!(
                    identifier = %request.identifier,
                    "armed fallback for a request with no registration yet"
                );
            }
        }
        info!(count = pending.len(), "prepared fallbacks for existing platform requests");
        pending.len()
    }

    /// Run one fallback tick at `now`, starting every due, idle task.
    ///
    /// Returns handles for the invocations started by this tick.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        self.inner.fire_due(now)
    }

    /// Drive the fallback path from `ticks` until `cancel` fires.
    pub fn spawn_fallback_driver(&self, ticks: &TickSource, cancel: CancellationToken) -> JoinHandle<()> {
        let mut rx = ticks.subscribe();
        let weak = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("fallback driver cancelled");
                        break;
                    }
                    tick = rx.recv() => match tick {
                        Ok(now) => {
                            let Some(inner) = weak.upgrade() else { break };
                            inner.fire_due(now);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "fallback driver lagged behind tick source");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    /// Whether an invocation for `identifier` is in flight.
    pub fn is_running(&self, identifier: &str) -> bool {
        self.inner.lock().running.contains_key(identifier)
    }

    /// Whether a fallback arm exists for `identifier`.
    pub fn is_armed(&self, identifier: &str) -> bool {
        self.inner.lock().arms.contains_key(identifier)
    }

    /// Point-in-time view of registrations, arms and running invocations.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.inner.lock();

        let mut registered: Vec<RegisteredTask> = state
            .registrations
            .iter()
            .map(|(identifier, registration)| RegisteredTask {
                identifier: identifier.clone(),
                queue: registration.queue,
            })
            .collect();
        registered.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        let mut armed: Vec<ArmedTask> = state
            .arms
            .iter()
            .map(|(identifier, arm)| ArmedTask {
                identifier: identifier.clone(),
                earliest_begin: arm.earliest_begin,
            })
            .collect();
        armed.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        let mut running: Vec<RunningTask> = state
            .running
            .iter()
            .map(|(identifier, run)| RunningTask {
                identifier: identifier.clone(),
                run_id: run.run_id.to_string(),
                trigger: run.trigger,
            })
            .collect();
        running.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        SchedulerSnapshot {
            registered,
            armed,
            running,
        }
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
