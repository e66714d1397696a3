// src/component/executor.rs
//! Per-component task executor
//!
//! Every component owns one executor. Requests arriving through inbound
//! ports and tasks the component schedules for itself all run here, either
//! fully serialized (`threads == 1`) or with bounded parallelism.
//!
//! # Architecture
//!
//! ```text
//! handle_request_sync ──┐
//! handle_request_async ─┼──► FIFO queue ──► dispatcher ──► [slot 1 .. slot N]
//! schedule_task (timer) ┘                    (semaphore-bounded)
//! ```
//!
//! A task running on an executor must never call `handle_request_sync` on
//! the same executor: with a single slot the outer task holds it while the
//! inner one waits for it forever. This is a caller obligation and is not
//! detected at runtime.

use crate::component::failure_log::{FailureLog, FailureOrigin};
use crate::utils::errors::{CvmError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

type Job = BoxFuture<'static, ()>;

/// Handle to a delayed or periodic task
///
/// Cancelling prevents future firings only; a firing already running
/// completes normally.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    token: CancellationToken,
    firings: Arc<AtomicU64>,
}

impl ScheduledTask {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            firings: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stop the task; a run already in progress finishes
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of times the task has started running
    pub fn firings(&self) -> u64 {
        self.firings.load(Ordering::Relaxed)
    }
}

/// Task executor owned by a single component
#[derive(Clone)]
pub struct ComponentExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    owner: String,
    threads: usize,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    schedules: CancellationToken,
    failures: Arc<FailureLog>,
}

impl ComponentExecutor {
    /// Create an executor with `threads` concurrent slots
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(owner: impl Into<String>, threads: usize, failures: Arc<FailureLog>) -> Self {
        let owner = owner.into();
        let threads = threads.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();

        debug!("Executor for {} started with {} slot(s)", owner, threads);
        let dispatcher = tokio::spawn(dispatch_loop(receiver, threads));

        Self {
            inner: Arc::new(ExecutorInner {
                owner,
                threads,
                sender: Mutex::new(Some(sender)),
                dispatcher: Mutex::new(Some(dispatcher)),
                schedules: CancellationToken::new(),
                failures,
            }),
        }
    }

    /// URI of the owning component
    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    /// Maximum number of requests served at once
    pub fn threads(&self) -> usize {
        self.inner.threads
    }

    /// Whether new work is refused
    pub fn is_shutdown(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    /// Failures of async requests and scheduled tasks
    pub fn failures(&self) -> &Arc<FailureLog> {
        &self.inner.failures
    }

    fn terminated(&self) -> CvmError {
        CvmError::ComponentTerminated(format!(
            "Executor of {} no longer accepts tasks",
            self.inner.owner
        ))
    }

    fn submit(&self, job: Job) -> Result<()> {
        let guard = self.inner.sender.lock();
        match guard.as_ref() {
            Some(sender) => sender.send(job).map_err(|_| self.terminated()),
            None => Err(self.terminated()),
        }
    }

    fn weak_sender(&self) -> Result<mpsc::WeakUnboundedSender<Job>> {
        let guard = self.inner.sender.lock();
        guard
            .as_ref()
            .map(|sender| sender.downgrade())
            .ok_or_else(|| self.terminated())
    }

    /// Run `task` on this executor and wait for its result
    pub async fn handle_request_sync<F, Fut, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        self.submit(Box::pin(async move {
            let outcome = run_guarded(task()).await;
            let _ = tx.send(outcome);
        }))?;
        metrics::counter!("cvm_requests_total", "mode" => "sync").increment(1);

        rx.await.map_err(|_| {
            CvmError::TaskFailed(format!(
                "Task on {} was dropped before completion",
                self.inner.owner
            ))
        })?
    }

    /// Queue `task` on this executor without waiting
    ///
    /// Failures go to the component's failure log.
    pub fn handle_request_async<F, Fut>(&self, task: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let failures = Arc::clone(&self.inner.failures);

        self.submit(Box::pin(async move {
            if let Err(e) = run_guarded(task()).await {
                failures.record(FailureOrigin::AsyncRequest, e);
            }
        }))?;
        metrics::counter!("cvm_requests_total", "mode" => "async").increment(1);

        Ok(())
    }

    /// Run `task` once after `delay`
    pub fn schedule_task<F, Fut>(&self, task: F, delay: Duration) -> Result<ScheduledTask>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let sender = self.weak_sender()?;
        let token = self.inner.schedules.child_token();
        let handle = ScheduledTask::new(token.clone());
        let firings = Arc::clone(&handle.firings);
        let failures = Arc::clone(&self.inner.failures);

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let Some(sender) = sender.upgrade() else {
                return;
            };

            let job: Job = Box::pin(async move {
                if token.is_cancelled() {
                    return;
                }
                firings.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("cvm_scheduled_firings_total").increment(1);

                if let Err(e) = run_guarded(task()).await {
                    failures.record(FailureOrigin::ScheduledTask, e);
                }
            });
            let _ = sender.send(job);
        });

        trace!("Scheduled task on {} after {:?}", self.inner.owner, delay);
        Ok(handle)
    }

    /// Run `task` every `period`, starting after `delay`
    pub fn schedule_task_at_fixed_rate<F, Fut>(
        &self,
        task: F,
        delay: Duration,
        period: Duration,
    ) -> Result<ScheduledTask>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if period.is_zero() {
            return Err(CvmError::TaskFailed(
                "Period of a repeating task must be positive".to_string(),
            ));
        }

        let sender = self.weak_sender()?;
        let token = self.inner.schedules.child_token();
        let handle = ScheduledTask::new(token.clone());
        let firings = Arc::clone(&handle.firings);
        let failures = Arc::clone(&self.inner.failures);
        let task = Arc::new(task);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(sender) = sender.upgrade() else {
                    break;
                };

                let task = Arc::clone(&task);
                let token = token.clone();
                let firings = Arc::clone(&firings);
                let failures = Arc::clone(&failures);

                let job: Job = Box::pin(async move {
                    if token.is_cancelled() {
                        return;
                    }
                    firings.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("cvm_scheduled_firings_total").increment(1);

                    if let Err(e) = run_guarded(task()).await {
                        failures.record(FailureOrigin::ScheduledTask, e);
                    }
                });

                if sender.send(job).is_err() {
                    break;
                }
            }
        });

        trace!(
            "Scheduled repeating task on {} after {:?} every {:?}",
            self.inner.owner,
            delay,
            period
        );
        Ok(handle)
    }

    /// Stop accepting tasks and wait up to `grace` for queued ones to finish
    ///
    /// Pending scheduled tasks are cancelled.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        self.inner.schedules.cancel();
        drop(self.inner.sender.lock().take());

        let dispatcher = self.inner.dispatcher.lock().take();
        if let Some(mut handle) = dispatcher {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!(
                    "Executor of {} did not drain within {:?}",
                    self.inner.owner, grace
                );
                handle.abort();
                return Err(CvmError::ShutdownFailure(format!(
                    "Executor of {} did not drain within {:?}",
                    self.inner.owner, grace
                )));
            }
        }

        debug!("Executor for {} stopped", self.inner.owner);
        Ok(())
    }
}

async fn dispatch_loop(mut receiver: mpsc::UnboundedReceiver<Job>, threads: usize) {
    let slots = Arc::new(Semaphore::new(threads));

    while let Some(job) = receiver.recv().await {
        let permit = match Arc::clone(&slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        tokio::spawn(async move {
            job.await;
            drop(permit);
        });
    }

    // Drain: every slot returned means no task is in flight
    let _ = slots.acquire_many(threads as u32).await;
}

async fn run_guarded<T>(task: impl Future<Output = Result<T>>) -> Result<T> {
    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(CvmError::TaskFailed(format!(
            "Task panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
