//! Bounded pool for asynchronous cache rebuilds.
//!
//! The logical-expiration strategy hands rebuilds to this pool and returns
//! to its caller immediately. The pool:
//!
//! - runs at most `workers` rebuilds at once;
//! - keeps at most `queue_capacity` rebuilds waiting, rejecting the rest
//!   instead of blocking the submitter;
//! - runs each job in its own task under `task_deadline` (or the task's own
//!   shorter deadline), so an error, a panic or a loader that never returns
//!   only affects that one job;
//! - always runs the task's completion hook (the lock release) after the
//!   job, whatever the outcome;
//! - logs failures and reports them on a bounded channel, never back to the
//!   submitting caller.
//!
//! The pool is an ordinary value owned by the cache client. Dropping it (or
//! calling [`RebuildScheduler::shutdown`]) closes the queue; workers finish
//! what is already queued and stop.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cacheshield_core::{CacheShieldError, CacheShieldResult, RebuildPoolConfig, Timestamp};
use chrono::Utc;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// A rebuild job plus the hook that must run after it.
pub struct RebuildTask {
    key: String,
    job: BoxFuture<'static, CacheShieldResult<()>>,
    on_complete: BoxFuture<'static, ()>,
    deadline: Option<Duration>,
}

impl RebuildTask {
    pub fn new<J, C>(key: impl Into<String>, job: J, on_complete: C) -> Self
    where
        J: Future<Output = CacheShieldResult<()>> + Send + 'static,
        C: Future<Output = ()> + Send + 'static,
    {
        Self {
            key: key.into(),
            job: Box::pin(job),
            on_complete: Box::pin(on_complete),
            deadline: None,
        }
    }

    /// Cap this task's run time below the pool's `task_deadline`.
    ///
    /// The pool applies whichever of the two is shorter.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Drop the job and run only the completion hook.
    ///
    /// Callers use this for a task the pool rejected, so whatever the hook
    /// releases is not left held.
    pub async fn abandon(self) {
        self.on_complete.await;
    }
}

impl fmt::Debug for RebuildTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebuildTask")
            .field("key", &self.key)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Result of [`RebuildScheduler::submit`].
#[derive(Debug)]
#[must_use = "a rejected task must be abandoned so its completion hook runs"]
pub enum Submission {
    Accepted,
    /// The queue was full or the pool was shut down. The task is handed back.
    Rejected(RebuildTask),
}

impl Submission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Why a rebuild did not complete.
#[derive(Debug, Clone, Error)]
pub enum RebuildFailureReason {
    #[error("rebuild failed: {0}")]
    Failed(CacheShieldError),

    #[error("rebuild exceeded its {0:?} deadline")]
    TimedOut(Duration),

    #[error("rebuild task panicked: {0}")]
    Panicked(String),
}

/// Report of one failed rebuild.
#[derive(Debug, Clone)]
pub struct RebuildFailure {
    pub key: String,
    pub reason: RebuildFailureReason,
    pub failed_at: Timestamp,
}

/// Counters for the pool's lifetime.
#[derive(Debug, Default)]
struct RebuildMetrics {
    submitted: AtomicU64,
    rejected: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    panicked: AtomicU64,
}

/// Point-in-time copy of the pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub submitted: u64,
    pub rejected: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub panicked: u64,
}

/// State shared between the scheduler handle and its workers.
struct Shared {
    metrics: RebuildMetrics,
    in_flight: AtomicUsize,
    idle: Notify,
    failures: mpsc::Sender<RebuildFailure>,
    deadline: Duration,
}

impl Shared {
    async fn run(&self, task: RebuildTask) {
        let RebuildTask {
            key,
            job,
            on_complete,
            deadline,
        } = task;
        let deadline = deadline.map_or(self.deadline, |d| d.min(self.deadline));

        let outcome = match tokio::spawn(tokio::time::timeout(deadline, job)).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => Err(RebuildFailureReason::Failed(err)),
            Ok(Err(_elapsed)) => Err(RebuildFailureReason::TimedOut(deadline)),
            Err(join_err) => Err(RebuildFailureReason::Panicked(join_err.to_string())),
        };

        on_complete.await;

        match outcome {
            Ok(()) => {
                self.metrics.succeeded.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Cache rebuild completed");
            }
            Err(reason) => {
                let counter = match reason {
                    RebuildFailureReason::Failed(_) => &self.metrics.failed,
                    RebuildFailureReason::TimedOut(_) => &self.metrics.timed_out,
                    RebuildFailureReason::Panicked(_) => &self.metrics.panicked,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    key = %key,
                    error = %reason,
                    "Cache rebuild failed; stale entry kept"
                );
                self.report(RebuildFailure {
                    key,
                    reason,
                    failed_at: Utc::now(),
                });
            }
        }

        self.finish_one();
    }

    fn report(&self, failure: RebuildFailure) {
        if let Err(TrySendError::Full(dropped)) = self.failures.try_send(failure) {
            tracing::debug!(key = %dropped.key, "Rebuild failure channel full; report dropped");
        }
    }

    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Fixed-size worker pool executing [`RebuildTask`]s.
pub struct RebuildScheduler {
    sender: Mutex<Option<mpsc::Sender<RebuildTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    failure_rx: Mutex<Option<mpsc::Receiver<RebuildFailure>>>,
    shared: Arc<Shared>,
    config: RebuildPoolConfig,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RebuildScheduler {
    /// Start the pool's workers.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: RebuildPoolConfig) -> Self {
        let worker_count = config.workers.max(1);
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (failure_tx, failure_rx) = mpsc::channel(config.failure_buffer.max(1));

        let shared = Arc::new(Shared {
            metrics: RebuildMetrics::default(),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            failures: failure_tx,
            deadline: config.task_deadline,
        });

        let queue = Arc::new(tokio::sync::Mutex::new(receiver));
        let workers: Vec<JoinHandle<()>> = (0..worker_count)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    loop {
                        let next = queue.lock().await.recv().await;
                        let Some(task) = next else { break };
                        shared.run(task).await;
                    }
                    tracing::debug!(worker, "Rebuild worker stopped");
                })
            })
            .collect();

        tracing::info!(
            workers = worker_count,
            queue_capacity = config.queue_capacity,
            task_deadline_ms = config.task_deadline.as_millis() as u64,
            "Rebuild scheduler started"
        );

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            failure_rx: Mutex::new(Some(failure_rx)),
            shared,
            config,
        }
    }

    pub fn config(&self) -> &RebuildPoolConfig {
        &self.config
    }

    /// Queue a task without waiting.
    pub fn submit(&self, task: RebuildTask) -> Submission {
        let guard = locked(&self.sender);
        let Some(sender) = guard.as_ref() else {
            self.shared.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key = %task.key, "Rebuild scheduler is shut down; task rejected");
            return Submission::Rejected(task);
        };

        // Counted before the send so wait_idle cannot observe a gap.
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(task) {
            Ok(()) => {
                self.shared.metrics.submitted.fetch_add(1, Ordering::Relaxed);
                Submission::Accepted
            }
            Err(TrySendError::Full(task)) | Err(TrySendError::Closed(task)) => {
                self.shared.finish_one();
                self.shared.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    key = %task.key,
                    queue_capacity = self.config.queue_capacity,
                    "Rebuild queue full; task rejected"
                );
                Submission::Rejected(task)
            }
        }
    }

    /// Take the receiving end of the failure channel. Only the first call gets it.
    pub fn take_failures(&self) -> Option<mpsc::Receiver<RebuildFailure>> {
        locked(&self.failure_rx).take()
    }

    /// Tasks accepted but not yet finished, queued ones included.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until every accepted task has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> RebuildStats {
        let m = &self.shared.metrics;
        RebuildStats {
            submitted: m.submitted.load(Ordering::Relaxed),
            rejected: m.rejected.load(Ordering::Relaxed),
            succeeded: m.succeeded.load(Ordering::Relaxed),
            failed: m.failed.load(Ordering::Relaxed),
            timed_out: m.timed_out.load(Ordering::Relaxed),
            panicked: m.panicked.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        locked(&self.sender).is_none()
    }

    /// Stop accepting tasks, let queued tasks finish and join the workers.
    pub async fn shutdown(&self) {
        let Some(sender) = locked(&self.sender).take() else {
            return;
        };
        drop(sender);

        let workers = std::mem::take(&mut *locked(&self.workers));
        for handle in workers {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "Rebuild worker ended abnormally");
            }
        }

        let stats = self.stats();
        tracing::info!(
            submitted = stats.submitted,
            rejected = stats.rejected,
            succeeded = stats.succeeded,
            failed = stats.failed,
            timed_out = stats.timed_out,
            panicked = stats.panicked,
            "Rebuild scheduler stopped"
        );
    }
}

impl fmt::Debug for RebuildScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebuildScheduler")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight())
            .field("stats", &self.stats())
            .finish()
    }
}
