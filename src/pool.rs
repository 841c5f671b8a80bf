//! Admission-controlled worker pool.
//!
//! Transform jobs are CPU-bound and run on a dedicated rayon thread pool,
//! never on the async runtime. A [`tokio::sync::Semaphore`] with one permit
//! per worker is the admission gate:
//!
//! ```text
//! submit ──► wait for permit ──► run on worker ──► result
//!              │ (max_queue)        │ (max_processing)
//!              ▼                    ▼
//!         QueueTimeout      ProcessingDeadlineExceeded (fatal)
//! ```
//!
//! A waiter that exceeds its queue deadline gives up before it is admitted,
//! so its job never runs. A job that exceeds its processing deadline cannot
//! be interrupted: the codec offers no safe cancellation, and the worker may
//! be wedged inside native state. The deadline is watched by a task spawned
//! at admission, independent of the submitter, so an overrun is escalated to
//! the pool's [`FatalHandler`] even after the caller has gone away.
//!
//! There is no FIFO promise between waiters beyond what the semaphore
//! provides. The only guarantees are that at most `capacity` jobs run at once
//! and that a waiter leaves the queue either admitted or timed out.

use crate::imaging::Options;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Semaphore, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, warn};

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Timed out waiting for a worker")]
    QueueTimeout,
    #[error("Job exceeded its processing deadline of {0:?}")]
    ProcessingDeadlineExceeded(Duration),
    #[error("Pool is shut down")]
    Closed,
    #[error("Job panicked")]
    JobPanicked,
    #[error("Worker dropped the job without a result")]
    WorkerLost,
    #[error("Failed to start worker threads: {0}")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

impl PoolError {
    /// Whether the process can no longer be trusted after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PoolError::ProcessingDeadlineExceeded(_))
    }
}

/// Called when a job overruns its processing deadline.
pub type FatalHandler = Arc<dyn Fn(&PoolError) + Send + Sync>;

/// Default [`FatalHandler`]: log and abort, leaving recovery to the
/// process supervisor.
pub fn abort_process(err: &PoolError) {
    error!(error = %err, "Worker is wedged; aborting process");
    std::process::abort();
}

/// Per-job deadlines. Zero falls back to the pool's default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobLimits {
    pub queue: Duration,
    pub processing: Duration,
}

impl From<&Options> for JobLimits {
    fn from(options: &Options) -> Self {
        Self {
            queue: options.max_queue_duration,
            processing: options.max_processing_duration,
        }
    }
}

/// Pick the job's limit, else the pool's. Zero in both means unbounded.
fn effective(job: Duration, pool: Duration) -> Option<Duration> {
    let d = if job.is_zero() { pool } else { job };
    (!d.is_zero()).then_some(d)
}

pub struct Pool {
    permits: Arc<Semaphore>,
    workers: rayon::ThreadPool,
    capacity: usize,
    max_queue_duration: Duration,
    max_processing_duration: Duration,
    on_fatal: FatalHandler,
    closed: AtomicBool,
}

impl Pool {
    /// Create a pool running at most `capacity` jobs at once.
    ///
    /// A `capacity` of 0 uses one worker per available core. A zero
    /// `max_queue_duration` lets waiters queue indefinitely.
    pub fn new(capacity: usize, max_queue_duration: Duration) -> Result<Self, PoolError> {
        let capacity = if capacity == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            capacity
        };
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(capacity)
            .thread_name(|i| format!("thumbd-worker-{i}"))
            .build()?;
        Ok(Self {
            permits: Arc::new(Semaphore::new(capacity)),
            workers,
            capacity,
            max_queue_duration,
            max_processing_duration: Duration::ZERO,
            on_fatal: Arc::new(abort_process),
            closed: AtomicBool::new(false),
        })
    }

    /// Default processing deadline for jobs that don't set one. Zero
    /// disables the deadline.
    pub fn with_max_processing_duration(mut self, max: Duration) -> Self {
        self.max_processing_duration = max;
        self
    }

    /// Replace the default [`abort_process`] handler.
    pub fn with_fatal_handler(mut self, handler: FatalHandler) -> Self {
        self.on_fatal = handler;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of jobs currently holding a worker.
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.permits.available_permits())
    }

    /// Run `job` on a worker once one is free.
    ///
    /// Errors with [`PoolError::QueueTimeout`] if no worker frees up within
    /// the queue deadline, in which case `job` is dropped unrun. A
    /// [`PoolError::ProcessingDeadlineExceeded`] result is fatal (see
    /// [`PoolError::is_fatal`]): the worker is still occupied and may never
    /// come back. The fatal handler has already run by the time it is
    /// returned, and runs even if this future is dropped first.
    pub async fn submit<T, F>(&self, limits: JobLimits, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let acquire = Arc::clone(&self.permits).acquire_owned();
        let permit = match effective(limits.queue, self.max_queue_duration) {
            Some(deadline) => match timeout(deadline, acquire).await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(?deadline, capacity = self.capacity, "Queue deadline exceeded");
                    return Err(PoolError::QueueTimeout);
                }
            },
            None => acquire.await,
        }
        .map_err(|_| PoolError::Closed)?;

        // Shutdown may have started while we waited.
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        debug!(in_flight = self.in_flight(), "Job admitted");

        let (tx, rx) = oneshot::channel();
        self.workers.spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(job));
            drop(permit);
            // The watchdog may have given up on a deadline.
            let _ = tx.send(result);
        });

        let (reply, outcome) = oneshot::channel();
        let deadline = effective(limits.processing, self.max_processing_duration);
        let on_fatal = Arc::clone(&self.on_fatal);
        tokio::spawn(async move {
            let result = watch(rx, deadline, on_fatal).await;
            let _ = reply.send(result);
        });

        outcome.await.unwrap_or(Err(PoolError::WorkerLost))
    }

    /// Stop admitting work and wait for in-flight jobs to finish.
    ///
    /// Waiters already queued are turned away with [`PoolError::Closed`].
    /// Calling this more than once is a no-op.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        // Holding every permit means nothing else is running.
        if let Ok(drained) = self.permits.acquire_many(all).await {
            drained.forget();
        }
        self.permits.close();
        debug!("Pool drained");
    }
}

/// Wait for a running job's result, escalating an overrun to `on_fatal`.
async fn watch<T>(
    result: oneshot::Receiver<std::thread::Result<T>>,
    deadline: Option<Duration>,
    on_fatal: FatalHandler,
) -> Result<T, PoolError> {
    let outcome = match deadline {
        Some(deadline) => match timeout(deadline, result).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(?deadline, "Job exceeded processing deadline");
                let err = PoolError::ProcessingDeadlineExceeded(deadline);
                on_fatal(&err);
                return Err(err);
            }
        },
        None => result.await,
    };

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => {
            error!("Job panicked");
            Err(PoolError::JobPanicked)
        }
        Err(_) => Err(PoolError::WorkerLost),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn limits(queue_ms: u64, processing_ms: u64) -> JobLimits {
        JobLimits {
            queue: Duration::from_millis(queue_ms),
            processing: Duration::from_millis(processing_ms),
        }
    }

    /// A fatal handler that raises a flag instead of aborting the test run.
    fn flagging_handler() -> (FatalHandler, Arc<AtomicBool>) {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handler: FatalHandler = Arc::new(move |_: &PoolError| flag.store(true, Ordering::SeqCst));
        (handler, fired)
    }

    async fn wait_for_in_flight(pool: &Pool, n: usize) {
        for _ in 0..200 {
            if pool.in_flight() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {n} jobs in flight, got {}", pool.in_flight());
    }

    // =========================================================================
    // Limits
    // =========================================================================

    #[test]
    fn job_limit_overrides_pool_default() {
        let ms = Duration::from_millis;
        assert_eq!(effective(ms(10), ms(50)), Some(ms(10)));
        assert_eq!(effective(Duration::ZERO, ms(50)), Some(ms(50)));
        assert_eq!(effective(Duration::ZERO, Duration::ZERO), None);
    }

    #[test]
    fn limits_from_options() {
        let options = Options {
            max_queue_duration: Duration::from_millis(5),
            max_processing_duration: Duration::from_millis(7),
            ..Options::default()
        };
        assert_eq!(JobLimits::from(&options), limits(5, 7));
    }

    #[test]
    fn only_deadline_overrun_is_fatal() {
        assert!(PoolError::ProcessingDeadlineExceeded(Duration::from_secs(1)).is_fatal());
        assert!(!PoolError::QueueTimeout.is_fatal());
        assert!(!PoolError::JobPanicked.is_fatal());
        assert!(!PoolError::Closed.is_fatal());
    }

    #[test]
    fn zero_capacity_uses_cores() {
        let pool = Pool::new(0, Duration::ZERO).unwrap();
        assert!(pool.capacity() >= 1);
    }

    // =========================================================================
    // Admission
    // =========================================================================

    #[tokio::test]
    async fn runs_job_and_returns_result() {
        let pool = Pool::new(1, Duration::ZERO).unwrap();
        let value = pool.submit(JobLimits::default(), || 6 * 7).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let pool = Arc::new(Pool::new(2, Duration::ZERO).unwrap());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                pool.submit(JobLimits::default(), move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn queue_timeout_never_runs_job() {
        let pool = Arc::new(Pool::new(1, Duration::from_millis(50)).unwrap());
        let (release, gate) = mpsc::channel::<()>();

        let blocker = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.submit(JobLimits::default(), move || {
                    gate.recv().ok();
                })
                .await
            })
        };
        wait_for_in_flight(&pool, 1).await;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let result = pool
            .submit(JobLimits::default(), move || flag.store(true, Ordering::SeqCst))
            .await;
        assert!(matches!(result, Err(PoolError::QueueTimeout)));

        release.send(()).unwrap();
        blocker.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn job_queue_limit_overrides_unbounded_pool() {
        let pool = Arc::new(Pool::new(1, Duration::ZERO).unwrap());
        let (release, gate) = mpsc::channel::<()>();

        let blocker = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.submit(JobLimits::default(), move || {
                    gate.recv().ok();
                })
                .await
            })
        };
        wait_for_in_flight(&pool, 1).await;

        let result = pool.submit(limits(30, 0), || ()).await;
        assert!(matches!(result, Err(PoolError::QueueTimeout)));

        release.send(()).unwrap();
        blocker.await.unwrap().unwrap();
    }

    // =========================================================================
    // Processing
    // =========================================================================

    #[tokio::test]
    async fn processing_overrun_is_fatal() {
        let (handler, fired) = flagging_handler();
        let pool = Pool::new(1, Duration::ZERO)
            .unwrap()
            .with_max_processing_duration(Duration::from_millis(30))
            .with_fatal_handler(handler);
        let err = pool
            .submit(JobLimits::default(), || {
                std::thread::sleep(Duration::from_millis(300))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::ProcessingDeadlineExceeded(_)));
        assert!(err.is_fatal());
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn overrun_is_escalated_after_submitter_gives_up() {
        let (handler, fired) = flagging_handler();
        let pool = Pool::new(1, Duration::ZERO)
            .unwrap()
            .with_fatal_handler(handler);

        // The caller stops waiting long before the 50ms ceiling.
        let submit = pool.submit(limits(0, 50), || {
            std::thread::sleep(Duration::from_millis(500))
        });
        assert!(tokio::time::timeout(Duration::from_millis(10), submit).await.is_err());
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(pool.in_flight(), 1);
    }

    #[tokio::test]
    async fn fatal_handler_untouched_when_job_finishes() {
        let (handler, fired) = flagging_handler();
        let pool = Pool::new(1, Duration::ZERO)
            .unwrap()
            .with_fatal_handler(handler);
        assert_eq!(pool.submit(limits(0, 1000), || 3).await.unwrap(), 3);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn job_within_deadline_succeeds() {
        let pool = Pool::new(1, Duration::ZERO).unwrap();
        let value = pool.submit(limits(0, 1000), || "done").await.unwrap();
        assert_eq!(value, "done");
    }

    #[tokio::test]
    async fn panic_is_contained_and_frees_worker() {
        let pool = Pool::new(1, Duration::ZERO).unwrap();
        let err = pool
            .submit(JobLimits::default(), || -> u32 { panic!("codec exploded") })
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::JobPanicked));

        let value = pool.submit(limits(100, 0), || 1).await.unwrap();
        assert_eq!(value, 1);
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_jobs() {
        let pool = Arc::new(Pool::new(1, Duration::ZERO).unwrap());
        let (release, gate) = mpsc::channel::<()>();

        let job = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.submit(JobLimits::default(), move || {
                    gate.recv().ok();
                    "finished"
                })
                .await
            })
        };
        wait_for_in_flight(&pool, 1).await;

        let shutdown = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!shutdown.is_finished());

        release.send(()).unwrap();
        assert_eq!(job.await.unwrap().unwrap(), "finished");
        shutdown.await.unwrap();

        let result = pool.submit(JobLimits::default(), || ()).await;
        assert!(matches!(result, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let pool = Pool::new(2, Duration::ZERO).unwrap();
        pool.shutdown().await;
        pool.shutdown().await;
        assert!(matches!(
            pool.submit(JobLimits::default(), || ()).await,
            Err(PoolError::Closed)
        ));
    }
}
