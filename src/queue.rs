//! Bounded work queue
//!
//! [`ExecutorQueue`] runs submitted tasks on the tokio runtime with at most
//! `max_workers` of them running at once, and offers a single drain point,
//! [`ExecutorQueue::wait_for_submitted_work`].

use crate::error::panic_message;
use anyhow::{anyhow, Result};
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;

/// Bounded worker pool with a drain operation
pub struct ExecutorQueue {
    name: String,
    handle: Handle,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<Result<()>>>,
    in_flight: Arc<AtomicUsize>,
    /// Notified whenever `in_flight` drops to zero
    idle: Arc<Notify>,
    /// Set once a task failed on a fail-fast queue; queued tasks are skipped
    aborted: Arc<AtomicBool>,
    fail_on_first_exception: bool,
}

impl ExecutorQueue {
    /// Create a queue on the current tokio runtime.
    ///
    /// Panics when called outside of a runtime, like `tokio::spawn`.
    pub fn new(name: &str, max_workers: usize, fail_on_first_exception: bool) -> Self {
        Self {
            name: name.to_string(),
            handle: Handle::current(),
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            tasks: Mutex::new(JoinSet::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            aborted: Arc::new(AtomicBool::new(false)),
            fail_on_first_exception,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of submitted tasks that have not finished yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Enqueue `task`. Returns immediately; safe to call from any thread.
    pub fn submit_work<F>(&self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permits = self.permits.clone();
        let aborted = self.aborted.clone();
        let queue = self.name.clone();
        let fail_fast = self.fail_on_first_exception;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        // Dropped with the task, also when it never got polled
        let done = InFlightGuard {
            in_flight: self.in_flight.clone(),
            idle: self.idle.clone(),
        };

        let work = async move {
            let _done = done;
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| anyhow!("Queue {} was closed", queue))?;
            if aborted.load(Ordering::SeqCst) {
                tracing::debug!(queue = %queue, "Skipping queued task after earlier failure");
                return Ok(());
            }
            // A panic counts as a failure before the permit is handed on
            let result = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(anyhow!("Task panicked: {}", panic_message(&*payload))),
            };
            if fail_fast && result.is_err() {
                aborted.store(true, Ordering::SeqCst);
            }
            result
        };

        self.tasks.lock().spawn_on(work, &self.handle);
    }

    /// Wait until all submitted work is done, including work submitted while waiting.
    ///
    /// On a fail-fast queue the first task error is returned after the
    /// remaining tasks finished or were skipped. With several concurrent
    /// waiters, a task's error goes to the waiter that joined it; every
    /// waiter returns only once nothing is in flight.
    pub async fn wait_for_submitted_work(&self) -> Result<()> {
        let mut first_error: Option<anyhow::Error> = None;

        loop {
            let mut running = std::mem::take(&mut *self.tasks.lock());
            if running.is_empty() {
                // Tasks may still run in a set another waiter is joining
                let idle = self.idle.notified();
                tokio::pin!(idle);
                idle.as_mut().enable();
                if self.in_flight() == 0 && self.tasks.lock().is_empty() {
                    break;
                }
                idle.await;
                continue;
            }

            while let Some(joined) = running.join_next().await {
                let outcome = match joined {
                    Ok(result) => result,
                    Err(join_error) => Err(anyhow!("Task panicked or was cancelled: {join_error}")),
                };
                let Err(err) = outcome else {
                    continue;
                };

                if self.fail_on_first_exception {
                    self.aborted.store(true, Ordering::SeqCst);
                    if first_error.is_none() {
                        first_error = Some(err);
                    } else {
                        tracing::debug!(queue = %self.name, "Additional task failure: {err:#}");
                    }
                } else {
                    tracing::warn!(queue = %self.name, "Task failed: {err:#}");
                }
            }
        }

        self.aborted.store(false, Ordering::SeqCst);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Decrements the in-flight counter when a task ends or is dropped
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_drain_waits_for_work_submitted_from_many_threads() {
        let queue = Arc::new(ExecutorQueue::new("stress", 8, false));
        let completed = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..10 {
                let queue = queue.clone();
                let completed = completed.clone();
                scope.spawn(move || {
                    for _ in 0..100 {
                        let completed = completed.clone();
                        queue.submit_work(async move {
                            completed.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        });
                    }
                });
            }
        });

        assert_ok!(queue.wait_for_submitted_work().await);
        assert_eq!(completed.load(Ordering::SeqCst), 1000);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drain_includes_nested_submissions() {
        let queue = Arc::new(ExecutorQueue::new("nested", 2, false));
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let inner_queue = queue.clone();
            let completed = completed.clone();
            queue.submit_work(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let completed = completed.clone();
                inner_queue.submit_work(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                Ok(())
            });
        }

        assert_ok!(queue.wait_for_submitted_work().await);
        assert_eq!(completed.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_fail_fast_skips_queued_tasks() {
        let queue = ExecutorQueue::new("region", 1, true);
        let started = Arc::new(AtomicUsize::new(0));

        queue.submit_work(async { Err(anyhow!("boom")) });
        for _ in 0..10 {
            let started = started.clone();
            queue.submit_work(async move {
                started.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let err = assert_err!(queue.wait_for_submitted_work().await);
        assert_eq!(err.to_string(), "boom");
        // With a single worker the failing task ran first and the rest never started
        assert_eq!(started.load(Ordering::SeqCst), 0);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failures_do_not_affect_siblings_without_fail_fast() {
        let queue = ExecutorQueue::new("shared", 2, false);
        let completed = Arc::new(AtomicUsize::new(0));

        queue.submit_work(async { Err(anyhow!("boom")) });
        for _ in 0..4 {
            let completed = completed.clone();
            queue.submit_work(async move {
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        assert_ok!(queue.wait_for_submitted_work().await);
        assert_eq!(completed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported_as_failure() {
        let queue = ExecutorQueue::new("panics", 1, true);
        let started = Arc::new(AtomicUsize::new(0));

        queue.submit_work(async {
            let missing: Option<()> = None;
            missing.expect("kaboom");
            Ok(())
        });
        for _ in 0..10 {
            let started = started.clone();
            queue.submit_work(async move {
                started.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let err = assert_err!(queue.wait_for_submitted_work().await);
        assert!(err.to_string().contains("panicked"));
        assert!(err.to_string().contains("kaboom"));
        // The panic stops the queue just like an error
        assert_eq!(started.load(Ordering::SeqCst), 0);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_waiters_both_wait_for_all_work() {
        let queue = Arc::new(ExecutorQueue::new("waiters", 4, false));
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let completed = completed.clone();
            queue.submit_work(async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let first = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_for_submitted_work().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_ok!(queue.wait_for_submitted_work().await);
        assert_eq!(completed.load(Ordering::SeqCst), 4);
        assert_eq!(queue.in_flight(), 0);
        assert_ok!(first.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_on_idle_queue_returns_immediately() {
        let queue = ExecutorQueue::new("idle", 2, false);
        assert_ok!(queue.wait_for_submitted_work().await);
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_queue_is_reusable_after_failure() {
        let queue = ExecutorQueue::new("reuse", 1, true);
        queue.submit_work(async { Err(anyhow!("first")) });
        assert_err!(queue.wait_for_submitted_work().await);

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        queue.submit_work(async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert_ok!(queue.wait_for_submitted_work().await);
        assert!(ran.load(Ordering::SeqCst));
    }
}
