use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::TriggerError;
use crate::worker::Worker;

/// Opaque token that must be presented to release a worker (§4.1). Carries
/// the pool-internal index; embedders never construct one directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cookie(pub(crate) usize);

struct Inner {
    workers: Vec<Arc<dyn Worker>>,
    free: Mutex<VecDeque<usize>>,
    semaphore: Semaphore,
}

/// A fixed population of reusable execution slots (§4.1).
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl WorkerPool {
    pub fn new(workers: Vec<Arc<dyn Worker>>) -> Self {
        let count = workers.len();
        let free = (0..count).collect::<VecDeque<_>>();
        Self {
            inner: Arc::new(Inner {
                workers,
                free: Mutex::new(free),
                semaphore: Semaphore::new(count),
            }),
        }
    }

    pub fn workers(&self) -> &[Arc<dyn Worker>] {
        &self.inner.workers
    }

    pub fn num_available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Non-blocking allocation: fails fast with `NoWorkerAvailable` instead
    /// of waiting for a slot to free up.
    pub fn try_allocate(
        &self,
        topic: &str,
        partition: i32,
    ) -> Result<AllocatedWorker, TriggerError> {
        let _permit = self
            .inner
            .semaphore
            .try_acquire()
            .map_err(|_| TriggerError::NoWorkerAvailable {
                topic: topic.to_string(),
                partition,
            })?;
        _permit.forget();
        Ok(self.take_free_slot())
    }

    /// Blocking allocation: awaits a slot becoming available. Used by the
    /// static allocator, which pre-binds one worker per partition at setup.
    pub async fn allocate_blocking(&self) -> AllocatedWorker {
        let permit = self
            .inner
            .semaphore
            .acquire()
            .await
            .expect("worker pool semaphore should never be closed");
        permit.forget();
        self.take_free_slot()
    }

    fn take_free_slot(&self) -> AllocatedWorker {
        let index = self
            .inner
            .free
            .lock()
            .expect("worker pool free-list mutex poisoned")
            .pop_front()
            .expect("semaphore permit implies a free slot is available");
        AllocatedWorker {
            pool: Some(self.clone()),
            worker: self.inner.workers[index].clone(),
            cookie: Cookie(index),
            released: AtomicBool::new(false),
        }
    }

    /// Returns a worker to the free list. Called by `AllocatedWorker`'s
    /// `Drop`/`release` — never by embedders directly.
    fn return_worker(&self, cookie: Cookie) {
        self.inner
            .free
            .lock()
            .expect("worker pool free-list mutex poisoned")
            .push_back(cookie.0);
        self.inner.semaphore.add_permits(1);
    }
}

/// RAII guard around an allocated worker. Releasing is idempotent and also
/// happens automatically on drop, which is what makes "every successful
/// allocate is followed by exactly one release" a structural guarantee
/// rather than a discipline callers must remember on every exit path.
pub struct AllocatedWorker {
    pool: Option<WorkerPool>,
    worker: Arc<dyn Worker>,
    cookie: Cookie,
    released: AtomicBool,
}

impl AllocatedWorker {
    /// Wraps a worker that is pre-bound to a partition for the life of a
    /// session (§4.2, static allocation mode). Dropping this handle is a
    /// no-op: the static allocator owns the real pool allocation and
    /// returns it to the pool only when the session stops.
    pub(crate) fn pinned(worker: Arc<dyn Worker>, cookie: Cookie) -> Self {
        Self {
            pool: None,
            worker,
            cookie,
            released: AtomicBool::new(true),
        }
    }

    pub fn worker(&self) -> &Arc<dyn Worker> {
        &self.worker
    }

    pub fn cookie(&self) -> Cookie {
        self.cookie
    }

    /// Explicit release, matching the source's `ReleaseWorker(cookie, worker)`
    /// call shape. Safe to call at most once; further drops are no-ops.
    pub fn release(self) {
        // Drop does the actual work; this exists so call sites can express
        // "release now" the way the source's consume loop does.
    }
}

impl Drop for AllocatedWorker {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(pool) = &self.pool {
            debug!(worker = self.cookie.0, "releasing worker back to pool");
            pool.return_worker(self.cookie);
        }
    }
}

/// Attempts to restart a worker that failed to complete within the drain
/// window (§4.4). Escalates to `Unrecoverable` if the worker can't be
/// restarted, matching the source's "panic" stance: partial state here is
/// considered unsafe to continue from.
pub async fn restart_or_escalate(worker: &Arc<dyn Worker>) -> Result<(), TriggerError> {
    if !worker.supports_restart() {
        return Err(TriggerError::Unrecoverable(format!(
            "worker {} does not support restart",
            worker.index()
        )));
    }
    match worker.restart().await {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(worker = worker.index(), error = %err, "worker restart failed");
            Err(TriggerError::Unrecoverable(format!(
                "worker {} failed to restart: {err}",
                worker.index()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{SubmittedEvent, WorkerResponse};
    use std::sync::atomic::AtomicUsize;

    struct FakeWorker {
        idx: usize,
        restart_calls: AtomicUsize,
        supports_restart: bool,
        fail_restart: bool,
    }

    #[async_trait::async_trait]
    impl Worker for FakeWorker {
        async fn submit(
            &self,
            _event: &SubmittedEvent,
        ) -> Result<WorkerResponse, TriggerError> {
            Ok(WorkerResponse::default())
        }

        async fn restart(&self) -> Result<(), TriggerError> {
            self.restart_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_restart {
                Err(TriggerError::Connectivity("boom".to_string()))
            } else {
                Ok(())
            }
        }

        async fn terminate(&self) -> Result<(), TriggerError> {
            Ok(())
        }

        fn supports_restart(&self) -> bool {
            self.supports_restart
        }

        fn is_terminated(&self) -> bool {
            false
        }

        fn index(&self) -> usize {
            self.idx
        }
    }

    fn make_pool(n: usize) -> WorkerPool {
        let workers: Vec<Arc<dyn Worker>> = (0..n)
            .map(|i| {
                Arc::new(FakeWorker {
                    idx: i,
                    restart_calls: AtomicUsize::new(0),
                    supports_restart: true,
                    fail_restart: false,
                }) as Arc<dyn Worker>
            })
            .collect();
        WorkerPool::new(workers)
    }

    #[test]
    fn try_allocate_exhausts_and_release_replenishes() {
        let pool = make_pool(1);
        assert_eq!(pool.num_available(), 1);

        let handle = pool.try_allocate("t", 0).expect("should allocate");
        assert_eq!(pool.num_available(), 0);

        assert!(pool.try_allocate("t", 0).is_err());

        drop(handle);
        assert_eq!(pool.num_available(), 1);
    }

    #[tokio::test]
    async fn allocate_blocking_waits_for_release() {
        let pool = make_pool(1);
        let handle = pool.try_allocate("t", 0).unwrap();

        let pool2 = pool.clone();
        let waiter = tokio::spawn(async move { pool2.allocate_blocking().await });

        tokio::task::yield_now().await;
        drop(handle);

        let second = waiter.await.unwrap();
        assert_eq!(second.cookie().0, 0);
    }

    #[tokio::test]
    async fn restart_or_escalate_unsupported_is_unrecoverable() {
        let worker: Arc<dyn Worker> = Arc::new(FakeWorker {
            idx: 0,
            restart_calls: AtomicUsize::new(0),
            supports_restart: false,
            fail_restart: false,
        });
        let result = restart_or_escalate(&worker).await;
        assert!(matches!(result, Err(TriggerError::Unrecoverable(_))));
    }

    #[tokio::test]
    async fn restart_or_escalate_success() {
        let worker: Arc<dyn Worker> = Arc::new(FakeWorker {
            idx: 0,
            restart_calls: AtomicUsize::new(0),
            supports_restart: true,
            fail_restart: false,
        });
        assert!(restart_or_escalate(&worker).await.is_ok());
    }
}
