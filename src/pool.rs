//! Pool / Dispatcher — a fixed set of Workers draining a shared job queue
//! (§4.5). The Worker's own `tokio::sync::Mutex` *is* the exclusive-use lock
//! from §4.4: a non-blocking `try_lock_owned` finds an idle Worker without
//! ever waiting on a busy one, matching the lock-per-Worker pattern from
//! Design Notes ("Concurrency primitive choice").

use crate::driver::PageDriver;
use crate::error::EngineError;
use crate::worker::Worker;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// An immutable `(operating_system, region)` pair (§3 "Job").
pub type Job = (String, String);

pub struct Pool<D: PageDriver + 'static> {
    workers: Vec<Arc<Mutex<Worker<D>>>>,
}

impl<D: PageDriver + 'static> Pool<D> {
    /// Launches `n` Worker initializations in parallel; a Worker whose
    /// initialization fails is dropped, and the pool proceeds with `n' <= n`
    /// (§4.5). Logs the discrepancy when one occurs.
    pub async fn build<F, Fut>(n: usize, mut make_worker: F) -> Self
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<Worker<D>, EngineError>>,
    {
        let inits: Vec<Fut> = (0..n).map(&mut make_worker).collect();
        let results = futures::future::join_all(inits).await;

        let mut workers = Vec::with_capacity(n);
        for (id, result) in results.into_iter().enumerate() {
            match result {
                Ok(worker) => workers.push(Arc::new(Mutex::new(worker))),
                Err(e) => warn!(worker_id = id, error = %e, "worker initialization failed, dropping"),
            }
        }
        if workers.len() < n {
            warn!(requested = n, ready = workers.len(), "pool started with fewer workers than requested");
        }
        Pool { workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Drains `jobs` (popped LIFO, per §4.5) across the pool's Workers, each
    /// running at most one job at a time, then tears down every Worker's
    /// Page Driver exactly once.
    pub async fn drain(&self, jobs: Vec<Job>) {
        if self.workers.is_empty() {
            warn!("pool has no ready workers, skipping {} job(s)", jobs.len());
            return;
        }

        let queue = Arc::new(Mutex::new(jobs));
        let mut in_flight = Vec::new();

        'dispatch: loop {
            let mut made_progress = false;

            for worker in &self.workers {
                let guard = match Arc::clone(worker).try_lock_owned() {
                    Ok(guard) => guard,
                    Err(_) => continue, // busy; never block waiting for it
                };

                let job = queue.lock().await.pop();
                match job {
                    Some((os, region)) => {
                        made_progress = true;
                        let handle = tokio::spawn(run_locked_job(guard, os, region));
                        in_flight.push(handle);
                    }
                    None => {
                        drop(guard);
                        break 'dispatch;
                    }
                }
            }

            if !made_progress {
                tokio::task::yield_now().await;
            }
        }

        for handle in in_flight {
            let _ = handle.await;
        }

        for worker in &self.workers {
            worker.lock().await.shutdown();
        }
    }
}

async fn run_locked_job<D: PageDriver + 'static>(
    mut guard: tokio::sync::OwnedMutexGuard<Worker<D>>,
    os: String,
    region: String,
) {
    guard.acquire();
    guard.run_job(&os, &region).await;
}
