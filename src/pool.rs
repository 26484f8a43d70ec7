//! Bounded worker pool.
//!
//! `concurrency` worker threads claim trial ids from a shared counter, so
//! every id in `[0, count)` is handed out exactly once and at most
//! `concurrency` trials are in flight at any instant. Completed reports flow
//! over a channel to the calling thread, which is the single point where
//! results are consumed.
//!
//! Cancellation goes through the [`ChildRegistry`]: once it is cancelled,
//! workers stop claiming ids, in-flight external processes are killed, and
//! interrupted trials are dropped rather than reported. `run` returns only
//! after every worker has exited.

use std::io;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;

use tracing::{debug, info, warn};

use crate::outcome::TrialId;
use crate::pipeline::{Interrupted, TrialReport};
use crate::process::ChildRegistry;

/// What the pool did, independent of trial outcomes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Ids handed to a worker.
    pub started: u64,
    /// Started trials that produced a report.
    pub completed: u64,
    /// Started trials cut short by cancellation.
    pub interrupted: u64,
    /// Whether cancellation was observed before all ids were claimed or
    /// finished.
    pub cancelled: bool,
}

/// Fixed-size pool of trial workers.
#[derive(Debug)]
pub struct WorkerPool<'r> {
    concurrency: NonZeroUsize,
    registry: &'r ChildRegistry,
    #[cfg(test)]
    refuse_spawns: bool,
}

impl<'r> WorkerPool<'r> {
    #[must_use]
    pub const fn new(concurrency: NonZeroUsize, registry: &'r ChildRegistry) -> Self {
        Self {
            concurrency,
            registry,
            #[cfg(test)]
            refuse_spawns: false,
        }
    }

    /// Run `trial` for every id in `[0, count)`, calling `on_report` on the
    /// calling thread as each trial completes (in completion order).
    ///
    /// If no worker thread can be started at all, the calling thread runs the
    /// trials itself, one at a time.
    pub fn run<F, R>(&self, count: u64, trial: F, mut on_report: R) -> PoolStats
    where
        F: Fn(TrialId) -> Result<TrialReport, Interrupted> + Sync,
        R: FnMut(TrialReport),
    {
        let next = AtomicU64::new(0);
        let interrupted = AtomicU64::new(0);
        let workers = usize::try_from(count)
            .map_or(self.concurrency.get(), |n| n.min(self.concurrency.get()));
        info!(count, workers, "starting trials");

        let mut completed = 0u64;
        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel::<TrialReport>();
            let mut started_workers = 0usize;
            for worker in 0..workers {
                let tx = tx.clone();
                let (next, interrupted, trial) = (&next, &interrupted, &trial);
                let registry = self.registry;
                let body = move || {
                    claim_and_run(count, next, interrupted, registry, trial, |report| {
                        tx.send(report).is_ok()
                    });
                };
                match self.spawn_worker(scope, worker, body) {
                    Ok(_) => started_workers += 1,
                    Err(e) => warn!(worker, error = %e, "failed to spawn worker thread"),
                }
            }
            drop(tx);

            if started_workers == 0 && workers > 0 {
                warn!("no worker thread could be started; running trials on the calling thread");
                claim_and_run(count, &next, &interrupted, self.registry, &trial, |report| {
                    completed += 1;
                    on_report(report);
                    true
                });
            }

            for report in rx {
                completed += 1;
                on_report(report);
            }
        });

        let interrupted = interrupted.into_inner();
        // Ids claimed past `count` are not trials; cap at `count`.
        let claimed = next.into_inner().min(count);
        let stats = PoolStats {
            started: completed + interrupted,
            completed,
            interrupted,
            cancelled: self.registry.is_cancelled() && (interrupted > 0 || claimed < count),
        };
        info!(?stats, "trials finished");
        stats
    }

    fn spawn_worker<'scope, B>(
        &self,
        scope: &'scope thread::Scope<'scope, '_>,
        worker: usize,
        body: B,
    ) -> io::Result<thread::ScopedJoinHandle<'scope, ()>>
    where
        B: FnOnce() + Send + 'scope,
    {
        #[cfg(test)]
        if self.refuse_spawns {
            return Err(io::Error::other("worker threads disabled"));
        }
        thread::Builder::new()
            .name(format!("trial-worker-{worker}"))
            .spawn_scoped(scope, body)
    }
}

/// Claim ids until they run out or the run is cancelled. `emit` hands a
/// finished report on and returns `false` once nobody is listening.
fn claim_and_run<F>(
    count: u64,
    next: &AtomicU64,
    interrupted: &AtomicU64,
    registry: &ChildRegistry,
    trial: &F,
    mut emit: impl FnMut(TrialReport) -> bool,
) where
    F: Fn(TrialId) -> Result<TrialReport, Interrupted>,
{
    while !registry.is_cancelled() {
        let id = next.fetch_add(1, Ordering::SeqCst);
        if id >= count {
            break;
        }
        match trial(id) {
            Ok(report) => {
                if !emit(report) {
                    break;
                }
            }
            Err(e) => {
                debug!(%e, "dropping interrupted trial");
                interrupted.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}
