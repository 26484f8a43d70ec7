//! One complete harness run: pool + pipeline + aggregator.

use std::num::NonZeroUsize;
use std::time::Instant;

use tracing::{info, warn};

use crate::artifacts::{ArtifactManager, SUMMARY_FILE};
use crate::pipeline;
use crate::pool::WorkerPool;
use crate::process::ChildRegistry;
use crate::report::{Aggregator, Progress, RunSummary};
use crate::toolchain::Toolchain;

/// Size of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunPlan {
    pub trials: u64,
    pub concurrency: NonZeroUsize,
}

/// Run every trial in `plan` and return the final summary.
///
/// The summary is also written to `<scratch>/summary.json` (best-effort).
/// Cancelling `registry` from another thread makes this return promptly with
/// `interrupted` set and in-flight trials left out of the counts.
pub fn execute<T, P>(
    plan: RunPlan,
    toolchain: &T,
    artifacts: &ArtifactManager,
    registry: &ChildRegistry,
    progress: P,
) -> RunSummary
where
    T: Toolchain + ?Sized,
    P: Progress,
{
    let start = Instant::now();
    info!(
        trials = plan.trials,
        concurrency = plan.concurrency.get(),
        scratch = %artifacts.root().display(),
        "run started"
    );

    let mut aggregator = Aggregator::new(plan.trials, artifacts.root().to_owned(), progress);
    let stats = WorkerPool::new(plan.concurrency, registry).run(
        plan.trials,
        |id| pipeline::run_trial(id, toolchain, artifacts),
        |report| aggregator.record(report),
    );

    let summary = aggregator.finish(stats.cancelled || registry.is_cancelled(), start.elapsed());
    info!(
        total = summary.total,
        failed = summary.failed,
        skipped = summary.skipped,
        interrupted = summary.interrupted,
        "run finished"
    );

    match serde_json::to_vec_pretty(&summary) {
        Ok(json) => {
            if let Err(e) = artifacts.write_atomic(SUMMARY_FILE, &json) {
                warn!(error = %e, "failed to write run summary");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize run summary"),
    }

    summary
}
