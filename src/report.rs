//! Result aggregation and progress reporting.
//!
//! The [`Aggregator`] is the only state shared across trials, and it is not
//! actually shared: it lives on the collector thread that owns the receiving
//! end of the worker pool's channel, and `record` takes `&mut self`. Counts
//! are a commutative tally, so completion order never changes the result.

use std::collections::BTreeMap;
use std::io::{self, IsTerminal as _, Write as _};
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::outcome::{FailReason, Outcome, SkipReason, TrialId};
use crate::pipeline::TrialReport;

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// Counts for the trials that reached an outcome.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Trials the run was asked to perform.
    pub planned: u64,
    /// Trials that reached an outcome.
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub fail_reasons: BTreeMap<FailReason, u64>,
    pub skip_reasons: BTreeMap<SkipReason, u64>,
    /// Ids of failed trials whose artifacts stay on disk, ascending.
    pub retained: Vec<TrialId>,
    pub scratch_dir: PathBuf,
    /// The run was cancelled; in-flight trials are not counted.
    pub interrupted: bool,
    pub elapsed_ms: u64,
}

impl RunSummary {
    /// `total == passed + failed + skipped`.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.total == self.passed + self.failed + self.skipped
    }

    fn count(&mut self, id: TrialId, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Pass => self.passed += 1,
            Outcome::Fail(reason) => {
                self.failed += 1;
                *self.fail_reasons.entry(reason).or_default() += 1;
                self.retained.push(id);
            }
            Outcome::Skip(reason) => {
                self.skipped += 1;
                *self.skip_reasons.entry(reason).or_default() += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Receives a snapshot after every recorded trial.
pub trait Progress {
    fn update(&mut self, summary: &RunSummary);

    fn finish(&mut self, _summary: &RunSummary) {}
}

/// Discards progress updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl Progress for SilentProgress {
    fn update(&mut self, _summary: &RunSummary) {}
}

/// Single self-overwriting status line on stderr, e.g.
/// `[  42/1000] Failed: 1 Skipped: 7`.
///
/// Falls back to one line per update when stderr is not a terminal.
#[derive(Debug)]
pub struct StderrProgress {
    interactive: bool,
}

impl StderrProgress {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interactive: io::stderr().is_terminal(),
        }
    }

    #[must_use]
    pub fn line(summary: &RunSummary) -> String {
        let width = summary.planned.to_string().len();
        format!(
            "[{:>width$}/{}] Failed: {} Skipped: {}",
            summary.total, summary.planned, summary.failed, summary.skipped
        )
    }
}

impl Default for StderrProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress for StderrProgress {
    fn update(&mut self, summary: &RunSummary) {
        let mut stderr = io::stderr().lock();
        let line = Self::line(summary);
        let _ = if self.interactive {
            write!(stderr, "\r{line}")
        } else {
            writeln!(stderr, "{line}")
        };
        let _ = stderr.flush();
    }

    fn finish(&mut self, _summary: &RunSummary) {
        if self.interactive {
            eprintln!();
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Tallies trial reports and drives progress output.
#[derive(Debug)]
pub struct Aggregator<P: Progress> {
    summary: RunSummary,
    progress: P,
}

impl<P: Progress> Aggregator<P> {
    pub fn new(planned: u64, scratch_dir: PathBuf, progress: P) -> Self {
        Self {
            summary: RunSummary {
                planned,
                scratch_dir,
                ..RunSummary::default()
            },
            progress,
        }
    }

    /// Count one completed trial. Must be called exactly once per trial.
    pub fn record(&mut self, report: TrialReport) {
        self.summary.count(report.id, report.outcome);
        self.progress.update(&self.summary);
    }

    /// Snapshot of the counts so far.
    #[must_use]
    pub const fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Close the run and return the final summary.
    #[must_use]
    pub fn finish(mut self, interrupted: bool, elapsed: Duration) -> RunSummary {
        self.summary.retained.sort_unstable();
        self.summary.interrupted = interrupted;
        self.summary.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.progress.finish(&self.summary);
        self.summary
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: TrialId, outcome: Outcome) -> TrialReport {
        TrialReport {
            id,
            outcome,
            elapsed: Duration::ZERO,
        }
    }

    /// Counts `update` calls.
    #[derive(Default)]
    struct Ticks(u64);

    impl Progress for Ticks {
        fn update(&mut self, summary: &RunSummary) {
            self.0 += 1;
            assert_eq!(self.0, summary.total);
        }
    }

    #[test]
    fn record_counts_each_outcome_once() {
        let mut agg = Aggregator::new(3, PathBuf::from("s"), Ticks::default());
        agg.record(report(2, Outcome::Fail(FailReason::CandidateMismatch)));
        agg.record(report(0, Outcome::Pass));
        agg.record(report(1, Outcome::Skip(SkipReason::GenerationFailed)));
        assert_eq!(agg.progress.0, 3);

        let summary = agg.finish(false, Duration::from_secs(2));
        assert_eq!(
            (summary.total, summary.passed, summary.failed, summary.skipped),
            (3, 1, 1, 1)
        );
        assert!(summary.is_consistent());
        assert_eq!(summary.retained, vec![2]);
        assert_eq!(summary.elapsed_ms, 2000);
        assert_eq!(summary.skip_reasons[&SkipReason::GenerationFailed], 1);
    }

    #[test]
    fn retained_ids_are_sorted_at_finish() {
        let mut agg = Aggregator::new(3, PathBuf::from("s"), SilentProgress);
        for id in [9, 4, 7] {
            agg.record(report(id, Outcome::Fail(FailReason::CandidateCrashed)));
        }
        assert_eq!(agg.finish(true, Duration::ZERO).retained, vec![4, 7, 9]);
    }

    #[test]
    fn progress_line_pads_to_planned_width() {
        let summary = RunSummary {
            planned: 100,
            total: 7,
            failed: 1,
            skipped: 2,
            ..RunSummary::default()
        };
        assert_eq!(StderrProgress::line(&summary), "[  7/100] Failed: 1 Skipped: 2");
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn arb_outcome() -> impl Strategy<Value = Outcome> {
            prop_oneof![
                Just(Outcome::Pass),
                proptest::sample::select(FailReason::ALL.to_vec()).prop_map(Outcome::Fail),
                proptest::sample::select(SkipReason::ALL.to_vec()).prop_map(Outcome::Skip),
            ]
        }

        fn tally(reports: impl IntoIterator<Item = TrialReport>) -> RunSummary {
            let mut agg = Aggregator::new(0, PathBuf::new(), SilentProgress);
            for r in reports {
                agg.record(r);
            }
            agg.finish(false, Duration::ZERO)
        }

        proptest! {
            #[test]
            fn prop_tally_is_order_independent(
                (outcomes, order) in proptest::collection::vec(arb_outcome(), 0..64)
                    .prop_flat_map(|v| {
                        let idx: Vec<usize> = (0..v.len()).collect();
                        (Just(v), Just(idx).prop_shuffle())
                    })
            ) {
                let sequential = tally(
                    outcomes.iter().enumerate().map(|(i, &o)| report(i as TrialId, o)),
                );
                let shuffled = tally(order.iter().map(|&i| report(i as TrialId, outcomes[i])));
                prop_assert_eq!(&sequential, &shuffled);
                prop_assert!(sequential.is_consistent());
                prop_assert_eq!(sequential.total, outcomes.len() as u64);
            }
        }
    }
}
