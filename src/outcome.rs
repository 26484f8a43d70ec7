//! Terminal trial classification.
//!
//! Every trial ends in exactly one [`Outcome`]. The split between
//! [`SkipReason`] and [`FailReason`] is the whole point of the harness:
//! skips are inconclusive (generator, environment, or the oracles themselves
//! disagree) and say nothing about the candidate compiler, while failures are
//! candidate findings whose artifacts are kept on disk.

use std::fmt;

use serde::Serialize;

/// Integer index of a trial, unique within one run.
pub type TrialId = u64;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The terminal classification of a single trial.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    /// The candidate output matched the agreed oracle output byte for byte.
    Pass,
    /// The candidate misbehaved. Artifacts are retained.
    Fail(FailReason),
    /// Inconclusive. Artifacts are reclaimed eagerly.
    Skip(SkipReason),
}

impl Outcome {
    /// Whether this outcome counts as a candidate defect.
    #[must_use]
    pub const fn is_fail(self) -> bool {
        matches!(self, Self::Fail(_))
    }

    /// Whether this outcome is inconclusive.
    #[must_use]
    pub const fn is_skip(self) -> bool {
        matches!(self, Self::Skip(_))
    }

    /// Whether the trial's artifacts stay on disk after the run.
    #[must_use]
    pub const fn retains_artifacts(self) -> bool {
        self.is_fail()
    }

    /// Short machine-readable tag, e.g. `fail:candidate_mismatch`.
    #[must_use]
    pub fn tag(self) -> String {
        match self {
            Self::Pass => "pass".to_owned(),
            Self::Fail(reason) => format!("fail:{reason}"),
            Self::Skip(reason) => format!("skip:{reason}"),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail(reason) => write!(f, "fail ({reason})"),
            Self::Skip(reason) => write!(f, "skip ({reason})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reasons
// ---------------------------------------------------------------------------

/// Why a trial was inconclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The generator exited non-zero, timed out, or could not be started.
    GenerationFailed,
    /// One of the oracle compilers rejected the generated source.
    OracleCompileFailed,
    /// An oracle binary did not finish within the oracle run timeout.
    OracleTimeout,
    /// An oracle binary exited non-zero or could not be started.
    OracleRunFailed,
    /// The two oracle binaries printed different output.
    OracleDisagreement,
}

impl SkipReason {
    pub const ALL: [Self; 5] = [
        Self::GenerationFailed,
        Self::OracleCompileFailed,
        Self::OracleTimeout,
        Self::OracleRunFailed,
        Self::OracleDisagreement,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GenerationFailed => "generation_failed",
            Self::OracleCompileFailed => "oracle_compile_failed",
            Self::OracleTimeout => "oracle_timeout",
            Self::OracleRunFailed => "oracle_run_failed",
            Self::OracleDisagreement => "oracle_disagreement",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a trial is a candidate finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    /// The candidate compiler rejected a program both oracles accepted.
    CandidateCompileFailed,
    /// The candidate binary did not finish within the candidate run timeout.
    CandidateTimeout,
    /// The candidate binary exited non-zero while both oracles exited 0.
    CandidateCrashed,
    /// The candidate binary printed something other than the oracle output.
    CandidateMismatch,
}

impl FailReason {
    pub const ALL: [Self; 4] = [
        Self::CandidateCompileFailed,
        Self::CandidateTimeout,
        Self::CandidateCrashed,
        Self::CandidateMismatch,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CandidateCompileFailed => "candidate_compile_failed",
            Self::CandidateTimeout => "candidate_timeout",
            Self::CandidateCrashed => "candidate_crashed",
            Self::CandidateMismatch => "candidate_mismatch",
        }
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
