//! The per-trial state machine.
//!
//! ```text
//! Generate → CompileOracleA → CompileOracleB → CompileCandidate
//!          → RunOracleA → RunOracleB → CompareOracles
//!          → RunCandidate → CompareCandidate → Done
//! ```
//!
//! The pipeline stops at the first divergence and classifies on the spot.
//! Anything that says more about the generator, the environment or the
//! oracles than about the candidate becomes a `Skip` and its artifacts are
//! reclaimed immediately. Candidate misbehaviour becomes a `Fail` and the
//! artifacts stay on disk for inspection. Oracle compile failures are
//! deliberately `Skip`, not `Fail`.
//!
//! Outputs are compared byte for byte with no normalisation; determinism
//! comes from the compiler flags and generator constraints, not from here.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info_span, warn};

use crate::artifacts::{ArtifactManager, TrialPaths};
use crate::outcome::{FailReason, Outcome, SkipReason, TrialId};
use crate::process::{ProcessError, ProcessOutput};
use crate::toolchain::{CompilerRole, Toolchain};

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Position of a trial in the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Generate,
    CompileOracleA,
    CompileOracleB,
    CompileCandidate,
    RunOracleA,
    RunOracleB,
    CompareOracles,
    RunCandidate,
    CompareCandidate,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generate => "generate",
            Self::CompileOracleA => "compile-oracle-a",
            Self::CompileOracleB => "compile-oracle-b",
            Self::CompileCandidate => "compile-candidate",
            Self::RunOracleA => "run-oracle-a",
            Self::RunOracleB => "run-oracle-b",
            Self::CompareOracles => "compare-oracles",
            Self::RunCandidate => "run-candidate",
            Self::CompareCandidate => "compare-candidate",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// The run was cancelled while this trial was in flight. The trial has no
/// outcome and is left out of the tally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interrupted {
    pub id: TrialId,
    pub stage: Stage,
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trial {} interrupted during {}", self.id, self.stage)
    }
}

impl std::error::Error for Interrupted {}

/// A classified trial, as handed to the aggregator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrialReport {
    pub id: TrialId,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

/// How one external step ended, from the pipeline's point of view.
enum Step {
    Ran(ProcessOutput),
    TimedOut,
    Unavailable(ProcessError),
}

impl Step {
    fn settle(result: Result<ProcessOutput, ProcessError>) -> Option<Self> {
        match result {
            Ok(out) => Some(Self::Ran(out)),
            Err(ProcessError::Cancelled) => None,
            Err(e) if e.is_timeout() => Some(Self::TimedOut),
            Err(e) => Some(Self::Unavailable(e)),
        }
    }

    /// Successful output, or `None` for any kind of failure.
    fn succeeded(self) -> Option<ProcessOutput> {
        match self {
            Self::Ran(out) if out.success() => Some(out),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Trial
// ---------------------------------------------------------------------------

/// State of one trial. Owned by the worker running it and never shared.
#[derive(Debug)]
pub struct Trial {
    pub id: TrialId,
    pub paths: TrialPaths,
    pub stage: Stage,
    pub oracle_a_output: Option<Vec<u8>>,
    pub oracle_b_output: Option<Vec<u8>>,
    pub candidate_output: Option<Vec<u8>>,
    candidate_log: Vec<u8>,
}

impl Trial {
    #[must_use]
    pub const fn new(id: TrialId, paths: TrialPaths) -> Self {
        Self {
            id,
            paths,
            stage: Stage::Generate,
            oracle_a_output: None,
            oracle_b_output: None,
            candidate_output: None,
            candidate_log: Vec::new(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(from = %self.stage, to = %stage, "stage");
        self.stage = stage;
    }

    fn interrupted(&self) -> Interrupted {
        Interrupted {
            id: self.id,
            stage: self.stage,
        }
    }

    /// Drive the trial to a terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if an external step was cancelled.
    pub fn run<T: Toolchain + ?Sized>(
        &mut self,
        toolchain: &T,
        artifacts: &ArtifactManager,
    ) -> Result<Outcome, Interrupted> {
        let outcome = self.classify(toolchain);
        match outcome {
            Ok(Outcome::Fail(reason)) => self.retain_diagnostics(reason),
            Ok(_) | Err(_) => artifacts.reclaim(self.id),
        }
        self.stage = Stage::Done;
        outcome
    }

    fn classify<T: Toolchain + ?Sized>(&mut self, toolchain: &T) -> Result<Outcome, Interrupted> {
        // Local copy: `self` is mutated while the paths are borrowed.
        let paths = self.paths.clone();

        self.enter(Stage::Generate);
        let step = self.settle(toolchain.generate(self.id, &paths.source))?;
        if step.succeeded().is_none() {
            return Ok(Outcome::Skip(SkipReason::GenerationFailed));
        }

        for (stage, role, bin) in [
            (Stage::CompileOracleA, CompilerRole::OracleA, &paths.oracle_a_bin),
            (Stage::CompileOracleB, CompilerRole::OracleB, &paths.oracle_b_bin),
        ] {
            self.enter(stage);
            let step = self.settle(toolchain.compile(role, &paths.source, bin))?;
            if step.succeeded().is_none() {
                return Ok(Outcome::Skip(SkipReason::OracleCompileFailed));
            }
        }

        self.enter(Stage::CompileCandidate);
        let step = self.settle(toolchain.compile(
            CompilerRole::Candidate,
            &paths.source,
            &paths.candidate_bin,
        ))?;
        self.log_step("compile", &step);
        if step.succeeded().is_none() {
            return Ok(Outcome::Fail(FailReason::CandidateCompileFailed));
        }

        for (stage, role, bin) in [
            (Stage::RunOracleA, CompilerRole::OracleA, &paths.oracle_a_bin),
            (Stage::RunOracleB, CompilerRole::OracleB, &paths.oracle_b_bin),
        ] {
            self.enter(stage);
            let output = match self.settle(toolchain.execute(role, bin))? {
                Step::TimedOut => return Ok(Outcome::Skip(SkipReason::OracleTimeout)),
                step => match step.succeeded() {
                    Some(out) => out.stdout,
                    None => return Ok(Outcome::Skip(SkipReason::OracleRunFailed)),
                },
            };
            if role == CompilerRole::OracleA {
                self.oracle_a_output = Some(output);
            } else {
                self.oracle_b_output = Some(output);
            }
        }

        self.enter(Stage::CompareOracles);
        if self.oracle_a_output != self.oracle_b_output {
            return Ok(Outcome::Skip(SkipReason::OracleDisagreement));
        }

        self.enter(Stage::RunCandidate);
        let step = self.settle(toolchain.execute(CompilerRole::Candidate, &paths.candidate_bin))?;
        self.log_step("run", &step);
        match step {
            Step::TimedOut => return Ok(Outcome::Fail(FailReason::CandidateTimeout)),
            Step::Ran(out) => {
                let exited_cleanly = out.success();
                self.candidate_output = Some(out.stdout);
                if !exited_cleanly {
                    return Ok(Outcome::Fail(FailReason::CandidateCrashed));
                }
            }
            Step::Unavailable(_) => return Ok(Outcome::Fail(FailReason::CandidateCrashed)),
        }

        self.enter(Stage::CompareCandidate);
        if self.candidate_output != self.oracle_a_output {
            return Ok(Outcome::Fail(FailReason::CandidateMismatch));
        }
        Ok(Outcome::Pass)
    }

    fn settle(&self, result: Result<ProcessOutput, ProcessError>) -> Result<Step, Interrupted> {
        let step = Step::settle(result).ok_or_else(|| self.interrupted())?;
        match &step {
            Step::Ran(out) if !out.success() => {
                debug!(stage = %self.stage, exit_code = ?out.exit_code, "step failed");
            }
            Step::TimedOut => debug!(stage = %self.stage, "step timed out"),
            Step::Unavailable(e) => debug!(stage = %self.stage, error = %e, "step unavailable"),
            Step::Ran(_) => {}
        }
        Ok(step)
    }

    /// Keep candidate stderr (and any process error) for the `.log` file.
    fn log_step(&mut self, what: &str, step: &Step) {
        let line = match step {
            Step::Ran(out) => {
                if out.stderr.is_empty() && out.success() {
                    return;
                }
                let mut line = format!("== candidate {what}: exit {:?}\n", out.exit_code).into_bytes();
                line.extend_from_slice(&out.stderr);
                line
            }
            Step::TimedOut => format!("== candidate {what}: timed out\n").into_bytes(),
            Step::Unavailable(e) => format!("== candidate {what}: {e}\n").into_bytes(),
        };
        self.candidate_log.extend_from_slice(&line);
    }

    fn retain_diagnostics(&self, reason: FailReason) {
        warn!(
            trial = self.id,
            %reason,
            source = %self.paths.source.display(),
            "candidate finding; artifacts retained"
        );
        let mut writes: Vec<(&std::path::Path, &[u8])> = Vec::new();
        if let Some(expected) = &self.oracle_a_output {
            writes.push((&self.paths.expected_output, expected));
        }
        if let Some(actual) = &self.candidate_output {
            writes.push((&self.paths.candidate_output, actual));
        }
        if !self.candidate_log.is_empty() {
            writes.push((&self.paths.candidate_log, &self.candidate_log));
        }
        for (path, contents) in writes {
            if let Err(e) = std::fs::write(path, contents) {
                warn!(trial = self.id, path = %path.display(), error = %e, "failed to write diagnostics");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// run_trial
// ---------------------------------------------------------------------------

/// Run trial `id` from generation to a classified report.
///
/// # Errors
///
/// Returns [`Interrupted`] if the run was cancelled while the trial was in
/// flight; its artifacts have been reclaimed.
pub fn run_trial<T: Toolchain + ?Sized>(
    id: TrialId,
    toolchain: &T,
    artifacts: &ArtifactManager,
) -> Result<TrialReport, Interrupted> {
    let span = info_span!("trial", id);
    let _enter = span.enter();

    let start = Instant::now();
    let mut trial = Trial::new(id, artifacts.allocate(id));
    let outcome = trial.run(toolchain, artifacts)?;
    debug!(%outcome, "classified");

    Ok(TrialReport {
        id,
        outcome,
        elapsed: start.elapsed(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
