//! End-to-end runs against fake tools spawned as real child processes.
//!
//! Each scenario wires `run::execute` to a `ProcessToolchain` whose
//! generator and compilers are shell scripts (see `common`), then checks the
//! final counts and what is left in the scratch directory.

#![allow(clippy::all, clippy::pedantic, clippy::nursery)]

mod common;

use std::fs;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{FakeTools, COMPILER, READ_SEED};
use fuzzdiff::artifacts::{ArtifactManager, SUMMARY_FILE};
use fuzzdiff::config::Language;
use fuzzdiff::outcome::{FailReason, SkipReason};
use fuzzdiff::process::ChildRegistry;
use fuzzdiff::report::{RunSummary, SilentProgress};
use fuzzdiff::run::{self, RunPlan};
use fuzzdiff::toolchain::ProcessToolchain;

fn run_with(tools: &FakeTools, trials: u64, concurrency: usize) -> (ArtifactManager, RunSummary) {
    let artifacts = ArtifactManager::create_fresh(&tools.scratch, Language::C).unwrap();
    let registry = Arc::new(ChildRegistry::new());
    let toolchain = ProcessToolchain::new(tools.spec(), Arc::clone(&registry));
    let plan = RunPlan {
        trials,
        concurrency: NonZeroUsize::new(concurrency).unwrap(),
    };
    let summary = run::execute(plan, &toolchain, &artifacts, &registry, SilentProgress);
    assert_eq!(registry.live(), 0, "child processes left registered");
    (artifacts, summary)
}

/// Script body with `$prog_seed` available.
fn seeded(body: &str) -> String {
    format!("{READ_SEED}\n{body}")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn faithful_candidate_passes_everything_and_leaves_no_artifacts() {
    let tools = FakeTools::new();
    let (artifacts, summary) = run_with(&tools, 6, 3);

    assert_eq!((summary.total, summary.passed), (6, 6));
    assert_eq!((summary.failed, summary.skipped), (0, 0));
    assert!(!summary.interrupted);
    for id in 0..6 {
        assert!(!artifacts.has_artifacts(id), "trial {id} left artifacts");
    }
}

#[test]
fn odd_trials_mismatch_with_five_trials_two_workers() {
    // Odd seeds get their checksum rewritten by the candidate.
    let tools = FakeTools::new().with_candidate(&seeded(
        r#"
if [ $((prog_seed % 2)) -eq 1 ]; then
  sed 's/checksum/miscompiled/' "$src" > "$out" && chmod +x "$out"
else
  cp "$src" "$out" && chmod +x "$out"
fi
"#,
    ));
    let (artifacts, summary) = run_with(&tools, 5, 2);

    assert_eq!(summary.total, 5);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.passed, 3);
    assert_eq!(summary.retained, vec![1, 3]);
    assert_eq!(summary.fail_reasons[&FailReason::CandidateMismatch], 2);

    for id in [0, 2, 4] {
        assert!(!artifacts.has_artifacts(id));
    }
    let paths = artifacts.allocate(1);
    assert!(paths.source.exists());
    assert_eq!(fs::read(&paths.expected_output).unwrap(), b"checksum = 1\n");
    assert_eq!(fs::read(&paths.candidate_output).unwrap(), b"miscompiled = 1\n");

    let written: serde_json::Value =
        serde_json::from_slice(&fs::read(tools.scratch.join(SUMMARY_FILE)).unwrap()).unwrap();
    assert_eq!(written["failed"], 2);
    assert_eq!(written["retained"], serde_json::json!([1, 3]));
}

#[test]
fn candidate_compile_failure_keeps_the_source() {
    let tools = FakeTools::new().with_candidate(&seeded(
        r#"
if [ "$prog_seed" = "2" ]; then
  echo "internal compiler error: fsub pass" >&2
  exit 1
fi
cp "$src" "$out" && chmod +x "$out"
"#,
    ));
    let (artifacts, summary) = run_with(&tools, 4, 4);

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retained, vec![2]);
    assert_eq!(summary.fail_reasons[&FailReason::CandidateCompileFailed], 1);

    let paths = artifacts.allocate(2);
    assert!(paths.source.exists(), "source must survive the run");
    let log = fs::read_to_string(&paths.candidate_log).unwrap();
    assert!(log.contains("internal compiler error"), "{log}");
}

#[test]
fn oracle_disagreement_is_skipped_even_when_candidate_is_wrong() {
    let tools = FakeTools::new()
        .with_oracle_b(&seeded(
            r#"
if [ "$prog_seed" = "1" ]; then
  sed 's/checksum/other/' "$src" > "$out" && chmod +x "$out"
else
  cp "$src" "$out" && chmod +x "$out"
fi
"#,
        ))
        .with_candidate(&seeded(
            r#"
sed 's/checksum/broken/' "$src" > "$out" && chmod +x "$out"
"#,
        ));
    let (artifacts, summary) = run_with(&tools, 3, 2);

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.skip_reasons[&SkipReason::OracleDisagreement], 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.retained, vec![0, 2]);
    assert!(!artifacts.has_artifacts(1));
}

#[test]
fn generation_and_oracle_compile_failures_are_skips() {
    let tools = FakeTools::new()
        .with_generator(&format!(
            "{}\n[ \"$seed\" = \"0\" ] && exit 1\nexit 0",
            common::GENERATOR
        ))
        .with_oracle_b(&seeded(
            r#"
[ "$prog_seed" = "1" ] && exit 1
cp "$src" "$out" && chmod +x "$out"
"#,
        ));
    let (artifacts, summary) = run_with(&tools, 3, 1);

    assert_eq!(summary.skip_reasons[&SkipReason::GenerationFailed], 1);
    assert_eq!(summary.skip_reasons[&SkipReason::OracleCompileFailed], 1);
    assert_eq!((summary.passed, summary.failed, summary.skipped), (1, 0, 2));
    for id in 0..3 {
        assert!(!artifacts.has_artifacts(id));
    }
}

#[test]
fn hanging_candidate_times_out_as_failure() {
    let tools = FakeTools::new().with_candidate(
        r#"
printf '#!/bin/sh\nsleep 30\n' > "$out" && chmod +x "$out"
"#,
    );
    let artifacts = ArtifactManager::create_fresh(&tools.scratch, Language::C).unwrap();
    let registry = Arc::new(ChildRegistry::new());
    let mut spec = tools.spec();
    spec.candidate_run_timeout = Duration::from_millis(300);
    let toolchain = ProcessToolchain::new(spec, Arc::clone(&registry));
    let plan = RunPlan {
        trials: 2,
        concurrency: NonZeroUsize::new(2).unwrap(),
    };

    let start = Instant::now();
    let summary = run::execute(plan, &toolchain, &artifacts, &registry, SilentProgress);

    assert!(start.elapsed() < Duration::from_secs(20));
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.fail_reasons[&FailReason::CandidateTimeout], 2);
    assert!(artifacts.allocate(0).source.exists());
    assert!(artifacts.allocate(1).candidate_bin.exists());
}

#[test]
fn candidate_receives_fast_math_guards() {
    // The candidate sees the fast-math guards; the oracles do not.
    let tools = FakeTools::new().with_candidate(&format!(
        r#"
case " $* " in
  *" -fno-fast-math "*) ;;
  *) exit 1 ;;
esac
{COMPILER}
"#
    ));
    let (_artifacts, summary) = run_with(&tools, 2, 2);
    assert_eq!(summary.passed, 2, "{summary:?}");
}
