use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

use fuzzdiff::artifacts::ArtifactManager;
use fuzzdiff::config::{HarnessConfig, Language};
use fuzzdiff::error::SetupError;
use fuzzdiff::format::OutputFormat;
use fuzzdiff::process::ChildRegistry;
use fuzzdiff::report::StderrProgress;
use fuzzdiff::run::{self, RunPlan};
use fuzzdiff::toolchain::ProcessToolchain;
use fuzzdiff::{preflight, telemetry};

/// Exit code for a run stopped by Ctrl-C (128 + SIGINT).
const EXIT_INTERRUPTED: u8 = 130;

/// Differential compiler fuzzing harness
///
/// Generates random programs, compiles each with two trusted oracle
/// compilers and with the candidate compiler, runs all three binaries and
/// compares their output byte for byte.
///
/// OUTCOMES:
///   pass  - candidate output matches the (agreeing) oracles
///   fail  - candidate failed to compile, timed out, crashed or printed
///           something else; artifacts are kept in SCRATCH_DIR
///   skip  - inconclusive: generation failed, an oracle failed, or the
///           oracles disagree; artifacts are deleted
///
/// EXAMPLES:
///   fuzzdiff csmith c 100 16
///   fuzzdiff csmith c++ 1000 8 --seed 42 --format json
#[derive(Parser, Debug)]
#[command(name = "fuzzdiff")]
#[command(version, about)]
struct Cli {
    /// Scratch directory (wiped and recreated at start)
    scratch_dir: PathBuf,

    /// Source language of the generated programs
    #[arg(value_enum)]
    mode: Language,

    /// Number of trials to run
    test_count: u64,

    /// Maximum number of trials in flight
    concurrency: usize,

    /// TOML config file overriding tools, flags and timeouts
    #[arg(long, env = "FUZZDIFF_CONFIG")]
    config: Option<PathBuf>,

    /// Summary format: text or json
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    /// Base generator seed (trial N uses seed + N)
    #[arg(long)]
    seed: Option<u64>,

    /// Oracle binary run timeout, in seconds
    #[arg(long, value_name = "SECS")]
    oracle_timeout: Option<u64>,

    /// Candidate binary run timeout, in seconds
    #[arg(long, value_name = "SECS")]
    candidate_timeout: Option<u64>,

    /// Compile timeout for all three compilers, in seconds
    #[arg(long, value_name = "SECS")]
    compile_timeout: Option<u64>,
}

impl Cli {
    fn harness_config(&self) -> Result<HarnessConfig, SetupError> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)?,
            None => HarnessConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.generator.seed = Some(seed);
        }
        if let Some(secs) = self.oracle_timeout {
            config.timeouts.oracle_run = secs;
        }
        if let Some(secs) = self.candidate_timeout {
            config.timeouts.candidate_run = secs;
        }
        if let Some(secs) = self.compile_timeout {
            config.timeouts.compile = secs;
        }
        Ok(config)
    }

    fn concurrency(&self) -> Result<NonZeroUsize, SetupError> {
        NonZeroUsize::new(self.concurrency).ok_or_else(|| SetupError::InvalidArgument {
            name: "CONCURRENCY",
            reason: "must be at least 1".to_owned(),
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init();

    match run_harness(&cli) {
        Ok(true) => ExitCode::from(EXIT_INTERRUPTED),
        Ok(false) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the run was interrupted.
fn run_harness(cli: &Cli) -> Result<bool> {
    let concurrency = cli.concurrency()?;
    let config = cli.harness_config()?;
    let spec = preflight::resolve(&config, cli.mode)?;
    let artifacts = ArtifactManager::create_fresh(&cli.scratch_dir, cli.mode)?;

    let registry = Arc::new(ChildRegistry::new());
    {
        let registry = Arc::clone(&registry);
        ctrlc::set_handler(move || {
            let killed = registry.cancel();
            warn!(killed, "interrupted; terminating child processes");
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let toolchain = ProcessToolchain::new(spec, Arc::clone(&registry));
    let plan = RunPlan {
        trials: cli.test_count,
        concurrency,
    };
    let summary = run::execute(plan, &toolchain, &artifacts, &registry, StderrProgress::new());

    println!("{}", cli.format.render(&summary)?);
    Ok(summary.interrupted)
}
