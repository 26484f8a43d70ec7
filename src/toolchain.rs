//! External tool interfaces: generator, compilers, compiled binaries.
//!
//! The [`Toolchain`] trait is the seam between the trial pipeline and the
//! outside world. [`ProcessToolchain`] is the real implementation that shells
//! out through [`process::invoke`]; tests substitute scripted toolchains.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{HarnessConfig, Language};
use crate::outcome::TrialId;
use crate::process::{self, ChildRegistry, Invocation, ProcessError, ProcessOutput};

/// Which of the three compilers a compile or run step belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompilerRole {
    OracleA,
    OracleB,
    Candidate,
}

impl CompilerRole {
    #[must_use]
    pub const fn is_oracle(self) -> bool {
        matches!(self, Self::OracleA | Self::OracleB)
    }
}

impl fmt::Display for CompilerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OracleA => write!(f, "oracle A"),
            Self::OracleB => write!(f, "oracle B"),
            Self::Candidate => write!(f, "candidate"),
        }
    }
}

/// The external actions a trial performs.
///
/// Implementations own the fixed configuration (generator constraints,
/// per-role flags, timeouts); the pipeline only supplies paths.
///
/// # Contract
///
/// - Non-zero exit is reported as `Ok` with a failing [`ProcessOutput`];
///   `Err` is reserved for spawn failures, timeouts and cancellation.
/// - Implementations must be callable from many worker threads at once.
#[allow(clippy::missing_errors_doc)]
pub trait Toolchain: Sync {
    /// Emit a random program for trial `id` at `output`.
    fn generate(&self, id: TrialId, output: &Path) -> Result<ProcessOutput, ProcessError>;

    /// Compile `source` into `output` with the flags fixed for `role`.
    fn compile(
        &self,
        role: CompilerRole,
        source: &Path,
        output: &Path,
    ) -> Result<ProcessOutput, ProcessError>;

    /// Execute a compiled binary with the run timeout fixed for `role`.
    fn execute(&self, role: CompilerRole, binary: &Path) -> Result<ProcessOutput, ProcessError>;
}

// ---------------------------------------------------------------------------
// ProcessToolchain
// ---------------------------------------------------------------------------

/// Fully resolved tool locations and flags for one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolchainSpec {
    pub generator: PathBuf,
    pub generator_args: Vec<String>,
    pub seed: Option<u64>,
    pub oracle_a: PathBuf,
    pub oracle_b: PathBuf,
    pub candidate: PathBuf,
    pub include_dir: PathBuf,
    pub oracle_flags: Vec<String>,
    pub candidate_flags: Vec<String>,
    pub generate_timeout: Duration,
    pub compile_timeout: Duration,
    pub oracle_run_timeout: Duration,
    pub candidate_run_timeout: Duration,
}

impl ToolchainSpec {
    /// Build a spec from config without resolving anything on disk.
    ///
    /// [`preflight::resolve`](crate::preflight::resolve) is the checked path.
    #[must_use]
    pub fn unresolved(config: &HarnessConfig, language: Language) -> Self {
        let compilers = config.compilers_for(language);
        Self {
            generator: PathBuf::from(&config.generator.program),
            generator_args: config.generator_args(language),
            seed: config.generator.seed,
            oracle_a: PathBuf::from(&compilers.oracle_a),
            oracle_b: PathBuf::from(&compilers.oracle_b),
            candidate: PathBuf::from(&compilers.candidate),
            include_dir: config.generator.include_dir.clone(),
            oracle_flags: config.flags.oracle.clone(),
            candidate_flags: config.flags.candidate.clone(),
            generate_timeout: config.timeouts.generate(),
            compile_timeout: config.timeouts.compile(),
            oracle_run_timeout: config.timeouts.oracle_run(),
            candidate_run_timeout: config.timeouts.candidate_run(),
        }
    }

    /// Generator argv for trial `id`.
    #[must_use]
    pub fn generate_invocation(&self, id: TrialId, output: &Path) -> Invocation {
        let mut inv = Invocation::new(&self.generator).args(&self.generator_args);
        if let Some(base) = self.seed {
            inv = inv.arg("--seed").arg(base.wrapping_add(id).to_string());
        }
        inv.arg("-o").arg(output)
    }

    /// Compiler argv for `role`.
    #[must_use]
    pub fn compile_invocation(&self, role: CompilerRole, source: &Path, output: &Path) -> Invocation {
        let (compiler, flags) = match role {
            CompilerRole::OracleA => (&self.oracle_a, &self.oracle_flags),
            CompilerRole::OracleB => (&self.oracle_b, &self.oracle_flags),
            CompilerRole::Candidate => (&self.candidate, &self.candidate_flags),
        };
        let mut include = std::ffi::OsString::from("-I");
        include.push(&self.include_dir);
        Invocation::new(compiler)
            .arg(include)
            .args(flags)
            .arg(source)
            .arg("-o")
            .arg(output)
    }

    #[must_use]
    pub const fn run_timeout(&self, role: CompilerRole) -> Duration {
        if role.is_oracle() {
            self.oracle_run_timeout
        } else {
            self.candidate_run_timeout
        }
    }
}

/// [`Toolchain`] backed by real child processes.
#[derive(Debug)]
pub struct ProcessToolchain {
    spec: ToolchainSpec,
    registry: Arc<ChildRegistry>,
}

impl ProcessToolchain {
    #[must_use]
    pub const fn new(spec: ToolchainSpec, registry: Arc<ChildRegistry>) -> Self {
        Self { spec, registry }
    }

    #[must_use]
    pub const fn spec(&self) -> &ToolchainSpec {
        &self.spec
    }
}

impl Toolchain for ProcessToolchain {
    fn generate(&self, id: TrialId, output: &Path) -> Result<ProcessOutput, ProcessError> {
        let inv = self.spec.generate_invocation(id, output);
        process::invoke(&inv, Some(self.spec.generate_timeout), &self.registry)
    }

    fn compile(
        &self,
        role: CompilerRole,
        source: &Path,
        output: &Path,
    ) -> Result<ProcessOutput, ProcessError> {
        let inv = self.spec.compile_invocation(role, source, output);
        process::invoke(&inv, Some(self.spec.compile_timeout), &self.registry)
    }

    fn execute(&self, role: CompilerRole, binary: &Path) -> Result<ProcessOutput, ProcessError> {
        let inv = Invocation::new(binary);
        process::invoke(&inv, Some(self.spec.run_timeout(role)), &self.registry)
    }
}
