//! Harness configuration (`fuzzdiff.toml`).
//!
//! Defines the generator constraints, the compiler trio for each language
//! mode, the fixed compiler flags, and the per-stage timeouts. Every field
//! has a default matching the stock csmith + gcc/clang setup, so running
//! without a config file is the common case.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::SetupError;

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Source language the generator emits and the compilers consume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Language {
    #[value(name = "c")]
    C,
    #[value(name = "c++", alias = "cpp")]
    Cpp,
}

impl Language {
    /// File extension for generated sources.
    #[must_use]
    pub const fn source_extension(self) -> &'static str {
        match self {
            Self::C => "c",
            Self::Cpp => "cpp",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::C => write!(f, "c"),
            Self::Cpp => write!(f, "c++"),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level harness configuration.
///
/// Missing sections and fields use defaults; unknown keys are rejected so a
/// typo never silently falls back to a default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub compilers: CompilersConfig,

    #[serde(default)]
    pub flags: FlagsConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl HarnessConfig {
    /// Load the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::Config`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, SetupError> {
        let text = std::fs::read_to_string(path).map_err(|e| SetupError::Config {
            path: path.to_owned(),
            detail: e.to_string(),
        })?;
        Self::parse(&text).map_err(|detail| SetupError::Config {
            path: path.to_owned(),
            detail,
        })
    }

    /// Parse config text.
    ///
    /// # Errors
    ///
    /// Returns the TOML error message on malformed input or unknown keys.
    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// The compiler trio for a language mode.
    #[must_use]
    pub const fn compilers_for(&self, language: Language) -> &CompilerSet {
        match language {
            Language::C => &self.compilers.c,
            Language::Cpp => &self.compilers.cpp,
        }
    }

    /// Full generator argument list for a language mode, excluding output
    /// path and seed.
    #[must_use]
    pub fn generator_args(&self, language: Language) -> Vec<String> {
        let mut args = self.generator.args.clone();
        if language == Language::Cpp {
            args.extend(self.generator.cpp_args.iter().cloned());
        }
        args
    }
}

// ---------------------------------------------------------------------------
// GeneratorConfig
// ---------------------------------------------------------------------------

/// Random program generator settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Generator executable (default: `csmith`).
    #[serde(default = "default_generator")]
    pub program: String,

    /// Complexity-limiting constraints. The defaults also disable volatiles
    /// and bitfields, both sources of output nondeterminism.
    #[serde(default = "default_generator_args")]
    pub args: Vec<String>,

    /// Extra arguments appended in `c++` mode.
    #[serde(default = "default_generator_cpp_args")]
    pub cpp_args: Vec<String>,

    /// Runtime support headers the generated programs include.
    #[serde(default = "default_include_dir")]
    pub include_dir: PathBuf,

    /// Base seed. Trial `id` is generated with `--seed <seed + id>`.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            program: default_generator(),
            args: default_generator_args(),
            cpp_args: default_generator_cpp_args(),
            include_dir: default_include_dir(),
            seed: None,
        }
    }
}

fn default_generator() -> String {
    "csmith".to_owned()
}

fn default_generator_args() -> Vec<String> {
    owned(&[
        "--no-volatiles",
        "--no-bitfields",
        "--max-funcs",
        "1",
        "--max-block-depth",
        "1",
        "--max-block-size",
        "1",
        "--max-expr-complexity",
        "1",
    ])
}

fn default_generator_cpp_args() -> Vec<String> {
    owned(&["--lang-cpp", "--cpp11"])
}

fn default_include_dir() -> PathBuf {
    PathBuf::from("/usr/include/csmith")
}

// ---------------------------------------------------------------------------
// CompilersConfig
// ---------------------------------------------------------------------------

/// Compiler trios per language mode.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompilersConfig {
    #[serde(default = "default_c_compilers")]
    pub c: CompilerSet,

    #[serde(default = "default_cpp_compilers")]
    pub cpp: CompilerSet,
}

impl Default for CompilersConfig {
    fn default() -> Self {
        Self {
            c: default_c_compilers(),
            cpp: default_cpp_compilers(),
        }
    }
}

/// The candidate compiler and the two oracles for one language.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompilerSet {
    pub candidate: String,
    pub oracle_a: String,
    pub oracle_b: String,
}

fn default_c_compilers() -> CompilerSet {
    CompilerSet {
        candidate: "./fsubcc".to_owned(),
        oracle_a: "gcc".to_owned(),
        oracle_b: "clang".to_owned(),
    }
}

fn default_cpp_compilers() -> CompilerSet {
    CompilerSet {
        candidate: "./fsub++".to_owned(),
        oracle_a: "g++".to_owned(),
        oracle_b: "clang++".to_owned(),
    }
}

// ---------------------------------------------------------------------------
// FlagsConfig
// ---------------------------------------------------------------------------

/// Fixed per-role compiler flags. `-I<include_dir>` is always prepended.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagsConfig {
    #[serde(default = "default_oracle_flags")]
    pub oracle: Vec<String>,

    /// Must keep fast-math style reassociation disabled, otherwise byte-exact
    /// output comparison against the oracles is meaningless.
    #[serde(default = "default_candidate_flags")]
    pub candidate: Vec<String>,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            oracle: default_oracle_flags(),
            candidate: default_candidate_flags(),
        }
    }
}

fn default_oracle_flags() -> Vec<String> {
    owned(&["-w", "-O3", "-DNDEBUG"])
}

fn default_candidate_flags() -> Vec<String> {
    owned(&[
        "-w",
        "-O3",
        "-fno-fast-math",
        "-fno-unsafe-math-optimizations",
        "-DNDEBUG",
    ])
}

// ---------------------------------------------------------------------------
// TimeoutConfig
// ---------------------------------------------------------------------------

/// Per-stage timeouts, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutConfig {
    #[serde(default = "default_generate_timeout")]
    pub generate: u64,

    #[serde(default = "default_compile_timeout")]
    pub compile: u64,

    #[serde(default = "default_oracle_run_timeout")]
    pub oracle_run: u64,

    /// Longer than `oracle_run`: the candidate may legitimately be slower.
    #[serde(default = "default_candidate_run_timeout")]
    pub candidate_run: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            generate: default_generate_timeout(),
            compile: default_compile_timeout(),
            oracle_run: default_oracle_run_timeout(),
            candidate_run: default_candidate_run_timeout(),
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub const fn generate(&self) -> Duration {
        Duration::from_secs(self.generate)
    }

    #[must_use]
    pub const fn compile(&self) -> Duration {
        Duration::from_secs(self.compile)
    }

    #[must_use]
    pub const fn oracle_run(&self) -> Duration {
        Duration::from_secs(self.oracle_run)
    }

    #[must_use]
    pub const fn candidate_run(&self) -> Duration {
        Duration::from_secs(self.candidate_run)
    }
}

const fn default_generate_timeout() -> u64 {
    60
}

const fn default_compile_timeout() -> u64 {
    300
}

const fn default_oracle_run_timeout() -> u64 {
    10
}

const fn default_candidate_run_timeout() -> u64 {
    60
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
