//! Shared test helpers for fuzzdiff integration tests.
//!
//! Tests never need csmith or a real compiler. Instead they install small
//! `sh` scripts that speak the same argv conventions:
//!
//! - the generator reads `--seed N -o OUT` and writes a shell "program" that
//!   prints `checksum = N`;
//! - a compiler reads `... SRC -o OUT` and "compiles" by copying the program
//!   (optionally rewriting it) and marking it executable.
//!
//! Each test gets its own temp directory for scripts, include dir and scratch.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use fuzzdiff::config::{HarnessConfig, Language};
use fuzzdiff::toolchain::ToolchainSpec;
use tempfile::TempDir;

/// argv parsing shared by every fake tool: sets `$seed`, `$src`, `$out`.
const PARSE_ARGS: &str = r#"
seed=0; src=""; out=""; prev=""
for a in "$@"; do
  if [ "$prev" = "--seed" ]; then seed="$a"
  elif [ "$prev" = "-o" ]; then out="$a"
  else case "$a" in -*) ;; *) src="$a" ;; esac
  fi
  prev="$a"
done
"#;

/// Generator writing a program that prints its own seed.
pub const GENERATOR: &str = r#"
printf '#!/bin/sh\n# seed=%s\necho "checksum = %s"\n' "$seed" "$seed" > "$out"
"#;

/// Faithful compiler: the output binary is the program itself.
pub const COMPILER: &str = r#"
cp "$src" "$out" && chmod +x "$out"
"#;

/// Reads the seed the program was generated with into `$prog_seed`.
pub const READ_SEED: &str = r#"
prog_seed=$(sed -n 's/^# seed=//p' "$src")
"#;

/// A self-contained fake tool environment.
pub struct FakeTools {
    pub dir: TempDir,
    pub include_dir: PathBuf,
    pub scratch: PathBuf,
    pub generator: PathBuf,
    pub oracle_a: PathBuf,
    pub oracle_b: PathBuf,
    pub candidate: PathBuf,
}

impl FakeTools {
    /// All tools faithful: every trial passes.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let include_dir = dir.path().join("include");
        fs::create_dir(&include_dir).unwrap();
        let scratch = dir.path().join("scratch");

        let generator = install(dir.path(), "generator", GENERATOR);
        let oracle_a = install(dir.path(), "oracle-a", COMPILER);
        let oracle_b = install(dir.path(), "oracle-b", COMPILER);
        let candidate = install(dir.path(), "candidate", COMPILER);

        Self {
            dir,
            include_dir,
            scratch,
            generator,
            oracle_a,
            oracle_b,
            candidate,
        }
    }

    /// Replace the generator body.
    pub fn with_generator(mut self, body: &str) -> Self {
        self.generator = install(self.dir.path(), "generator", body);
        self
    }

    /// Replace the oracle B body.
    pub fn with_oracle_b(mut self, body: &str) -> Self {
        self.oracle_b = install(self.dir.path(), "oracle-b", body);
        self
    }

    /// Replace the candidate compiler body.
    pub fn with_candidate(mut self, body: &str) -> Self {
        self.candidate = install(self.dir.path(), "candidate", body);
        self
    }

    /// A toolchain spec pointing at the fake tools, seeded from 0 so that
    /// trial `id` prints `checksum = id`.
    pub fn spec(&self) -> ToolchainSpec {
        let mut spec = ToolchainSpec::unresolved(&self.config(), Language::C);
        spec.generator.clone_from(&self.generator);
        spec.oracle_a.clone_from(&self.oracle_a);
        spec.oracle_b.clone_from(&self.oracle_b);
        spec.candidate.clone_from(&self.candidate);
        spec.oracle_run_timeout = Duration::from_secs(5);
        spec.candidate_run_timeout = Duration::from_secs(5);
        spec
    }

    /// Config equivalent to [`spec`](Self::spec).
    pub fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.generator.program = self.generator.to_string_lossy().into_owned();
        config.generator.include_dir.clone_from(&self.include_dir);
        config.generator.seed = Some(0);
        config.compilers.c.oracle_a = self.oracle_a.to_string_lossy().into_owned();
        config.compilers.c.oracle_b = self.oracle_b.to_string_lossy().into_owned();
        config.compilers.c.candidate = self.candidate.to_string_lossy().into_owned();
        config
    }

    /// Write [`config`](Self::config) as a TOML file for the CLI.
    pub fn write_config_file(&self) -> PathBuf {
        let config = self.config();
        let text = format!(
            r#"
[generator]
program = "{}"
include_dir = "{}"
seed = 0

[compilers.c]
candidate = "{}"
oracle_a = "{}"
oracle_b = "{}"

[timeouts]
oracle_run = 5
candidate_run = 5
"#,
            config.generator.program,
            config.generator.include_dir.display(),
            config.compilers.c.candidate,
            config.compilers.c.oracle_a,
            config.compilers.c.oracle_b,
        );
        let path = self.dir.path().join("fuzzdiff.toml");
        fs::write(&path, text).unwrap();
        path
    }
}

/// Install an executable `sh` script with the shared argv parsing prelude.
pub fn install(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{PARSE_ARGS}\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Run the fuzzdiff binary with the given args.
pub fn fuzzdiff(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fuzzdiff"))
        .args(args)
        .env("FUZZDIFF_LOG", "off")
        .output()
        .expect("failed to execute fuzzdiff")
}

/// Whether `pid` is gone (or only a zombie waiting to be reaped).
pub fn process_is_dead(pid: u32) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Err(_) => true,
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .is_some_and(|state| state == "Z" || state == "X"),
    }
}
