//! Setup error taxonomy.
//!
//! Everything in [`SetupError`] is fatal: it aborts the run before the first
//! trial is submitted. Per-trial problems never surface here; they are
//! classified into an [`Outcome`](crate::outcome::Outcome) instead.
//!
//! Messages follow the same shape throughout: what went wrong, then a
//! `To fix:` line an operator can act on.

use std::fmt;
use std::path::PathBuf;

/// Unified error type for everything that can go wrong before trials start.
#[derive(Debug)]
pub enum SetupError {
    /// A command-line argument was out of range.
    InvalidArgument {
        /// Argument name as shown in `--help`.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The scratch directory could not be cleared or created.
    ScratchDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A required executable could not be resolved.
    ToolMissing {
        /// Role of the tool, e.g. `"oracle A"`.
        role: &'static str,
        /// The program as configured.
        program: String,
    },

    /// The generator runtime include directory does not exist.
    IncludeDirMissing { path: PathBuf },

    /// The configuration file could not be read or parsed.
    Config { path: PathBuf, detail: String },
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { name, reason } => {
                write!(
                    f,
                    "invalid argument <{name}>: {reason}\n  To fix: see 'fuzzdiff --help' for the expected values."
                )
            }
            Self::ScratchDir { path, source } => {
                write!(
                    f,
                    "cannot prepare scratch directory {}: {source}\n  To fix: choose a writable location, or remove the directory by hand.",
                    path.display()
                )
            }
            Self::ToolMissing { role, program } => {
                write!(
                    f,
                    "{role} '{program}' is not an executable on PATH.\n  To fix: install it, or point the [compilers]/[generator] section of the config file at it."
                )
            }
            Self::IncludeDirMissing { path } => {
                write!(
                    f,
                    "generator include directory {} does not exist.\n  To fix: install the generator runtime headers, or set [generator].include_dir.",
                    path.display()
                )
            }
            Self::Config { path, detail } => {
                write!(
                    f,
                    "failed to load config {}: {detail}\n  To fix: correct the file, or run without --config to use the defaults.",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ScratchDir { source, .. } => Some(source),
            _ => None,
        }
    }
}
