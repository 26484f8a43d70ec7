//! Setup-time checks.
//!
//! Resolves the generator and the three compilers to executables and checks
//! the generator include directory before any trial starts. A missing tool is
//! a setup error for the whole run, never a per-trial skip.

use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{HarnessConfig, Language};
use crate::error::SetupError;
use crate::toolchain::ToolchainSpec;

/// Resolve every tool in `config` for `language`.
///
/// Programs containing a `/` are taken as paths (made absolute against the
/// current directory); bare names are looked up on `PATH`.
///
/// # Errors
///
/// Returns [`SetupError::ToolMissing`] for the first unresolvable tool, or
/// [`SetupError::IncludeDirMissing`] if the include directory is absent.
pub fn resolve(config: &HarnessConfig, language: Language) -> Result<ToolchainSpec, SetupError> {
    resolve_with_path(config, language, std::env::var_os("PATH").as_deref())
}

/// [`resolve`] with an explicit `PATH` value.
///
/// # Errors
///
/// Same as [`resolve`].
pub fn resolve_with_path(
    config: &HarnessConfig,
    language: Language,
    path_var: Option<&OsStr>,
) -> Result<ToolchainSpec, SetupError> {
    let mut spec = ToolchainSpec::unresolved(config, language);
    let compilers = config.compilers_for(language);

    spec.generator = find_tool("generator", &config.generator.program, path_var)?;
    spec.oracle_a = find_tool("oracle A", &compilers.oracle_a, path_var)?;
    spec.oracle_b = find_tool("oracle B", &compilers.oracle_b, path_var)?;
    spec.candidate = find_tool("candidate", &compilers.candidate, path_var)?;

    if !spec.include_dir.is_dir() {
        return Err(SetupError::IncludeDirMissing {
            path: spec.include_dir,
        });
    }

    debug!(?spec, "toolchain resolved");
    Ok(spec)
}

fn find_tool(role: &'static str, program: &str, path_var: Option<&OsStr>) -> Result<PathBuf, SetupError> {
    let missing = || SetupError::ToolMissing {
        role,
        program: program.to_owned(),
    };

    if program.is_empty() {
        return Err(missing());
    }

    if program.contains('/') {
        let path = std::path::absolute(program).map_err(|_| missing())?;
        return if is_executable(&path) {
            Ok(path)
        } else {
            Err(missing())
        };
    }

    path_var
        .into_iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(missing)
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}
