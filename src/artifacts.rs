//! Per-trial scratch files.
//!
//! The scratch directory is partitioned by trial id: every path a trial
//! touches is derived from its id alone, so concurrent trials never share a
//! file and no locking is needed. The directory itself is wiped and
//! recreated at run start.
//!
//! Layout for trial `17` in `c` mode:
//!
//! ```text
//! <scratch>/17.c            generated source
//! <scratch>/17.oracle_a     oracle A binary
//! <scratch>/17.oracle_b     oracle B binary
//! <scratch>/17.candidate    candidate binary
//! <scratch>/17.expected     agreed oracle stdout   (failures only)
//! <scratch>/17.actual       candidate stdout       (failures only)
//! <scratch>/17.log          candidate diagnostics  (failures only)
//! <scratch>/summary.json    run summary
//! ```

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::Language;
use crate::error::SetupError;
use crate::outcome::TrialId;

/// File name of the run summary inside the scratch directory.
pub const SUMMARY_FILE: &str = "summary.json";

/// All scratch paths belonging to one trial.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrialPaths {
    pub source: PathBuf,
    pub oracle_a_bin: PathBuf,
    pub oracle_b_bin: PathBuf,
    pub candidate_bin: PathBuf,
    pub expected_output: PathBuf,
    pub candidate_output: PathBuf,
    pub candidate_log: PathBuf,
}

impl TrialPaths {
    fn all(&self) -> [&Path; 7] {
        [
            &self.source,
            &self.oracle_a_bin,
            &self.oracle_b_bin,
            &self.candidate_bin,
            &self.expected_output,
            &self.candidate_output,
            &self.candidate_log,
        ]
    }
}

/// Allocates and reclaims trial scratch files under one run directory.
#[derive(Clone, Debug)]
pub struct ArtifactManager {
    root: PathBuf,
    source_extension: &'static str,
}

impl ArtifactManager {
    /// Wipe `root` if it exists and create it empty.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::ScratchDir`] if the directory cannot be removed
    /// or created. The run must not start in that case.
    pub fn create_fresh(root: &Path, language: Language) -> Result<Self, SetupError> {
        let scratch_err = |source| SetupError::ScratchDir {
            path: root.to_owned(),
            source,
        };
        match fs::symlink_metadata(root) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(root).map_err(scratch_err)?,
            Ok(_) => fs::remove_file(root).map_err(scratch_err)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(scratch_err(e)),
        }
        fs::create_dir_all(root).map_err(scratch_err)?;
        Ok(Self::new(root.to_owned(), language))
    }

    /// Wrap an existing directory without touching it.
    #[must_use]
    pub const fn new(root: PathBuf, language: Language) -> Self {
        Self {
            root,
            source_extension: language.source_extension(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Paths for trial `id`. Pure: nothing is created on disk.
    #[must_use]
    pub fn allocate(&self, id: TrialId) -> TrialPaths {
        let file = |suffix: &str| self.root.join(format!("{id}.{suffix}"));
        TrialPaths {
            source: file(self.source_extension),
            oracle_a_bin: file("oracle_a"),
            oracle_b_bin: file("oracle_b"),
            candidate_bin: file("candidate"),
            expected_output: file("expected"),
            candidate_output: file("actual"),
            candidate_log: file("log"),
        }
    }

    /// Delete every file belonging to trial `id`. Missing files are fine.
    ///
    /// Best-effort: other I/O errors are logged, not returned, since a stray
    /// scratch file never changes a trial's outcome.
    pub fn reclaim(&self, id: TrialId) {
        for path in self.allocate(id).all() {
            if let Err(e) = fs::remove_file(path)
                && e.kind() != io::ErrorKind::NotFound
            {
                warn!(trial = id, path = %path.display(), error = %e, "failed to reclaim artifact");
            }
        }
    }

    /// Whether any file for trial `id` is still on disk.
    #[must_use]
    pub fn has_artifacts(&self, id: TrialId) -> bool {
        self.allocate(id).all().iter().any(|p| p.exists())
    }

    /// Atomically write `contents` to `<root>/<name>` (write to temp + rename).
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn write_atomic(&self, name: &str, contents: &[u8]) -> io::Result<PathBuf> {
        let path = self.root.join(name);
        let tmp = self.root.join(format!(".{name}.tmp"));
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &path)?;
        Ok(path)
    }
}
