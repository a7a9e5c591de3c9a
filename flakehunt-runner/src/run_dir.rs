// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! On-disk layout of a flakehunt run.

use crate::errors::RunDirCreateError;
use camino::{Utf8Path, Utf8PathBuf};
use quick_junit::ReportUuid;

/// The file name of the run log, relative to the run directory.
pub const RUN_LOG_FILE_NAME: &str = "run.log";

/// The file name of the rendered report, relative to the run directory.
pub const REPORT_FILE_NAME: &str = "report.md";

/// The file name of the JSON summary, relative to the run directory.
pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// Returns the directory that holds every run, relative to a profile's store directory.
pub fn runs_dir(store_dir: &Utf8Path) -> Utf8PathBuf {
    store_dir.join("runs")
}

/// Returns the directory that instrumentation artifacts are materialized into.
pub fn artifact_dir(store_dir: &Utf8Path) -> Utf8PathBuf {
    store_dir.join("instrumentation")
}

/// The directory a single run writes to: `<store-dir>/runs/<run-id>`.
///
/// Each round writes its output to a subdirectory named after its execution id.
#[derive(Clone, Debug)]
pub struct RunDir {
    run_id: ReportUuid,
    path: Utf8PathBuf,
}

impl RunDir {
    /// Returns the run directory for `run_id`, without creating it.
    pub fn new(store_dir: &Utf8Path, run_id: ReportUuid) -> Self {
        Self {
            run_id,
            path: runs_dir(store_dir).join(run_id.to_string()),
        }
    }

    /// Creates the directory on disk, along with any missing parents.
    pub fn create(&self) -> Result<(), RunDirCreateError> {
        std::fs::create_dir_all(&self.path)
            .map_err(|error| RunDirCreateError::new(&self.path, error))
    }

    /// Returns the run id.
    pub fn run_id(&self) -> ReportUuid {
        self.run_id
    }

    /// Returns the path to the run directory.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the path to the run log.
    pub fn run_log_path(&self) -> Utf8PathBuf {
        self.path.join(RUN_LOG_FILE_NAME)
    }

    /// Returns the path to the rendered report.
    pub fn report_path(&self) -> Utf8PathBuf {
        self.path.join(REPORT_FILE_NAME)
    }

    /// Returns the path to the JSON summary.
    pub fn summary_path(&self) -> Utf8PathBuf {
        self.path.join(SUMMARY_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    #[test]
    fn layout() {
        let temp_dir = Utf8TempDir::new().unwrap();
        let run_id = ReportUuid::new_v4();
        let run_dir = RunDir::new(temp_dir.path(), run_id);
        assert!(!run_dir.path().exists(), "new does not touch the filesystem");

        run_dir.create().expect("run dir created");
        assert!(run_dir.path().is_dir());
        assert_eq!(
            run_dir.run_log_path(),
            temp_dir
                .path()
                .join(format!("runs/{run_id}/{RUN_LOG_FILE_NAME}"))
        );
        assert_eq!(run_dir.report_path().parent(), Some(run_dir.path()));
    }
}
