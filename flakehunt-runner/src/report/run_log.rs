// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The append-only log of finished rounds.

use crate::{errors::RunLogError, round::ExecutionId};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fs::{self, File, OpenOptions},
    io::Write,
};

/// An append-only log of the execution ids of finished rounds, one per line.
///
/// Each entry is written with a single call and flushed immediately, so a run that is killed
/// part way through leaves behind every finished round and at most one partial line.
#[derive(Debug)]
pub struct RunLog {
    path: Utf8PathBuf,
    file: File,
}

impl RunLog {
    /// Creates the run log at `path`, truncating any existing contents.
    pub fn create(path: impl Into<Utf8PathBuf>) -> Result<Self, RunLogError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|error| RunLogError::Create {
                path: path.clone(),
                error,
            })?;
        Ok(Self { path, file })
    }

    /// Returns the path to the run log.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Appends `execution_id` to the log.
    pub fn append(&mut self, execution_id: ExecutionId) -> Result<(), RunLogError> {
        let line = format!("{execution_id}\n");
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|error| RunLogError::Write {
                path: self.path.clone(),
                error,
            })
    }

    /// Reads back the execution ids recorded in the log at `path`, in the order they were
    /// written.
    ///
    /// A final line without a trailing newline was only partially written, and is ignored.
    pub fn read(path: &Utf8Path) -> Result<Vec<ExecutionId>, RunLogError> {
        let contents = fs::read_to_string(path).map_err(|error| RunLogError::Read {
            path: path.to_owned(),
            error,
        })?;

        let complete = match contents.rfind('\n') {
            Some(end) => &contents[..end],
            None => return Ok(Vec::new()),
        };

        complete
            .split('\n')
            .enumerate()
            .map(|(index, line)| {
                line.parse().map_err(|error| RunLogError::Parse {
                    path: path.to_owned(),
                    line_number: index + 1,
                    error,
                })
            })
            .collect()
    }
}
