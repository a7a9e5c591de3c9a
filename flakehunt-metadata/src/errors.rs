// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error, fmt};

/// An error that occurs while reading a [`RunSummary`](crate::RunSummary) from disk.
#[derive(Debug)]
pub enum SummaryReadError {
    /// Reading the file failed.
    Io(std::io::Error),

    /// The file contents were not a valid summary.
    Json(serde_json::Error),
}

impl fmt::Display for SummaryReadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(_) => write!(f, "reading flakehunt summary failed"),
            Self::Json(_) => write!(f, "parsing flakehunt summary JSON failed"),
        }
    }
}

impl error::Error for SummaryReadError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
        }
    }
}
