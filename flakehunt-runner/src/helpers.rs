// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for flakehunt-runner.

/// Utilities for pluralizing various words based on count or plurality.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "round" if `count` is 1, otherwise "rounds".
    pub fn rounds_str(count: usize) -> &'static str {
        if count == 1 { "round" } else { "rounds" }
    }

    /// Returns "failure" if `count` is 1, otherwise "failures".
    pub fn failures_str(count: usize) -> &'static str {
        if count == 1 { "failure" } else { "failures" }
    }

    /// Returns "is" if `count` is 1, otherwise "are".
    pub fn is_str(count: usize) -> &'static str {
        if count == 1 { "is" } else { "are" }
    }
}
