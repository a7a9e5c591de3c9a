// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `flakehunt` failures.
///
/// `flakehunt` runs may fail for a variety of reasons. This structure documents the exit codes
/// that may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum FlakehuntExitCode {}

impl FlakehuntExitCode {
    /// No errors occurred, and no test failed only under perturbation.
    pub const OK: i32 = 0;

    /// One or more tests passed in the baseline round but failed in at least one seeded round.
    pub const FLAKY_TESTS_DETECTED: i32 = 100;

    /// The execution engine itself failed (as opposed to a test failing).
    pub const ENGINE_FAILED: i32 = 101;

    /// Materializing the instrumentation artifact failed.
    pub const INSTRUMENTATION_FAILED: i32 = 102;

    /// A test failed in a way that could not be retried, so flakiness could not be determined.
    ///
    /// This is also produced when the `simulate-non-retryable` override is set.
    pub const NON_RETRIED_TESTS: i32 = 106;

    /// A user issue happened while setting up a flakehunt invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
