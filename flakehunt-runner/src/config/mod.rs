// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for flakehunt.
//!
//! Configuration is read from an embedded default config, with the repository's
//! `.config/flakehunt.toml` layered on top. Settings are grouped into profiles: the `default`
//! profile defines every setting, and custom profiles override any subset of them.
//!
//! Patterns such as retry filters and the test name filter are compiled while the config is
//! read, so that errors are reported before any round is executed.

mod command;
mod imp;
mod max_failures;

pub use command::*;
pub use imp::*;
pub use max_failures::*;

#[cfg(test)]
mod test_helpers;
