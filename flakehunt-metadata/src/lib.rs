// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to flakehunt machine-readable output.
//!
//! Every completed flakehunt run writes a `summary.json` into its run directory. The types in
//! this crate describe that file, so that other tools can consume it without depending on the
//! runner itself.

mod errors;
mod exit_codes;
mod summary;

pub use errors::*;
pub use exit_codes::*;
pub use summary::*;
