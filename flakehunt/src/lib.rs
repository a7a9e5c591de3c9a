// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Finds tests that only fail under seeded perturbation.
//!
//! `flakehunt run` executes the test suite once without perturbation, then once per seed, and
//! reports every test that failed only under a seed. The core logic lives in
//! [`flakehunt_runner`]; this crate is the command-line front end.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, OutputWriter};
