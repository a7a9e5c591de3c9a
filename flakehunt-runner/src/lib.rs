// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for flakehunt.
//!
//! flakehunt executes a test suite once without perturbation, then repeatedly under seeded
//! non-determinism, and reports the tests that fail only under perturbation. The main entry
//! point is [`RoundOrchestrator`](orchestrator::RoundOrchestrator), constructed through a
//! [`RoundOrchestratorBuilder`](orchestrator::RoundOrchestratorBuilder).

pub mod config;
pub mod engine;
pub mod errors;
mod helpers;
pub mod instrumentation;
pub mod orchestrator;
pub mod report;
pub mod reporter;
pub mod result_processor;
pub mod retry_filter;
pub mod round;
pub mod run_dir;
pub mod seed;
pub mod test_id;
