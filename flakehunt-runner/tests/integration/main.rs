// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scenario tests for the round orchestrator, driven by a scripted engine.

mod fixtures;
mod orchestrator;
