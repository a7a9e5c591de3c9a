// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    round::{ExecutionId, RoundMode, RoundRecord},
    test_id::TestId,
};
use std::collections::{BTreeMap, BTreeSet};

/// The outcome of a single test under a single seed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatrixCell {
    /// The test passed.
    Pass,

    /// The test failed.
    Fail,

    /// The test did not run under this seed.
    NotRun,
}

impl MatrixCell {
    /// Returns the text used for this cell in the rendered report.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "FAIL",
            Self::NotRun => "-",
        }
    }
}

/// A column of the matrix: one seeded round.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MatrixColumn {
    /// The round's execution id.
    pub execution_id: ExecutionId,

    /// The seeded round index.
    pub index: usize,

    /// The seed the round ran under.
    pub seed: u64,
}

/// A test x seed matrix of outcomes.
///
/// Rows are the tests in the aggregate failure set, so baseline failures are never rows.
/// Columns are the seeded rounds that executed, in order.
#[derive(Clone, Debug, Default)]
pub struct FlakeMatrix {
    columns: Vec<MatrixColumn>,
    rows: BTreeMap<TestId, Vec<MatrixCell>>,
}

impl FlakeMatrix {
    /// Builds a matrix over `rounds` for the tests in `aggregate_failures`.
    ///
    /// Baseline rounds in `rounds` are skipped.
    pub fn new<'a>(
        rounds: impl IntoIterator<Item = &'a RoundRecord>,
        aggregate_failures: &BTreeSet<TestId>,
    ) -> Self {
        let mut columns = Vec::new();
        let mut rows: BTreeMap<_, _> = aggregate_failures
            .iter()
            .map(|test| (test.clone(), Vec::new()))
            .collect();

        for record in rounds {
            let RoundMode::Seeded { index, seed } = record.config().mode() else {
                continue;
            };
            columns.push(MatrixColumn {
                execution_id: record.config().execution_id(),
                index,
                seed,
            });
            for (test, cells) in &mut rows {
                let cell = if record.failed_tests().contains(test) {
                    MatrixCell::Fail
                } else if record.passed_tests().contains(test) {
                    MatrixCell::Pass
                } else {
                    MatrixCell::NotRun
                };
                cells.push(cell);
            }
        }

        Self { columns, rows }
    }

    /// Returns the columns of the matrix.
    pub fn columns(&self) -> &[MatrixColumn] {
        &self.columns
    }

    /// Iterates over the rows of the matrix, ordered by test.
    ///
    /// Each row has one cell per column.
    pub fn rows(&self) -> impl Iterator<Item = (&TestId, &[MatrixCell])> + '_ {
        self.rows.iter().map(|(test, cells)| (test, cells.as_slice()))
    }

    /// Returns the cell for `test` in the column for seeded round `index`.
    pub fn cell(&self, test: &TestId, index: usize) -> Option<MatrixCell> {
        let column = self.columns.iter().position(|c| c.index == index)?;
        self.rows.get(test).map(|cells| cells[column])
    }

    /// Returns true if the matrix has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
