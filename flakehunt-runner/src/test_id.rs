// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test identities, as reported by the execution engine.

use smol_str::SmolStr;
use std::{
    collections::{BTreeMap, BTreeSet, btree_map},
    fmt,
};

/// The identity of a single test method: a fully-qualified class name and a method name.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TestId {
    class_name: SmolStr,
    method_name: SmolStr,
}

impl TestId {
    /// Creates a new test identity.
    pub fn new(class_name: impl Into<SmolStr>, method_name: impl Into<SmolStr>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
        }
    }

    /// Returns the fully-qualified class name.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Returns the method name.
    pub fn method_name(&self) -> &str {
        &self.method_name
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class_name, self.method_name)
    }
}

/// A test as reported by the execution engine, along with the annotations declared on it.
///
/// Annotations are used by the [`RetryFilter`](crate::retry_filter::RetryFilter).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestDescriptor {
    id: TestId,
    annotations: Vec<SmolStr>,
}

impl TestDescriptor {
    /// Creates a new descriptor with no annotations.
    pub fn new(id: TestId) -> Self {
        Self {
            id,
            annotations: Vec::new(),
        }
    }

    /// Creates a new descriptor with the given annotations.
    pub fn with_annotations(
        id: TestId,
        annotations: impl IntoIterator<Item = impl Into<SmolStr>>,
    ) -> Self {
        Self {
            id,
            annotations: annotations.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the test identity.
    pub fn id(&self) -> &TestId {
        &self.id
    }

    /// Returns the annotations declared on the test or its class.
    pub fn annotations(&self) -> &[SmolStr] {
        &self.annotations
    }
}

/// A set of tests, grouped by class name.
///
/// This is the shape in which per-round failures are exposed: a mapping from class name to
/// the set of method names.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TestsByClass {
    classes: BTreeMap<SmolStr, BTreeSet<SmolStr>>,
}

impl TestsByClass {
    /// Creates a new, empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a test, returning true if it wasn't already present.
    pub fn insert(&mut self, id: &TestId) -> bool {
        self.classes
            .entry(id.class_name.clone())
            .or_default()
            .insert(id.method_name.clone())
    }

    /// Returns true if the given test is present.
    pub fn contains(&self, id: &TestId) -> bool {
        self.classes
            .get(id.class_name())
            .is_some_and(|methods| methods.contains(id.method_name()))
    }

    /// Returns true if no tests are present.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Returns the total number of tests, across all classes.
    pub fn len(&self) -> usize {
        self.classes.values().map(BTreeSet::len).sum()
    }

    /// Iterates over classes and their method names, in sorted order.
    pub fn iter(&self) -> btree_map::Iter<'_, SmolStr, BTreeSet<SmolStr>> {
        self.classes.iter()
    }

    /// Iterates over every test, in sorted order.
    pub fn test_ids(&self) -> impl Iterator<Item = TestId> + '_ {
        self.classes.iter().flat_map(|(class_name, methods)| {
            methods
                .iter()
                .map(move |method_name| TestId::new(class_name.clone(), method_name.clone()))
        })
    }
}

impl<'a> FromIterator<&'a TestId> for TestsByClass {
    fn from_iter<I: IntoIterator<Item = &'a TestId>>(iter: I) -> Self {
        let mut tests = Self::new();
        for id in iter {
            tests.insert(id);
        }
        tests
    }
}
