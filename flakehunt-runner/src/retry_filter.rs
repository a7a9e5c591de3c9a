// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Selection of tests eligible for retry under perturbation.
//!
//! A [`RetryFilter`] is built from a [`RetryFilterSpec`]: four lists of glob patterns that are
//! matched against a test's fully-qualified class name and its declared annotations. A test is
//! selected if no include rules are configured or at least one include rule matches, and no
//! exclude rule matches. Exclude rules always win.

use crate::{
    errors::{GlobConstructError, RetryFilterBuildError},
    test_id::TestDescriptor,
};
use serde::Deserialize;
use std::fmt;

/// The raw patterns a [`RetryFilter`] is built from.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryFilterSpec {
    /// Globs matched against fully-qualified class names. Matching tests are selected.
    #[serde(default)]
    pub include_classes: Vec<String>,

    /// Globs matched against annotation names. Tests with a matching annotation are selected.
    #[serde(default)]
    pub include_annotations: Vec<String>,

    /// Globs matched against fully-qualified class names. Matching tests are never selected.
    #[serde(default)]
    pub exclude_classes: Vec<String>,

    /// Globs matched against annotation names. Tests with a matching annotation are never
    /// selected.
    #[serde(default)]
    pub exclude_annotations: Vec<String>,
}

impl RetryFilterSpec {
    /// Returns true if no rules are configured.
    pub fn is_empty(&self) -> bool {
        self.include_classes.is_empty()
            && self.include_annotations.is_empty()
            && self.exclude_classes.is_empty()
            && self.exclude_annotations.is_empty()
    }

    /// Compiles these patterns into a [`RetryFilter`].
    pub fn build(&self) -> Result<RetryFilter, RetryFilterBuildError> {
        Ok(RetryFilter {
            include_classes: compile(FilterRuleKind::IncludeClasses, &self.include_classes)?,
            include_annotations: compile(
                FilterRuleKind::IncludeAnnotations,
                &self.include_annotations,
            )?,
            exclude_classes: compile(FilterRuleKind::ExcludeClasses, &self.exclude_classes)?,
            exclude_annotations: compile(
                FilterRuleKind::ExcludeAnnotations,
                &self.exclude_annotations,
            )?,
            spec: self.clone(),
        })
    }
}

/// Identifies one of the four rule lists in a [`RetryFilterSpec`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilterRuleKind {
    /// `include-classes`.
    IncludeClasses,
    /// `include-annotations`.
    IncludeAnnotations,
    /// `exclude-classes`.
    ExcludeClasses,
    /// `exclude-annotations`.
    ExcludeAnnotations,
}

impl fmt::Display for FilterRuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncludeClasses => write!(f, "include-classes"),
            Self::IncludeAnnotations => write!(f, "include-annotations"),
            Self::ExcludeClasses => write!(f, "exclude-classes"),
            Self::ExcludeAnnotations => write!(f, "exclude-annotations"),
        }
    }
}

/// A compiled predicate over test identities.
#[derive(Clone, Debug)]
pub struct RetryFilter {
    include_classes: Vec<NameGlob>,
    include_annotations: Vec<NameGlob>,
    exclude_classes: Vec<NameGlob>,
    exclude_annotations: Vec<NameGlob>,
    spec: RetryFilterSpec,
}

impl RetryFilter {
    /// Returns a filter that selects every test.
    pub fn all() -> Self {
        Self {
            include_classes: Vec::new(),
            include_annotations: Vec::new(),
            exclude_classes: Vec::new(),
            exclude_annotations: Vec::new(),
            spec: RetryFilterSpec::default(),
        }
    }

    /// Returns the patterns this filter was built from.
    pub fn spec(&self) -> &RetryFilterSpec {
        &self.spec
    }

    /// Returns true if the test is eligible for retry under perturbation.
    pub fn is_selected(&self, test: &TestDescriptor) -> bool {
        let class_name = test.id().class_name();
        let annotation_matches = |globs: &[NameGlob]| {
            test.annotations()
                .iter()
                .any(|annotation| globs.iter().any(|glob| glob.is_match(annotation)))
        };

        let excluded = self
            .exclude_classes
            .iter()
            .any(|glob| glob.is_match(class_name))
            || annotation_matches(&self.exclude_annotations);
        if excluded {
            return false;
        }

        if self.include_classes.is_empty() && self.include_annotations.is_empty() {
            return true;
        }

        self.include_classes
            .iter()
            .any(|glob| glob.is_match(class_name))
            || annotation_matches(&self.include_annotations)
    }
}

fn compile(
    kind: FilterRuleKind,
    patterns: &[String],
) -> Result<Vec<NameGlob>, RetryFilterBuildError> {
    patterns
        .iter()
        .map(|pattern| {
            NameGlob::new(pattern).map_err(|error| RetryFilterBuildError::new(kind, pattern, error))
        })
        .collect()
}

/// A glob over dotted names.
///
/// `globset::GlobMatcher` has path-like semantics, so the glob is converted to a regex and matched
/// against the whole name.
#[derive(Clone, Debug)]
struct NameGlob {
    regex: regex::bytes::Regex,
}

impl NameGlob {
    fn new(glob_str: &str) -> Result<Self, GlobConstructError> {
        let glob = globset::GlobBuilder::new(glob_str)
            // Only allow escapes via [].
            .backslash_escape(false)
            .empty_alternates(true)
            .build()
            .map_err(GlobConstructError::InvalidGlob)?;

        let regex = regex::bytes::Regex::new(glob.regex())
            .map_err(|error| GlobConstructError::RegexError(error.to_string()))?;
        Ok(Self { regex })
    }

    fn is_match(&self, s: &str) -> bool {
        self.regex.is_match(s.as_bytes())
    }
}
