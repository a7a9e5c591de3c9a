// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{CommandSpec, MaxFailures};
use crate::{
    errors::{ConfigParseError, ConfigParseErrorKind, ProfileNotFound},
    retry_filter::{RetryFilter, RetryFilterSpec},
    round::{PerturbationMode, PerturbationRange, PerturbationSettings},
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// Overall configuration for flakehunt.
///
/// Most settings are managed through profiles, obtained through the [`profile`](Self::profile)
/// method.
#[derive(Clone, Debug)]
pub struct FlakehuntConfig {
    workspace_root: Utf8PathBuf,
    store: StoreConfigImpl,
    default_profile: DefaultProfileImpl,
    other_profiles: HashMap<String, CustomProfileImpl>,
    compiled: HashMap<String, CompiledProfile>,
}

impl FlakehuntConfig {
    /// The default location of the config within the path: `.config/flakehunt.toml`, used to
    /// read the config from the given directory.
    pub const CONFIG_PATH: &'static str = ".config/flakehunt.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the flakehunt config from the given file, or if not specified from
    /// `.config/flakehunt.toml` in the workspace root.
    ///
    /// If no config file is specified and the workspace root doesn't have
    /// `.config/flakehunt.toml`, uses the default config options. Unknown keys are reported as
    /// warnings.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !unknown.is_empty() {
            warn_unknown_keys(&config_file, &workspace_root, &unknown);
        }

        config
            .into_config(workspace_root)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))
    }

    /// Returns the default flakehunt config.
    #[cfg(test)]
    pub(crate) fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        use itertools::Itertools;

        let config = Self::make_default_config()
            .build()
            .expect("default config is always valid");

        let mut unknown = BTreeSet::new();
        let deserialized: FlakehuntConfigDeserialize =
            serde_ignored::deserialize(config, |path: serde_ignored::Path| {
                unknown.insert(path.to_string());
            })
            .expect("default config is always valid");

        // Make sure there aren't any unknown keys in the default config, since it is
        // embedded/shipped with this binary.
        if !unknown.is_empty() {
            panic!(
                "found unknown keys in default config: {}",
                unknown.iter().join(", ")
            );
        }

        deserialized
            .into_config(workspace_root.into())
            .expect("default config is always valid")
    }

    /// Returns the profile with the given name, or an error if a profile was specified but not
    /// found.
    pub fn profile(
        &self,
        name: impl AsRef<str>,
    ) -> Result<FlakehuntProfile<'_>, ProfileNotFound> {
        let name = name.as_ref();
        let custom_profile = match self.other_profiles.get(name) {
            Some(profile) => Some(profile),
            None if name == Self::DEFAULT_PROFILE => None,
            None => {
                return Err(ProfileNotFound::new(name, self.all_profiles()));
            }
        };
        let compiled = self
            .compiled
            .get(name)
            .ok_or_else(|| ProfileNotFound::new(name, self.all_profiles()))?;

        let mut store_dir = self.workspace_root.join(&self.store.dir);
        store_dir.push(name);

        Ok(FlakehuntProfile {
            name: name.to_owned(),
            store_dir,
            default_profile: &self.default_profile,
            custom_profile,
            compiled,
        })
    }

    fn all_profiles(&self) -> impl Iterator<Item = &str> {
        std::iter::once(Self::DEFAULT_PROFILE)
            .chain(self.other_profiles.keys().map(String::as_str))
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(FlakehuntConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: FlakehuntConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // Both serde_path_to_error and the config crate report the key. Drop the key
                // from the config error for consistency.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

fn warn_unknown_keys(
    config_file: &Utf8Path,
    workspace_root: &Utf8Path,
    unknown: &BTreeSet<String>,
) {
    let mut unknown_str = String::new();
    if let (1, Some(ignored_key)) = (unknown.len(), unknown.first()) {
        // Print this on the same line.
        unknown_str.push_str("key: ");
        unknown_str.push_str(ignored_key);
    } else {
        unknown_str.push_str("keys:\n");
        for ignored_key in unknown {
            unknown_str.push('\n');
            unknown_str.push_str("  - ");
            unknown_str.push_str(ignored_key);
        }
    }

    warn!(
        "in config file {}, ignoring unknown configuration {unknown_str}",
        config_file
            .strip_prefix(workspace_root)
            .unwrap_or(config_file),
    );
}

/// A configuration profile for flakehunt.
///
/// Returned by [`FlakehuntConfig::profile`].
#[derive(Clone, Debug)]
pub struct FlakehuntProfile<'cfg> {
    name: String,
    store_dir: Utf8PathBuf,
    default_profile: &'cfg DefaultProfileImpl,
    custom_profile: Option<&'cfg CustomProfileImpl>,
    compiled: &'cfg CompiledProfile,
}

/// Returns a `Copy` field from a profile, falling back to the default profile.
macro_rules! profile_field {
    ($prof:ident.$field:ident) => {
        $prof
            .custom_profile
            .and_then(|p| p.$field)
            .unwrap_or($prof.default_profile.$field)
    };
}

/// Returns an optional field from a profile, falling back to the default profile.
macro_rules! profile_field_opt {
    ($prof:ident.$field:ident) => {
        $prof
            .custom_profile
            .and_then(|p| p.$field.as_ref())
            .or($prof.default_profile.$field.as_ref())
    };
}

impl<'cfg> FlakehuntProfile<'cfg> {
    /// Returns the name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the absolute profile-specific store directory.
    pub fn store_dir(&self) -> &Utf8Path {
        &self.store_dir
    }

    /// Returns the number of seeded rounds to run after the baseline.
    pub fn rounds(&self) -> u32 {
        profile_field!(self.rounds)
    }

    /// Returns the base seed from which per-round seeds are derived.
    pub fn base_seed(&self) -> u64 {
        profile_field!(self.base_seed)
    }

    /// Returns the maximum number of seeded-round failures allowed per test.
    pub fn max_failures(&self) -> MaxFailures {
        profile_field!(self.max_failures_per_test)
    }

    /// Returns true if the run should stop after the first seeded round, as if a non-retryable
    /// failure had occurred.
    pub fn simulate_non_retryable(&self) -> bool {
        profile_field!(self.simulate_non_retryable)
    }

    /// Returns the perturbation settings for seeded rounds.
    pub fn perturbation(&self) -> PerturbationSettings {
        PerturbationSettings {
            mode: profile_field!(self.mode),
            test_name_filter: self.compiled.test_name_filter.clone(),
            range: profile_field_opt!(self.perturb_range).copied(),
        }
    }

    /// Returns the compiled retry filter.
    pub fn retry_filter(&self) -> &'cfg RetryFilter {
        &self.compiled.retry_filter
    }

    /// Returns the command that executes the test suite, if configured.
    pub fn engine_command(&self) -> Option<&'cfg CommandSpec> {
        profile_field_opt!(self.engine_command)
    }

    /// Returns the command that materializes the instrumentation artifact, if configured.
    pub fn instrumentation_command(&self) -> Option<&'cfg CommandSpec> {
        profile_field_opt!(self.instrumentation_command)
    }

    /// Returns the absolute path to the JUnit report, if configured.
    pub fn junit_path(&self) -> Option<Utf8PathBuf> {
        self.custom_profile
            .and_then(|p| p.junit.path.as_deref())
            .or(self.default_profile.junit.path.as_deref())
            .map(|path| self.store_dir.join(path))
    }
}

#[derive(Clone, Debug)]
struct CompiledProfile {
    retry_filter: RetryFilter,
    test_name_filter: Option<Regex>,
}

impl CompiledProfile {
    fn new(
        name: &str,
        default_profile: &DefaultProfileImpl,
        custom_profile: Option<&CustomProfileImpl>,
    ) -> Result<Self, ConfigParseErrorKind> {
        let list = |custom: Option<&Vec<String>>, default: &Vec<String>| {
            custom.unwrap_or(default).clone()
        };
        let spec = RetryFilterSpec {
            include_classes: list(
                custom_profile.and_then(|p| p.include_classes.as_ref()),
                &default_profile.include_classes,
            ),
            include_annotations: list(
                custom_profile.and_then(|p| p.include_annotations.as_ref()),
                &default_profile.include_annotations,
            ),
            exclude_classes: list(
                custom_profile.and_then(|p| p.exclude_classes.as_ref()),
                &default_profile.exclude_classes,
            ),
            exclude_annotations: list(
                custom_profile.and_then(|p| p.exclude_annotations.as_ref()),
                &default_profile.exclude_annotations,
            ),
        };
        let retry_filter =
            spec.build()
                .map_err(|error| ConfigParseErrorKind::InvalidRetryFilter {
                    profile: name.to_owned(),
                    error,
                })?;

        let pattern = custom_profile
            .and_then(|p| p.test_name_filter.as_ref())
            .or(default_profile.test_name_filter.as_ref());
        let test_name_filter = pattern
            .map(|pattern| {
                Regex::new(pattern).map_err(|error| ConfigParseErrorKind::InvalidTestNameFilter {
                    profile: name.to_owned(),
                    pattern: pattern.clone(),
                    error,
                })
            })
            .transpose()?;

        Ok(Self {
            retry_filter,
            test_name_filter,
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct FlakehuntConfigDeserialize {
    store: StoreConfigImpl,
    #[serde(rename = "profile")]
    profiles: HashMap<String, CustomProfileImpl>,
}

impl FlakehuntConfigDeserialize {
    fn into_config(
        mut self,
        workspace_root: Utf8PathBuf,
    ) -> Result<FlakehuntConfig, ConfigParseErrorKind> {
        let p = self
            .profiles
            .remove(FlakehuntConfig::DEFAULT_PROFILE)
            .expect("default profile should exist");
        let default_profile = DefaultProfileImpl::new(p);

        let mut compiled = HashMap::new();
        compiled.insert(
            FlakehuntConfig::DEFAULT_PROFILE.to_owned(),
            CompiledProfile::new(FlakehuntConfig::DEFAULT_PROFILE, &default_profile, None)?,
        );
        for (name, custom_profile) in &self.profiles {
            compiled.insert(
                name.clone(),
                CompiledProfile::new(name, &default_profile, Some(custom_profile))?,
            );
        }

        Ok(FlakehuntConfig {
            workspace_root,
            store: self.store,
            default_profile,
            other_profiles: self.profiles,
            compiled,
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StoreConfigImpl {
    dir: Utf8PathBuf,
}

#[derive(Clone, Debug)]
struct DefaultProfileImpl {
    rounds: u32,
    base_seed: u64,
    max_failures_per_test: MaxFailures,
    simulate_non_retryable: bool,
    mode: PerturbationMode,
    test_name_filter: Option<String>,
    perturb_range: Option<PerturbationRange>,
    include_classes: Vec<String>,
    include_annotations: Vec<String>,
    exclude_classes: Vec<String>,
    exclude_annotations: Vec<String>,
    engine_command: Option<CommandSpec>,
    instrumentation_command: Option<CommandSpec>,
    junit: JunitImpl,
}

impl DefaultProfileImpl {
    // The default profile has all non-optional fields defined on it.
    fn new(p: CustomProfileImpl) -> Self {
        Self {
            rounds: p.rounds.expect("rounds present in default profile"),
            base_seed: p.base_seed.expect("base-seed present in default profile"),
            max_failures_per_test: p
                .max_failures_per_test
                .expect("max-failures-per-test present in default profile"),
            simulate_non_retryable: p
                .simulate_non_retryable
                .expect("simulate-non-retryable present in default profile"),
            mode: p.mode.expect("mode present in default profile"),
            test_name_filter: p.test_name_filter,
            perturb_range: p.perturb_range,
            include_classes: p
                .include_classes
                .expect("include-classes present in default profile"),
            include_annotations: p
                .include_annotations
                .expect("include-annotations present in default profile"),
            exclude_classes: p
                .exclude_classes
                .expect("exclude-classes present in default profile"),
            exclude_annotations: p
                .exclude_annotations
                .expect("exclude-annotations present in default profile"),
            engine_command: p.engine_command,
            instrumentation_command: p.instrumentation_command,
            junit: p.junit,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CustomProfileImpl {
    #[serde(default)]
    rounds: Option<u32>,
    #[serde(default)]
    base_seed: Option<u64>,
    #[serde(default)]
    max_failures_per_test: Option<MaxFailures>,
    #[serde(default)]
    simulate_non_retryable: Option<bool>,
    #[serde(default)]
    mode: Option<PerturbationMode>,
    #[serde(default)]
    test_name_filter: Option<String>,
    #[serde(default)]
    perturb_range: Option<PerturbationRange>,
    #[serde(default)]
    include_classes: Option<Vec<String>>,
    #[serde(default)]
    include_annotations: Option<Vec<String>>,
    #[serde(default)]
    exclude_classes: Option<Vec<String>>,
    #[serde(default)]
    exclude_annotations: Option<Vec<String>>,
    #[serde(default)]
    engine_command: Option<CommandSpec>,
    #[serde(default)]
    instrumentation_command: Option<CommandSpec>,
    #[serde(default)]
    junit: JunitImpl,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct JunitImpl {
    #[serde(default)]
    path: Option<Utf8PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::test_helpers::write_config, seed::DEFAULT_BASE_SEED, test_id::*};
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;

    #[test]
    fn default_config_is_valid() {
        let config = FlakehuntConfig::default_config("/fake/workspace");
        let profile = config
            .profile(FlakehuntConfig::DEFAULT_PROFILE)
            .expect("default profile exists");

        assert_eq!(profile.rounds(), 5);
        assert_eq!(profile.base_seed(), DEFAULT_BASE_SEED);
        assert_eq!(profile.max_failures(), MaxFailures::Unlimited);
        assert!(!profile.simulate_non_retryable());
        assert_eq!(profile.perturbation().mode, PerturbationMode::Full);
        assert!(profile.perturbation().test_name_filter.is_none());
        assert!(profile.engine_command().is_none());
        assert!(profile.junit_path().is_none());
        assert_eq!(
            profile.store_dir().as_str(),
            "/fake/workspace/target/flakehunt/default"
        );
    }

    #[test]
    fn custom_profile_falls_back_to_default() {
        let temp_dir = Utf8TempDir::new().unwrap();
        write_config(
            &temp_dir,
            indoc! {r#"
                [profile.default]
                rounds = 10
                engine-command = ["./gradlew", "test"]
                exclude-classes = ["com.example.slow.*"]

                [profile.ci]
                base-seed = 42
                mode = "eq"
                test-name-filter = "^com\\.example\\."
                perturb-range = { start = 2, end = 8 }
                include-annotations = ["*.Flaky"]
                junit.path = "junit.xml"
            "#},
        );

        let config =
            FlakehuntConfig::from_sources(temp_dir.path(), None).expect("config is valid");
        let profile = config.profile("ci").expect("ci profile exists");

        assert_eq!(profile.rounds(), 10);
        assert_eq!(profile.base_seed(), 42);
        assert_eq!(
            profile.engine_command(),
            Some(&CommandSpec::new("./gradlew", ["test"]))
        );

        let perturbation = profile.perturbation();
        assert_eq!(perturbation.mode, PerturbationMode::Eq);
        assert_eq!(
            perturbation.test_name_filter.as_ref().map(Regex::as_str),
            Some("^com\\.example\\.")
        );
        assert_eq!(perturbation.range, Some(PerturbationRange::new(2, 8).unwrap()));

        let filter = profile.retry_filter();
        let flaky = TestDescriptor::with_annotations(
            TestId::new("com.example.FooTest", "method"),
            ["org.junit.Flaky"],
        );
        let slow_flaky = TestDescriptor::with_annotations(
            TestId::new("com.example.slow.BarTest", "method"),
            ["org.junit.Flaky"],
        );
        assert!(filter.is_selected(&flaky));
        assert!(!filter.is_selected(&slow_flaky));

        assert_eq!(
            profile.junit_path(),
            Some(temp_dir.path().join("target/flakehunt/ci/junit.xml"))
        );
    }

    #[test]
    fn unknown_profile() {
        let config = FlakehuntConfig::default_config("/fake/workspace");
        let error = config.profile("nope").expect_err("profile does not exist");
        assert_eq!(
            error.to_string(),
            "profile `nope` not found (known profiles: default)"
        );
    }

    #[test]
    fn invalid_test_name_filter() {
        let temp_dir = Utf8TempDir::new().unwrap();
        write_config(
            &temp_dir,
            indoc! {r#"
                [profile.broken]
                test-name-filter = "(unclosed"
            "#},
        );

        let error = FlakehuntConfig::from_sources(temp_dir.path(), None)
            .expect_err("regex is invalid");
        assert!(
            matches!(
                error.kind(),
                ConfigParseErrorKind::InvalidTestNameFilter { profile, .. } if profile == "broken"
            ),
            "unexpected error kind: {:?}",
            error.kind()
        );
    }

    #[test]
    fn invalid_retry_filter() {
        let temp_dir = Utf8TempDir::new().unwrap();
        write_config(
            &temp_dir,
            indoc! {r#"
                [profile.default]
                include-classes = ["com.[example"]
            "#},
        );

        let error = FlakehuntConfig::from_sources(temp_dir.path(), None)
            .expect_err("glob is invalid");
        assert!(
            matches!(
                error.kind(),
                ConfigParseErrorKind::InvalidRetryFilter { profile, .. } if profile == "default"
            ),
            "unexpected error kind: {:?}",
            error.kind()
        );
    }

    #[test]
    fn inverted_perturb_range() {
        let temp_dir = Utf8TempDir::new().unwrap();
        write_config(
            &temp_dir,
            indoc! {r#"
                [profile.default]
                perturb-range = { start = 9, end = 1 }
            "#},
        );

        let error = FlakehuntConfig::from_sources(temp_dir.path(), None)
            .expect_err("range is inverted");
        assert!(
            matches!(error.kind(), ConfigParseErrorKind::DeserializeError(_)),
            "unexpected error kind: {:?}",
            error.kind()
        );
    }
}
