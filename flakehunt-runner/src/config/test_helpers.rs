// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test helpers for configuration.

use super::FlakehuntConfig;
use camino_tempfile::Utf8TempDir;

pub(in crate::config) fn write_config(temp_dir: &Utf8TempDir, config_contents: &str) {
    let config_path = temp_dir.path().join(FlakehuntConfig::CONFIG_PATH);
    let config_dir = config_path.parent().expect("config path has a parent");
    std::fs::create_dir_all(config_dir).expect("error creating config directory");
    std::fs::write(&config_path, config_contents).expect("error writing config file");
}
