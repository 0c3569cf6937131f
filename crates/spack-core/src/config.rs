// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Configuration for a bundler invocation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{BundleError, Result};

/// Configuration for a single build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Directory entry specifiers and bare-package walks start from
    pub root: PathBuf,

    /// Entry point(s) of the build
    pub entry: EntryConfig,

    /// Extensions probed, in order, for extensionless specifiers
    pub resolve_extensions: Vec<String>,

    /// Directory names searched (per ancestor) for bare specifiers
    pub module_directories: Vec<String>,

    /// Transform rules, evaluated in order; first match wins
    pub rules: Vec<RuleConfig>,

    /// Directory output chunks and assets are written to
    pub output_dir: PathBuf,

    /// Chunk filename pattern; `[name]` is replaced with the chunk name
    pub output_filename_pattern: String,

    /// Empty the output directory before writing
    pub clean: bool,
}

/// One or more entry points.
///
/// A bare path is shorthand for a single entry named `main`. Named
/// entries are kept in a `BTreeMap`, so entry discovery order (which
/// drives ModuleId assignment and shared-chunk policy) is name order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryConfig {
    /// A single entry, named `main`
    Single(String),
    /// Named entries, one chunk each
    Named(BTreeMap<String, String>),
}

/// A transformer-pipeline rule: a path pattern and a transform chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Regex tested against the module path
    pub test: String,

    /// Transform names, applied back-to-front (loader convention)
    #[serde(rename = "use")]
    pub transforms: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            entry: EntryConfig::Single("./src/index.js".to_string()),
            resolve_extensions: vec![".js".to_string(), ".json".to_string()],
            module_directories: vec!["node_modules".to_string()],
            rules: Vec::new(),
            output_dir: PathBuf::from("dist"),
            output_filename_pattern: "[name].js".to_string(),
            clean: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| BundleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| BundleError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the rest of the pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        if self.entries().is_empty() {
            return Err(BundleError::Config("no entry points configured".to_string()));
        }
        if self.resolve_extensions.is_empty() {
            return Err(BundleError::Config(
                "resolveExtensions must not be empty".to_string(),
            ));
        }
        for ext in &self.resolve_extensions {
            if !ext.starts_with('.') {
                return Err(BundleError::Config(format!(
                    "extension '{}' must start with '.'",
                    ext
                )));
            }
        }
        if !self.output_filename_pattern.contains("[name]")
            && self.entries().len() > 1
        {
            return Err(BundleError::Config(
                "outputFilenamePattern needs a [name] token with multiple entries".to_string(),
            ));
        }
        if self.entries().iter().any(|(name, _)| name == "shared") {
            return Err(BundleError::Config(
                "entry name 'shared' is reserved for the shared chunk".to_string(),
            ));
        }
        Ok(())
    }

    /// Entry points in discovery order as `(chunk name, specifier)` pairs.
    pub fn entries(&self) -> Vec<(String, String)> {
        match &self.entry {
            EntryConfig::Single(path) => vec![("main".to_string(), path.clone())],
            EntryConfig::Named(map) => map
                .iter()
                .map(|(name, path)| (name.clone(), path.clone()))
                .collect(),
        }
    }

    /// Output filename for a chunk name.
    pub fn chunk_filename(&self, name: &str) -> String {
        self.output_filename_pattern.replace("[name]", name)
    }
}
