// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! User configuration, layered from a config file and `PINENV_*` variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

/// Prefix for configuration environment variables.
pub const ENV_PREFIX: &str = "PINENV";

/// Maps an index location onto a local directory holding its snapshots.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct IndexAlias {
    pub location: String,
    pub path: PathBuf,
}

/// Settings shared by every pinenv command.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// How many times an unavailable source is retried.
    pub retries: usize,

    /// Base delay for exponential backoff between retries.
    pub retry_delay_ms: u64,

    /// Shell used by `pinenv enter` when no command is given.
    pub shell: Option<String>,

    /// Local mirrors for remote index locations.
    pub index_aliases: Vec<IndexAlias>,

    /// Store artifact paths are validated against before a session starts:
    /// `local`, `daemon`, or a store URI.
    pub store: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay_ms: 200,
            shell: None,
            index_aliases: Vec::new(),
            store: None,
        }
    }
}

impl Settings {
    /// Default location of the user config file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("pinenv").join("config.yaml"))
    }

    /// Load settings from the default config file, if any, and the
    /// environment.
    pub fn load() -> crate::Result<Self> {
        Self::load_from(Self::default_path().as_deref())
    }

    /// Load settings from `path` (optional on disk) overlaid with
    /// `PINENV_*` environment variables.
    pub fn load_from(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            tracing::debug!(path = %path.display(), "loading settings");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            );
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}
