// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for pinenv operations.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience Result type with pinenv Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during pinenv operations.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// No pinenv.yaml found in directory tree
    #[error("No pinenv.yaml found in {0:?} or any parent directory")]
    #[diagnostic(
        code(pinenv::not_found_in_tree),
        help("Create a pinenv.yaml file with 'pinenv init' or specify a path with -f")
    )]
    NotFoundInTree(PathBuf),

    /// Descriptor not found at specified path
    #[error("pinenv.yaml not found at {0:?}")]
    #[diagnostic(code(pinenv::not_found_at_path))]
    NotFoundAtPath(PathBuf),

    /// Failed to read file
    #[error("Failed to read file: {path:?}")]
    #[diagnostic(code(pinenv::read_failed))]
    ReadFailed {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// Descriptor is missing a field or has one of the wrong shape
    #[error("Malformed descriptor at '{field}': {reason}")]
    #[diagnostic(
        code(pinenv::malformed_descriptor),
        help("A descriptor needs 'sources' (name: <index-location>/<pin>) and 'environments' (name: [tools])")
    )]
    MalformedDescriptor { field: String, reason: String },

    /// Requested environment is not declared
    #[error("Unknown environment: {name}")]
    #[diagnostic(
        code(pinenv::unknown_environment),
        help("{}", environment_message(available))
    )]
    UnknownEnvironment { name: String, available: Vec<String> },

    /// Tool is absent from the pinned catalog
    #[error("Unknown tool '{name}' in source '{source_name}'")]
    #[diagnostic(code(pinenv::unknown_tool), help("{}", suggestion_message(similar)))]
    UnknownTool {
        name: String,
        source_name: String,
        similar: Vec<String>,
    },

    /// The package index could not be reached; safe to retry
    #[error("Source unavailable: {reference}")]
    #[diagnostic(
        code(pinenv::source_unavailable),
        help("The index may be offline or the snapshot not written yet; retrying is safe")
    )]
    SourceUnavailable {
        reference: String,
        #[source]
        error: std::io::Error,
    },

    /// A remote index location has no local mirror configured
    #[error("No local mirror for {reference}")]
    #[diagnostic(
        code(pinenv::unmirrored_source),
        help("Map '{location}' to a local directory under 'index_aliases' in the pinenv settings")
    )]
    UnmirroredSource { reference: String, location: String },

    /// The index answered with a snapshot that cannot be used
    #[error("Invalid catalog for {reference}: {reason}")]
    #[diagnostic(code(pinenv::invalid_catalog))]
    InvalidCatalog { reference: String, reason: String },

    /// Resolved artifacts could not be exposed to the session
    #[error("Failed to materialize environment: {reason}")]
    #[diagnostic(code(pinenv::materialization_failed))]
    MaterializationFailed { reason: String },

    /// The package store could not be reached
    #[error("Store unavailable: {store}")]
    #[diagnostic(
        code(pinenv::store_unavailable),
        help("Check that the store daemon is running, or unset 'store' in the pinenv settings")
    )]
    StoreUnavailable {
        store: String,
        #[source]
        error: std::io::Error,
    },

    /// The store daemon sent something this client does not understand
    #[error("Store protocol error: {reason}")]
    #[diagnostic(code(pinenv::store_protocol))]
    StoreProtocol { reason: String },

    /// The store daemon reported a failure
    #[error("Store daemon error: {message}")]
    #[diagnostic(code(pinenv::store_daemon))]
    StoreDaemon { message: String },

    /// Lock file could not be parsed
    #[error("Invalid lock file: {path:?}")]
    #[diagnostic(
        code(pinenv::invalid_lock_file),
        help("Regenerate it with 'pinenv lock --force'")
    )]
    InvalidLockFile {
        path: PathBuf,
        #[source]
        error: serde_yaml::Error,
    },

    /// Configuration could not be loaded
    #[error("Invalid configuration")]
    #[diagnostic(code(pinenv::invalid_config))]
    Config(#[from] config::ConfigError),

    /// IO error passthrough
    #[error(transparent)]
    #[diagnostic(code(pinenv::io_error))]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller may retry the failed operation unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. })
    }

    pub(crate) fn protocol<R: Into<String>>(reason: R) -> Self {
        Self::StoreProtocol {
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::MalformedDescriptor {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

fn suggestion_message(similar: &[String]) -> String {
    if similar.is_empty() {
        "Check that the tool name exists at the pinned revision".to_string()
    } else {
        format!("Did you mean one of: {}?", similar.join(", "))
    }
}

fn environment_message(available: &[String]) -> String {
    if available.is_empty() {
        "The descriptor declares no environments".to_string()
    } else {
        format!("Declared environments: {}", available.join(", "))
    }
}
