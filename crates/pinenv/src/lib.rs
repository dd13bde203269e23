// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! pinenv - Pinned Development Environment Resolver
//!
//! This crate provides the core library for resolving reproducible development
//! shells from a declarative descriptor file (`pinenv.yaml`).
//!
//! # Overview
//!
//! A descriptor pins one or more package indexes to a fixed revision and
//! names environments made of tool identifiers. Resolving an environment
//! looks every tool up in the pinned catalog snapshot, unions their transitive
//! runtime dependencies and produces a [`ResolvedEnvironment`]: a tool to
//! entry point mapping plus a de-duplicated search path. Resolution is
//! all-or-nothing and never writes to disk; exposing the result is left to a
//! [`SessionMaterializer`] acting on a caller-owned [`SessionContext`].
//!
//! # Example
//!
//! ```yaml
//! # pinenv.yaml
//! api: pinenv/v0
//! description: "Rust toolchain"
//!
//! sources:
//!   nixpkgs: github:NixOS/nixpkgs/nixos-23.05
//!
//! environments:
//!   x86_64-linux:
//!     - cargo
//!     - rustfmt
//!     - rustc
//!     - cargo-edit
//! ```

pub mod catalog;
pub mod config;
pub mod descriptor;
pub mod discovery;
pub mod environment;
pub mod error;
pub mod lock;
pub mod platform;
pub mod resolve;
pub mod session;
pub mod store;

#[cfg(test)]
mod fixtures;

pub use catalog::{Artifact, Catalog, CatalogFetcher, CatalogSnapshot, FileIndex};
pub use config::Settings;
pub use descriptor::{ApiVersion, Descriptor, EnvironmentRequest, Pin, SourceReference, ToolRequest};
pub use discovery::discover_descriptor;
pub use environment::{generate_startup_script, EnvOp};
pub use error::{Error, Result};
pub use lock::{generate_lock, verify_lock, LockChange, LockChangeKind, LockFile};
pub use platform::current_platform;
pub use resolve::{resolve, resolve_request, ResolvedEnvironment, ResolvedTool};
pub use session::{session_ops, PathMaterializer, SessionContext, SessionMaterializer};
pub use store::{DaemonStore, FilesystemStore, StoreValidator};

/// Well-known filename for environment descriptors.
pub const DESCRIPTOR_FILENAME: &str = "pinenv.yaml";

/// Well-known filename for lock files.
pub const LOCK_FILENAME: &str = "pinenv.lock.yaml";
