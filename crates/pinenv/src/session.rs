// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Session materialization: exposing a resolved environment to a process.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::environment::{EnvOp, PrependEnv, SetEnv};
use crate::store::StoreValidator;
use crate::{Error, ResolvedEnvironment};

#[cfg(test)]
#[path = "./session_test.rs"]
mod session_test;

/// Variable naming the environment a session was entered for.
pub const ENVIRONMENT_VAR: &str = "PINENV_ENVIRONMENT";

/// Variable marking a materialized session.
pub const ACTIVE_VAR: &str = "PINENV_ACTIVE";

/// The search path variable.
pub const PATH_VAR: &str = "PATH";

/// Environment variables of a session, owned by the caller.
///
/// Nothing here touches the variables of the running process; a context is
/// handed to the child that runs the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    vars: BTreeMap<String, String>,
}

impl SessionContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current process's variables. Variables that are not
    /// valid unicode are skipped.
    pub fn from_current_process() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.vars.remove(name)
    }

    /// All variables, sorted by name.
    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries of `PATH`, in order.
    pub fn search_path(&self) -> Vec<PathBuf> {
        self.get(PATH_VAR)
            .map(|p| std::env::split_paths(p).collect())
            .unwrap_or_default()
    }

    /// Apply one environment variable operation.
    pub fn apply(&mut self, op: &EnvOp) {
        if let Some(var) = op.variable() {
            if let Some(value) = op.apply(self.get(var)) {
                self.set(var, value);
            }
        }
    }
}

/// Exposes resolved artifacts to a session.
pub trait SessionMaterializer {
    /// Mutate `context` so that it exposes `environment`, then apply `ops`.
    ///
    /// On error `context` is left untouched.
    fn materialize(
        &self,
        environment: &ResolvedEnvironment,
        ops: &[EnvOp],
        context: &mut SessionContext,
    ) -> crate::Result<()>;
}

/// Puts each artifact's `bin` directory in front of `PATH`.
#[derive(Debug, Clone)]
pub struct PathMaterializer {
    verify: bool,
    store: Option<Arc<dyn StoreValidator>>,
}

impl Default for PathMaterializer {
    fn default() -> Self {
        Self {
            verify: true,
            store: None,
        }
    }
}

impl PathMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip checking that directories and entry points exist on disk.
    pub fn without_verification() -> Self {
        Self {
            verify: false,
            store: None,
        }
    }

    /// Also require every artifact path to be valid in `store`.
    pub fn with_store(mut self, store: Arc<dyn StoreValidator>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run the checks `materialize` runs before touching a context.
    pub fn check(&self, environment: &ResolvedEnvironment) -> crate::Result<()> {
        if !self.verify {
            return Ok(());
        }
        self.check_on_disk(environment)?;
        if let Some(store) = &self.store {
            check_in_store(&**store, environment)?;
        }
        Ok(())
    }

    fn check_on_disk(&self, environment: &ResolvedEnvironment) -> crate::Result<()> {
        for dir in &environment.search_path {
            if !dir.is_dir() {
                return Err(Error::MaterializationFailed {
                    reason: format!("search path entry {} is not a directory", dir.display()),
                });
            }
        }
        for (name, tool) in &environment.tools {
            if !tool.entry_point.is_file() {
                return Err(Error::MaterializationFailed {
                    reason: format!(
                        "entry point for '{name}' not found at {}",
                        tool.entry_point.display()
                    ),
                });
            }
        }
        Ok(())
    }
}

fn check_in_store(
    store: &dyn StoreValidator,
    environment: &ResolvedEnvironment,
) -> crate::Result<()> {
    for artifact in &environment.artifacts {
        let valid = store
            .is_valid_path(&artifact.path)
            .map_err(|err| Error::MaterializationFailed {
                reason: format!("cannot check '{}' against the store: {err}", artifact.id),
            })?;
        if !valid {
            return Err(Error::MaterializationFailed {
                reason: format!(
                    "'{}' is not a valid store path: {}",
                    artifact.id,
                    artifact.path.display()
                ),
            });
        }
    }
    Ok(())
}

impl SessionMaterializer for PathMaterializer {
    fn materialize(
        &self,
        environment: &ResolvedEnvironment,
        ops: &[EnvOp],
        context: &mut SessionContext,
    ) -> crate::Result<()> {
        self.check(environment)?;

        let mut staged = context.clone();

        let mut entries = environment.search_path.clone();
        entries.extend(
            staged
                .search_path()
                .into_iter()
                .filter(|p| !environment.search_path.contains(p)),
        );
        let path = std::env::join_paths(&entries).map_err(|e| Error::MaterializationFailed {
            reason: format!("cannot build {PATH_VAR}: {e}"),
        })?;
        let path = path.into_string().map_err(|_| Error::MaterializationFailed {
            reason: format!("{PATH_VAR} is not valid unicode"),
        })?;

        staged.set(PATH_VAR, path);
        staged.set(ENVIRONMENT_VAR, environment.name.clone());
        staged.set(ACTIVE_VAR, "1");
        for op in ops {
            staged.apply(op);
        }

        tracing::debug!(
            environment = %environment.name,
            entries = environment.search_path.len(),
            "materialized session"
        );
        *context = staged;
        Ok(())
    }
}

/// Operations that reproduce a materialized session in a shell script,
/// followed by `ops`.
pub fn session_ops(environment: &ResolvedEnvironment, ops: &[EnvOp]) -> Vec<EnvOp> {
    let mut all = Vec::with_capacity(ops.len() + 3);
    if !environment.search_path.is_empty() {
        let value = environment
            .search_path
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        all.push(EnvOp::Prepend(PrependEnv {
            prepend: PATH_VAR.to_string(),
            value,
            separator: None,
        }));
    }
    all.push(EnvOp::Set(SetEnv {
        set: ENVIRONMENT_VAR.to_string(),
        value: environment.name.clone(),
    }));
    all.push(EnvOp::Set(SetEnv {
        set: ACTIVE_VAR.to_string(),
        value: "1".to_string(),
    }));
    all.extend(ops.iter().cloned());
    all
}
