// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Package catalogs and the collaborators that fetch them.
//!
//! A [`Catalog`] is the set of artifacts an index offers at one pinned
//! revision. pinenv never mutates a catalog and never computes dependency
//! graphs of its own: [`Catalog::transitive_runtime_deps`] belongs to the
//! index. [`FileIndex`] is the bundled [`CatalogFetcher`], reading snapshot
//! files from a local index directory or mirror.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, SourceReference};

#[cfg(test)]
#[path = "./catalog_test.rs"]
mod catalog_test;

/// Catalog snapshot API version.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum CatalogApiVersion {
    #[default]
    #[serde(rename = "pinenv/v0/catalog")]
    V0,
}

/// A concrete, executable package entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Artifact {
    /// Identity used for de-duplication across tools and dependencies.
    pub id: String,
    /// Name of the entry in its catalog.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Installation prefix.
    pub path: PathBuf,
    /// Executables provided under `<path>/bin`.
    pub programs: Vec<String>,
}

impl Artifact {
    /// Directory exposed on the search path.
    pub fn bin_dir(&self) -> PathBuf {
        self.path.join("bin")
    }

    /// The executable a tool request for this artifact maps to.
    pub fn entry_point(&self) -> PathBuf {
        let program = self.programs.first().unwrap_or(&self.name);
        self.bin_dir().join(program)
    }
}

/// The resolved set of artifacts available from a source reference.
pub trait Catalog: fmt::Debug + Send + Sync {
    /// The pinned reference this catalog was fetched for.
    fn reference(&self) -> &SourceReference;

    /// Content digest of the snapshot, stable for a given pin.
    fn digest(&self) -> &str;

    /// All artifact names, sorted.
    fn names(&self) -> Vec<&str>;

    fn lookup(&self, name: &str) -> Option<Artifact>;

    /// Every artifact `artifact` needs at runtime, directly or not,
    /// excluding itself. Sorted by identity, without duplicates.
    fn transitive_runtime_deps(&self, artifact: &Artifact) -> crate::Result<Vec<Artifact>>;
}

/// Dereferences a source reference into a catalog snapshot.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    async fn fetch_catalog(&self, reference: &SourceReference) -> crate::Result<Box<dyn Catalog>>;
}

/// One artifact entry as written in a snapshot file.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ArtifactEntry {
    /// Defaults to `<name>-<version>`, or `<name>` without a version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Prefix, relative to the index directory unless absolute.
    pub path: PathBuf,
    /// Defaults to a single program named after the entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub programs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtime_deps: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SnapshotDocument {
    #[serde(default)]
    #[allow(dead_code)]
    api: CatalogApiVersion,
    revision: String,
    #[serde(default)]
    artifacts: IndexMap<String, ArtifactEntry>,
}

/// An immutable, in-memory catalog for one pinned revision.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    reference: SourceReference,
    digest: String,
    artifacts: BTreeMap<String, Artifact>,
    runtime_deps: BTreeMap<String, Vec<String>>,
}

impl CatalogSnapshot {
    /// Build a snapshot from entries, resolving relative paths against `root`.
    pub fn from_entries(
        reference: SourceReference,
        digest: String,
        root: &Path,
        entries: IndexMap<String, ArtifactEntry>,
    ) -> crate::Result<Self> {
        let mut artifacts = BTreeMap::new();
        let mut runtime_deps = BTreeMap::new();

        for (name, entry) in &entries {
            for dep in &entry.runtime_deps {
                if !entries.contains_key(dep) {
                    return Err(Error::InvalidCatalog {
                        reference: reference.to_string(),
                        reason: format!("'{name}' depends on missing artifact '{dep}'"),
                    });
                }
            }

            let id = match (&entry.id, &entry.version) {
                (Some(id), _) => id.clone(),
                (None, Some(version)) => format!("{name}-{version}"),
                (None, None) => name.clone(),
            };
            let path = if entry.path.is_absolute() {
                entry.path.clone()
            } else {
                root.join(&entry.path)
            };
            let programs = if entry.programs.is_empty() {
                vec![name.clone()]
            } else {
                entry.programs.clone()
            };

            artifacts.insert(
                name.clone(),
                Artifact {
                    id,
                    name: name.clone(),
                    version: entry.version.clone(),
                    path,
                    programs,
                },
            );
            runtime_deps.insert(name.clone(), entry.runtime_deps.clone());
        }

        Ok(Self {
            reference,
            digest,
            artifacts,
            runtime_deps,
        })
    }

    /// Parse a snapshot document, checking it describes `reference`'s pin.
    pub fn from_yaml(reference: SourceReference, root: &Path, bytes: &[u8]) -> crate::Result<Self> {
        let invalid = |reason: String| Error::InvalidCatalog {
            reference: reference.to_string(),
            reason,
        };

        let document: SnapshotDocument =
            serde_yaml::from_slice(bytes).map_err(|e| invalid(e.to_string()))?;

        let pin = reference.pin();
        let matches_pin = if pin.is_commit() {
            document.revision.eq_ignore_ascii_case(pin.as_str())
        } else {
            document.revision == pin.as_str()
        };
        if !matches_pin {
            return Err(invalid(format!(
                "snapshot is for revision '{}', expected '{pin}'",
                document.revision
            )));
        }

        let digest = format!("{:x}", Sha256::digest(bytes));
        Self::from_entries(reference, digest, root, document.artifacts)
    }
}

impl Catalog for CatalogSnapshot {
    fn reference(&self) -> &SourceReference {
        &self.reference
    }

    fn digest(&self) -> &str {
        &self.digest
    }

    fn names(&self) -> Vec<&str> {
        self.artifacts.keys().map(String::as_str).collect()
    }

    fn lookup(&self, name: &str) -> Option<Artifact> {
        self.artifacts.get(name).cloned()
    }

    fn transitive_runtime_deps(&self, artifact: &Artifact) -> crate::Result<Vec<Artifact>> {
        let mut visited = BTreeSet::from([artifact.name.clone()]);
        let mut queue: VecDeque<&str> = VecDeque::from([artifact.name.as_str()]);
        let mut found: BTreeMap<String, Artifact> = BTreeMap::new();

        while let Some(name) = queue.pop_front() {
            let Some(deps) = self.runtime_deps.get(name) else {
                return Err(Error::InvalidCatalog {
                    reference: self.reference.to_string(),
                    reason: format!("'{name}' is not part of this catalog"),
                });
            };
            for dep in deps {
                if !visited.insert(dep.clone()) {
                    continue;
                }
                // from_entries guarantees every dependency has an entry
                if let Some(dep_artifact) = self.artifacts.get(dep) {
                    if dep_artifact.id != artifact.id {
                        found
                            .entry(dep_artifact.id.clone())
                            .or_insert_with(|| dep_artifact.clone());
                    }
                    queue.push_back(dep);
                }
            }
        }

        Ok(found.into_values().collect())
    }
}

/// Fetches catalog snapshots from index directories on the local filesystem.
///
/// The snapshot for `<location>/<pin>` is the file `<dir>/<pin>.yaml`, where
/// `<dir>` is the location resolved through, in order: configured aliases,
/// a `file:` prefix, `~/`, an absolute path, or a path relative to the
/// descriptor's directory. Remote locations need an alias pointing at a
/// local mirror; without one they fail with [`Error::UnmirroredSource`],
/// which is not retried.
#[derive(Debug, Clone, Default)]
pub struct FileIndex {
    base_dir: Option<PathBuf>,
    aliases: IndexMap<String, PathBuf>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative locations against `base_dir`.
    pub fn with_base_dir<P: Into<PathBuf>>(mut self, base_dir: P) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Map an index location verbatim onto a local directory.
    pub fn with_alias<S: Into<String>, P: Into<PathBuf>>(mut self, location: S, dir: P) -> Self {
        self.aliases.insert(location.into(), dir.into());
        self
    }

    /// Build an index from user settings and the descriptor's directory.
    pub fn from_settings(settings: &crate::Settings, base_dir: Option<&Path>) -> Self {
        let mut index = Self::new();
        if let Some(dir) = base_dir {
            index = index.with_base_dir(dir);
        }
        for alias in &settings.index_aliases {
            // mirrors that do not exist yet are reported when fetched
            let dir = dunce::canonicalize(&alias.path).unwrap_or_else(|_| alias.path.clone());
            index = index.with_alias(alias.location.clone(), dir);
        }
        index
    }

    /// Directory holding the snapshots for `reference`'s location.
    pub fn locate(&self, reference: &SourceReference) -> crate::Result<PathBuf> {
        let location = reference.location();

        if let Some(dir) = self.aliases.get(location) {
            return expand_home(dir, reference);
        }

        let location = location
            .strip_prefix("file://")
            .or_else(|| location.strip_prefix("file:"))
            .unwrap_or(location);

        let path = Path::new(location);
        if location.starts_with('~') || path.is_absolute() {
            return expand_home(path, reference);
        }

        if is_remote(location) {
            return Err(Error::UnmirroredSource {
                reference: reference.to_string(),
                location: reference.location().to_string(),
            });
        }

        Ok(match &self.base_dir {
            Some(base) => base.join(path),
            None => path.to_path_buf(),
        })
    }

    /// Path of the snapshot file for `reference`, named after the pin as
    /// written.
    pub fn snapshot_path(&self, reference: &SourceReference) -> crate::Result<PathBuf> {
        Ok(self
            .locate(reference)?
            .join(format!("{}.yaml", reference.pin_spelling())))
    }
}

#[async_trait]
impl CatalogFetcher for FileIndex {
    async fn fetch_catalog(&self, reference: &SourceReference) -> crate::Result<Box<dyn Catalog>> {
        let path = self.snapshot_path(reference)?;
        tracing::debug!(%reference, path = %path.display(), "fetching catalog snapshot");

        let bytes = std::fs::read(&path).map_err(|error| Error::SourceUnavailable {
            reference: reference.to_string(),
            error,
        })?;

        let root = path.parent().unwrap_or_else(|| Path::new("."));
        let snapshot = CatalogSnapshot::from_yaml(reference.clone(), root, &bytes)?;
        tracing::debug!(
            %reference,
            artifacts = snapshot.artifacts.len(),
            digest = snapshot.digest(),
            "loaded catalog snapshot"
        );
        Ok(Box::new(snapshot))
    }
}

fn expand_home(path: &Path, reference: &SourceReference) -> crate::Result<PathBuf> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };
    let home = dirs::home_dir().ok_or_else(|| Error::SourceUnavailable {
        reference: reference.to_string(),
        error: std::io::Error::other("cannot resolve ~ without HOME"),
    })?;
    Ok(home.join(rest))
}

/// Whether a location names a URL-like remote (`github:owner/repo`,
/// `https://...`) rather than a path.
fn is_remote(location: &str) -> bool {
    let Some((scheme, _)) = location.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    // single letters are Windows drive prefixes
    scheme.len() > 1
        && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
