// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Lock file structures and helpers for pinenv.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::CatalogFetcher;
use crate::resolve::{fetch_catalogs, resolve_request, CatalogSet};
use crate::{Descriptor, EnvironmentRequest, Error};

#[cfg(test)]
#[path = "./lock_test.rs"]
mod lock_test;

/// Lock file API version.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub enum LockApiVersion {
    #[serde(rename = "pinenv/v0/lock")]
    V0,
}

/// Lock file capturing the descriptor, its sources and their resolutions.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LockFile {
    pub api: LockApiVersion,
    pub generated: GenerationMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<LockedDescriptor>,
    pub sources: Vec<LockedSource>,
    /// Artifact identities per environment, sorted.
    pub environments: IndexMap<String, Vec<String>>,
}

/// Metadata about when and where the lock was generated.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GenerationMetadata {
    pub timestamp: DateTime<Utc>,
    pub pinenv_version: String,
    pub hostname: String,
}

/// Descriptor file tracked by the lock.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LockedDescriptor {
    pub path: PathBuf,
    pub sha256: String,
}

/// Source reference and the digest of the catalog it dereferenced to.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LockedSource {
    pub name: String,
    pub reference: String,
    pub digest: String,
}

impl LockFile {
    /// Read a lock file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| Error::ReadFailed {
            path: path.to_path_buf(),
            error: e,
        })?;
        serde_yaml::from_str(&yaml).map_err(|e| Error::InvalidLockFile {
            path: path.to_path_buf(),
            error: e,
        })
    }

    /// Write this lock file to disk.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let yaml = serde_yaml::to_string(self).map_err(std::io::Error::other)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}

/// Generate a lock file by fetching every source and resolving every
/// environment of `descriptor`.
pub async fn generate_lock(
    descriptor: &Descriptor,
    fetcher: &dyn CatalogFetcher,
) -> crate::Result<LockFile> {
    let catalogs = fetch_catalogs(
        descriptor,
        descriptor.sources.keys().map(String::as_str),
        fetcher,
    )
    .await?;

    let sources = descriptor
        .sources
        .iter()
        .filter_map(|(name, reference)| {
            catalogs.get(name).map(|catalog| LockedSource {
                name: name.clone(),
                reference: reference.to_string(),
                digest: catalog.digest().to_string(),
            })
        })
        .collect();

    Ok(LockFile {
        api: LockApiVersion::V0,
        generated: GenerationMetadata {
            timestamp: Utc::now(),
            pinenv_version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
        },
        descriptor: lock_descriptor(descriptor)?,
        sources,
        environments: resolve_all(descriptor, &catalogs)?,
    })
}

/// Verify a lock file against the current descriptor and catalogs.
pub async fn verify_lock(
    lock: &LockFile,
    descriptor: &Descriptor,
    fetcher: &dyn CatalogFetcher,
) -> crate::Result<Vec<LockChange>> {
    let mut changes = Vec::new();

    // Check descriptor hash
    if let (Some(locked), Some(current)) = (&lock.descriptor, lock_descriptor(descriptor)?) {
        if locked.sha256 != current.sha256 {
            changes.push(LockChange {
                kind: LockChangeKind::DescriptorChanged,
                reference: current.path.display().to_string(),
                expected: Some(locked.sha256.clone()),
                actual: Some(current.sha256),
            });
        }
    }

    // Check sources. Only sources still pinned as locked are fetched; a
    // changed pin is reported without dereferencing it.
    let mut unchanged: Vec<&str> = Vec::new();
    for locked in &lock.sources {
        let Some(reference) = descriptor.sources.get(&locked.name) else {
            changes.push(LockChange {
                kind: LockChangeKind::SourceRemoved,
                reference: locked.name.clone(),
                expected: Some(locked.reference.clone()),
                actual: None,
            });
            continue;
        };

        let reference = reference.to_string();
        if reference != locked.reference {
            changes.push(LockChange {
                kind: LockChangeKind::SourceReferenceChanged,
                reference: locked.name.clone(),
                expected: Some(locked.reference.clone()),
                actual: Some(reference),
            });
            continue;
        }
        unchanged.push(&locked.name);
    }
    for (name, reference) in &descriptor.sources {
        if !lock.sources.iter().any(|s| &s.name == name) {
            changes.push(LockChange {
                kind: LockChangeKind::SourceAdded,
                reference: name.clone(),
                expected: None,
                actual: Some(reference.to_string()),
            });
        }
    }

    let catalogs = fetch_catalogs(descriptor, unchanged.iter().copied(), fetcher).await?;
    for locked in &lock.sources {
        if let Some(catalog) = catalogs.get(&locked.name) {
            if catalog.digest() != locked.digest {
                changes.push(LockChange {
                    kind: LockChangeKind::CatalogDigestChanged,
                    reference: locked.name.clone(),
                    expected: Some(locked.digest.clone()),
                    actual: Some(catalog.digest().to_string()),
                });
            }
        }
    }

    // Check resolutions of environments whose sources were all fetched
    for (name, locked_ids) in &lock.environments {
        let Some(request) = descriptor.environments.get(name) else {
            changes.push(LockChange {
                kind: LockChangeKind::EnvironmentRemoved,
                reference: name.clone(),
                expected: Some(locked_ids.join(", ")),
                actual: None,
            });
            continue;
        };
        if !request.source_names().iter().all(|s| catalogs.contains_key(*s)) {
            tracing::debug!(environment = %name, "skipping resolution against changed sources");
            continue;
        }
        let ids = artifact_ids(request, &catalogs)?;
        if &ids != locked_ids {
            changes.push(LockChange {
                kind: LockChangeKind::EnvironmentChanged,
                reference: name.clone(),
                expected: Some(locked_ids.join(", ")),
                actual: Some(ids.join(", ")),
            });
        }
    }
    for (name, request) in &descriptor.environments {
        if lock.environments.contains_key(name) {
            continue;
        }
        let actual = if request.source_names().iter().all(|s| catalogs.contains_key(*s)) {
            Some(artifact_ids(request, &catalogs)?.join(", "))
        } else {
            None
        };
        changes.push(LockChange {
            kind: LockChangeKind::EnvironmentAdded,
            reference: name.clone(),
            expected: None,
            actual,
        });
    }

    Ok(changes)
}

fn lock_descriptor(descriptor: &Descriptor) -> crate::Result<Option<LockedDescriptor>> {
    let Some(path) = &descriptor.source_path else {
        return Ok(None);
    };
    let content = std::fs::read(path).map_err(|e| Error::ReadFailed {
        path: path.clone(),
        error: e,
    })?;
    Ok(Some(LockedDescriptor {
        path: path.clone(),
        sha256: format!("{:x}", Sha256::digest(&content)),
    }))
}

fn resolve_all(
    descriptor: &Descriptor,
    catalogs: &CatalogSet,
) -> crate::Result<IndexMap<String, Vec<String>>> {
    let mut environments = IndexMap::new();
    for (name, request) in &descriptor.environments {
        environments.insert(name.clone(), artifact_ids(request, catalogs)?);
    }
    Ok(environments)
}

fn artifact_ids(request: &EnvironmentRequest, catalogs: &CatalogSet) -> crate::Result<Vec<String>> {
    let resolved = resolve_request(request, catalogs)?;
    Ok(resolved
        .artifact_ids()
        .into_iter()
        .map(String::from)
        .collect())
}

/// A single detected change between lock and current environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockChange {
    pub kind: LockChangeKind,
    pub reference: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// Types of lock mismatches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockChangeKind {
    DescriptorChanged,
    SourceAdded,
    SourceRemoved,
    SourceReferenceChanged,
    CatalogDigestChanged,
    EnvironmentAdded,
    EnvironmentRemoved,
    EnvironmentChanged,
}
