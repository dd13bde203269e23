// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Shared test fixtures: in-memory catalogs and a counting fetcher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::catalog::{ArtifactEntry, Catalog, CatalogFetcher, CatalogSnapshot};
use crate::{Error, SourceReference};

pub const RUST_DESCRIPTOR: &str = r#"
api: pinenv/v0
sources:
  nixpkgs: ./index/nixos-23.05
environments:
  x86_64-linux:
    - cargo
    - rustfmt
    - rustc
    - cargo-edit
  aarch64-darwin:
    - rustc
"#;

pub fn entry(version: &str, deps: &[&str]) -> ArtifactEntry {
    ArtifactEntry {
        id: None,
        version: Some(version.to_string()),
        path: PathBuf::new(),
        programs: Vec::new(),
        runtime_deps: deps.iter().map(|d| d.to_string()).collect(),
    }
}

/// A small Rust toolchain catalog. Every artifact lives under `store/<id>`.
pub fn rust_entries() -> IndexMap<String, ArtifactEntry> {
    let mut entries = IndexMap::new();
    entries.insert("cargo".to_string(), entry("1.69.0", &["rustc", "openssl"]));
    entries.insert("rustc".to_string(), entry("1.69.0", &["glibc", "llvm"]));
    entries.insert("rustfmt".to_string(), entry("1.69.0", &["rustc"]));
    entries.insert("cargo-edit".to_string(), ArtifactEntry {
        programs: vec!["cargo-add".to_string(), "cargo-rm".to_string()],
        ..entry("0.11.9", &["cargo", "openssl"])
    });
    entries.insert("llvm".to_string(), entry("15.0.7", &["glibc", "zlib"]));
    entries.insert("openssl".to_string(), entry("3.0.8", &["glibc"]));
    entries.insert("zlib".to_string(), entry("1.2.13", &["glibc"]));
    entries.insert("glibc".to_string(), entry("2.37", &[]));
    entries.insert("python3".to_string(), entry("3.11.4", &["glibc", "openssl"]));
    for (name, entry) in entries.iter_mut() {
        let version = entry.version.clone().unwrap_or_default();
        entry.path = PathBuf::from("store").join(format!("{name}-{version}"));
    }
    entries
}

pub fn snapshot(
    reference: &str,
    root: &Path,
    entries: IndexMap<String, ArtifactEntry>,
) -> CatalogSnapshot {
    let reference: SourceReference = reference.parse().expect("valid reference");
    let digest = format!("digest-of-{reference}");
    CatalogSnapshot::from_entries(reference, digest, root, entries).expect("valid catalog")
}

/// Serves in-memory snapshots and counts fetches per reference.
#[derive(Default)]
pub struct MemoryFetcher {
    snapshots: HashMap<String, CatalogSnapshot>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, snapshot: CatalogSnapshot) -> Self {
        self.snapshots
            .insert(snapshot.reference().to_string(), snapshot);
        self
    }

    pub fn fetch_count(&self, reference: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(reference)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CatalogFetcher for MemoryFetcher {
    async fn fetch_catalog(&self, reference: &SourceReference) -> crate::Result<Box<dyn Catalog>> {
        let key = reference.to_string();
        *self.fetches.lock().unwrap().entry(key.clone()).or_default() += 1;
        match self.snapshots.get(&key) {
            Some(snapshot) => Ok(Box::new(snapshot.clone())),
            None => Err(Error::SourceUnavailable {
                reference: key,
                error: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "unreachable"),
            }),
        }
    }
}

/// Write a catalog snapshot file for `pin` under `index_dir` and create the
/// `bin` directories and programs of every artifact.
pub fn write_index(index_dir: &Path, pin: &str, entries: &IndexMap<String, ArtifactEntry>) {
    std::fs::create_dir_all(index_dir).unwrap();
    let document = serde_yaml::to_string(&serde_yaml::Mapping::from_iter([
        ("api".into(), "pinenv/v0/catalog".into()),
        ("revision".into(), pin.into()),
        (
            "artifacts".into(),
            serde_yaml::to_value(entries).unwrap(),
        ),
    ]))
    .unwrap();
    std::fs::write(index_dir.join(format!("{pin}.yaml")), document).unwrap();

    for (name, entry) in entries {
        let bin = index_dir.join(&entry.path).join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let programs = if entry.programs.is_empty() {
            vec![name.clone()]
        } else {
            entry.programs.clone()
        };
        for program in programs {
            std::fs::write(bin.join(program), "#!/bin/sh\n").unwrap();
        }
    }
}
