// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rstest::rstest;

use super::*;
use crate::fixtures::{entry, rust_entries, snapshot, MemoryFetcher, RUST_DESCRIPTOR};

const REFERENCE: &str = "./index/nixos-23.05";

fn rust_fetcher() -> MemoryFetcher {
    MemoryFetcher::new().with(snapshot(REFERENCE, Path::new("/idx"), rust_entries()))
}

fn rust_descriptor() -> Descriptor {
    Descriptor::from_yaml(RUST_DESCRIPTOR).expect("valid descriptor")
}

#[tokio::test]
async fn test_resolve_rust_toolchain() {
    let fetcher = rust_fetcher();
    let env = resolve(&rust_descriptor(), "x86_64-linux", &fetcher)
        .await
        .expect("Should resolve");

    let tools: Vec<_> = env.tools.keys().map(String::as_str).collect();
    assert_eq!(tools, vec!["cargo", "rustfmt", "rustc", "cargo-edit"]);

    let expected: BTreeSet<&str> = [
        "cargo-1.69.0",
        "rustfmt-1.69.0",
        "rustc-1.69.0",
        "cargo-edit-0.11.9",
        "openssl-3.0.8",
        "glibc-2.37",
        "llvm-15.0.7",
        "zlib-1.2.13",
    ]
    .into_iter()
    .collect();
    assert_eq!(env.artifact_ids(), expected);
    assert_eq!(env.artifacts.len(), expected.len(), "no duplicate artifacts");

    // python3 is in the catalog but was not requested by anything
    assert!(!env.artifact_ids().contains("python3-3.11.4"));
}

#[tokio::test]
async fn test_artifacts_are_ordered_by_identity() {
    let fetcher = rust_fetcher();
    let env = resolve(&rust_descriptor(), "x86_64-linux", &fetcher).await.unwrap();

    let order: Vec<_> = env.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(
        order,
        vec!["cargo", "cargo-edit", "glibc", "llvm", "openssl", "rustc", "rustfmt", "zlib"]
    );
    assert_eq!(env.search_path[0], PathBuf::from("/idx/store/cargo-1.69.0/bin"));
    assert_eq!(env.search_path.len(), env.artifacts.len());
}

#[tokio::test]
async fn test_entry_points() {
    let fetcher = rust_fetcher();
    let env = resolve(&rust_descriptor(), "x86_64-linux", &fetcher).await.unwrap();

    assert_eq!(
        env.tools["cargo-edit"].entry_point,
        PathBuf::from("/idx/store/cargo-edit-0.11.9/bin/cargo-add")
    );
    assert_eq!(env.tools["rustc"].source, "nixpkgs");
}

#[tokio::test]
async fn test_resolution_is_deterministic() {
    let fetcher = rust_fetcher();
    let descriptor = rust_descriptor();

    let first = resolve(&descriptor, "x86_64-linux", &fetcher).await.unwrap();
    let second = resolve(&descriptor, "x86_64-linux", &fetcher).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_request_order_does_not_change_artifact_set() {
    let fetcher = rust_fetcher();
    let reordered = RUST_DESCRIPTOR.replace(
        "    - cargo\n    - rustfmt\n    - rustc\n    - cargo-edit\n",
        "    - cargo-edit\n    - rustc\n    - rustfmt\n    - cargo\n",
    );
    let reordered = Descriptor::from_yaml(reordered).unwrap();

    let a = resolve(&rust_descriptor(), "x86_64-linux", &fetcher).await.unwrap();
    let b = resolve(&reordered, "x86_64-linux", &fetcher).await.unwrap();
    assert_eq!(a.artifact_ids(), b.artifact_ids());
    assert_eq!(a.artifacts, b.artifacts);
    assert_eq!(a.search_path, b.search_path);
    assert_ne!(
        a.tools.keys().collect::<Vec<_>>(),
        b.tools.keys().collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_unknown_tool() {
    let yaml = RUST_DESCRIPTOR.replace("    - cargo-edit\n", "    - nonexistent-tool\n");
    let descriptor = Descriptor::from_yaml(yaml).unwrap();
    let fetcher = rust_fetcher();

    match resolve(&descriptor, "x86_64-linux", &fetcher).await {
        Err(Error::UnknownTool { name, source_name, .. }) => {
            assert_eq!(name, "nonexistent-tool");
            assert_eq!(source_name, "nixpkgs");
        }
        other => panic!("expected UnknownTool, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_tool_suggestions() {
    let yaml = RUST_DESCRIPTOR.replace("    - cargo-edit\n", "    - cargo-edt\n");
    let descriptor = Descriptor::from_yaml(yaml).unwrap();
    let fetcher = rust_fetcher();

    let err = resolve(&descriptor, "x86_64-linux", &fetcher).await.unwrap_err();
    let Error::UnknownTool { similar, .. } = &err else {
        panic!("expected UnknownTool, got {err:?}");
    };
    assert!(similar.contains(&"cargo-edit".to_string()));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_unknown_environment() {
    let fetcher = rust_fetcher();
    let err = resolve(&rust_descriptor(), "riscv64-linux", &fetcher)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownEnvironment { .. }));
    assert_eq!(fetcher.fetch_count(REFERENCE), 0, "nothing fetched for a bad name");
}

#[tokio::test]
async fn test_unreachable_source_can_be_retried() {
    let empty = MemoryFetcher::new();
    let descriptor = rust_descriptor();

    let err = resolve(&descriptor, "x86_64-linux", &empty).await.unwrap_err();
    assert!(matches!(err, Error::SourceUnavailable { .. }));
    assert!(err.is_transient());

    // Once the index is reachable the same descriptor resolves normally.
    let fetcher = rust_fetcher();
    let env = resolve(&descriptor, "x86_64-linux", &fetcher).await.unwrap();
    assert_eq!(env.tools.len(), 4);
}

#[tokio::test]
async fn test_each_source_fetched_once() {
    let fetcher = rust_fetcher();
    resolve(&rust_descriptor(), "x86_64-linux", &fetcher).await.unwrap();
    assert_eq!(fetcher.fetch_count(REFERENCE), 1);
}

#[tokio::test]
async fn test_environments_are_isolated() {
    let fetcher = rust_fetcher();
    let descriptor = rust_descriptor();

    let linux = resolve(&descriptor, "x86_64-linux", &fetcher).await.unwrap();
    let darwin = resolve(&descriptor, "aarch64-darwin", &fetcher).await.unwrap();
    let linux_again = resolve(&descriptor, "x86_64-linux", &fetcher).await.unwrap();

    let darwin_ids = darwin.artifact_ids();
    assert_eq!(
        darwin_ids,
        ["rustc-1.69.0", "glibc-2.37", "llvm-15.0.7", "zlib-1.2.13"]
            .into_iter()
            .collect::<BTreeSet<_>>()
    );
    assert!(!darwin_ids.contains("cargo-1.69.0"));
    assert_eq!(linux, linux_again);
}

#[tokio::test]
async fn test_qualified_tools_use_their_source() {
    let yaml = r#"
sources:
  stable: ./index/stable
  unstable: ./index/unstable
environments:
  dev:
    - cargo
    - unstable#cargo
"#;
    let descriptor = Descriptor::from_yaml(yaml).unwrap();

    let mut unstable = rust_entries();
    unstable["cargo"].version = Some("1.72.0".to_string());
    unstable["cargo"].path = PathBuf::from("store/cargo-1.72.0");
    let fetcher = MemoryFetcher::new()
        .with(snapshot("./index/stable", Path::new("/stable"), rust_entries()))
        .with(snapshot("./index/unstable", Path::new("/unstable"), unstable));

    let env = resolve(&descriptor, "dev", &fetcher).await.unwrap();
    assert_eq!(env.tools["cargo"].artifact.id, "cargo-1.69.0");
    assert_eq!(env.tools["unstable#cargo"].artifact.id, "cargo-1.72.0");
    assert_eq!(fetcher.fetch_count("./index/unstable"), 1);
}

#[tokio::test]
async fn test_unused_sources_are_not_fetched() {
    let yaml = r#"
sources:
  stable: ./index/stable
  offline: ./index/offline
environments:
  dev: [cargo]
"#;
    let descriptor = Descriptor::from_yaml(yaml).unwrap();
    let fetcher =
        MemoryFetcher::new().with(snapshot("./index/stable", Path::new("/s"), rust_entries()));

    assert!(resolve(&descriptor, "dev", &fetcher).await.is_ok());
    assert_eq!(fetcher.fetch_count("./index/offline"), 0);
}

#[rstest]
fn test_shared_artifacts_are_deduplicated() {
    let mut entries = IndexMap::new();
    entries.insert("a".to_string(), entry("1", &["common"]));
    entries.insert("b".to_string(), entry("1", &["common", "a"]));
    entries.insert("common".to_string(), entry("1", &[]));
    for (name, entry) in entries.iter_mut() {
        entry.path = PathBuf::from(name.as_str());
    }

    let mut catalogs = CatalogSet::new();
    catalogs.insert(
        "pkgs".to_string(),
        Box::new(snapshot("./i/main", Path::new("/i"), entries)),
    );
    let descriptor =
        Descriptor::from_yaml("sources:\n  pkgs: ./i/main\nenvironments:\n  dev: [a, b]\n").unwrap();

    let env = resolve_request(descriptor.environment("dev").unwrap(), &catalogs).unwrap();
    let ids: Vec<_> = env.artifacts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["a-1", "b-1", "common-1"]);
    assert_eq!(env.search_path.len(), 3);
}

#[rstest]
fn test_empty_request_resolves_to_empty_environment() {
    let descriptor =
        Descriptor::from_yaml("sources:\n  pkgs: ./i/main\nenvironments:\n  bare: []\n").unwrap();
    let env = resolve_request(descriptor.environment("bare").unwrap(), &CatalogSet::new()).unwrap();
    assert!(env.is_empty());
    assert!(env.search_path.is_empty());
}
