// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use rstest::rstest;
use tempfile::TempDir;

use super::*;
use crate::environment::AppendEnv;
use crate::fixtures::{rust_entries, snapshot, write_index, MemoryFetcher, RUST_DESCRIPTOR};
use crate::store::{FilesystemStore, StoreValidator};
use crate::{resolve, Descriptor, FileIndex};

/// Resolve the Rust toolchain against an index written under `tmp`, so
/// every directory and entry point exists on disk.
async fn resolve_on_disk(tmp: &TempDir, environment: &str) -> ResolvedEnvironment {
    write_index(&tmp.path().join("index"), "nixos-23.05", &rust_entries());
    let descriptor = Descriptor::from_yaml(RUST_DESCRIPTOR).unwrap();
    let index = FileIndex::new().with_base_dir(tmp.path());
    resolve(&descriptor, environment, &index)
        .await
        .expect("Should resolve")
}

/// Resolve against an in-memory catalog whose paths do not exist.
async fn resolve_in_memory() -> ResolvedEnvironment {
    let fetcher = MemoryFetcher::new().with(snapshot(
        "./index/nixos-23.05",
        Path::new("/nonexistent/idx"),
        rust_entries(),
    ));
    let descriptor = Descriptor::from_yaml(RUST_DESCRIPTOR).unwrap();
    resolve(&descriptor, "x86_64-linux", &fetcher).await.unwrap()
}

fn context_with_path(path: &str) -> SessionContext {
    let mut context = SessionContext::new();
    context.set(PATH_VAR, path);
    context.set("HOME", "/home/dev");
    context
}

#[tokio::test]
async fn test_materialize_prepends_search_path() {
    let tmp = TempDir::new().unwrap();
    let env = resolve_on_disk(&tmp, "x86_64-linux").await;
    let mut context = context_with_path("/usr/bin:/bin");

    PathMaterializer::new()
        .materialize(&env, &[], &mut context)
        .expect("Should materialize");

    let path = context.search_path();
    assert_eq!(&path[..env.search_path.len()], env.search_path.as_slice());
    assert_eq!(
        &path[env.search_path.len()..],
        &[PathBuf::from("/usr/bin"), PathBuf::from("/bin")]
    );
    assert_eq!(context.get(ENVIRONMENT_VAR), Some("x86_64-linux"));
    assert_eq!(context.get(ACTIVE_VAR), Some("1"));
    assert_eq!(context.get("HOME"), Some("/home/dev"));
}

#[tokio::test]
async fn test_every_tool_is_reachable_through_path() {
    let tmp = TempDir::new().unwrap();
    let env = resolve_on_disk(&tmp, "x86_64-linux").await;
    let mut context = SessionContext::new();
    PathMaterializer::new().materialize(&env, &[], &mut context).unwrap();

    let path = context.search_path();
    for program in ["cargo", "rustfmt", "rustc", "cargo-add"] {
        assert!(
            path.iter().any(|dir| dir.join(program).is_file()),
            "{program} should be on PATH"
        );
    }
}

#[tokio::test]
async fn test_rematerializing_does_not_duplicate_entries() {
    let tmp = TempDir::new().unwrap();
    let env = resolve_on_disk(&tmp, "aarch64-darwin").await;
    let mut context = context_with_path("/usr/bin");
    let materializer = PathMaterializer::new();

    materializer.materialize(&env, &[], &mut context).unwrap();
    let once = context.clone();
    materializer.materialize(&env, &[], &mut context).unwrap();
    assert_eq!(once, context);
}

#[tokio::test]
async fn test_ops_apply_after_path() {
    let tmp = TempDir::new().unwrap();
    let env = resolve_on_disk(&tmp, "aarch64-darwin").await;
    let mut context = context_with_path("/usr/bin");

    let ops = vec![
        EnvOp::Set(SetEnv {
            set: "RUST_BACKTRACE".to_string(),
            value: "1".to_string(),
        }),
        EnvOp::Prepend(PrependEnv {
            prepend: PATH_VAR.to_string(),
            value: "/opt/extra/bin".to_string(),
            separator: None,
        }),
        EnvOp::Append(AppendEnv {
            append: "MANPATH".to_string(),
            value: "/opt/extra/man".to_string(),
            separator: None,
        }),
    ];
    PathMaterializer::new().materialize(&env, &ops, &mut context).unwrap();

    assert_eq!(context.get("RUST_BACKTRACE"), Some("1"));
    assert_eq!(context.get("MANPATH"), Some("/opt/extra/man"));
    assert_eq!(context.search_path()[0], PathBuf::from("/opt/extra/bin"));
    assert_eq!(context.search_path()[1], env.search_path[0]);
}

#[tokio::test]
async fn test_missing_directory_leaves_context_untouched() {
    let env = resolve_in_memory().await;
    let mut context = context_with_path("/usr/bin");
    let before = context.clone();

    let err = PathMaterializer::new()
        .materialize(&env, &[], &mut context)
        .expect_err("directories do not exist");
    assert!(matches!(err, Error::MaterializationFailed { .. }));
    assert!(!err.is_transient());
    assert_eq!(context, before);
}

#[tokio::test]
async fn test_missing_entry_point_leaves_context_untouched() {
    let tmp = TempDir::new().unwrap();
    let env = resolve_on_disk(&tmp, "x86_64-linux").await;
    std::fs::remove_file(&env.tools["cargo-edit"].entry_point).unwrap();

    let mut context = context_with_path("/usr/bin");
    let before = context.clone();
    let result = PathMaterializer::new().materialize(&env, &[], &mut context);

    match result {
        Err(Error::MaterializationFailed { reason }) => assert!(reason.contains("cargo-edit")),
        other => panic!("expected MaterializationFailed, got {other:?}"),
    }
    assert_eq!(context, before);
}

/// A store that knows every path except the listed ones, or fails outright.
#[derive(Debug, Default)]
struct FakeStore {
    invalid: HashSet<PathBuf>,
    broken: bool,
}

impl StoreValidator for FakeStore {
    fn is_valid_path(&self, path: &Path) -> crate::Result<bool> {
        if self.broken {
            return Err(Error::StoreDaemon {
                message: "store is locked".to_string(),
            });
        }
        Ok(!self.invalid.contains(path))
    }
}

#[tokio::test]
async fn test_invalid_store_path_leaves_context_untouched() {
    let tmp = TempDir::new().unwrap();
    let env = resolve_on_disk(&tmp, "x86_64-linux").await;
    let openssl = env
        .artifacts
        .iter()
        .find(|a| a.name == "openssl")
        .unwrap()
        .path
        .clone();
    let store = FakeStore {
        invalid: HashSet::from([openssl]),
        broken: false,
    };

    let mut context = context_with_path("/usr/bin");
    let before = context.clone();
    let result = PathMaterializer::new()
        .with_store(Arc::new(store))
        .materialize(&env, &[], &mut context);

    match result {
        Err(Error::MaterializationFailed { reason }) => assert!(reason.contains("openssl-3.0.8")),
        other => panic!("expected MaterializationFailed, got {other:?}"),
    }
    assert_eq!(context, before);
}

#[tokio::test]
async fn test_store_errors_fail_materialization() {
    let tmp = TempDir::new().unwrap();
    let env = resolve_on_disk(&tmp, "aarch64-darwin").await;
    let store = FakeStore {
        broken: true,
        ..Default::default()
    };

    let mut context = SessionContext::new();
    let err = PathMaterializer::new()
        .with_store(Arc::new(store))
        .materialize(&env, &[], &mut context)
        .unwrap_err();
    assert!(matches!(err, Error::MaterializationFailed { .. }));
    assert_eq!(context, SessionContext::new());
}

#[tokio::test]
async fn test_filesystem_store_accepts_written_index() {
    let tmp = TempDir::new().unwrap();
    let env = resolve_on_disk(&tmp, "x86_64-linux").await;

    let mut context = SessionContext::new();
    PathMaterializer::new()
        .with_store(Arc::new(FilesystemStore))
        .materialize(&env, &[], &mut context)
        .expect("every artifact exists on disk");
    assert_eq!(context.get(ACTIVE_VAR), Some("1"));
}

#[tokio::test]
async fn test_check_matches_materialize() {
    let tmp = TempDir::new().unwrap();
    let env = resolve_on_disk(&tmp, "x86_64-linux").await;
    PathMaterializer::new().check(&env).expect("index is complete");

    std::fs::remove_dir_all(&env.search_path[1]).unwrap();
    let err = PathMaterializer::new().check(&env).unwrap_err();
    assert!(matches!(err, Error::MaterializationFailed { .. }));

    let missing = resolve_in_memory().await;
    assert!(PathMaterializer::without_verification().check(&missing).is_ok());
}

#[tokio::test]
async fn test_without_verification() {
    let env = resolve_in_memory().await;
    let mut context = SessionContext::new();

    PathMaterializer::without_verification()
        .materialize(&env, &[], &mut context)
        .expect("paths are not checked");
    assert_eq!(
        context.search_path()[0],
        PathBuf::from("/nonexistent/idx/store/cargo-1.69.0/bin")
    );
}

#[tokio::test]
async fn test_session_ops_reproduce_materialization() {
    let env = resolve_in_memory().await;
    let extra = EnvOp::Set(SetEnv {
        set: "EDITOR".to_string(),
        value: "vi".to_string(),
    });

    let ops = session_ops(&env, std::slice::from_ref(&extra));
    assert_eq!(ops.len(), 4);
    assert_eq!(ops[0].variable(), Some(PATH_VAR));
    assert_eq!(ops[3], extra);

    let mut scripted = context_with_path("/usr/bin");
    for op in &ops {
        scripted.apply(op);
    }
    let mut materialized = context_with_path("/usr/bin");
    PathMaterializer::without_verification()
        .materialize(&env, std::slice::from_ref(&extra), &mut materialized)
        .unwrap();
    assert_eq!(scripted, materialized);
}

#[rstest]
fn test_context_apply_ignores_comments() {
    let mut context = SessionContext::new();
    context.apply(&EnvOp::Comment(crate::environment::CommentEnv {
        comment: "nothing to see".to_string(),
    }));
    assert_eq!(context.vars().count(), 0);
}

#[rstest]
fn test_context_remove() {
    let mut context = context_with_path("/bin");
    assert_eq!(context.remove("HOME").as_deref(), Some("/home/dev"));
    assert_eq!(context.get("HOME"), None);
    assert_eq!(context.vars().map(|(k, _)| k).collect::<Vec<_>>(), vec![PATH_VAR]);
}
