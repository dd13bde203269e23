// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};

use rstest::rstest;

use super::*;

fn settings(retries: usize, retry_delay_ms: u64) -> pinenv::Settings {
    pinenv::Settings {
        retries,
        retry_delay_ms,
        ..Default::default()
    }
}

fn unavailable() -> pinenv::Error {
    pinenv::Error::SourceUnavailable {
        reference: "github:NixOS/nixpkgs/nixos-23.05".to_string(),
        error: std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"),
    }
}

#[rstest]
fn test_backoff_doubles_from_configured_delay() {
    let delays: Vec<_> = backoff(&settings(3, 200)).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(800),
        ]
    );
}

#[rstest]
fn test_backoff_is_capped() {
    let delays: Vec<_> = backoff(&settings(12, 1000)).collect();
    assert_eq!(delays.len(), 12);
    assert!(delays.iter().all(|d| *d <= MAX_DELAY));
    assert_eq!(delays.last(), Some(&MAX_DELAY));
}

#[rstest]
fn test_no_retries() {
    assert_eq!(backoff(&settings(0, 200)).count(), 0);
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let attempts = AtomicUsize::new(0);
    let counter = &attempts;
    let result = with_retries(&settings(3, 2), move || async move {
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 | 1 => Err(unavailable()),
            n => Ok(n),
        }
    })
    .await;

    assert_eq!(result.unwrap(), 2);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let attempts = AtomicUsize::new(0);
    let counter = &attempts;
    let result: pinenv::Result<()> = with_retries(&settings(2, 2), move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(unavailable())
    })
    .await;

    assert!(matches!(result, Err(pinenv::Error::SourceUnavailable { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_caller_errors_are_not_retried() {
    let attempts = AtomicUsize::new(0);
    let counter = &attempts;
    let result: pinenv::Result<()> = with_retries(&settings(3, 2), move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(pinenv::Error::UnknownTool {
            name: "nonexistent-tool".to_string(),
            source_name: "nixpkgs".to_string(),
            similar: Vec::new(),
        })
    })
    .await;

    assert!(matches!(result, Err(pinenv::Error::UnknownTool { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
