// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Retrying operations that failed because a source was unavailable.

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;

#[cfg(test)]
#[path = "./retry_test.rs"]
mod retry_test;

/// Upper bound for a single wait between attempts.
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Delays between attempts: `retry_delay_ms`, then doubling, `retries` times.
pub fn backoff(settings: &pinenv::Settings) -> impl Iterator<Item = Duration> {
    // delay(n) = 2^n * factor, so the first wait equals retry_delay_ms
    let factor = (settings.retry_delay_ms / 2).max(1);
    ExponentialBackoff::from_millis(2)
        .factor(factor)
        .max_delay(MAX_DELAY)
        .take(settings.retries)
}

/// Run `action`, retrying it while it fails with a transient error.
pub async fn with_retries<T, F, Fut>(settings: &pinenv::Settings, action: F) -> pinenv::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = pinenv::Result<T>>,
{
    RetryIf::spawn(backoff(settings), action, |err: &pinenv::Error| {
        let retry = err.is_transient();
        if retry {
            tracing::warn!("{err}, retrying");
        }
        retry
    })
    .await
}

/// Resolve `environment`, retrying unavailable sources.
pub async fn resolve(
    settings: &pinenv::Settings,
    descriptor: &pinenv::Descriptor,
    environment: &str,
    fetcher: &dyn pinenv::CatalogFetcher,
) -> pinenv::Result<pinenv::ResolvedEnvironment> {
    with_retries(settings, || pinenv::resolve(descriptor, environment, fetcher)).await
}
