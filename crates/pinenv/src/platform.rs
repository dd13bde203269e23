// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Platform identifiers used as default environment names.

use once_cell::sync::Lazy;

static CURRENT_PLATFORM: Lazy<String> =
    Lazy::new(|| platform_identifier(std::env::consts::ARCH, std::env::consts::OS));

/// Identifier of the running platform, e.g. `x86_64-linux`.
pub fn current_platform() -> &'static str {
    &CURRENT_PLATFORM
}

/// Build a `<arch>-<os>` identifier; macOS is spelled `darwin`.
pub fn platform_identifier(arch: &str, os: &str) -> String {
    let os = match os {
        "macos" => "darwin",
        other => other,
    };
    format!("{arch}-{os}")
}
