// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Discovery of the pinenv.yaml that applies to a path.

use std::path::{Path, PathBuf};

#[cfg(test)]
#[path = "./discovery_test.rs"]
mod discovery_test;

use crate::{Descriptor, DESCRIPTOR_FILENAME};

/// Find and load the descriptor for `start_path`.
///
/// A file is loaded as-is. For a directory, the nearest `pinenv.yaml` in it
/// or any of its parents wins.
pub fn discover_descriptor<P: AsRef<Path>>(start_path: P) -> crate::Result<Descriptor> {
    let path = find_descriptor(start_path.as_ref())?;
    tracing::debug!(path = %path.display(), "loading descriptor");
    Descriptor::load(&path)
}

/// Locate the descriptor file for `start_path` without loading it.
pub fn find_descriptor(start_path: &Path) -> crate::Result<PathBuf> {
    let start = resolve_start_path(start_path);

    if start.is_file() {
        return Ok(start);
    }
    if !start.is_dir() {
        return Err(crate::Error::NotFoundAtPath(start));
    }

    let mut current = start.clone();
    loop {
        let candidate = current.join(DESCRIPTOR_FILENAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !current.pop() {
            break;
        }
    }

    Err(crate::Error::NotFoundInTree(start))
}

/// Resolve starting path, preferring $PWD to preserve symlinks.
fn resolve_start_path(start_path: &Path) -> PathBuf {
    if start_path.is_absolute() {
        start_path.to_owned()
    } else {
        match std::env::var("PWD").ok() {
            Some(pwd) => PathBuf::from(pwd).join(start_path),
            None => std::env::current_dir()
                .unwrap_or_default()
                .join(start_path),
        }
    }
}
