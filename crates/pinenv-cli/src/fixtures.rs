// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! A project directory with a descriptor and a one-tool index for command
//! tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::DescriptorFlags;

pub const DESCRIPTOR: &str = r#"
api: pinenv/v0
sources:
  pkgs: ./index/main
environments:
  dev:
    - hello
env:
  - set: GREETING
    value: hi
"#;

const SNAPSHOT: &str = r#"
api: pinenv/v0/catalog
revision: main
artifacts:
  hello:
    version: "2.12"
    path: store/hello-2.12
"#;

pub struct Project {
    pub tmp: TempDir,
}

impl Project {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let index = tmp.path().join("index");
        std::fs::create_dir_all(index.join("store/hello-2.12/bin")).unwrap();
        let hello = index.join("store/hello-2.12/bin/hello");
        std::fs::write(&hello, "#!/bin/sh\necho hello\n").unwrap();
        std::fs::set_permissions(&hello, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(index.join("main.yaml"), SNAPSHOT).unwrap();
        std::fs::write(tmp.path().join(pinenv::DESCRIPTOR_FILENAME), DESCRIPTOR).unwrap();
        Self { tmp }
    }

    pub fn path(&self) -> &Path {
        self.tmp.path()
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.path().join("index/store/hello-2.12/bin")
    }

    pub fn write_descriptor(&self, yaml: &str) {
        std::fs::write(self.path().join(pinenv::DESCRIPTOR_FILENAME), yaml).unwrap();
    }

    pub fn flags(&self) -> DescriptorFlags {
        DescriptorFlags {
            file: self.path().join(pinenv::DESCRIPTOR_FILENAME),
            retries: Some(0),
        }
    }
}
