// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Generate or update the lock file of a descriptor.

use clap::Args;
use miette::Result;

/// Generate or update the lock file
#[derive(Debug, Args)]
pub struct CmdLock {
    #[clap(flatten)]
    descriptor: crate::DescriptorFlags,

    /// Update existing lock file
    #[clap(long)]
    update: bool,

    /// Force regeneration even if up-to-date
    #[clap(long)]
    force: bool,

    /// Verify lock is current (exit 1 if not)
    #[clap(long, conflicts_with_all = ["update", "force"])]
    check: bool,
}

impl CmdLock {
    pub async fn run(&mut self) -> Result<i32> {
        let settings = self.descriptor.settings()?;
        let descriptor = self.descriptor.descriptor()?;
        let index = self.descriptor.index(&settings, &descriptor);
        let lock_path = self.descriptor.lock_path(&descriptor)?;

        if self.check {
            if !lock_path.exists() {
                eprintln!("No lock file found at {:?}", lock_path);
                return Ok(2);
            }

            let lock = pinenv::LockFile::load(&lock_path)?;
            let changes = crate::retry::with_retries(&settings, || {
                pinenv::verify_lock(&lock, &descriptor, &index)
            })
            .await?;

            if !changes.is_empty() {
                eprintln!("Lock file is out of date:");
                for change in &changes {
                    eprintln!("  - {:?}: {}", change.kind, change.reference);
                }
                return Ok(1);
            }

            println!("Lock file is up to date");
            return Ok(0);
        }

        if lock_path.exists() && !self.update && !self.force {
            return Err(miette::miette!(
                "Lock file already exists at {:?}. Use --update or --force",
                lock_path
            ));
        }

        // --update leaves an up-to-date lock alone; --force always rewrites.
        if lock_path.exists() && self.update && !self.force {
            if let Ok(existing) = pinenv::LockFile::load(&lock_path) {
                let changes = crate::retry::with_retries(&settings, || {
                    pinenv::verify_lock(&existing, &descriptor, &index)
                })
                .await?;
                if changes.is_empty() {
                    println!("Lock file is up to date: {:?}", lock_path);
                    return Ok(0);
                }
            }
        }

        let lock =
            crate::retry::with_retries(&settings, || pinenv::generate_lock(&descriptor, &index))
                .await?;
        lock.save(&lock_path)?;
        println!("Generated lock file: {:?}", lock_path);

        Ok(0)
    }
}
