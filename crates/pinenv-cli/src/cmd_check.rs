// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Verify that the descriptor and its sources match the lock file.

use clap::Args;
use colored::Colorize;
use miette::Result;
use pinenv::LockChangeKind;

/// Verify the descriptor and its sources match the lock file
#[derive(Debug, Args)]
pub struct CmdCheck {
    #[clap(flatten)]
    descriptor: crate::DescriptorFlags,

    /// Exit with error on mismatch
    #[clap(long)]
    strict: bool,
}

impl CmdCheck {
    pub async fn run(&mut self) -> Result<i32> {
        let settings = self.descriptor.settings()?;
        let descriptor = self.descriptor.descriptor()?;
        let index = self.descriptor.index(&settings, &descriptor);
        let lock_path = self.descriptor.lock_path(&descriptor)?;

        if !lock_path.exists() {
            if self.strict {
                return Err(miette::miette!("No lock file found at {:?}", lock_path));
            } else {
                println!("Warning: No lock file found");
                return Ok(2);
            }
        }

        let lock = pinenv::LockFile::load(&lock_path)?;
        let changes = crate::retry::with_retries(&settings, || {
            pinenv::verify_lock(&lock, &descriptor, &index)
        })
        .await?;

        if changes.is_empty() {
            println!("{} Environment matches lock file", "✓".green());
            return Ok(0);
        }

        if self.strict {
            eprintln!("Error: Environment differs from lock file:");
        } else {
            println!("Warning: Environment differs from lock file:");
        }

        for change in &changes {
            match &change.kind {
                LockChangeKind::CatalogDigestChanged => {
                    println!("  - Source '{}' catalog changed", change.reference);
                    if let (Some(exp), Some(act)) = (&change.expected, &change.actual) {
                        println!("    Expected: {}", exp);
                        println!("    Actual:   {}", act);
                    }
                }
                LockChangeKind::SourceReferenceChanged => {
                    println!(
                        "  - Source '{}' now pinned to {}",
                        change.reference,
                        change.actual.as_deref().unwrap_or_default().yellow()
                    );
                }
                LockChangeKind::DescriptorChanged => {
                    println!("  - Descriptor '{}' was modified", change.reference);
                }
                LockChangeKind::EnvironmentChanged => {
                    println!("  - Environment '{}' resolves differently", change.reference);
                }
                _ => {
                    println!("  - {:?}: {}", change.kind, change.reference);
                }
            }
        }

        if self.strict {
            return Ok(1);
        }

        println!("\nRun 'pinenv lock --update' to update the lock file");
        Ok(0)
    }
}
