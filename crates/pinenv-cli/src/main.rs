// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! pinenv - Pinned Development Environment Resolver CLI

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

mod cmd_check;
mod cmd_enter;
mod cmd_init;
mod cmd_lock;
mod cmd_print_env;
mod cmd_show;
mod retry;

#[cfg(test)]
mod fixtures;

use cmd_check::CmdCheck;
use cmd_enter::CmdEnter;
use cmd_init::CmdInit;
use cmd_lock::CmdLock;
use cmd_print_env::CmdPrintEnv;
use cmd_show::CmdShow;

#[derive(Parser)]
#[clap(
    name = "pinenv",
    about = "Pinned Development Environment Resolver",
    version,
    long_about = "Enter reproducible development shells declared by a pinenv.yaml file"
)]
struct Opt {
    #[clap(flatten)]
    logging: Logging,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Parser)]
struct Logging {
    /// Increase verbosity (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[clap(short, long, global = true)]
    quiet: bool,
}

/// Where to find the descriptor and how hard to try reaching its sources.
#[derive(Parser, Clone, Debug)]
pub struct DescriptorFlags {
    /// Descriptor file, or a directory to start discovery from
    #[clap(short = 'f', long = "file", default_value = ".")]
    pub file: PathBuf,

    /// Retries after an unavailable source (overrides configuration)
    #[clap(long)]
    pub retries: Option<usize>,
}

impl DescriptorFlags {
    /// Load user settings with command line overrides applied.
    pub fn settings(&self) -> Result<pinenv::Settings> {
        let mut settings = pinenv::Settings::load()?;
        if let Some(retries) = self.retries {
            settings.retries = retries;
        }
        Ok(settings)
    }

    /// Discover and parse the descriptor.
    pub fn descriptor(&self) -> Result<pinenv::Descriptor> {
        Ok(pinenv::discover_descriptor(&self.file)?)
    }

    /// Catalog fetcher for `descriptor`, with relative index locations
    /// anchored at its directory.
    pub fn index(
        &self,
        settings: &pinenv::Settings,
        descriptor: &pinenv::Descriptor,
    ) -> pinenv::FileIndex {
        pinenv::FileIndex::from_settings(settings, descriptor.base_dir())
    }

    /// Path of the lock file that belongs to `descriptor`.
    pub fn lock_path(&self, descriptor: &pinenv::Descriptor) -> Result<PathBuf> {
        match descriptor.base_dir() {
            Some(dir) => Ok(dir.join(pinenv::LOCK_FILENAME)),
            None => std::env::current_dir()
                .map(|d| d.join(pinenv::LOCK_FILENAME))
                .into_diagnostic(),
        }
    }
}

/// Materializer for `pinenv enter` and `print-env`: checks artifacts on disk
/// and, when a store is configured, against that store.
pub fn materializer(
    settings: &pinenv::Settings,
    verify: bool,
) -> Result<pinenv::PathMaterializer> {
    if !verify {
        return Ok(pinenv::PathMaterializer::without_verification());
    }
    let materializer = pinenv::PathMaterializer::new();
    Ok(match pinenv::store::from_settings(settings)? {
        Some(store) => materializer.with_store(store),
        None => materializer,
    })
}

/// Environment name to use when none is given on the command line.
pub fn default_environment(name: Option<&str>) -> String {
    name.map(String::from)
        .unwrap_or_else(|| pinenv::current_platform().to_string())
}

#[derive(Subcommand)]
enum Command {
    /// Create a new pinenv.yaml file
    Init(CmdInit),

    /// Display a resolved environment
    Show(CmdShow),

    /// Enter a shell, or run a command, in a resolved environment
    Enter(CmdEnter),

    /// Print a shell script that exports a resolved environment
    PrintEnv(CmdPrintEnv),

    /// Generate or update the lock file
    Lock(CmdLock),

    /// Verify the descriptor and its sources match the lock file
    Check(CmdCheck),
}

impl Opt {
    async fn run(self) -> Result<i32> {
        let log_level = match (self.logging.quiet, self.logging.verbose) {
            (true, _) => tracing::Level::ERROR,
            (false, 0) => tracing::Level::WARN,
            (false, 1) => tracing::Level::INFO,
            (false, 2) => tracing::Level::DEBUG,
            (false, _) => tracing::Level::TRACE,
        };

        // logs go to stderr so that print-env output stays clean
        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .init();

        match self.cmd {
            Command::Init(mut cmd) => cmd.run().await,
            Command::Show(mut cmd) => cmd.run().await,
            Command::Enter(mut cmd) => cmd.run().await,
            Command::PrintEnv(mut cmd) => cmd.run().await,
            Command::Lock(mut cmd) => cmd.run().await,
            Command::Check(mut cmd) => cmd.run().await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    let code = opt.run().await?;
    std::process::exit(code);
}
