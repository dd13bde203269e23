// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `pinenv print-env` command.

use clap::Args;
use miette::Result;

#[cfg(test)]
#[path = "./cmd_print_env_test.rs"]
mod cmd_print_env_test;

/// Print a shell script that exports a resolved environment
///
/// Use as `eval "$(pinenv print-env)"` to activate the environment in the
/// current shell.
#[derive(Debug, Args)]
pub struct CmdPrintEnv {
    #[clap(flatten)]
    descriptor: crate::DescriptorFlags,

    /// Environment to print (default: the current platform)
    environment: Option<String>,

    /// Print the script even if artifacts are missing on disk or in the store
    #[clap(long)]
    no_verify: bool,
}

impl CmdPrintEnv {
    pub async fn run(&mut self) -> Result<i32> {
        let settings = self.descriptor.settings()?;
        let descriptor = self.descriptor.descriptor()?;
        let name = crate::default_environment(self.environment.as_deref());
        let index = self.descriptor.index(&settings, &descriptor);

        let environment = crate::retry::resolve(&settings, &descriptor, &name, &index).await?;

        crate::materializer(&settings, !self.no_verify)?.check(&environment)?;

        let ops = pinenv::session_ops(&environment, &descriptor.env);
        print!("{}", pinenv::generate_startup_script(&ops));
        Ok(0)
    }
}
