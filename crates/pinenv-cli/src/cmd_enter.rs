// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `pinenv enter` command.

use clap::Args;
use miette::{IntoDiagnostic, Result, WrapErr};
use pinenv::{SessionContext, SessionMaterializer};

#[cfg(test)]
#[path = "./cmd_enter_test.rs"]
mod cmd_enter_test;

/// Enter a shell, or run a command, in a resolved environment
#[derive(Debug, Args)]
pub struct CmdEnter {
    #[clap(flatten)]
    pub descriptor: crate::DescriptorFlags,

    /// Environment to enter (default: the current platform)
    pub environment: Option<String>,

    /// Do not check that artifacts exist on disk or in the store before
    /// entering
    #[clap(long)]
    pub no_verify: bool,

    /// Command to run (default: the configured shell, then $SHELL)
    #[clap(last = true)]
    pub command: Vec<String>,
}

impl CmdEnter {
    pub async fn run(&mut self) -> Result<i32> {
        let settings = self.descriptor.settings()?;
        let descriptor = self.descriptor.descriptor()?;
        let name = crate::default_environment(self.environment.as_deref());
        let index = self.descriptor.index(&settings, &descriptor);

        let environment = crate::retry::resolve(&settings, &descriptor, &name, &index).await?;

        let materializer = crate::materializer(&settings, !self.no_verify)?;
        let mut context = SessionContext::from_current_process();
        materializer.materialize(&environment, &descriptor.env, &mut context)?;

        let (program, args) = match self.command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (shell(&settings, &context), Vec::new()),
        };

        tracing::info!(environment = %name, %program, "entering environment");
        let status = tokio::process::Command::new(&program)
            .args(&args)
            .env_clear()
            .envs(context.vars())
            .status()
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to run {program}"))?;

        // a child killed by a signal has no exit code
        Ok(status.code().unwrap_or(1))
    }
}

/// The interactive shell for a session.
fn shell(settings: &pinenv::Settings, context: &SessionContext) -> String {
    settings
        .shell
        .clone()
        .or_else(|| context.get("SHELL").map(String::from))
        .unwrap_or_else(|| "/bin/sh".to_string())
}
