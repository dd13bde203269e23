// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `pinenv show` command.

use clap::{Args, ValueEnum};
use colored::Colorize;
use miette::{IntoDiagnostic, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Table,
    Yaml,
    Json,
}

/// Display a resolved environment
#[derive(Debug, Args)]
pub struct CmdShow {
    #[clap(flatten)]
    descriptor: crate::DescriptorFlags,

    /// Environment to show (default: the current platform)
    environment: Option<String>,

    /// Output format
    #[clap(long, value_enum, default_value = "table")]
    format: Format,
}

impl CmdShow {
    pub async fn run(&mut self) -> Result<i32> {
        let settings = self.descriptor.settings()?;
        let descriptor = self.descriptor.descriptor()?;
        let name = crate::default_environment(self.environment.as_deref());
        let index = self.descriptor.index(&settings, &descriptor);

        let environment = crate::retry::resolve(&settings, &descriptor, &name, &index).await?;

        match self.format {
            Format::Yaml => print!("{}", serde_yaml::to_string(&environment).into_diagnostic()?),
            Format::Json => println!(
                "{}",
                serde_json::to_string_pretty(&environment).into_diagnostic()?
            ),
            Format::Table => self.show_table(&descriptor, &environment),
        }

        Ok(0)
    }

    fn show_table(&self, descriptor: &pinenv::Descriptor, environment: &pinenv::ResolvedEnvironment) {
        if let Some(path) = &descriptor.source_path {
            println!("{} {}", "Descriptor:".bold(), path.display().to_string().cyan());
        }
        if let Some(description) = &descriptor.description {
            println!("  {}", description.dimmed());
        }
        println!("{} {}", "Environment:".bold(), environment.name.green());
        println!();

        println!("{}", "Sources:".bold());
        for (name, reference) in &descriptor.sources {
            println!("  {} = {}", name.cyan(), reference);
        }
        println!();

        println!("{}", "Tools:".bold());
        if environment.tools.is_empty() {
            println!("  {}", "(no tools)".dimmed());
        }
        for (i, (tool, resolved)) in environment.tools.iter().enumerate() {
            println!(
                "  {}. {} {} {}",
                i + 1,
                tool.green(),
                resolved.artifact.id.dimmed(),
                resolved.entry_point.display()
            );
        }
        println!();

        let dependencies: Vec<_> = environment
            .artifacts
            .iter()
            .filter(|a| !environment.tools.values().any(|t| t.artifact.id == a.id))
            .collect();
        println!("{}", "Runtime dependencies:".bold());
        if dependencies.is_empty() {
            println!("  {}", "(none)".dimmed());
        }
        for artifact in &dependencies {
            println!("  - {}", artifact.id);
        }
        println!();

        println!("{}", "Search path:".bold());
        for dir in &environment.search_path {
            println!("  {}", dir.display());
        }
        println!();
        println!(
            "Total: {} tool(s), {} artifact(s)",
            environment.tools.len(),
            environment.artifacts.len()
        );

        if !descriptor.env.is_empty() {
            println!();
            println!("{}", "Environment Variables:".bold());
            for (i, op) in descriptor.env.iter().enumerate() {
                match op {
                    pinenv::EnvOp::Set(s) => {
                        println!("  {}. {} = {}", i + 1, s.set.cyan(), s.value.green());
                    }
                    pinenv::EnvOp::Prepend(p) => {
                        println!(
                            "  {}. {} = {} + ${}",
                            i + 1,
                            p.prepend.cyan(),
                            p.value.green(),
                            p.prepend
                        );
                    }
                    pinenv::EnvOp::Append(a) => {
                        println!(
                            "  {}. {} = ${} + {}",
                            i + 1,
                            a.append.cyan(),
                            a.append,
                            a.value.green()
                        );
                    }
                    pinenv::EnvOp::Comment(c) => {
                        println!("  # {}", c.comment.dimmed());
                    }
                }
            }
        }
    }
}
