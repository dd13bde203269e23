// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `pinenv init` command.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use miette::Result;

#[cfg(test)]
#[path = "./cmd_init_test.rs"]
mod cmd_init_test;

/// Reference written when none is given.
const DEFAULT_SOURCE: &str = "github:NixOS/nixpkgs/nixos-23.05";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Template {
    Minimal,
    Standard,
    Full,
}

/// Create a new pinenv.yaml file
#[derive(Debug, Args)]
pub struct CmdInit {
    /// Directory to create file in
    #[clap(default_value = ".")]
    path: PathBuf,

    /// Pinned index reference for the primary source (<location>/<pin>)
    #[clap(long, default_value = DEFAULT_SOURCE)]
    source: String,

    /// Environment to declare (default: the current platform)
    #[clap(long)]
    environment: Option<String>,

    /// Add an initial tool
    #[clap(long = "tool")]
    tools: Vec<String>,

    /// Template to use
    #[clap(long, value_enum, default_value = "standard")]
    template: Template,

    /// Overwrite an existing file
    #[clap(long)]
    force: bool,
}

impl CmdInit {
    pub async fn run(&mut self) -> Result<i32> {
        let descriptor_path = self.path.join(pinenv::DESCRIPTOR_FILENAME);

        if descriptor_path.exists() && !self.force {
            return Err(miette::miette!(
                help = "Use --force to overwrite it",
                "pinenv.yaml already exists at {:?}",
                descriptor_path
            ));
        }

        // Refuse to write a descriptor that would not load.
        let content = self.render();
        pinenv::Descriptor::from_yaml(&content)?;

        std::fs::write(&descriptor_path, content)
            .map_err(|e| miette::miette!("Failed to write pinenv.yaml: {}", e))?;

        println!("Created pinenv.yaml at {:?}", descriptor_path);
        println!();
        println!("Next steps:");
        println!("  1. Edit the file to add your tools");
        println!("  2. Run 'pinenv show' to preview the environment");
        println!("  3. Run 'pinenv enter' to enter the environment");

        Ok(0)
    }

    fn render(&self) -> String {
        match self.template {
            Template::Minimal => self.generate_minimal_template(),
            Template::Standard => self.generate_standard_template(),
            Template::Full => self.generate_full_template(),
        }
    }

    fn environment_name(&self) -> String {
        crate::default_environment(self.environment.as_deref())
    }

    fn tools_list(&self) -> String {
        if self.tools.is_empty() {
            " []\n".to_string()
        } else {
            let items: String = self.tools.iter().map(|t| format!("    - {t}\n")).collect();
            format!("\n{items}")
        }
    }

    fn generate_minimal_template(&self) -> String {
        format!(
            "sources:\n  \
            pkgs: {}\n\
            environments:\n  \
            {}:{}",
            self.source,
            self.environment_name(),
            self.tools_list(),
        )
    }

    fn generate_standard_template(&self) -> String {
        format!(
            "# pinenv environment descriptor\n\
            \n\
            api: pinenv/v0\n\
            \n\
            # Optional: Human-readable description\n\
            # description: \"My project environment\"\n\
            \n\
            # Package indexes pinned to an exact revision (<location>/<pin>).\n\
            # The first source is the primary one; qualify tools from the others\n\
            # as <source>#<tool>.\n\
            sources:\n  \
            pkgs: {}\n\
            \n\
            # Named environments, usually one per platform\n\
            environments:\n  \
            {}:{}\
            \n\
            # Environment variable operations applied on entry\n\
            # env:\n\
            #   - set: RUST_BACKTRACE\n\
            #     value: \"1\"\n",
            self.source,
            self.environment_name(),
            self.tools_list(),
        )
    }

    fn generate_full_template(&self) -> String {
        format!(
            "# pinenv environment descriptor\n\
            # Full example with all fields documented\n\
            \n\
            api: pinenv/v0\n\
            \n\
            description: \"Full example environment\"\n\
            \n\
            sources:\n  \
            pkgs: {}\n\
            #  unstable: github:NixOS/nixpkgs/nixos-unstable\n\
            \n\
            environments:\n  \
            {}:{}\
            #  aarch64-darwin:\n\
            #    - rustc\n\
            #    - unstable#cargo-edit\n\
            \n\
            env:\n  \
            - comment: Applied in order after the tools are on PATH\n\
            #  - set: RUST_BACKTRACE\n\
            #    value: \"1\"\n\
            #  - prepend: PATH\n\
            #    value: ./scripts\n\
            #  - append: MANPATH\n\
            #    value: /usr/share/man\n\
            #    separator: \":\"\n",
            self.source,
            self.environment_name(),
            self.tools_list(),
        )
    }
}
