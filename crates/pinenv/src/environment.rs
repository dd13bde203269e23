// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Environment variable operations for the `env:` section of pinenv.yaml.

use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "./environment_test.rs"]
mod environment_test;

/// Separator used by prepend/append when none is given.
pub const DEFAULT_SEPARATOR: &str = ":";

/// A single environment variable operation.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EnvOp {
    Set(SetEnv),
    Prepend(PrependEnv),
    Append(AppendEnv),
    Comment(CommentEnv),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SetEnv {
    pub set: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PrependEnv {
    pub prepend: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AppendEnv {
    pub append: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CommentEnv {
    pub comment: String,
}

impl EnvOp {
    /// Name of the variable this operation touches, if any.
    pub fn variable(&self) -> Option<&str> {
        match self {
            Self::Set(s) => Some(&s.set),
            Self::Prepend(p) => Some(&p.prepend),
            Self::Append(a) => Some(&a.append),
            Self::Comment(_) => None,
        }
    }

    /// Compute the new value of the variable given its current value.
    ///
    /// Returns `None` for operations that do not change any variable.
    pub fn apply(&self, current: Option<&str>) -> Option<String> {
        match self {
            Self::Set(s) => Some(s.value.clone()),
            Self::Prepend(p) => {
                let sep = p.separator.as_deref().unwrap_or(DEFAULT_SEPARATOR);
                Some(match current {
                    Some(cur) if !cur.is_empty() => format!("{}{sep}{cur}", p.value),
                    _ => p.value.clone(),
                })
            }
            Self::Append(a) => {
                let sep = a.separator.as_deref().unwrap_or(DEFAULT_SEPARATOR);
                Some(match current {
                    Some(cur) if !cur.is_empty() => format!("{cur}{sep}{}", a.value),
                    _ => a.value.clone(),
                })
            }
            Self::Comment(_) => None,
        }
    }
}

/// Whether `name` can be used as a shell variable name,
/// `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Render operations as a POSIX shell startup script.
///
/// Operations on names that are not valid shell variables are left out.
pub fn generate_startup_script(ops: &[EnvOp]) -> String {
    let mut script = String::new();

    for op in ops {
        if let Some(var) = op.variable() {
            if !is_valid_variable_name(var) {
                tracing::warn!(variable = var, "skipping invalid variable name");
                continue;
            }
        }
        match op {
            EnvOp::Comment(c) => {
                for line in c.comment.lines() {
                    script.push_str(&format!("# {line}\n"));
                }
            }
            EnvOp::Set(s) => {
                script.push_str(&format!("export {}=\"{}\"\n", s.set, escape(&s.value)));
            }
            EnvOp::Prepend(p) => {
                let sep = p.separator.as_deref().unwrap_or(DEFAULT_SEPARATOR);
                script.push_str(&format!(
                    "export {var}=\"{value}${{{var}:+{sep}${{{var}}}}}\"\n",
                    var = p.prepend,
                    value = escape(&p.value),
                    sep = escape(sep),
                ));
            }
            EnvOp::Append(a) => {
                let sep = a.separator.as_deref().unwrap_or(DEFAULT_SEPARATOR);
                script.push_str(&format!(
                    "export {var}=\"${{{var}:+${{{var}}}{sep}}}{value}\"\n",
                    var = a.append,
                    value = escape(&a.value),
                    sep = escape(sep),
                ));
            }
        }
    }

    script
}

/// Escape a value for use inside double quotes.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
