// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Descriptor parsing and data types for pinenv.yaml files.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::environment::{is_valid_variable_name, EnvOp};
use crate::Error;

#[cfg(test)]
#[path = "./descriptor_test.rs"]
mod descriptor_test;

/// Separator between a source name and a tool in a qualified tool identifier.
pub const SOURCE_QUALIFIER: char = '#';

/// API version for descriptor files.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ApiVersion {
    #[default]
    #[serde(rename = "pinenv/v0")]
    V0,
}

/// Helper for two-stage deserialization to determine API version first.
#[derive(Deserialize)]
struct ApiVersionMapping {
    #[serde(default)]
    api: ApiVersion,
}

/// Document shape before validation. Required fields are optional here so
/// that their absence is reported against the field name.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptorV0 {
    #[serde(default)]
    api: ApiVersion,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    sources: Option<IndexMap<String, String>>,
    #[serde(default)]
    environments: Option<IndexMap<String, Vec<String>>>,
    #[serde(default)]
    env: Vec<EnvOp>,
}

/// The revision half of a source reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pin {
    /// A full 40 digit hexadecimal commit id.
    Commit(String),
    /// A branch or tag name.
    Ref(String),
}

impl Pin {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Commit(s) | Self::Ref(s) => s,
        }
    }

    pub fn is_commit(&self) -> bool {
        matches!(self, Self::Commit(_))
    }

    /// Validate a revision identifier, following the branch/tag naming rules
    /// most indexes share.
    pub fn parse(pin: &str) -> std::result::Result<Self, String> {
        if pin.is_empty() {
            return Err("pin must not be empty".to_string());
        }
        if pin == "@" {
            return Err("'@' is not a valid pin".to_string());
        }
        if let Some(c) = pin
            .chars()
            .find(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(*c))
        {
            return Err(format!("pin '{pin}' contains invalid character {c:?}"));
        }
        if pin.contains("..") || pin.contains("@{") {
            return Err(format!("pin '{pin}' contains an invalid sequence"));
        }
        if pin.starts_with('.') || pin.ends_with('.') {
            return Err(format!("pin '{pin}' must not start or end with '.'"));
        }
        if pin.ends_with(".lock") {
            return Err(format!("pin '{pin}' must not end with '.lock'"));
        }

        if pin.len() == 40 && pin.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self::Commit(pin.to_ascii_lowercase()))
        } else {
            Ok(Self::Ref(pin.to_string()))
        }
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pinned pointer to an external package index snapshot.
///
/// Written as `<index-location>/<pin>`, split at the last `/`. Both halves
/// are fixed once parsed. Two references are equal when their locations and
/// pins are, whatever the case of a commit id.
#[derive(Debug, Clone)]
pub struct SourceReference {
    location: String,
    pin: Pin,
    /// The pin exactly as written.
    spelling: String,
}

impl PartialEq for SourceReference {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location && self.pin == other.pin
    }
}

impl Eq for SourceReference {}

impl std::hash::Hash for SourceReference {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.location.hash(state);
        self.pin.hash(state);
    }
}

impl SourceReference {
    pub fn parse(reference: &str) -> std::result::Result<Self, String> {
        let (location, pin) = reference
            .rsplit_once('/')
            .ok_or_else(|| format!("'{reference}' is not of the form <index-location>/<pin>"))?;
        if location.is_empty() {
            return Err(format!("'{reference}' has an empty index location"));
        }
        let spelling = pin.to_string();
        let pin = Pin::parse(pin)?;
        Ok(Self {
            location: location.to_string(),
            pin,
            spelling,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn pin(&self) -> &Pin {
        &self.pin
    }

    /// The pin as written in the descriptor, before commit ids are
    /// lowercased.
    pub fn pin_spelling(&self) -> &str {
        &self.spelling
    }
}

impl FromStr for SourceReference {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).map_err(|reason| Error::malformed("reference", reason))
    }
}

impl fmt::Display for SourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.location, self.pin)
    }
}

impl Serialize for SourceReference {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One tool identifier within an environment request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToolRequest {
    /// Name of the source the tool is looked up in.
    pub source: String,
    /// Name of the tool in that source's catalog.
    pub name: String,
    /// Whether the identifier was written as `<source>#<tool>`.
    pub qualified: bool,
}

impl fmt::Display for ToolRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.qualified {
            write!(f, "{}{SOURCE_QUALIFIER}{}", self.source, self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// A named, ordered request for tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentRequest {
    pub name: String,
    pub tools: Vec<ToolRequest>,
}

impl EnvironmentRequest {
    /// Names of the sources this request needs, in first-use order.
    pub fn source_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for tool in &self.tools {
            if !names.contains(&tool.source.as_str()) {
                names.push(&tool.source);
            }
        }
        names
    }
}

/// Main environment descriptor from a pinenv.yaml file.
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// API version identifier.
    pub api: ApiVersion,

    /// Optional human-readable description.
    pub description: Option<String>,

    /// Pinned package indexes, in declaration order. The first is the
    /// primary source for unqualified tools.
    pub sources: IndexMap<String, SourceReference>,

    /// Environment requests keyed by name.
    pub environments: IndexMap<String, EnvironmentRequest>,

    /// Environment variable operations applied to every session.
    pub env: Vec<EnvOp>,

    /// Path to the file this was loaded from.
    pub source_path: Option<PathBuf>,
}

impl Descriptor {
    /// Parse and validate a descriptor from a YAML string.
    pub fn from_yaml<S: AsRef<str>>(yaml: S) -> crate::Result<Self> {
        let yaml = yaml.as_ref();

        // Stage 1: Parse to get API version
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)
            .map_err(|e| Error::malformed("<document>", e.to_string()))?;
        if !value.is_mapping() {
            return Err(Error::malformed("<document>", "expected a mapping"));
        }

        let with_version: ApiVersionMapping = serde_yaml::from_value(value.clone())
            .map_err(|e| Error::malformed("api", e.to_string()))?;

        // Stage 2: Deserialize based on version
        match with_version.api {
            ApiVersion::V0 => {
                let raw: RawDescriptorV0 = serde_yaml::from_value(value)
                    .map_err(|e| Error::malformed("<document>", e.to_string()))?;
                Self::from_raw_v0(raw)
            }
        }
    }

    fn from_raw_v0(raw: RawDescriptorV0) -> crate::Result<Self> {
        let raw_sources = raw
            .sources
            .ok_or_else(|| Error::malformed("sources", "missing required field"))?;
        if raw_sources.is_empty() {
            return Err(Error::malformed("sources", "at least one source is required"));
        }

        let mut sources = IndexMap::with_capacity(raw_sources.len());
        for (name, reference) in raw_sources {
            if name.is_empty() || name.contains(SOURCE_QUALIFIER) {
                return Err(Error::malformed(
                    format!("sources.{name}"),
                    format!("source names must be non-empty and must not contain '{SOURCE_QUALIFIER}'"),
                ));
            }
            let reference = SourceReference::parse(&reference)
                .map_err(|reason| Error::malformed(format!("sources.{name}"), reason))?;
            sources.insert(name, reference);
        }

        let raw_environments = raw
            .environments
            .ok_or_else(|| Error::malformed("environments", "missing required field"))?;
        if raw_environments.is_empty() {
            return Err(Error::malformed(
                "environments",
                "at least one environment is required",
            ));
        }

        let primary = sources
            .keys()
            .next()
            .cloned()
            .unwrap_or_default();

        let mut environments = IndexMap::with_capacity(raw_environments.len());
        for (name, tools) in raw_environments {
            if name.trim().is_empty() {
                return Err(Error::malformed(
                    "environments",
                    "environment names must be non-empty",
                ));
            }
            let request = parse_request(&name, &tools, &sources, &primary)?;
            environments.insert(name, request);
        }

        for (i, op) in raw.env.iter().enumerate() {
            if let Some(var) = op.variable() {
                if !is_valid_variable_name(var) {
                    return Err(Error::malformed(
                        format!("env[{i}]"),
                        format!("'{var}' is not a valid variable name"),
                    ));
                }
            }
        }

        Ok(Self {
            api: raw.api,
            description: raw.description,
            sources,
            environments,
            env: raw.env,
            source_path: None,
        })
    }

    /// Load descriptor from file path.
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| Error::ReadFailed {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut descriptor = Self::from_yaml(yaml)?;
        descriptor.source_path = Some(path.to_path_buf());
        Ok(descriptor)
    }

    /// Directory relative index locations are resolved against.
    pub fn base_dir(&self) -> Option<&Path> {
        self.source_path.as_deref().and_then(Path::parent)
    }

    /// Name of the source unqualified tools resolve against.
    pub fn primary_source(&self) -> Option<&str> {
        self.sources.keys().next().map(String::as_str)
    }

    /// Look up an environment request by name.
    pub fn environment(&self, name: &str) -> crate::Result<&EnvironmentRequest> {
        self.environments
            .get(name)
            .ok_or_else(|| Error::UnknownEnvironment {
                name: name.to_string(),
                available: self.environments.keys().cloned().collect(),
            })
    }
}

fn parse_request(
    env_name: &str,
    tools: &[String],
    sources: &IndexMap<String, SourceReference>,
    primary: &str,
) -> crate::Result<EnvironmentRequest> {
    let mut seen = HashSet::new();
    let mut parsed = Vec::with_capacity(tools.len());

    for (i, tool) in tools.iter().enumerate() {
        let field = format!("environments.{env_name}[{i}]");
        if tool.is_empty() || tool.chars().any(char::is_whitespace) {
            return Err(Error::malformed(
                field,
                "tool identifiers must be non-empty strings without whitespace",
            ));
        }

        let request = match tool.split_once(SOURCE_QUALIFIER) {
            Some((source, name)) => {
                if !sources.contains_key(source) {
                    return Err(Error::malformed(
                        field,
                        format!("'{tool}' names undeclared source '{source}'"),
                    ));
                }
                if name.is_empty() {
                    return Err(Error::malformed(field, format!("'{tool}' has no tool name")));
                }
                ToolRequest {
                    source: source.to_string(),
                    name: name.to_string(),
                    qualified: true,
                }
            }
            None => ToolRequest {
                source: primary.to_string(),
                name: tool.clone(),
                qualified: false,
            },
        };

        if !seen.insert((request.source.clone(), request.name.clone())) {
            return Err(Error::malformed(field, format!("duplicate tool '{tool}'")));
        }
        parsed.push(request);
    }

    Ok(EnvironmentRequest {
        name: env_name.to_string(),
        tools: parsed,
    })
}
