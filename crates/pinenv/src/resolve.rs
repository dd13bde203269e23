// Copyright (c) Contributors to the pinenv project.
// SPDX-License-Identifier: Apache-2.0

//! Resolution of an environment request into exposed artifacts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::catalog::{Artifact, Catalog, CatalogFetcher};
use crate::descriptor::{Descriptor, EnvironmentRequest};
use crate::Error;

#[cfg(test)]
#[path = "./resolve_test.rs"]
mod resolve_test;

/// Maximum number of name suggestions attached to an unknown tool.
const MAX_SUGGESTIONS: usize = 5;

/// Catalogs fetched for a resolution, keyed by source name.
pub type CatalogSet = IndexMap<String, Box<dyn Catalog>>;

/// One requested tool and the artifact that provides it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTool {
    /// Source the tool was looked up in.
    pub source: String,
    pub artifact: Artifact,
    /// Executable the tool maps to.
    pub entry_point: PathBuf,
}

/// The complete set of artifacts exposed for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedEnvironment {
    pub name: String,

    /// Requested tools, keyed by identifier as written, in request order.
    pub tools: IndexMap<String, ResolvedTool>,

    /// Tools and their transitive runtime dependencies, unique by artifact
    /// identity and ordered by it, independent of request order.
    pub artifacts: Vec<Artifact>,

    /// Directories to expose on the execution search path, in artifact
    /// order.
    pub search_path: Vec<PathBuf>,
}

impl ResolvedEnvironment {
    /// Identities of every exposed artifact.
    pub fn artifact_ids(&self) -> BTreeSet<&str> {
        self.artifacts.iter().map(|a| a.id.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Resolve a named environment of `descriptor`, fetching each source it
/// uses exactly once.
pub async fn resolve(
    descriptor: &Descriptor,
    environment: &str,
    fetcher: &dyn CatalogFetcher,
) -> crate::Result<ResolvedEnvironment> {
    let request = descriptor.environment(environment)?;
    let catalogs = fetch_catalogs(descriptor, request.source_names(), fetcher).await?;
    resolve_request(request, &catalogs)
}

/// Fetch the catalogs of the named sources of `descriptor`.
pub async fn fetch_catalogs<'a, I>(
    descriptor: &Descriptor,
    names: I,
    fetcher: &dyn CatalogFetcher,
) -> crate::Result<CatalogSet>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut catalogs = CatalogSet::new();
    for name in names {
        if catalogs.contains_key(name) {
            continue;
        }
        let reference = descriptor
            .sources
            .get(name)
            .ok_or_else(|| Error::malformed("sources", format!("undeclared source '{name}'")))?;
        tracing::debug!(source = name, %reference, "dereferencing source");
        let catalog = fetcher.fetch_catalog(reference).await?;
        catalogs.insert(name.to_string(), catalog);
    }
    Ok(catalogs)
}

/// Resolve `request` against already fetched catalogs.
///
/// Pure: the same request and catalogs always produce the same environment.
pub fn resolve_request(
    request: &EnvironmentRequest,
    catalogs: &CatalogSet,
) -> crate::Result<ResolvedEnvironment> {
    let mut tools = IndexMap::with_capacity(request.tools.len());
    let mut exposed: BTreeMap<String, Artifact> = BTreeMap::new();

    for tool in &request.tools {
        let catalog = catalogs.get(&tool.source).ok_or_else(|| {
            Error::malformed(
                format!("environments.{}", request.name),
                format!("no catalog for source '{}'", tool.source),
            )
        })?;

        let artifact = catalog
            .lookup(&tool.name)
            .ok_or_else(|| Error::UnknownTool {
                name: tool.name.clone(),
                source_name: tool.source.clone(),
                similar: similar_names(&**catalog, &tool.name),
            })?;

        for dep in catalog.transitive_runtime_deps(&artifact)? {
            exposed.entry(dep.id.clone()).or_insert(dep);
        }

        exposed
            .entry(artifact.id.clone())
            .or_insert_with(|| artifact.clone());
        tools.insert(
            tool.to_string(),
            ResolvedTool {
                source: tool.source.clone(),
                entry_point: artifact.entry_point(),
                artifact,
            },
        );
    }

    let artifacts: Vec<Artifact> = exposed.into_values().collect();
    let search_path: IndexSet<PathBuf> = artifacts.iter().map(Artifact::bin_dir).collect();

    tracing::info!(
        environment = %request.name,
        tools = tools.len(),
        artifacts = artifacts.len(),
        "resolved environment"
    );

    Ok(ResolvedEnvironment {
        name: request.name.clone(),
        tools,
        artifacts,
        search_path: search_path.into_iter().collect(),
    })
}

/// Catalog names that look like `name`, for diagnostics.
fn similar_names(catalog: &dyn Catalog, name: &str) -> Vec<String> {
    let wanted = name.to_lowercase();
    catalog
        .names()
        .into_iter()
        .filter(|candidate| {
            let candidate = candidate.to_lowercase();
            candidate.contains(&wanted)
                || (candidate.len() >= 3 && wanted.contains(&candidate))
                || common_prefix_len(&candidate, &wanted) >= 3
        })
        .take(MAX_SUGGESTIONS)
        .map(String::from)
        .collect()
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}
