//! Catalog of distributions and the version list of the current selection.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::domain::{DistroId, DistroVersion, Distribution};

use crate::gateway::{CommandGateway, GatewayError};

/// Immutable result of one full catalog fetch.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    distributions: Arc<[Distribution]>,
    fetched_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    pub fn new(distributions: Vec<Distribution>) -> Self {
        Self {
            distributions: distributions.into(),
            fetched_at: Utc::now(),
        }
    }

    pub fn distributions(&self) -> &[Distribution] {
        &self.distributions
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn get(&self, id: &DistroId) -> Option<&Distribution> {
        self.distributions.iter().find(|distro| &distro.id == id)
    }

    pub fn len(&self) -> usize {
        self.distributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distributions.is_empty()
    }
}

/// Versions together with the identifier whose fetch produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionList {
    pub distro_id: DistroId,
    pub versions: Vec<DistroVersion>,
}

impl VersionList {
    pub fn new(distro_id: DistroId, versions: Vec<DistroVersion>) -> Self {
        Self {
            distro_id,
            versions,
        }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.versions.iter().any(|version| version.version == label)
    }
}

#[derive(Debug, Default)]
pub struct CatalogStore {
    snapshot: Option<CatalogSnapshot>,
    versions: Option<VersionList>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole catalog. Never merges with the previous snapshot.
    pub fn replace_all(&mut self, distributions: Vec<Distribution>) -> &CatalogSnapshot {
        self.snapshot.insert(CatalogSnapshot::new(distributions))
    }

    pub fn snapshot(&self) -> Option<&CatalogSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn distributions(&self) -> &[Distribution] {
        self.snapshot
            .as_ref()
            .map(CatalogSnapshot::distributions)
            .unwrap_or_default()
    }

    pub fn get(&self, id: &DistroId) -> Option<&Distribution> {
        self.snapshot.as_ref().and_then(|snapshot| snapshot.get(id))
    }

    pub fn filtered(&self, query: &str) -> Vec<&Distribution> {
        filter(self.distributions(), query)
    }

    pub fn versions(&self) -> Option<&VersionList> {
        self.versions.as_ref()
    }

    pub(crate) fn set_versions(&mut self, list: VersionList) {
        self.versions = Some(list);
    }

    pub(crate) fn clear_versions(&mut self) {
        self.versions = None;
    }
}

/// Case-insensitive substring match on name or identifier. Keeps catalog order.
pub fn filter<'a>(distributions: &'a [Distribution], query: &str) -> Vec<&'a Distribution> {
    let needle = query.to_lowercase();
    if needle.is_empty() {
        return distributions.iter().collect();
    }
    distributions
        .iter()
        .filter(|distro| {
            distro.name.to_lowercase().contains(&needle)
                || distro.id.as_str().to_lowercase().contains(&needle)
        })
        .collect()
}

pub async fn load_all(gateway: &CommandGateway) -> Result<Vec<Distribution>, GatewayError> {
    gateway.list_distributions().await
}

pub async fn load_versions(
    gateway: &CommandGateway,
    distro_id: DistroId,
) -> Result<VersionList, GatewayError> {
    let versions = gateway.list_versions(&distro_id).await?;
    Ok(VersionList::new(distro_id, versions))
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;
