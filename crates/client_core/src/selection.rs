//! Current distribution selection and stale version-response suppression.

use shared::domain::{DistroId, Distribution};
use tracing::debug;

use crate::catalog::{CatalogStore, VersionList};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionChange {
    Unchanged,
    /// A new distribution is selected and its versions must be fetched.
    Selected { fetch: DistroId },
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionsOutcome {
    Applied,
    /// The response belongs to a distribution that is no longer selected.
    StaleDiscard,
}

#[derive(Debug, Default)]
pub struct SelectionController {
    selected: Option<Distribution>,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<&Distribution> {
        self.selected.as_ref()
    }

    pub fn selected_id(&self) -> Option<&DistroId> {
        self.selected.as_ref().map(|distro| &distro.id)
    }

    pub fn is_current(&self, distro_id: &DistroId) -> bool {
        self.selected_id() == Some(distro_id)
    }

    /// Switching clears the displayed versions before the new fetch is issued.
    pub fn select(&mut self, distro: Distribution, catalog: &mut CatalogStore) -> SelectionChange {
        if self.is_current(&distro.id) {
            return SelectionChange::Unchanged;
        }
        catalog.clear_versions();
        let fetch = distro.id.clone();
        debug!(distro_id = %fetch, "selection changed");
        self.selected = Some(distro);
        SelectionChange::Selected { fetch }
    }

    pub fn deselect(&mut self, catalog: &mut CatalogStore) -> SelectionChange {
        catalog.clear_versions();
        match self.selected.take() {
            Some(previous) => {
                debug!(distro_id = %previous.id, "selection cleared");
                SelectionChange::Cleared
            }
            None => SelectionChange::Unchanged,
        }
    }

    pub fn accept_versions(&self, list: VersionList, catalog: &mut CatalogStore) -> VersionsOutcome {
        if !self.is_current(&list.distro_id) {
            debug!(
                distro_id = %list.distro_id,
                selected = ?self.selected_id().map(DistroId::as_str),
                "discarding stale version list"
            );
            return VersionsOutcome::StaleDiscard;
        }
        catalog.set_versions(list);
        VersionsOutcome::Applied
    }

    /// Rebinds the selection to a refreshed catalog. Returns `true` when the
    /// selected distribution disappeared and the selection was cleared.
    pub fn rebind(&mut self, catalog: &mut CatalogStore) -> bool {
        let Some(current) = self.selected.as_ref() else {
            return false;
        };
        match catalog.get(&current.id).cloned() {
            Some(refreshed) => {
                self.selected = Some(refreshed);
                false
            }
            None => {
                debug!(distro_id = %current.id, "selected distribution left the catalog");
                self.deselect(catalog);
                true
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/selection_tests.rs"]
mod tests;
