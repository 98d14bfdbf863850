//! Session state and the one update function every asynchronous result goes through.

use shared::{
    domain::{DistroId, DistroVersion, Distribution},
    protocol::{InstallKey, InstallProgressEvent},
};
use tracing::{debug, info, warn};

use crate::{
    catalog::{CatalogStore, VersionList},
    error::SessionError,
    gateway::GatewayError,
    install::{ActiveInstall, InstallProjection, ProgressOutcome},
    notice::{ErrorNotice, NoticeContext},
    selection::{SelectionChange, SelectionController, VersionsOutcome},
};

/// Messages arriving from the command gateway and the progress channel.
#[derive(Debug, Clone)]
pub enum Inbound {
    CatalogLoaded(Result<Vec<Distribution>, GatewayError>),
    VersionsLoaded {
        distro_id: DistroId,
        result: Result<Vec<DistroVersion>, GatewayError>,
    },
    Progress(InstallProgressEvent),
    /// The progress channel failed or was closed by the backend.
    ChannelClosed(GatewayError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    CatalogReplaced {
        count: usize,
        selection_cleared: bool,
    },
    CatalogFailed(ErrorNotice),
    VersionsApplied {
        distro_id: DistroId,
        count: usize,
    },
    VersionsDiscarded {
        distro_id: DistroId,
    },
    VersionsFailed {
        distro_id: DistroId,
        notice: ErrorNotice,
    },
    Progress {
        key: InstallKey,
        outcome: ProgressOutcome,
    },
    ChannelLost {
        notice: ErrorNotice,
        abandoned: usize,
    },
}

/// Owned snapshot of everything a view layer renders.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub query: String,
    pub catalog_loaded: bool,
    pub distributions: Vec<Distribution>,
    pub selected: Option<Distribution>,
    pub versions: Vec<DistroVersion>,
    pub active_install: Option<ActiveInstall>,
    pub in_flight: Vec<InstallKey>,
    pub last_error: Option<ErrorNotice>,
}

#[derive(Debug, Default)]
pub struct SessionState {
    catalog: CatalogStore,
    selection: SelectionController,
    installs: InstallProjection,
    query: String,
    last_error: Option<ErrorNotice>,
}

impl SessionState {
    pub fn new(clear_active_on_terminal: bool) -> Self {
        Self {
            installs: InstallProjection::new(clear_active_on_terminal),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, inbound: Inbound) -> Update {
        match inbound {
            Inbound::CatalogLoaded(Ok(distributions)) => {
                let count = self.catalog.replace_all(distributions).len();
                let selection_cleared = self.selection.rebind(&mut self.catalog);
                self.clear_error_for(NoticeContext::LoadCatalog);
                info!(count, selection_cleared, "distribution catalog replaced");
                Update::CatalogReplaced {
                    count,
                    selection_cleared,
                }
            }
            Inbound::CatalogLoaded(Err(err)) => {
                warn!(error = %err, "failed to load distribution catalog");
                let notice = ErrorNotice::from_gateway(NoticeContext::LoadCatalog, &err);
                self.last_error = Some(notice.clone());
                Update::CatalogFailed(notice)
            }
            Inbound::VersionsLoaded { distro_id, result } => self.apply_versions(distro_id, result),
            Inbound::Progress(event) => {
                let key = event.key();
                let outcome = self.installs.apply(event);
                Update::Progress { key, outcome }
            }
            Inbound::ChannelClosed(err) => {
                let notice = ErrorNotice::from_gateway(NoticeContext::Subscribe, &err);
                let abandoned = self.installs.abandon_in_flight();
                warn!(error = %err, abandoned, "install progress channel lost");
                self.last_error = Some(notice.clone());
                Update::ChannelLost { notice, abandoned }
            }
        }
    }

    fn apply_versions(
        &mut self,
        distro_id: DistroId,
        result: Result<Vec<DistroVersion>, GatewayError>,
    ) -> Update {
        if !self.selection.is_current(&distro_id) {
            debug!(distro_id = %distro_id, "version response arrived after selection changed");
            return Update::VersionsDiscarded { distro_id };
        }
        match result {
            Ok(versions) => {
                let count = versions.len();
                let list = VersionList::new(distro_id.clone(), versions);
                match self.selection.accept_versions(list, &mut self.catalog) {
                    VersionsOutcome::Applied => {
                        self.clear_error_for(NoticeContext::LoadVersions);
                        Update::VersionsApplied { distro_id, count }
                    }
                    VersionsOutcome::StaleDiscard => Update::VersionsDiscarded { distro_id },
                }
            }
            Err(err) => {
                warn!(distro_id = %distro_id, error = %err, "failed to load versions");
                let notice = ErrorNotice::from_gateway(NoticeContext::LoadVersions, &err);
                self.last_error = Some(notice.clone());
                Update::VersionsFailed { distro_id, notice }
            }
        }
    }

    pub fn select(&mut self, distro_id: &DistroId) -> Result<SelectionChange, SessionError> {
        if !self.catalog.is_loaded() {
            return Err(SessionError::CatalogNotLoaded);
        }
        let distro = self
            .catalog
            .get(distro_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownDistribution(distro_id.clone()))?;
        Ok(self.selection.select(distro, &mut self.catalog))
    }

    pub fn deselect(&mut self) -> SelectionChange {
        self.selection.deselect(&mut self.catalog)
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn selection(&self) -> &SelectionController {
        &self.selection
    }

    pub fn installs(&self) -> &InstallProjection {
        &self.installs
    }

    pub fn record_install_accepted(&mut self, key: InstallKey) {
        self.installs.record_accepted(key);
    }

    pub fn record_error(&mut self, notice: ErrorNotice) {
        self.last_error = Some(notice);
    }

    pub fn filtered(&self) -> Vec<&Distribution> {
        self.catalog.filtered(&self.query)
    }

    /// The version list shown for the current selection; empty while a
    /// fetch is pending or when nothing is selected.
    pub fn displayed_versions(&self) -> &[DistroVersion] {
        match (self.selection.selected_id(), self.catalog.versions()) {
            (Some(selected), Some(list)) if &list.distro_id == selected => &list.versions,
            _ => &[],
        }
    }

    pub fn last_error(&self) -> Option<&ErrorNotice> {
        self.last_error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    fn clear_error_for(&mut self, context: NoticeContext) {
        if self.last_error.as_ref().is_some_and(|notice| notice.context() == context) {
            self.last_error = None;
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            query: self.query.clone(),
            catalog_loaded: self.catalog.is_loaded(),
            distributions: self.filtered().into_iter().cloned().collect(),
            selected: self.selection.selected().cloned(),
            versions: self.displayed_versions().to_vec(),
            active_install: self.installs.active().cloned(),
            in_flight: self.installs.in_flight().cloned().collect(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
