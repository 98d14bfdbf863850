//! Install requests and the single-slot progress projection.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use shared::{
    domain::Distribution,
    protocol::{InstallKey, InstallProgressEvent, InstallRequest},
};
use tracing::{debug, info};

use crate::{
    catalog::VersionList,
    gateway::{CommandGateway, GatewayError},
};

/// Checks an install against what is currently displayed. Failures are
/// reported as local rejections and nothing is sent to the backend.
pub fn validate_install(
    request: &InstallRequest,
    selected: Option<&Distribution>,
    displayed: Option<&VersionList>,
) -> Result<(), GatewayError> {
    if request.version.trim().is_empty() {
        return Err(GatewayError::rejected_locally(
            "choose a version before installing",
        ));
    }
    let Some(distro) = selected.filter(|distro| distro.id == request.distro_id) else {
        return Err(GatewayError::rejected_locally(format!(
            "distribution `{}` is not selected",
            request.distro_id
        )));
    };
    if !distro.supports(request.backend) {
        return Err(GatewayError::rejected_locally(format!(
            "{} cannot be installed with the {} backend",
            distro.name, request.backend
        )));
    }
    let available = displayed
        .filter(|list| list.distro_id == request.distro_id)
        .is_some_and(|list| list.contains(&request.version));
    if !available {
        return Err(GatewayError::rejected_locally(format!(
            "version `{}` is not available for {}",
            request.version, distro.name
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct InstallOrchestrator {
    gateway: CommandGateway,
}

impl InstallOrchestrator {
    pub fn new(gateway: CommandGateway) -> Self {
        Self { gateway }
    }

    /// Validates, then waits only for the backend's accept/reject answer.
    pub async fn install(
        &self,
        request: &InstallRequest,
        selected: Option<&Distribution>,
        displayed: Option<&VersionList>,
    ) -> Result<(), GatewayError> {
        validate_install(request, selected, displayed)?;
        self.gateway.install(request).await?;
        info!(
            distro_id = %request.distro_id,
            version = %request.version,
            backend = %request.backend,
            "install accepted by backend"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveInstall {
    pub event: InstallProgressEvent,
    pub received_at: DateTime<Utc>,
    /// Whether this session issued the install (vs. only seeing its events).
    pub requested_locally: bool,
}

impl ActiveInstall {
    pub fn key(&self) -> InstallKey {
        self.event.key()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    /// First event, or an event for a different install than the tracked one.
    Started,
    Advanced,
    Finished { succeeded: bool },
}

/// Last-event-wins projection: one slot, replaced by every event.
#[derive(Debug, Default)]
pub struct InstallProjection {
    active: Option<ActiveInstall>,
    in_flight: BTreeSet<InstallKey>,
    requested: BTreeSet<InstallKey>,
    clear_on_terminal: bool,
}

impl InstallProjection {
    pub fn new(clear_on_terminal: bool) -> Self {
        Self {
            clear_on_terminal,
            ..Self::default()
        }
    }

    pub fn active(&self) -> Option<&ActiveInstall> {
        self.active.as_ref()
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &InstallKey> {
        self.in_flight.iter()
    }

    pub fn is_in_flight(&self, key: &InstallKey) -> bool {
        self.in_flight.contains(key)
    }

    pub fn record_accepted(&mut self, key: InstallKey) {
        self.requested.insert(key.clone());
        self.in_flight.insert(key);
    }

    /// Forgets every in-flight install once their progress can no longer
    /// arrive. The last displayed event is kept.
    pub fn abandon_in_flight(&mut self) -> usize {
        let abandoned = self.in_flight.len();
        self.in_flight.clear();
        self.requested.clear();
        if let Some(active) = self.active.as_mut() {
            active.requested_locally = false;
        }
        abandoned
    }

    pub fn apply(&mut self, event: InstallProgressEvent) -> ProgressOutcome {
        let key = event.key();
        let outcome = if event.phase.is_terminal() {
            ProgressOutcome::Finished {
                succeeded: event.phase.is_success(),
            }
        } else {
            match &self.active {
                Some(active) if event.matches(&active.key()) => ProgressOutcome::Advanced,
                Some(active) => {
                    debug!(previous = %active.key(), next = %key, "active install slot replaced");
                    ProgressOutcome::Started
                }
                None => ProgressOutcome::Started,
            }
        };

        let requested_locally = self.requested.contains(&key);
        if let ProgressOutcome::Finished { succeeded } = outcome {
            self.in_flight.remove(&key);
            self.requested.remove(&key);
            info!(install = %key, phase = %event.phase, succeeded, "install reached a terminal phase");
        } else {
            self.in_flight.insert(key);
        }

        if self.clear_on_terminal && matches!(outcome, ProgressOutcome::Finished { .. }) {
            self.active = None;
        } else {
            self.active = Some(ActiveInstall {
                event,
                received_at: Utc::now(),
                requested_locally,
            });
        }
        outcome
    }
}

#[cfg(test)]
#[path = "tests/install_tests.rs"]
mod tests;
