//! Orchestration session: owns the state, the inbox and the progress subscription.

use std::sync::Arc;

use shared::{
    domain::{BackendKind, DistroId},
    protocol::{InstallKey, InstallRequest, INSTALL_PROGRESS_CHANNEL},
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    catalog,
    error::SessionError,
    gateway::{CommandGateway, GatewayError},
    install::InstallOrchestrator,
    notice::{ErrorNotice, NoticeContext},
    selection::SelectionChange,
    state::{Inbound, SessionState, SessionView, Update},
    subscription::{ProgressSource, SubscriptionHandle, SubscriptionManager},
};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub progress_channel: String,
    pub clear_active_on_terminal: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            progress_channel: INSTALL_PROGRESS_CHANNEL.to_string(),
            clear_active_on_terminal: false,
        }
    }
}

pub struct Session {
    gateway: CommandGateway,
    orchestrator: InstallOrchestrator,
    subscriptions: SubscriptionManager,
    subscription: SubscriptionHandle,
    state: SessionState,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: mpsc::UnboundedReceiver<Inbound>,
}

impl Session {
    /// Subscribes to the progress channel and issues the initial catalog load.
    pub async fn start(
        gateway: CommandGateway,
        source: Arc<dyn ProgressSource>,
        config: SessionConfig,
    ) -> Result<Self, GatewayError> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let subscriptions = SubscriptionManager::new(source, config.progress_channel.clone());
        let progress_tx = inbox_tx.clone();
        let closed_tx = inbox_tx.clone();
        let subscription = subscriptions
            .subscribe_until_closed(
                move |event| {
                    let _ = progress_tx.send(Inbound::Progress(event));
                },
                move |err| {
                    let _ = closed_tx.send(Inbound::ChannelClosed(err));
                },
            )
            .await?;

        let session = Self {
            orchestrator: InstallOrchestrator::new(gateway.clone()),
            gateway,
            subscriptions,
            subscription,
            state: SessionState::new(config.clear_active_on_terminal),
            inbox_tx,
            inbox_rx,
        };
        session.refresh();
        info!(channel = %config.progress_channel, "orchestration session started");
        Ok(session)
    }

    /// Reloads the full catalog; the result arrives through the inbox.
    pub fn refresh(&self) {
        let gateway = self.gateway.clone();
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let result = catalog::load_all(&gateway).await;
            let _ = inbox.send(Inbound::CatalogLoaded(result));
        });
    }

    pub fn select(&mut self, distro_id: &DistroId) -> Result<(), SessionError> {
        if let SelectionChange::Selected { fetch } = self.state.select(distro_id)? {
            self.spawn_version_fetch(fetch);
        }
        Ok(())
    }

    pub fn deselect(&mut self) {
        self.state.deselect();
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.state.set_query(query);
    }

    fn spawn_version_fetch(&self, distro_id: DistroId) {
        let gateway = self.gateway.clone();
        let inbox = self.inbox_tx.clone();
        debug!(distro_id = %distro_id, "fetching versions");
        tokio::spawn(async move {
            let result = catalog::load_versions(&gateway, distro_id.clone())
                .await
                .map(|list| list.versions);
            let _ = inbox.send(Inbound::VersionsLoaded { distro_id, result });
        });
    }

    /// Returns once the backend accepted or refused; progress follows on the
    /// event channel.
    pub async fn install(
        &mut self,
        distro_id: &DistroId,
        version: &str,
        backend: BackendKind,
    ) -> Result<InstallKey, GatewayError> {
        let request = InstallRequest {
            distro_id: distro_id.clone(),
            version: version.to_string(),
            backend,
        };
        let outcome = self
            .orchestrator
            .install(
                &request,
                self.state.selection().selected(),
                self.state.catalog().versions(),
            )
            .await;
        match outcome {
            Ok(()) => {
                let key = request.key();
                self.state.record_install_accepted(key.clone());
                Ok(key)
            }
            Err(err) => {
                self.state
                    .record_error(ErrorNotice::from_gateway(NoticeContext::Install, &err));
                Err(err)
            }
        }
    }

    pub async fn open_settings(&self) -> Result<(), GatewayError> {
        self.gateway.open_settings().await
    }

    /// Waits for the next inbox message and folds it into the state.
    pub async fn next_update(&mut self) -> Option<Update> {
        let inbound = self.inbox_rx.recv().await?;
        Some(self.state.apply(inbound))
    }

    /// Folds every message that is already queued, without waiting.
    pub fn drain(&mut self) -> Vec<Update> {
        let mut updates = Vec::new();
        while let Ok(inbound) = self.inbox_rx.try_recv() {
            updates.push(self.state.apply(inbound));
        }
        updates
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn view(&self) -> SessionView {
        self.state.view()
    }

    /// False once the session unsubscribed or the progress channel was lost.
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_active()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.active_subscriptions()
    }

    pub fn shutdown(self) {
        self.subscription.unsubscribe();
        info!(channel = %self.subscriptions.channel(), "orchestration session shut down");
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
