use std::sync::Arc;

use anyhow::{bail, Context, Result};
use client_core::{
    catalog, filter, CommandGateway, ErrorNotice, GatewayError, HttpCommandTransport,
    NoticeContext, ProgressOutcome, ProgressSource, Session, SessionConfig, Update,
    WebSocketProgressSource,
};
use shared::{
    domain::{BackendKind, DistroId},
    protocol::{InstallKey, InstallProgressEvent},
};
use tokio::signal;
use tracing::{info, warn};

use crate::config::Settings;

fn gateway(settings: &Settings) -> Result<CommandGateway> {
    let transport = HttpCommandTransport::new(&settings.backend_url, settings.command_timeout())
        .context("failed to set up the command transport")?;
    Ok(CommandGateway::new(Arc::new(transport)))
}

fn progress_source(settings: &Settings) -> Result<Arc<dyn ProgressSource>> {
    let source = WebSocketProgressSource::new(&settings.backend_url)
        .context("failed to set up the progress channel")?;
    Ok(Arc::new(source))
}

/// Wraps a gateway failure so the user-facing notice is the top-level message.
fn explain(context: NoticeContext) -> impl FnOnce(GatewayError) -> anyhow::Error {
    move |err| {
        let notice = ErrorNotice::from_gateway(context, &err);
        anyhow::Error::new(err).context(notice)
    }
}

async fn start_session(settings: &Settings) -> Result<Session> {
    let config = SessionConfig {
        progress_channel: settings.progress_channel.clone(),
        clear_active_on_terminal: settings.clear_active_on_terminal,
    };
    Session::start(gateway(settings)?, progress_source(settings)?, config)
        .await
        .map_err(explain(NoticeContext::Subscribe))
}

async fn next_update(session: &mut Session) -> Result<Update> {
    session.next_update().await.context("session inbox closed")
}

pub fn describe_progress(event: &InstallProgressEvent) -> String {
    let key = event.key();
    match (event.total, event.ratio()) {
        (Some(total), Some(ratio)) => format!(
            "{key}  {}  {}/{total} bytes ({:.0}%)",
            event.phase,
            event.downloaded,
            ratio * 100.0
        ),
        _ if event.downloaded > 0 => format!("{key}  {}  {} bytes", event.phase, event.downloaded),
        _ => format!("{key}  {}", event.phase),
    }
}

pub async fn distros(settings: &Settings, query: &str) -> Result<()> {
    let gateway = gateway(settings)?;
    let all = catalog::load_all(&gateway)
        .await
        .map_err(explain(NoticeContext::LoadCatalog))?;

    let shown = filter(&all, query);
    if shown.is_empty() {
        println!("no distributions match '{query}'");
        return Ok(());
    }
    for distro in shown {
        let backends = distro
            .backends
            .iter()
            .map(|backend| backend.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        println!("{:<24} {:<32} [{backends}]", distro.id.as_str(), distro.name);
    }
    Ok(())
}

pub async fn versions(settings: &Settings, distro_id: DistroId) -> Result<()> {
    let gateway = gateway(settings)?;
    let list = catalog::load_versions(&gateway, distro_id)
        .await
        .map_err(explain(NoticeContext::LoadVersions))?;

    if list.versions.is_empty() {
        println!("{} has no installable versions", list.distro_id);
    }
    for version in &list.versions {
        println!("{version}");
    }
    Ok(())
}

pub async fn install(
    settings: &Settings,
    distro_id: DistroId,
    version: &str,
    backend: BackendKind,
    no_wait: bool,
) -> Result<()> {
    let mut session = start_session(settings).await?;
    wait_for_catalog(&mut session).await?;
    session.select(&distro_id)?;
    wait_for_versions(&mut session, &distro_id).await?;

    let key = session
        .install(&distro_id, version, backend)
        .await
        .map_err(explain(NoticeContext::Install))?;
    println!("install of {key} accepted by the backend");
    if no_wait {
        session.shutdown();
        return Ok(());
    }

    let finished = follow_install(&mut session, &key).await;
    session.shutdown();
    finished
}

async fn wait_for_catalog(session: &mut Session) -> Result<()> {
    loop {
        match next_update(session).await? {
            Update::CatalogReplaced { count, .. } => {
                info!(count, "catalog loaded");
                return Ok(());
            }
            Update::CatalogFailed(notice) | Update::ChannelLost { notice, .. } => {
                bail!("{notice}")
            }
            _ => {}
        }
    }
}

async fn wait_for_versions(session: &mut Session, distro_id: &DistroId) -> Result<()> {
    loop {
        match next_update(session).await? {
            Update::VersionsApplied { distro_id: loaded, .. } if &loaded == distro_id => {
                return Ok(())
            }
            Update::VersionsFailed { notice, .. } | Update::ChannelLost { notice, .. } => {
                bail!("{notice}")
            }
            _ => {}
        }
    }
}

async fn follow_install(session: &mut Session, key: &InstallKey) -> Result<()> {
    loop {
        let update = tokio::select! {
            update = session.next_update() => update.context("session inbox closed")?,
            _ = signal::ctrl_c() => {
                println!("stopped following {key}; the install continues in the backend");
                return Ok(());
            }
        };
        let (event_key, outcome) = match update {
            Update::Progress { key, outcome } => (key, outcome),
            Update::ChannelLost { notice, .. } => {
                bail!("{notice}; {key} is no longer being tracked")
            }
            _ => continue,
        };
        if let Some(active) = session.state().installs().active() {
            println!("{}", describe_progress(&active.event));
        }
        if &event_key != key {
            continue;
        }
        if let ProgressOutcome::Finished { succeeded } = outcome {
            if succeeded {
                println!("{key} installed");
                return Ok(());
            }
            bail!("install of {key} failed");
        }
    }
}

pub async fn watch(settings: &Settings) -> Result<()> {
    let mut session = start_session(settings).await?;
    println!("watching {} (ctrl-c to stop)", settings.progress_channel);

    loop {
        let update = tokio::select! {
            update = session.next_update() => update.context("session inbox closed")?,
            _ = signal::ctrl_c() => break,
        };
        match update {
            Update::Progress { .. } => {
                if let Some(active) = session.state().installs().active() {
                    println!("{}", describe_progress(&active.event));
                }
            }
            Update::CatalogFailed(notice) => warn!(%notice, "catalog unavailable"),
            Update::ChannelLost { notice, .. } => bail!("{notice}"),
            _ => {}
        }
    }

    session.shutdown();
    Ok(())
}

pub async fn settings(settings: &Settings) -> Result<()> {
    gateway(settings)?
        .open_settings()
        .await
        .map_err(explain(NoticeContext::OpenSettings))?;
    println!("asked the backend to open its settings");
    Ok(())
}

pub async fn doctor(settings: &Settings) -> Result<()> {
    let gateway = gateway(settings)?;
    let source = progress_source(settings)?;
    let mut healthy = true;

    match gateway.list_distributions().await {
        Ok(catalog) => println!(
            "ok    commands  {} ({} distributions)",
            settings.backend_url,
            catalog.len()
        ),
        Err(err) => {
            healthy = false;
            println!(
                "fail  commands  {}",
                ErrorNotice::from_gateway(NoticeContext::LoadCatalog, &err)
            );
        }
    }
    match source.open(&settings.progress_channel).await {
        Ok(_) => println!("ok    events    channel '{}'", settings.progress_channel),
        Err(err) => {
            healthy = false;
            println!(
                "fail  events    {}",
                ErrorNotice::from_gateway(NoticeContext::Subscribe, &err)
            );
        }
    }

    if !healthy {
        bail!("installer backend at {} is not fully reachable", settings.backend_url);
    }
    Ok(())
}
