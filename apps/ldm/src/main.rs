mod commands;
mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use shared::domain::BackendKind;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ldm", version, about = "Browse and install Linux distributions through the installer backend")]
struct Args {
    /// Config file (defaults to ./ldm.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    backend_url: Option<String>,
    #[arg(long, global = true)]
    progress_channel: Option<String>,
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// List available distributions.
    Distros {
        #[arg(long, short, default_value = "")]
        query: String,
    },
    /// List installable versions of one distribution.
    Versions { distro_id: String },
    /// Install a version and follow its progress.
    Install {
        distro_id: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        backend: BackendKind,
        /// Return once the backend accepted the request.
        #[arg(long)]
        no_wait: bool,
    },
    /// Print install progress events until interrupted.
    Watch,
    /// Ask the backend to open its settings.
    Settings,
    /// Check that commands and progress events reach the backend.
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = config::load_settings(args.config.as_deref())?;
    if let Some(v) = args.backend_url {
        settings.backend_url = v;
    }
    if let Some(v) = args.progress_channel {
        settings.progress_channel = v;
    }
    if let Some(v) = args.timeout_secs {
        settings.command_timeout_secs = v;
    }
    settings.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::debug!(backend_url = %settings.backend_url, "settings loaded");

    match args.command {
        Command::Distros { query } => commands::distros(&settings, &query).await,
        Command::Versions { distro_id } => commands::versions(&settings, distro_id.into()).await,
        Command::Install {
            distro_id,
            version,
            backend,
            no_wait,
        } => commands::install(&settings, distro_id.into(), &version, backend, no_wait).await,
        Command::Watch => commands::watch(&settings).await,
        Command::Settings => commands::settings(&settings).await,
        Command::Doctor => commands::doctor(&settings).await,
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
