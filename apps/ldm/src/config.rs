use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use serde::Deserialize;
use shared::protocol::INSTALL_PROGRESS_CHANNEL;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "ldm.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend_url: String,
    pub progress_channel: String,
    pub command_timeout_secs: u64,
    pub log_filter: String,
    pub clear_active_on_terminal: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:7878".into(),
            progress_channel: INSTALL_PROGRESS_CHANNEL.into(),
            command_timeout_secs: 30,
            log_filter: "info".into(),
            clear_active_on_terminal: false,
        }
    }
}

/// Keys accepted in `ldm.toml`; anything absent keeps its default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    backend_url: Option<String>,
    progress_channel: Option<String>,
    command_timeout_secs: Option<u64>,
    log_filter: Option<String>,
    clear_active_on_terminal: Option<bool>,
}

impl Settings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    fn apply_file(&mut self, raw: &str) -> anyhow::Result<()> {
        let file: FileSettings = toml::from_str(raw)?;
        if let Some(v) = file.backend_url {
            self.backend_url = v;
        }
        if let Some(v) = file.progress_channel {
            self.progress_channel = v;
        }
        if let Some(v) = file.command_timeout_secs {
            self.command_timeout_secs = v;
        }
        if let Some(v) = file.log_filter {
            self.log_filter = v;
        }
        if let Some(v) = file.clear_active_on_terminal {
            self.clear_active_on_terminal = v;
        }
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("LDM_BACKEND_URL") {
            self.backend_url = v;
        }
        if let Some(v) = var("APP__BACKEND_URL") {
            self.backend_url = v;
        }
        if let Some(v) = var("APP__PROGRESS_CHANNEL") {
            self.progress_channel = v;
        }
        if let Some(v) = var("APP__COMMAND_TIMEOUT_SECS") {
            if let Ok(parsed) = v.trim().parse::<u64>() {
                self.command_timeout_secs = parsed;
            }
        }
        if let Some(v) = var("APP__LOG_FILTER") {
            self.log_filter = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let url = Url::parse(self.backend_url.trim())
            .with_context(|| format!("invalid backend_url '{}'", self.backend_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!(
                "backend_url must use http or https, got '{}'",
                self.backend_url
            );
        }
        if self.progress_channel.trim().is_empty() {
            bail!("progress_channel must not be empty");
        }
        if self.command_timeout_secs == 0 {
            bail!("command_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

/// Defaults, then the config file, then the environment. An explicit path
/// must exist; the default `ldm.toml` is optional.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    load_settings_with(config_path, |key| std::env::var(key).ok())
}

fn load_settings_with(
    config_path: Option<&Path>,
    var: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let (path, required) = match config_path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    match fs::read_to_string(&path) {
        Ok(raw) => settings
            .apply_file(&raw)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?,
        Err(err) if required => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
        Err(_) => {}
    }

    settings.apply_env(var);
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
