use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{BackendKind, DistroId};

/// Name of the push channel carrying [`InstallProgressEvent`] records.
pub const INSTALL_PROGRESS_CHANNEL: &str = "install-progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    ListDistros,
    ListVersions,
    Install,
    OpenSettings,
}

impl CommandName {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::ListDistros => "cmd_list_distros",
            CommandName::ListVersions => "cmd_versions",
            CommandName::Install => "cmd_install",
            CommandName::OpenSettings => "cmd_open_settings",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVersionsRequest {
    pub distro_id: DistroId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    pub distro_id: DistroId,
    pub version: String,
    pub backend: BackendKind,
}

impl InstallRequest {
    pub fn key(&self) -> InstallKey {
        InstallKey {
            distro_id: self.distro_id.clone(),
            version: self.version.clone(),
        }
    }
}

/// Backend-defined lifecycle stage. Only the terminal labels carry meaning
/// here; every other label is displayed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallPhase(pub String);

impl InstallPhase {
    pub const DOWNLOAD: &'static str = "download";
    pub const IMPORT: &'static str = "import";
    pub const DONE: &'static str = "done";
    pub const FAILED: &'static str = "failed";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_terminal(&self) -> bool {
        self.is_success() || self.is_failure()
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.0.to_ascii_lowercase().as_str(),
            "done" | "complete" | "completed"
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.0.to_ascii_lowercase().as_str(), "failed" | "error")
    }
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstallPhase {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstallKey {
    pub distro_id: DistroId,
    pub version: String,
}

impl fmt::Display for InstallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.distro_id, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallProgressEvent {
    pub distro_id: DistroId,
    pub version: String,
    pub phase: InstallPhase,
    #[serde(default)]
    pub downloaded: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl InstallProgressEvent {
    pub fn key(&self) -> InstallKey {
        InstallKey {
            distro_id: self.distro_id.clone(),
            version: self.version.clone(),
        }
    }

    pub fn matches(&self, key: &InstallKey) -> bool {
        self.distro_id == key.distro_id && self.version == key.version
    }

    /// Completion ratio in `0.0..=1.0`, or `None` when the size is unknown.
    pub fn ratio(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.downloaded as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}
