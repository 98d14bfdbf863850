//! Command gateway: the single narrow waist for every outbound backend request.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use shared::{
    domain::{DistroId, DistroVersion, Distribution},
    error::{ApiError, ErrorCode},
    protocol::{CommandName, InstallRequest, ListVersionsRequest},
};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("installer backend unreachable: {0}")]
    Unreachable(String),
    #[error("request rejected ({0})")]
    Rejected(ApiError),
    #[error("malformed response to {command}: {reason}")]
    Malformed {
        command: CommandName,
        reason: String,
    },
}

impl GatewayError {
    /// Rejection raised before anything is sent, mirroring a backend refusal.
    pub fn rejected_locally(message: impl Into<String>) -> Self {
        GatewayError::Rejected(ApiError::validation(message))
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, GatewayError::Unreachable(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, GatewayError::Rejected(_))
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, GatewayError::Malformed { .. })
    }

    pub fn rejection_code(&self) -> Option<ErrorCode> {
        match self {
            GatewayError::Rejected(api) => Some(api.code),
            _ => None,
        }
    }
}

/// Raw command invocation. Implementations perform no retries and give no
/// ordering guarantee between concurrent calls.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn invoke(&self, command: CommandName, payload: Value) -> Result<Value, GatewayError>;
}

#[derive(Clone)]
pub struct CommandGateway {
    transport: Arc<dyn CommandTransport>,
}

impl CommandGateway {
    pub fn new(transport: Arc<dyn CommandTransport>) -> Self {
        Self { transport }
    }

    pub async fn invoke<Req, Res>(&self, command: CommandName, payload: &Req) -> Result<Res, GatewayError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let payload = serde_json::to_value(payload)
            .map_err(|err| malformed(command, format!("failed to encode request: {err}")))?;
        debug!(command = %command, "invoking backend command");
        let raw = self.transport.invoke(command, payload).await?;
        serde_json::from_value(raw).map_err(|err| malformed(command, err.to_string()))
    }

    pub async fn list_distributions(&self) -> Result<Vec<Distribution>, GatewayError> {
        let command = CommandName::ListDistros;
        let distributions: Vec<Distribution> = self.invoke(command, &json!({})).await?;
        validate_distributions(&distributions).map_err(|reason| malformed(command, reason))?;
        Ok(distributions)
    }

    pub async fn list_versions(&self, distro_id: &DistroId) -> Result<Vec<DistroVersion>, GatewayError> {
        let command = CommandName::ListVersions;
        let request = ListVersionsRequest {
            distro_id: distro_id.clone(),
        };
        let versions: Vec<DistroVersion> = self.invoke(command, &request).await?;
        validate_versions(&versions).map_err(|reason| malformed(command, reason))?;
        Ok(versions)
    }

    /// Resolves once the backend accepts or refuses the install; completion
    /// is only ever reported on the progress channel.
    pub async fn install(&self, request: &InstallRequest) -> Result<(), GatewayError> {
        let _ack: Value = self.invoke(CommandName::Install, request).await?;
        Ok(())
    }

    pub async fn open_settings(&self) -> Result<(), GatewayError> {
        let _ack: Value = self.invoke(CommandName::OpenSettings, &json!({})).await?;
        Ok(())
    }
}

fn malformed(command: CommandName, reason: impl Into<String>) -> GatewayError {
    let reason = reason.into();
    error!(command = %command, %reason, "backend response violated the command contract");
    GatewayError::Malformed { command, reason }
}

fn validate_distributions(distributions: &[Distribution]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for distro in distributions {
        if distro.id.as_str().is_empty() {
            return Err("distribution with empty id".to_string());
        }
        if distro.backends.is_empty() {
            return Err(format!("distribution `{}` lists no backends", distro.id));
        }
        if !seen.insert(&distro.id) {
            return Err(format!("duplicate distribution id `{}`", distro.id));
        }
    }
    Ok(())
}

fn validate_versions(versions: &[DistroVersion]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for version in versions {
        if version.version.is_empty() {
            return Err("version with empty label".to_string());
        }
        if !seen.insert(version.version.as_str()) {
            return Err(format!("duplicate version label `{}`", version.version));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
