//! Network transports: HTTP for commands, WebSocket for the progress channel.

use std::time::Duration;

use async_trait::async_trait;
use futures::{future, StreamExt};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use shared::{
    error::{ApiError, ErrorCode},
    protocol::CommandName,
};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

use crate::{
    gateway::{CommandTransport, GatewayError},
    subscription::{FrameStream, ProgressSource},
};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid backend url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("backend url must start with http:// or https://, got `{0}`")]
    UnsupportedScheme(String),
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Parses and normalises a backend base url (no trailing slash).
pub fn parse_backend_url(raw: &str) -> Result<String, TransportError> {
    let url = Url::parse(raw.trim()).map_err(|source| TransportError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url.as_str().trim_end_matches('/').to_string()),
        _ => Err(TransportError::UnsupportedScheme(raw.to_string())),
    }
}

pub struct HttpCommandTransport {
    http: Client,
    base_url: String,
}

impl HttpCommandTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: parse_backend_url(base_url)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn command_url(&self, command: CommandName) -> String {
        format!("{}/commands/{}", self.base_url, command)
    }
}

#[async_trait]
impl CommandTransport for HttpCommandTransport {
    async fn invoke(&self, command: CommandName, payload: Value) -> Result<Value, GatewayError> {
        let url = self.command_url(command);
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| GatewayError::Unreachable(format!("{command}: {err}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Unreachable(format!(
                "{command}: backend answered {status}"
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| GatewayError::Unreachable(format!("{command}: {err}")))?;
        debug!(%command, %status, bytes = body.len(), "backend command answered");

        if status.is_client_error() {
            let rejection = serde_json::from_slice::<ApiError>(&body).unwrap_or_else(|_| {
                let text = String::from_utf8_lossy(&body).trim().to_string();
                let message = if text.is_empty() {
                    status.to_string()
                } else {
                    text
                };
                ApiError::new(code_for_status(status), message)
            });
            return Err(GatewayError::Rejected(rejection));
        }
        if !status.is_success() {
            return Err(GatewayError::Malformed {
                command,
                reason: format!("unexpected status {status}"),
            });
        }
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|err| GatewayError::Malformed {
            command,
            reason: format!("response body is not JSON: {err}"),
        })
    }
}

fn code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::CONFLICT => ErrorCode::Conflict,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ErrorCode::Validation,
        _ => ErrorCode::Unknown,
    }
}

pub struct WebSocketProgressSource {
    events_url: String,
}

impl WebSocketProgressSource {
    pub fn new(backend_url: &str) -> Result<Self, TransportError> {
        let base = parse_backend_url(backend_url)?;
        let events_url = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(TransportError::UnsupportedScheme(backend_url.to_string()));
        };
        Ok(Self { events_url })
    }

    pub fn channel_url(&self, channel: &str) -> String {
        format!("{}/events/{channel}", self.events_url)
    }
}

#[async_trait]
impl ProgressSource for WebSocketProgressSource {
    async fn open(&self, channel: &str) -> Result<FrameStream, GatewayError> {
        let url = self.channel_url(channel);
        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|err| {
            GatewayError::Unreachable(format!("failed to connect progress channel {url}: {err}"))
        })?;
        debug!(%url, "progress channel connected");
        let (_, reader) = ws_stream.split();

        let frames = reader
            .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
            .filter_map(|message| {
                future::ready(match message {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Binary(bytes)) => {
                        Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                    }
                    Ok(_) => None,
                    Err(err) => Some(Err(GatewayError::Unreachable(format!(
                        "progress channel receive failed: {err}"
                    )))),
                })
            });
        Ok(frames.boxed())
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
