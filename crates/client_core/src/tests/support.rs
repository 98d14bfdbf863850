use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use futures::{future, StreamExt};
use serde_json::{json, Value};
use shared::{
    domain::{BackendKind, DistroId, Distribution},
    error::ApiError,
    protocol::{CommandName, InstallPhase, InstallProgressEvent},
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    gateway::{CommandGateway, CommandTransport, GatewayError},
    subscription::{FrameStream, ProgressSource},
};

pub fn distro(id: &str, name: &str, backends: &[BackendKind]) -> Distribution {
    Distribution {
        id: DistroId::from(id),
        name: name.to_string(),
        vendor: None,
        website: None,
        backends: backends.to_vec(),
    }
}

pub fn sample_catalog() -> Vec<Distribution> {
    vec![
        distro("ubuntu", "Ubuntu", &[BackendKind::Wsl, BackendKind::Docker]),
        distro("alpine", "Alpine", &[BackendKind::Docker]),
    ]
}

pub fn progress(distro_id: &str, version: &str, phase: &str, downloaded: u64, total: Option<u64>) -> InstallProgressEvent {
    InstallProgressEvent {
        distro_id: DistroId::from(distro_id),
        version: version.to_string(),
        phase: InstallPhase::from(phase),
        downloaded,
        total,
    }
}

/// A version request held open until the test answers it.
pub struct PendingVersions {
    pub distro_id: DistroId,
    pub reply: oneshot::Sender<Result<Value, GatewayError>>,
}

impl PendingVersions {
    pub fn respond(self, versions: Value) {
        let _ = self.reply.send(Ok(versions));
    }

    pub fn fail(self, err: GatewayError) {
        let _ = self.reply.send(Err(err));
    }
}

pub struct FakeBackend {
    catalog: Mutex<Result<Value, GatewayError>>,
    versions: Mutex<HashMap<String, Result<Value, GatewayError>>>,
    install_reply: Mutex<Result<Value, GatewayError>>,
    version_gate: Option<mpsc::UnboundedSender<PendingVersions>>,
    calls: Mutex<Vec<(CommandName, Value)>>,
}

impl FakeBackend {
    pub fn new(catalog: &[Distribution]) -> Self {
        Self {
            catalog: Mutex::new(Ok(json!(catalog))),
            versions: Mutex::new(HashMap::new()),
            install_reply: Mutex::new(Ok(Value::Null)),
            version_gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Version requests are parked and handed to the returned receiver.
    pub fn gated(catalog: &[Distribution]) -> (Self, mpsc::UnboundedReceiver<PendingVersions>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut backend = Self::new(catalog);
        backend.version_gate = Some(tx);
        (backend, rx)
    }

    pub fn with_versions(self, distro_id: &str, versions: Value) -> Self {
        self.versions
            .lock()
            .expect("versions lock")
            .insert(distro_id.to_string(), Ok(versions));
        self
    }

    pub fn set_catalog(&self, reply: Result<Value, GatewayError>) {
        *self.catalog.lock().expect("catalog lock") = reply;
    }

    pub fn set_install_reply(&self, reply: Result<Value, GatewayError>) {
        *self.install_reply.lock().expect("install lock") = reply;
    }

    pub fn calls(&self) -> Vec<(CommandName, Value)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn count(&self, command: CommandName) -> usize {
        self.calls()
            .iter()
            .filter(|(called, _)| *called == command)
            .count()
    }
}

#[async_trait]
impl CommandTransport for FakeBackend {
    async fn invoke(&self, command: CommandName, payload: Value) -> Result<Value, GatewayError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((command, payload.clone()));
        match command {
            CommandName::ListDistros => {
                let reply = self.catalog.lock().expect("catalog lock").clone();
                reply
            }
            CommandName::ListVersions => {
                let distro_id = payload["distro_id"].as_str().unwrap_or_default().to_string();
                if let Some(gate) = &self.version_gate {
                    let (reply, rx) = oneshot::channel();
                    gate.send(PendingVersions {
                        distro_id: DistroId::from(distro_id.as_str()),
                        reply,
                    })
                    .expect("version gate receiver alive");
                    return rx
                        .await
                        .unwrap_or_else(|_| Err(GatewayError::Unreachable("gate dropped".into())));
                }
                let reply = self
                    .versions
                    .lock()
                    .expect("versions lock")
                    .get(&distro_id)
                    .cloned();
                reply.unwrap_or_else(|| {
                    Err(GatewayError::Rejected(ApiError::not_found(format!(
                        "unknown distribution {distro_id}"
                    ))))
                })
            }
            CommandName::Install => {
                let reply = self.install_reply.lock().expect("install lock").clone();
                reply
            }
            CommandName::OpenSettings => Ok(Value::Null),
        }
    }
}

pub fn gateway_for(backend: &Arc<FakeBackend>) -> CommandGateway {
    CommandGateway::new(Arc::clone(backend) as Arc<dyn CommandTransport>)
}

/// In-memory progress channel backed by a broadcast sender.
pub struct FakeProgressSource {
    frames: broadcast::Sender<Result<String, GatewayError>>,
    opens: AtomicUsize,
    fail_open: bool,
}

impl FakeProgressSource {
    pub fn new() -> Self {
        let (frames, _) = broadcast::channel(256);
        Self {
            frames,
            opens: AtomicUsize::new(0),
            fail_open: false,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    pub fn emit(&self, event: &InstallProgressEvent) {
        self.emit_raw(&serde_json::to_string(event).expect("encode event"));
    }

    pub fn emit_raw(&self, raw: &str) {
        let _ = self.frames.send(Ok(raw.to_string()));
    }

    /// Delivers a transport failure to every open stream.
    pub fn disconnect(&self, err: GatewayError) {
        let _ = self.frames.send(Err(err));
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn receivers(&self) -> usize {
        self.frames.receiver_count()
    }
}

#[async_trait]
impl ProgressSource for FakeProgressSource {
    async fn open(&self, _channel: &str) -> Result<FrameStream, GatewayError> {
        if self.fail_open {
            return Err(GatewayError::Unreachable("progress channel down".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let stream = BroadcastStream::new(self.frames.subscribe())
            .filter_map(|frame| future::ready(frame.ok()));
        Ok(stream.boxed())
    }
}

/// Replays a fixed list of frames, then ends the stream.
pub struct ScriptedProgressSource {
    frames: Vec<Result<String, GatewayError>>,
}

impl ScriptedProgressSource {
    pub fn new(frames: Vec<Result<String, GatewayError>>) -> Self {
        Self { frames }
    }
}

#[async_trait]
impl ProgressSource for ScriptedProgressSource {
    async fn open(&self, _channel: &str) -> Result<FrameStream, GatewayError> {
        Ok(futures::stream::iter(self.frames.clone()).boxed())
    }
}
