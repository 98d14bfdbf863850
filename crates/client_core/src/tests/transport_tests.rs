use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Path, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde_json::{json, Value};
use shared::{domain::DistroId, error::ApiError};
use tokio::{net::TcpListener, time::timeout};

use super::*;
use crate::{
    gateway::CommandGateway,
    subscription::SubscriptionManager,
    test_support::{progress, sample_catalog},
};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn command(Path(command): Path<String>, Json(payload): Json<Value>) -> Response {
    match command.as_str() {
        "cmd_list_distros" => Json(json!(sample_catalog())).into_response(),
        "cmd_open_settings" => StatusCode::OK.into_response(),
        "cmd_install" => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        "cmd_versions" => match payload["distro_id"].as_str() {
            Some("ubuntu") => Json(json!([{ "version": "24.04", "channel": "lts" }])).into_response(),
            Some("gone") => (
                StatusCode::NOT_FOUND,
                Json(ApiError::not_found("distribution `gone` not found")),
            )
                .into_response(),
            Some("busy") => (StatusCode::CONFLICT, "install already running").into_response(),
            Some("broken") => (StatusCode::OK, "<html>oops</html>").into_response(),
            _ => StatusCode::BAD_REQUEST.into_response(),
        },
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn events(Path(channel): Path<String>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_progress(socket, channel))
}

async fn stream_progress(mut socket: WebSocket, channel: String) {
    if channel != "install-progress" {
        let _ = socket.send(WsMessage::Close(None)).await;
        return;
    }
    let frames = [
        serde_json::to_string(&progress("ubuntu", "24.04", "download", 10, Some(100)))
            .unwrap_or_default(),
        "not json".to_string(),
        serde_json::to_string(&progress("ubuntu", "24.04", "done", 100, Some(100)))
            .unwrap_or_default(),
    ];
    for frame in frames {
        if socket.send(WsMessage::Text(frame)).await.is_err() {
            return;
        }
    }
    let _ = socket.send(WsMessage::Close(None)).await;
}

async fn spawn_backend() -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = Router::new()
        .route("/commands/:command", post(command))
        .route("/events/:channel", get(events));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/")
}

async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}

fn gateway(base_url: &str) -> (Arc<HttpCommandTransport>, CommandGateway) {
    let transport = Arc::new(
        HttpCommandTransport::new(base_url, Duration::from_secs(5)).expect("transport"),
    );
    let gateway = CommandGateway::new(Arc::clone(&transport) as Arc<dyn CommandTransport>);
    (transport, gateway)
}

#[test]
fn backend_url_is_normalised() {
    assert_eq!(
        parse_backend_url(" http://127.0.0.1:7878/ ").expect("valid"),
        "http://127.0.0.1:7878"
    );
    assert!(matches!(
        parse_backend_url("ftp://example.com"),
        Err(TransportError::UnsupportedScheme(_))
    ));
    assert!(matches!(
        parse_backend_url("not a url"),
        Err(TransportError::InvalidUrl { .. })
    ));
}

#[test]
fn progress_channel_url_follows_the_backend_scheme() {
    let plain = WebSocketProgressSource::new("http://localhost:7878").expect("source");
    assert_eq!(
        plain.channel_url("install-progress"),
        "ws://localhost:7878/events/install-progress"
    );
    let secure = WebSocketProgressSource::new("https://installer.local/").expect("source");
    assert_eq!(
        secure.channel_url("install-progress"),
        "wss://installer.local/events/install-progress"
    );
}

#[tokio::test]
async fn successful_commands_decode() {
    let base_url = spawn_backend().await;
    let (transport, gateway) = gateway(&base_url);
    assert!(!transport.base_url().ends_with('/'));

    let catalog = gateway.list_distributions().await.expect("catalog");
    assert_eq!(catalog, sample_catalog());

    let versions = gateway
        .list_versions(&DistroId::from("ubuntu"))
        .await
        .expect("versions");
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].channel.as_deref(), Some("lts"));
}

#[tokio::test]
async fn empty_success_body_is_null() {
    let base_url = spawn_backend().await;
    let (transport, gateway) = gateway(&base_url);

    let raw = transport
        .invoke(CommandName::OpenSettings, Value::Null)
        .await
        .expect("acknowledged");
    assert_eq!(raw, Value::Null);
    gateway.open_settings().await.expect("settings opened");
}

#[tokio::test]
async fn client_errors_are_rejections() {
    let base_url = spawn_backend().await;
    let (_, gateway) = gateway(&base_url);

    let err = gateway
        .list_versions(&DistroId::from("gone"))
        .await
        .expect_err("not found");
    assert_eq!(err.rejection_code(), Some(ErrorCode::NotFound));
    assert!(err.to_string().contains("gone"));

    let err = gateway
        .list_versions(&DistroId::from("busy"))
        .await
        .expect_err("conflict");
    assert_eq!(err.rejection_code(), Some(ErrorCode::Conflict));
    assert!(err.to_string().contains("install already running"));
}

#[tokio::test]
async fn server_errors_are_unreachable() {
    let base_url = spawn_backend().await;
    let (transport, _) = gateway(&base_url);

    let err = transport
        .invoke(CommandName::Install, json!({}))
        .await
        .expect_err("backend down");
    assert!(err.is_unreachable());
}

#[tokio::test]
async fn non_json_success_is_malformed() {
    let base_url = spawn_backend().await;
    let (_, gateway) = gateway(&base_url);

    let err = gateway
        .list_versions(&DistroId::from("broken"))
        .await
        .expect_err("malformed");
    assert!(err.is_malformed());
}

#[tokio::test]
async fn closed_port_is_unreachable() {
    let base_url = closed_port_url().await;
    let (_, gateway) = gateway(&base_url);
    let err = gateway.list_distributions().await.expect_err("no backend");
    assert!(err.is_unreachable());

    let source = WebSocketProgressSource::new(&base_url).expect("source");
    let err = source
        .open("install-progress")
        .await
        .err()
        .expect("no progress channel");
    assert!(err.is_unreachable());
}

#[tokio::test]
async fn websocket_frames_stream_until_close() {
    let base_url = spawn_backend().await;
    let source = WebSocketProgressSource::new(&base_url).expect("source");

    let frames = source.open("install-progress").await.expect("open");
    let frames: Vec<_> = timeout(TEST_TIMEOUT, frames.collect::<Vec<_>>())
        .await
        .expect("stream ends after close");
    let frames: Vec<String> = frames
        .into_iter()
        .collect::<Result<_, _>>()
        .expect("text frames");

    assert_eq!(frames.len(), 3);
    assert_eq!(frames[1], "not json");
    assert!(frames[2].contains("\"done\""));
}

#[tokio::test]
async fn websocket_source_feeds_a_subscription() {
    let base_url = spawn_backend().await;
    let source: Arc<dyn ProgressSource> =
        Arc::new(WebSocketProgressSource::new(&base_url).expect("source"));
    let manager = SubscriptionManager::new(source, "install-progress");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _handle = manager
        .subscribe(move |event| {
            let _ = tx.send(event);
        })
        .await
        .expect("subscribe");

    let mut phases = Vec::new();
    while let Ok(Some(event)) = timeout(TEST_TIMEOUT, rx.recv()).await {
        phases.push(event.phase.to_string());
    }
    assert_eq!(phases, vec!["download", "done"]);
}
