//! Mock eMS Home gateway for integration tests
//!
//! Simulates the device's two endpoints on a single port: the form-encoded
//! token login and the protobuf telemetry WebSocket. Tests script the stream
//! by broadcasting frames to every open connection and can force-drop
//! connections to exercise the reconnect path.

#![allow(dead_code)]

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const TOKEN_PATH: &str = "/api/web-login/token";
const STREAM_PATH: &str = "/api/data-transfer/ws/protobuf/gdr/local/values/smart-meter";

/// Frame scripted by a test, fanned out to every open stream connection.
#[derive(Debug, Clone)]
enum StreamCommand {
    Binary(Vec<u8>),
    Text(String),
    Close,
}

struct GatewayState {
    token_requests: AtomicUsize,
    reject_auth: AtomicBool,
    frames: broadcast::Sender<StreamCommand>,
    /// Total stream connections accepted so far
    connections: watch::Sender<usize>,
    /// Authorization header seen on the most recent stream handshake
    last_auth_header: Mutex<Option<String>>,
    /// In-band auth frames received from clients
    in_band_auth: Mutex<Vec<String>>,
}

pub struct MockGateway {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    server: tokio::task::JoinHandle<()>,
}

impl MockGateway {
    pub async fn start() -> Self {
        let (frames, _) = broadcast::channel(64);
        let (connections, _) = watch::channel(0usize);
        let state = Arc::new(GatewayState {
            token_requests: AtomicUsize::new(0),
            reject_auth: AtomicBool::new(false),
            frames,
            connections,
            last_auth_header: Mutex::new(None),
            in_band_auth: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route(TOKEN_PATH, post(token_handler))
            .route(STREAM_PATH, get(stream_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock gateway");
        let addr = listener.local_addr().expect("mock gateway addr");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock gateway serve");
        });

        Self { addr, state, server }
    }

    /// `host:port` string for `SessionConfig::new`.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn token_requests(&self) -> usize {
        self.state.token_requests.load(Ordering::SeqCst)
    }

    pub fn set_reject_auth(&self, reject: bool) {
        self.state.reject_auth.store(reject, Ordering::SeqCst);
    }

    pub fn send_binary_frame(&self, payload: Vec<u8>) {
        let _ = self.state.frames.send(StreamCommand::Binary(payload));
    }

    pub fn send_text_frame(&self, payload: impl Into<String>) {
        let _ = self.state.frames.send(StreamCommand::Text(payload.into()));
    }

    /// Close every open stream connection, simulating a device reboot.
    pub fn drop_connections(&self) {
        let _ = self.state.frames.send(StreamCommand::Close);
    }

    /// Wait until the gateway has accepted at least `count` stream
    /// connections since start. Connections are counted only once their
    /// handler is ready to fan out frames, so a send after this cannot race
    /// the subscription.
    pub async fn wait_for_connections(&self, count: usize) {
        let mut rx = self.state.connections.subscribe();
        tokio::time::timeout(Duration::from_secs(15), rx.wait_for(|n| *n >= count))
            .await
            .expect("timed out waiting for stream connection")
            .expect("mock gateway stopped");
    }

    pub fn last_auth_header(&self) -> Option<String> {
        self.state.last_auth_header.lock().unwrap().clone()
    }

    /// Wait for the client's in-band `"Bearer <token>"` frame.
    pub async fn wait_for_in_band_auth(&self) -> String {
        tokio::time::timeout(Duration::from_secs(15), async {
            loop {
                if let Some(first) = self.state.in_band_auth.lock().unwrap().first().cloned() {
                    return first;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("timed out waiting for in-band auth frame")
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn token_handler(
    State(state): State<Arc<GatewayState>>,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    let count = state.token_requests.fetch_add(1, Ordering::SeqCst) + 1;

    if params.get("grant_type").map(String::as_str) != Some("password")
        || params.get("client_id").map(String::as_str) != Some("emos")
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "unsupported_grant" })),
        )
            .into_response();
    }

    if state.reject_auth.load(Ordering::SeqCst) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid_grant" })),
        )
            .into_response();
    }

    Json(json!({
        "access_token": format!("mock-token-{count}"),
        "expires_in": 3600,
    }))
    .into_response()
}

async fn stream_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *state.last_auth_header.lock().unwrap() = auth.clone();

    match auth {
        Some(value) if value.starts_with("Bearer ") => {}
        _ => return StatusCode::UNAUTHORIZED.into_response(),
    }

    ws.on_upgrade(move |socket| serve_stream(state, socket))
}

async fn serve_stream(state: Arc<GatewayState>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let mut frames = state.frames.subscribe();
    state.connections.send_modify(|n| *n += 1);

    loop {
        tokio::select! {
            command = frames.recv() => match command {
                Ok(StreamCommand::Binary(payload)) => {
                    if sink.send(WsMessage::Binary(payload)).await.is_err() {
                        break;
                    }
                }
                Ok(StreamCommand::Text(payload)) => {
                    if sink.send(WsMessage::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Ok(StreamCommand::Close) => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
                Err(_) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    state.in_band_auth.lock().unwrap().push(text);
                }
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
