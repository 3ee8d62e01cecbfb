//! Connection supervision: one long-lived task per device session
//!
//! The supervisor drives the per-session state machine
//!
//! ```text
//! Idle -> Authenticating -> Connecting -> Streaming -> Backoff -+
//!              ^                                                |
//!              +------------------------------------------------+
//!                        (Terminated only on explicit teardown)
//! ```
//!
//! Every failure path, whatever the cause, marks the session's metrics
//! unavailable and waits out one fixed backoff interval before retrying.
//! There is no exponential growth, no jitter and no retry cap: the peer is a
//! single LAN device, and availability wins over retry-storm concerns.

use crate::client::token::TokenManager;
use crate::error::{EmsError, Result};
use crate::protocol;
use crate::registry::MetricRegistry;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Path of the smart-meter telemetry stream on the device.
pub(crate) const STREAM_PATH: &str = "/api/data-transfer/ws/protobuf/gdr/local/values/smart-meter";

/// Fixed wait between reconnect attempts.
pub(crate) const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

/// Connection state of one device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No network activity yet
    Idle,
    /// Fetching a bearer token
    Authenticating,
    /// WebSocket handshake in progress
    Connecting,
    /// Reading telemetry frames
    Streaming,
    /// Waiting out the reconnect interval after a failure
    Backoff,
    /// Explicit teardown; the session will not recover
    Terminated,
}

pub(crate) struct Supervisor {
    host: String,
    tokens: Arc<TokenManager>,
    registry: Arc<MetricRegistry>,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub(crate) fn new(
        host: String,
        tokens: Arc<TokenManager>,
        registry: Arc<MetricRegistry>,
        state: watch::Sender<SessionState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            host,
            tokens,
            registry,
            state,
            cancel,
        }
    }

    /// Retry loop. Runs until the cancellation token fires; every pass either
    /// streams until the connection dies or fails somewhere on the way in,
    /// and both roads lead through `Backoff`.
    pub(crate) async fn run(self) {
        loop {
            let failure = tokio::select! {
                _ = self.cancel.cancelled() => break,
                outcome = self.connect_and_stream() => match outcome {
                    Ok(never) => match never {},
                    Err(e) => e,
                },
            };

            if failure.is_auth_error() {
                // Established sessions degrade instead of dying: the user
                // may have changed the device password mid-flight.
                error!(host = %self.host, "gateway rejected credentials: {failure}");
            } else {
                warn!(host = %self.host, "session failed: {failure}");
            }

            self.registry.mark_unavailable().await;
            self.set_state(SessionState::Backoff);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(RECONNECT_INTERVAL) => {}
            }
        }

        self.registry.mark_unavailable().await;
        self.registry.clear_subscribers().await;
        self.set_state(SessionState::Terminated);
        info!(host = %self.host, "session terminated");
    }

    /// One full pass: authenticate, open the stream, read frames until the
    /// connection drops. The stream is endless, so this only ever returns an
    /// error; a polite close from the device counts as a lost connection.
    async fn connect_and_stream(&self) -> Result<std::convert::Infallible> {
        self.set_state(SessionState::Authenticating);
        let token = self.tokens.get_token().await?;

        self.set_state(SessionState::Connecting);
        let url = format!("ws://{}{}", self.host, STREAM_PATH);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| EmsError::connect(format!("invalid stream URL {url:?}: {e}")))?;
        request.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {token}")
                .parse()
                .map_err(|_| EmsError::protocol("token not usable as header value"))?,
        );

        let (mut ws, _response) = connect_async(request).await?;
        info!(host = %self.host, "telemetry stream connected");

        // Some firmware revisions ignore the Authorization header and expect
        // the token as the first text frame instead; send both.
        ws.send(Message::Text(format!("Bearer {token}"))).await?;

        self.set_state(SessionState::Streaming);
        loop {
            let message = match ws.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(EmsError::connect("telemetry stream closed")),
            };

            let decoded = match message {
                Message::Binary(data) => protocol::decode_frame(&data),
                Message::Text(text) => protocol::decode_text_frame(&text),
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => {
                    return Err(EmsError::connect("telemetry stream closed by device"))
                }
                Message::Frame(_) => continue,
            };

            // A corrupt frame is a per-frame fault: drop it and keep the
            // session; the next well-formed frame updates normally.
            match decoded {
                Ok(readings) => self.registry.apply(&readings).await,
                Err(e) => debug!(host = %self.host, "dropping malformed frame: {e}"),
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        // Receivers may all be gone during teardown; that is fine.
        let _ = self.state.send(state);
    }
}
