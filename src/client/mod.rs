//! Device sessions and their lifecycle
//!
//! A [`Session`] is the logical unit of one authenticated, reconnecting
//! telemetry stream to one gateway device. The [`SessionRegistry`] hands out
//! at most one session per host, so any number of host-side entities share a
//! single network connection.

pub mod supervisor;
pub mod token;

use crate::error::Result;
use crate::registry::{MetricCallback, MetricRegistry, MetricValue, SubscriptionHandle};
use std::collections::HashMap;
use std::sync::Arc;
use supervisor::{SessionState, Supervisor};
use token::TokenManager;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Account name the device ships with. Some firmware images use `admin`
/// instead, which is why the name is configuration rather than a constant
/// baked into the request.
pub const DEFAULT_USERNAME: &str = "root";

/// Connection settings for one gateway device.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Host address (optionally `host:port`) of the gateway on the LAN
    pub host: String,
    /// Account name for the token endpoint
    pub username: String,
    /// Account password
    pub password: String,
}

impl SessionConfig {
    /// Configuration with the stock account name.
    pub fn new(host: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: DEFAULT_USERNAME.to_string(),
            password: password.into(),
        }
    }

    /// Override the account name (`root` vs `admin` differs by firmware).
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }
}

/// One authenticated, self-healing telemetry stream to one gateway device.
///
/// Created through [`SessionRegistry::open_session`]. Dropping a `Session`
/// handle does not stop the stream; only
/// [`SessionRegistry::close_session`] does.
pub struct Session {
    host: String,
    tokens: Arc<TokenManager>,
    registry: Arc<MetricRegistry>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Authenticate and start the connection supervisor.
    ///
    /// The first token fetch happens synchronously so that bad credentials
    /// fail fast with [`crate::EmsError::Auth`] and an unreachable device
    /// with [`crate::EmsError::Connect`]. After that the supervisor owns all
    /// retrying.
    pub(crate) async fn open(config: SessionConfig) -> Result<Arc<Self>> {
        let tokens = Arc::new(TokenManager::new(&config)?);
        tokens.get_token().await?;

        let registry = Arc::new(MetricRegistry::new());
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let cancel = CancellationToken::new();

        let supervisor = Supervisor::new(
            config.host.clone(),
            tokens.clone(),
            registry.clone(),
            state_tx,
            cancel.clone(),
        );
        let task = tokio::spawn(supervisor.run());
        info!(host = %config.host, "session opened");

        Ok(Arc::new(Self {
            host: config.host,
            tokens,
            registry,
            state: state_rx,
            cancel,
            task: Mutex::new(Some(task)),
        }))
    }

    /// Host address this session is bound to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch receiver for state transitions, for hosts that want to reflect
    /// connectivity in their own UI.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Register a callback for one metric name. Many subscribers per name
    /// are allowed and each receives every update.
    pub async fn subscribe(
        &self,
        name: impl Into<String>,
        callback: MetricCallback,
    ) -> SubscriptionHandle {
        self.registry.subscribe(name, callback).await
    }

    /// Remove a subscription. The last unsubscribe does not close the
    /// session; only [`SessionRegistry::close_session`] does.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.registry.unsubscribe(handle).await
    }

    /// Last-known state of a metric, if any frame has carried it yet.
    pub async fn value(&self, name: &str) -> Option<MetricValue> {
        self.registry.get(name).await
    }

    /// Every metric name seen on this session so far. Hosts typically call
    /// this after the first frame to enumerate their entities.
    pub async fn metric_names(&self) -> Vec<String> {
        self.registry.names().await
    }

    /// Cancel the supervisor and wait for it to wind down.
    async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        self.tokens.invalidate().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Owner of all device sessions in one runtime.
///
/// An explicit object rather than module-level statics: lifecycles are
/// defined (created at first use, destroyed at teardown) and independent
/// registries can coexist in one process.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session to `config.host`, or return the existing one. Sessions
    /// are keyed by host, so repeated opens share one connection.
    ///
    /// The map lock is not held across the login: one host being slow or
    /// unreachable must not stall opens to other hosts. Concurrent opens to
    /// the same host may both authenticate; the loser is torn down and the
    /// winner's session returned.
    pub async fn open_session(&self, config: SessionConfig) -> Result<Arc<Session>> {
        if let Some(session) = self.sessions.lock().await.get(&config.host) {
            return Ok(session.clone());
        }

        let session = Session::open(config).await?;

        let existing = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&session.host) {
                Some(existing) => existing.clone(),
                None => {
                    sessions.insert(session.host.clone(), session.clone());
                    return Ok(session);
                }
            }
        };
        session.shutdown().await;
        Ok(existing)
    }

    /// Tear down the session for `host`: interrupts any pending read or
    /// backoff sleep, drops subscribers and the token cache. Returns false
    /// if no session was open for that host.
    pub async fn close_session(&self, host: &str) -> bool {
        let session = self.sessions.lock().await.remove(host);
        match session {
            Some(session) => {
                session.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Tear down every session (host application unload).
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.shutdown().await;
        }
    }

    /// Hosts with an open session, sorted.
    pub async fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        hosts.sort();
        hosts
    }
}
