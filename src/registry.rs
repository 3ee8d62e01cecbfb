//! Per-session metric state and subscriber fan-out
//!
//! One registry exists per device session. The owning connection supervisor
//! is the only writer of metric values; any number of host-side subscribers
//! read the latest values and receive callbacks on every update. This is
//! what lets many logical entities share a single network connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Last-known state of one named metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricValue {
    /// Most recent measured value
    pub value: f64,
    /// False whenever the session is not streaming (stale values are never
    /// reported as current)
    pub available: bool,
}

/// Update delivered to subscriber callbacks.
///
/// `value` is `None` when the metric became unavailable (session lost).
#[derive(Debug, Clone, PartialEq)]
pub struct MetricUpdate {
    pub name: String,
    pub value: Option<f64>,
}

/// Subscriber callback. Invoked synchronously on the session task for every
/// update of the subscribed metric, so keep it cheap; hand off to a channel
/// for anything heavier.
pub type MetricCallback = Arc<dyn Fn(&MetricUpdate) + Send + Sync>;

/// Handle returned by [`MetricRegistry::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscriber {
    id: u64,
    name: String,
    callback: MetricCallback,
}

/// Metric state and subscriber list for one device session.
pub struct MetricRegistry {
    values: RwLock<HashMap<String, MetricValue>>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Apply one decoded frame: store every reading, mark it available and
    /// notify its subscribers. Callbacks run outside the locks, once per
    /// unique display name, in the decode order of the frame.
    pub async fn apply(&self, readings: &[(String, f64)]) {
        if readings.is_empty() {
            return;
        }

        {
            let mut values = self.values.write().await;
            for (name, value) in readings {
                values.insert(
                    name.clone(),
                    MetricValue {
                        value: *value,
                        available: true,
                    },
                );
            }
        }

        for (name, value) in readings {
            let update = MetricUpdate {
                name: name.clone(),
                value: Some(*value),
            };
            for callback in self.callbacks_for(name).await {
                callback(&update);
            }
        }
    }

    /// Snapshot the callbacks registered for `name`, so notification runs
    /// without holding the subscriber lock (a callback may itself subscribe
    /// or unsubscribe).
    async fn callbacks_for(&self, name: &str) -> Vec<MetricCallback> {
        self.subscribers
            .read()
            .await
            .iter()
            .filter(|s| s.name == name)
            .map(|s| s.callback.clone())
            .collect()
    }

    /// Flip every currently-available metric to unavailable and notify its
    /// subscribers once. Metrics already unavailable stay silent, so a
    /// persistent outage does not re-notify on every backoff cycle.
    pub async fn mark_unavailable(&self) {
        let newly_unavailable: Vec<String> = {
            let mut values = self.values.write().await;
            values
                .iter_mut()
                .filter(|(_, v)| v.available)
                .map(|(name, v)| {
                    v.available = false;
                    name.clone()
                })
                .collect()
        };

        if newly_unavailable.is_empty() {
            return;
        }
        debug!(
            metrics = newly_unavailable.len(),
            "marking session metrics unavailable"
        );

        for name in &newly_unavailable {
            let update = MetricUpdate {
                name: name.clone(),
                value: None,
            };
            for callback in self.callbacks_for(name).await {
                callback(&update);
            }
        }
    }

    /// Register interest in exactly one metric name. Multiple subscribers
    /// per name are allowed; each receives every update.
    pub async fn subscribe(&self, name: impl Into<String>, callback: MetricCallback) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().await.push(Subscriber {
            id,
            name: name.into(),
            callback,
        });
        SubscriptionHandle(id)
    }

    /// Remove a subscription. Returns false if the handle was already gone.
    /// The last unsubscribe does not terminate the session.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|s| s.id != handle.0);
        subscribers.len() != before
    }

    /// Drop every subscription (session teardown).
    pub async fn clear_subscribers(&self) {
        self.subscribers.write().await.clear();
    }

    /// Last-known state of a metric, if a frame ever carried it.
    pub async fn get(&self, name: &str) -> Option<MetricValue> {
        self.values.read().await.get(name).copied()
    }

    /// Names of every metric seen so far, sorted for stable enumeration.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}
