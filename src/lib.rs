//! Async client for the eMS Home smart-meter gateway
//!
//! This crate talks to the LAN-resident gateway device that bridges a smart
//! meter: it authenticates against the device's HTTP token endpoint, opens
//! the persistent binary WebSocket telemetry feed, decodes the bit-packed
//! OBIS identifiers layered inside the protobuf envelope, maps them to
//! human-readable metric names and republishes the latest value of each
//! metric to any number of subscribers, all sharing one network connection
//! per device.
//!
//! A lost connection is an expected condition, not an error: every session
//! runs under a supervisor that marks its metrics unavailable and reconnects
//! with a fixed backoff, forever, until explicitly closed.
//!
//! # Example
//!
//! ```no_run
//! use ems_home::{SessionConfig, SessionRegistry};
//! use std::sync::Arc;
//!
//! # async fn run() -> ems_home::Result<()> {
//! let registry = SessionRegistry::new();
//! let session = registry
//!     .open_session(SessionConfig::new("192.168.1.40", "device-password"))
//!     .await?;
//!
//! session
//!     .subscribe(
//!         "Total active energy import",
//!         Arc::new(|update| println!("{}: {:?}", update.name, update.value)),
//!     )
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod obis;
pub mod protocol;
pub mod registry;

// Re-export the host-facing surface for convenience
pub use client::supervisor::SessionState;
pub use client::{Session, SessionConfig, SessionRegistry, DEFAULT_USERNAME};
pub use error::{EmsError, Result};
pub use obis::ObisId;
pub use registry::{MetricCallback, MetricUpdate, MetricValue, SubscriptionHandle};
