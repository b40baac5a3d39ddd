//! Connections, heartbeat health checks and the session lifecycle manager.
//!
//! This crate drives every monitored E1.33 device through
//! connect → verify healthy → active → recover or terminate, multiplexed onto
//! a single task.
//!
//! ## Features
//!
//! - **Connector**: per-endpoint TCP connect with timeout and backoff retry
//! - **Health checks**: heartbeat PDUs on an interval, with a liveness watchdog
//! - **Registry**: single owner of each endpoint's socket and health check
//! - **Monitor**: event loop applying connector, health, socket and discovery events
//!
//! ## Example
//!
//! ```rust,no_run
//! use e133_session::{
//!     LinearBackoffPolicy, Monitor, MonitorSettings, TcpConnector, DEFAULT_CONNECT_TIMEOUT,
//! };
//! use e133_wire::PidStore;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (tx, rx) = mpsc::unbounded_channel();
//! let connector = TcpConnector::new(DEFAULT_CONNECT_TIMEOUT, tx.clone());
//! let mut monitor = Monitor::new(
//!     MonitorSettings::default(),
//!     Box::new(connector),
//!     Arc::new(LinearBackoffPolicy::default()),
//!     Arc::new(PidStore::load("pids.yaml")?),
//!     tx,
//!     rx,
//! );
//!
//! monitor.populate_responder_list(&["192.168.1.20".parse()?]);
//! monitor.run().await
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod connector;
pub mod error;
pub mod health;
pub mod monitor;
pub mod registry;

// Re-export main types
pub use backoff::{
    BackoffPolicy, ExponentialBackoffPolicy, LinearBackoffPolicy, DEFAULT_INITIAL_RETRY_DELAY,
    DEFAULT_MAX_RETRY_DELAY,
};
pub use connector::{Connector, TcpConnector, DEFAULT_CONNECT_TIMEOUT};
pub use error::SessionError;
pub use health::{HealthCheckedConnection, SharedWriter, DEFAULT_HEARTBEAT_INTERVAL};
pub use monitor::{
    Monitor, MonitorEvent, MonitorHandle, MonitorSettings, SessionLossPolicy, DEFAULT_SOURCE_NAME,
};
pub use registry::{Registration, SessionRegistry, SessionSocket, SessionState};
