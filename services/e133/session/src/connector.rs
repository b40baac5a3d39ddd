//! Outbound TCP connector with per-endpoint retry.

use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backoff::BackoffPolicy;
use crate::monitor::MonitorEvent;

/// Default bound on a single connect attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Establishes connections and reports each success to the monitor
pub trait Connector: Send {
    /// Start connecting to an endpoint; false if an attempt is already pending.
    ///
    /// `prior_attempts` counts earlier registrations of the same endpoint. When
    /// it is non-zero the first attempt waits `backoff.backoff_time(prior_attempts)`.
    fn add_endpoint(
        &mut self,
        endpoint: SocketAddrV4,
        backoff: Arc<dyn BackoffPolicy>,
        prior_attempts: u32,
    ) -> bool;

    /// Abandon every pending attempt
    fn cancel_all(&mut self);
}

/// Connector running one retry task per endpoint on the current runtime
#[derive(Debug)]
pub struct TcpConnector {
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<MonitorEvent>,
    pending: HashMap<SocketAddrV4, JoinHandle<()>>,
}

impl TcpConnector {
    /// Create a connector posting [`MonitorEvent::Connected`] to `events`
    pub fn new(connect_timeout: Duration, events: mpsc::UnboundedSender<MonitorEvent>) -> Self {
        Self {
            connect_timeout,
            events,
            pending: HashMap::new(),
        }
    }

    /// Number of endpoints with an attempt in progress
    pub fn pending(&self) -> usize {
        self.pending.values().filter(|task| !task.is_finished()).count()
    }
}

impl Connector for TcpConnector {
    fn add_endpoint(
        &mut self,
        endpoint: SocketAddrV4,
        backoff: Arc<dyn BackoffPolicy>,
        prior_attempts: u32,
    ) -> bool {
        if let Some(task) = self.pending.get(&endpoint) {
            if !task.is_finished() {
                debug!("Connect to {} already pending", endpoint);
                return false;
            }
        }

        let task = tokio::spawn(connect_loop(
            endpoint,
            self.connect_timeout,
            backoff,
            prior_attempts,
            self.events.clone(),
        ));
        self.pending.insert(endpoint, task);
        true
    }

    fn cancel_all(&mut self) {
        for (endpoint, task) in self.pending.drain() {
            if !task.is_finished() {
                debug!("Cancelling connect to {}", endpoint);
            }
            task.abort();
        }
    }
}

impl Drop for TcpConnector {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn connect_loop(
    endpoint: SocketAddrV4,
    connect_timeout: Duration,
    backoff: Arc<dyn BackoffPolicy>,
    prior_attempts: u32,
    events: mpsc::UnboundedSender<MonitorEvent>,
) {
    if prior_attempts > 0 {
        let delay = backoff.backoff_time(prior_attempts);
        debug!("Reconnecting to {} in {:?}", endpoint, delay);
        tokio::time::sleep(delay).await;
    }

    let mut failures = prior_attempts;

    loop {
        debug!("Attempting to connect to {}", endpoint);

        match tokio::time::timeout(connect_timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => {
                info!("TCP connection established to {}", endpoint);
                let _ = events.send(MonitorEvent::Connected {
                    address: *endpoint.ip(),
                    port: endpoint.port(),
                    stream,
                });
                return;
            }
            Ok(Err(e)) => debug!("Failed to connect to {}: {}", endpoint, e),
            Err(_) => debug!("Connect to {} timed out after {:?}", endpoint, connect_timeout),
        }

        failures = failures.saturating_add(1);
        let delay = backoff.backoff_time(failures);
        debug!("Retrying {} in {:?}", endpoint, delay);
        tokio::time::sleep(delay).await;
    }
}
