//! Heartbeat-based health checking for an established connection.
//!
//! A [`HealthCheckedConnection`] writes an E1.33 heartbeat as soon as it is set
//! up and then once per interval. The owner reports inbound traffic through
//! [`HealthCheckedConnection::heartbeat_received`]; if nothing is reported for
//! two and a half intervals, or a heartbeat cannot be written, the unhealthy
//! callback runs exactly once and the timer task stops.

use std::sync::Arc;
use std::time::Duration;

use e133_wire::E133Sender;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::SessionError;

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Liveness window, in heartbeat intervals
const TIMEOUT_INTERVALS: f64 = 2.5;

/// Write side of a connection, shared by the heartbeat task and its owner
pub type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Callback run when the connection is declared unhealthy
pub type UnhealthyCallback = Box<dyn FnOnce() + Send>;

async fn write_pdu(writer: &SharedWriter, pdu: &[u8]) -> std::io::Result<()> {
    let mut writer = writer.lock().await;
    writer.write_all(pdu).await?;
    writer.flush().await
}

/// Heartbeat sender and liveness watchdog for one connection
pub struct HealthCheckedConnection {
    sender: Arc<E133Sender>,
    writer: SharedWriter,
    interval: Duration,
    on_unhealthy: Option<UnhealthyCallback>,
    liveness: watch::Sender<Instant>,
    task: Option<JoinHandle<()>>,
}

impl HealthCheckedConnection {
    /// Create a health check; nothing is sent until [`setup`](Self::setup)
    pub fn new(
        sender: Arc<E133Sender>,
        writer: SharedWriter,
        interval: Duration,
        on_unhealthy: UnhealthyCallback,
    ) -> Self {
        let (liveness, _) = watch::channel(Instant::now());
        Self {
            sender,
            writer,
            interval,
            on_unhealthy: Some(on_unhealthy),
            liveness,
            task: None,
        }
    }

    /// Send the first heartbeat and start the timer task
    pub async fn setup(&mut self) -> Result<(), SessionError> {
        if self.on_unhealthy.is_none() {
            return Err(SessionError::State("already set up"));
        }
        if self.interval.is_zero() {
            return Err(SessionError::ZeroInterval);
        }

        let heartbeat = self.sender.heartbeat()?;
        write_pdu(&self.writer, &heartbeat)
            .await
            .map_err(SessionError::Heartbeat)?;

        let on_unhealthy = self
            .on_unhealthy
            .take()
            .ok_or(SessionError::State("already set up"))?;
        self.liveness.send_replace(Instant::now());

        self.task = Some(tokio::spawn(watchdog(
            self.sender.clone(),
            self.writer.clone(),
            self.interval,
            self.liveness.subscribe(),
            on_unhealthy,
        )));
        Ok(())
    }

    /// Record that the peer is alive
    pub fn heartbeat_received(&self) {
        self.liveness.send_replace(Instant::now());
    }

    /// When liveness was last refreshed
    pub fn last_heartbeat(&self) -> Instant {
        *self.liveness.borrow()
    }

    /// Heartbeat interval
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for HealthCheckedConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for HealthCheckedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckedConnection")
            .field("interval", &self.interval)
            .field("last_heartbeat", &self.last_heartbeat())
            .field("running", &self.task.is_some())
            .finish()
    }
}

async fn watchdog(
    sender: Arc<E133Sender>,
    writer: SharedWriter,
    interval: Duration,
    mut liveness: watch::Receiver<Instant>,
    on_unhealthy: UnhealthyCallback,
) {
    let timeout = interval.mul_f64(TIMEOUT_INTERVALS);
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let deadline = *liveness.borrow_and_update() + timeout;

        tokio::select! {
            _ = ticker.tick() => {
                let heartbeat = match sender.heartbeat() {
                    Ok(heartbeat) => heartbeat,
                    Err(e) => {
                        warn!("Failed to build heartbeat: {}", e);
                        break;
                    }
                };
                if let Err(e) = write_pdu(&writer, &heartbeat).await {
                    warn!("Failed to send heartbeat: {}", e);
                    break;
                }
                debug!("Sent heartbeat");
            }

            _ = tokio::time::sleep_until(deadline) => {
                warn!("No heartbeat received in {:?}", timeout);
                break;
            }

            changed = liveness.changed() => {
                if changed.is_err() {
                    // Owner is gone; nobody left to notify
                    return;
                }
            }
        }
    }

    on_unhealthy();
}
