//! Session lifecycle manager.
//!
//! Every source of change (connector successes, health check failures, peer
//! closes, inbound data and discovery results) arrives as a message on one
//! queue and is applied by [`Monitor::run`] on a single task, so the registry
//! never needs a lock. Events carry the endpoint address and connection id
//! rather than references; an event whose session is gone or was replaced is
//! recognised as stale and ignored.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use e133_discovery::{parse_slp_url, DiscoveryResult, DiscoveryThread};
use e133_wire::{
    Cid, E133Header, E133Sender, PduPipeline, PidStore, RdmHeader, RootSender, StreamDecoder,
    TransportHeader, TransportKind, E133_PORT, ROOT_ENDPOINT,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::connector::Connector;
use crate::health::{HealthCheckedConnection, SharedWriter, DEFAULT_HEARTBEAT_INTERVAL};
use crate::registry::{Registration, SessionRegistry, SessionSocket};

/// Initial capacity of each connection's read buffer
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Default name placed in outgoing E1.33 headers
pub const DEFAULT_SOURCE_NAME: &str = "e133-monitor";

/// Everything the monitor reacts to
#[derive(Debug)]
pub enum MonitorEvent {
    /// The connector established a connection
    Connected {
        /// Endpoint address
        address: Ipv4Addr,
        /// Remote port
        port: u16,
        /// The connected stream
        stream: TcpStream,
    },
    /// A health check lost liveness
    Unhealthy {
        /// Endpoint address
        endpoint: Ipv4Addr,
        /// Connection the health check belonged to
        connection_id: u64,
    },
    /// The peer closed the connection or the stream became undecodable
    Closed {
        /// Endpoint address
        endpoint: Ipv4Addr,
        /// Connection that closed
        connection_id: u64,
    },
    /// An E1.33 PDU was received
    DataReceived {
        /// Source and transport of the PDU
        header: TransportHeader,
    },
    /// Stop the monitor
    Stop,
}

/// What happens after a session is lost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionLossPolicy {
    /// Tear the session down and connect again
    #[default]
    Reconnect,
    /// Tear the session down and stop the whole monitor
    Shutdown,
}

/// Monitor settings
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Port every endpoint is contacted on
    pub port: u16,
    /// Heartbeat interval for health checks
    pub heartbeat_interval: Duration,
    /// Reaction to a lost session
    pub session_loss: SessionLossPolicy,
    /// Name placed in outgoing E1.33 headers
    pub source_name: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            port: E133_PORT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            session_loss: SessionLossPolicy::default(),
            source_name: DEFAULT_SOURCE_NAME.to_string(),
        }
    }
}

/// Cloneable handle for stopping a running monitor
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    events: mpsc::UnboundedSender<MonitorEvent>,
}

impl MonitorHandle {
    /// Ask the monitor to shut down; false if it already stopped
    pub fn stop(&self) -> bool {
        self.events.send(MonitorEvent::Stop).is_ok()
    }
}

/// Owns the registry, the connector and the discovery thread
pub struct Monitor {
    settings: MonitorSettings,
    registry: SessionRegistry,
    connector: Box<dyn Connector>,
    backoff: Arc<dyn BackoffPolicy>,
    sender: Arc<E133Sender>,
    pipeline: Arc<PduPipeline>,
    events_tx: mpsc::UnboundedSender<MonitorEvent>,
    events_rx: mpsc::UnboundedReceiver<MonitorEvent>,
    discovery: Option<DiscoveryThread>,
    discovery_rx: Option<mpsc::UnboundedReceiver<DiscoveryResult>>,
    next_connection_id: u64,
}

impl Monitor {
    /// Create a monitor; the connector must post to `events_tx`
    pub fn new(
        settings: MonitorSettings,
        connector: Box<dyn Connector>,
        backoff: Arc<dyn BackoffPolicy>,
        pids: Arc<PidStore>,
        events_tx: mpsc::UnboundedSender<MonitorEvent>,
        events_rx: mpsc::UnboundedReceiver<MonitorEvent>,
    ) -> Self {
        let sender = Arc::new(E133Sender::new(
            RootSender::new(Cid::generate()),
            settings.source_name.clone(),
        ));
        info!("Using CID {}", sender.cid());

        let mut pipeline = PduPipeline::new();

        let data_events = events_tx.clone();
        pipeline.set_on_data(move |header| {
            let _ = data_events.send(MonitorEvent::DataReceived { header: *header });
        });
        pipeline.set_rdm_handler(ROOT_ENDPOINT, move |transport, header, payload| {
            endpoint_request(&pids, transport, header, payload)
        });

        Self {
            settings,
            registry: SessionRegistry::new(),
            connector,
            backoff,
            sender,
            pipeline: Arc::new(pipeline),
            events_tx,
            events_rx,
            discovery: None,
            discovery_rx: None,
            next_connection_id: 1,
        }
    }

    /// Handle for stopping the monitor from elsewhere
    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Session registry
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Take ownership of a started discovery thread and queue its first round
    pub fn attach_discovery(
        &mut self,
        discovery: DiscoveryThread,
        results: mpsc::UnboundedReceiver<DiscoveryResult>,
    ) {
        if !discovery.discover() {
            warn!("Discovery thread is not running");
        }
        self.discovery = Some(discovery);
        self.discovery_rx = Some(results);
    }

    /// Register a fixed list of endpoints
    pub fn populate_responder_list(&mut self, targets: &[Ipv4Addr]) {
        for target in targets {
            self.add_endpoint(*target);
        }
    }

    /// Track an endpoint and start connecting; false if it was already tracked
    pub fn add_endpoint(&mut self, endpoint: Ipv4Addr) -> bool {
        match self.registry.register(endpoint) {
            Registration::Inserted => {
                info!("Adding endpoint {}", endpoint);
                self.connect(endpoint);
                true
            }
            Registration::AlreadyPresent => {
                debug!("Endpoint {} already tracked", endpoint);
                false
            }
        }
    }

    fn connect(&mut self, endpoint: Ipv4Addr) {
        let Some(state) = self.registry.lookup_mut(&endpoint) else {
            error!("Cannot connect to {}: not registered", endpoint);
            return;
        };
        let prior_attempts = state.connection_attempts;
        state.connection_attempts += 1;

        let address = SocketAddrV4::new(endpoint, self.settings.port);
        if !self
            .connector
            .add_endpoint(address, self.backoff.clone(), prior_attempts)
        {
            debug!("Connect to {} already in progress", address);
        }
    }

    /// Apply one discovery round
    pub fn handle_discovery(&mut self, result: DiscoveryResult) {
        let urls = match result {
            Ok(urls) => urls,
            Err(e) => {
                warn!("SLP discovery failed: {}", e);
                return;
            }
        };

        for url in urls {
            match parse_slp_url(&url) {
                Ok((uid, ip)) if uid.is_broadcast() => {
                    warn!("UID {} at {} is a broadcast address, skipping", uid, ip);
                }
                Ok((uid, ip)) => {
                    info!("Located {} at {}", uid, ip);
                    self.add_endpoint(ip);
                }
                Err(e) => warn!("Failed to parse SLP url {}: {}", url, e),
            }
        }
    }

    /// Apply one event; `Break` means the monitor should stop
    pub async fn handle_event(&mut self, event: MonitorEvent) -> ControlFlow<()> {
        match event {
            MonitorEvent::Connected {
                address,
                port,
                stream,
            } => {
                self.on_connected(address, port, stream).await;
                ControlFlow::Continue(())
            }
            MonitorEvent::Unhealthy {
                endpoint,
                connection_id,
            } => self.on_session_lost(endpoint, connection_id, "unhealthy").await,
            MonitorEvent::Closed {
                endpoint,
                connection_id,
            } => self.on_session_lost(endpoint, connection_id, "closed").await,
            MonitorEvent::DataReceived { header } => {
                self.on_data(&header);
                ControlFlow::Continue(())
            }
            MonitorEvent::Stop => {
                info!("Stop requested");
                ControlFlow::Break(())
            }
        }
    }

    async fn on_connected(&mut self, address: Ipv4Addr, port: u16, stream: TcpStream) {
        let peer = SocketAddrV4::new(address, port);

        let Some(state) = self.registry.lookup_mut(&address) else {
            error!("Connected to {} but it is not registered, closing", peer);
            return;
        };
        if state.socket.is_some() || state.health.is_some() {
            error!("Session to {} already active, dropping new connection", peer);
            return;
        }

        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;

        let (read_half, write_half) = stream.into_split();
        let boxed: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
        let writer: SharedWriter = Arc::new(Mutex::new(boxed));

        let unhealthy_events = self.events_tx.clone();
        let mut health = HealthCheckedConnection::new(
            self.sender.clone(),
            writer.clone(),
            self.settings.heartbeat_interval,
            Box::new(move || {
                let _ = unhealthy_events.send(MonitorEvent::Unhealthy {
                    endpoint: address,
                    connection_id,
                });
            }),
        );

        if let Err(e) = health.setup().await {
            warn!("Health check setup for {} failed: {}, closing", peer, e);
            drop(health);
            if let Err(e) = writer.lock().await.shutdown().await {
                debug!("Shutdown of {} failed: {}", peer, e);
            }
            return;
        }

        let reader = spawn_reader(
            read_half,
            peer,
            connection_id,
            self.pipeline.clone(),
            self.events_tx.clone(),
        );

        state.socket = Some(SessionSocket::new(peer, writer, reader));
        state.health = Some(health);
        state.connection_id = Some(connection_id);
        info!("Session to {} active (connection {})", peer, connection_id);
    }

    async fn on_session_lost(
        &mut self,
        endpoint: Ipv4Addr,
        connection_id: u64,
        reason: &str,
    ) -> ControlFlow<()> {
        let Some(state) = self.registry.lookup_mut(&endpoint) else {
            error!("Session {} for unknown endpoint {}", reason, endpoint);
            return ControlFlow::Continue(());
        };
        if state.connection_id != Some(connection_id) {
            error!(
                "Ignoring {} event for {} (connection {} no longer current)",
                reason, endpoint, connection_id
            );
            return ControlFlow::Continue(());
        }

        warn!("Session to {} {}, tearing down", endpoint, reason);
        state.teardown().await;

        match self.settings.session_loss {
            SessionLossPolicy::Shutdown => {
                warn!("Lost session to {}, stopping monitor", endpoint);
                ControlFlow::Break(())
            }
            SessionLossPolicy::Reconnect => {
                self.connect(endpoint);
                ControlFlow::Continue(())
            }
        }
    }

    fn on_data(&self, header: &TransportHeader) {
        if header.transport != TransportKind::Tcp {
            debug!("Ignoring {:?} data from {}", header.transport, header.source);
            return;
        }

        let endpoint = *header.source.ip();
        match self.registry.lookup(&endpoint) {
            Some(state) => match &state.health {
                Some(health) => health.heartbeat_received(),
                None => debug!("Data from {} without an active session", endpoint),
            },
            None => error!("Data from unknown endpoint {}", endpoint),
        }
    }

    /// Run the event loop until stopped, then shut down
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("Monitor running, {} endpoint(s) registered", self.registry.len());

        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    if self.handle_event(event).await.is_break() {
                        break;
                    }
                }

                result = recv_discovery(&mut self.discovery_rx) => {
                    match result {
                        Some(result) => self.handle_discovery(result),
                        None => {
                            debug!("Discovery results channel closed");
                            self.discovery_rx = None;
                        }
                    }
                }

                else => break,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Cancel pending connects, close every session and join discovery
    pub async fn shutdown(&mut self) {
        info!("Shutting down monitor");
        self.connector.cancel_all();
        self.registry.clear().await;

        if let Some(mut discovery) = self.discovery.take() {
            self.discovery_rx = None;
            if tokio::task::spawn_blocking(move || discovery.join())
                .await
                .is_err()
            {
                warn!("Failed to join discovery thread");
            }
        }
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("settings", &self.settings)
            .field("endpoints", &self.registry.len())
            .field("discovery", &self.discovery)
            .finish()
    }
}

async fn recv_discovery(
    rx: &mut Option<mpsc::UnboundedReceiver<DiscoveryResult>>,
) -> Option<DiscoveryResult> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read a connection, feeding complete blocks through the pipeline
fn spawn_reader<R>(
    mut reader: R,
    peer: SocketAddrV4,
    connection_id: u64,
    pipeline: Arc<PduPipeline>,
    events: mpsc::UnboundedSender<MonitorEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let transport = TransportHeader::tcp(peer);
        let mut decoder = StreamDecoder::new();
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

        'read: loop {
            match reader.read_buf(&mut buf).await {
                Ok(0) => {
                    info!("Connection to {} closed by peer", peer);
                    break;
                }
                Ok(_) => loop {
                    match decoder.decode(&mut buf) {
                        Ok(Some(block)) => {
                            if let Err(e) = pipeline.inflate(&transport, block) {
                                warn!("Dropping undecodable PDU from {}: {}", peer, e);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Stream from {} is unusable: {}", peer, e);
                            break 'read;
                        }
                    }
                },
                Err(e) => {
                    warn!("Read from {} failed: {}", peer, e);
                    break;
                }
            }
        }

        let _ = events.send(MonitorEvent::Closed {
            endpoint: *peer.ip(),
            connection_id,
        });
    })
}

/// Endpoint zero handler: record what arrived
fn endpoint_request(
    pids: &PidStore,
    transport: &TransportHeader,
    header: &E133Header,
    payload: Bytes,
) {
    info!(
        "Got message from {} ({}, endpoint {}, seq {})",
        transport.source, header.source, header.endpoint, header.sequence
    );

    match RdmHeader::parse(&payload) {
        Ok(rdm) => {
            let name = pids
                .lookup(rdm.param_id, rdm.source.manufacturer_id())
                .map(|pid| pid.name.as_str())
                .unwrap_or("UNKNOWN");
            info!(
                "  {} -> {} {:?} {} ({:#06x}), {} byte(s) of data",
                rdm.source,
                rdm.destination,
                rdm.command_class,
                name,
                rdm.param_id,
                rdm.param_data.len()
            );
        }
        Err(e) => debug!("Payload from {} is not RDM: {}", transport.source, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use e133_wire::DMP_GET_PROPERTY;
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    #[derive(Debug, Default, Clone)]
    struct RecordingConnector {
        calls: Arc<StdMutex<Vec<SocketAddrV4>>>,
        prior_attempts: Arc<StdMutex<Vec<u32>>>,
        cancelled: Arc<StdMutex<bool>>,
    }

    impl Connector for RecordingConnector {
        fn add_endpoint(
            &mut self,
            endpoint: SocketAddrV4,
            _: Arc<dyn BackoffPolicy>,
            prior_attempts: u32,
        ) -> bool {
            self.calls.lock().unwrap().push(endpoint);
            self.prior_attempts.lock().unwrap().push(prior_attempts);
            true
        }

        fn cancel_all(&mut self) {
            *self.cancelled.lock().unwrap() = true;
        }
    }

    fn monitor(policy: SessionLossPolicy) -> (Monitor, RecordingConnector) {
        let connector = RecordingConnector::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let settings = MonitorSettings {
            heartbeat_interval: Duration::from_secs(60),
            session_loss: policy,
            ..MonitorSettings::default()
        };
        let monitor = Monitor::new(
            settings,
            Box::new(connector.clone()),
            Arc::new(crate::backoff::LinearBackoffPolicy::default()),
            Arc::new(PidStore::default()),
            tx,
            rx,
        );
        (monitor, connector)
    }

    async fn socket_pair() -> (TcpStream, TcpStream, u16) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server, port)
    }

    async fn connect_localhost(monitor: &mut Monitor) -> (TcpStream, u64) {
        let (client, server, port) = socket_pair().await;
        let flow = monitor
            .handle_event(MonitorEvent::Connected {
                address: Ipv4Addr::LOCALHOST,
                port,
                stream: client,
            })
            .await;
        assert!(flow.is_continue());

        let state = monitor.registry().lookup(&Ipv4Addr::LOCALHOST).unwrap();
        assert!(state.socket.is_some());
        assert!(state.health.is_some());
        (server, state.connection_id.unwrap())
    }

    fn assert_cleared(monitor: &Monitor) {
        let state = monitor.registry().lookup(&Ipv4Addr::LOCALHOST).unwrap();
        assert!(state.socket.is_none());
        assert!(state.health.is_none());
        assert!(state.connection_id.is_none());
    }

    #[tokio::test]
    async fn test_registration_is_idempotent() {
        let (mut monitor, connector) = monitor(SessionLossPolicy::Reconnect);
        let endpoint = Ipv4Addr::new(10, 0, 0, 1);

        assert!(monitor.add_endpoint(endpoint));
        assert!(!monitor.add_endpoint(endpoint));

        assert_eq!(monitor.registry().len(), 1);
        assert_eq!(connector.calls.lock().unwrap().len(), 1);
        assert_eq!(
            monitor.registry().lookup(&endpoint).unwrap().connection_attempts,
            1
        );
    }

    #[tokio::test]
    async fn test_discovery_registers_each_url() {
        let (mut monitor, connector) = monitor(SessionLossPolicy::Reconnect);
        monitor.handle_discovery(Ok(vec![
            "service:e133.esta://10.0.0.1/7a70:00000001".to_string(),
            "service:e133.esta://10.0.0.2/7a70:00000002".to_string(),
        ]));

        assert_eq!(monitor.registry().len(), 2);
        let calls = connector.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls.contains(&SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), E133_PORT)));
    }

    #[tokio::test]
    async fn test_discovery_skips_broadcast_and_bad_urls() {
        let (mut monitor, connector) = monitor(SessionLossPolicy::Reconnect);
        monitor.handle_discovery(Ok(vec![
            "service:e133.esta://10.0.0.1/7a70:ffffffff".to_string(),
            "service:e133.esta://10.0.0.2/ffff:ffffffff".to_string(),
            "not a url".to_string(),
        ]));
        monitor.handle_discovery(Err(e133_discovery::DiscoveryError::Malformed("test")));

        assert!(monitor.registry().is_empty());
        assert!(connector.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connected_unknown_endpoint_closes_socket() {
        let (mut monitor, _) = monitor(SessionLossPolicy::Reconnect);
        let (client, mut server, port) = socket_pair().await;

        let flow = monitor
            .handle_event(MonitorEvent::Connected {
                address: Ipv4Addr::LOCALHOST,
                port,
                stream: client,
            })
            .await;
        assert!(flow.is_continue());
        assert!(monitor.registry().is_empty());

        let mut buf = [0u8; 64];
        let read = timeout(Duration::from_secs(2), server.read(&mut buf)).await;
        assert_eq!(read.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connected_sends_heartbeat() {
        let (mut monitor, _) = monitor(SessionLossPolicy::Reconnect);
        monitor.add_endpoint(Ipv4Addr::LOCALHOST);
        let (mut server, _) = connect_localhost(&mut monitor).await;

        let mut buf = BytesMut::with_capacity(1024);
        let mut decoder = StreamDecoder::new();
        let block = timeout(Duration::from_secs(2), async {
            loop {
                server.read_buf(&mut buf).await.unwrap();
                if let Some(block) = decoder.decode(&mut buf).unwrap() {
                    return block;
                }
            }
        })
        .await
        .unwrap();
        assert!(!block.is_empty());
    }

    #[tokio::test]
    async fn test_unhealthy_with_shutdown_policy_stops() {
        let (mut monitor, _) = monitor(SessionLossPolicy::Shutdown);
        monitor.add_endpoint(Ipv4Addr::LOCALHOST);
        let (_server, connection_id) = connect_localhost(&mut monitor).await;

        let flow = monitor
            .handle_event(MonitorEvent::Unhealthy {
                endpoint: Ipv4Addr::LOCALHOST,
                connection_id,
            })
            .await;
        assert!(flow.is_break());
        assert_cleared(&monitor);

        // The matching close afterwards is a no-op
        let flow = monitor
            .handle_event(MonitorEvent::Closed {
                endpoint: Ipv4Addr::LOCALHOST,
                connection_id,
            })
            .await;
        assert!(flow.is_continue());
        assert_eq!(monitor.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_unhealthy_with_reconnect_policy_reconnects() {
        let (mut monitor, connector) = monitor(SessionLossPolicy::Reconnect);
        monitor.add_endpoint(Ipv4Addr::LOCALHOST);
        let (_server, connection_id) = connect_localhost(&mut monitor).await;

        let flow = monitor
            .handle_event(MonitorEvent::Unhealthy {
                endpoint: Ipv4Addr::LOCALHOST,
                connection_id,
            })
            .await;
        assert!(flow.is_continue());
        assert_cleared(&monitor);
        assert_eq!(connector.calls.lock().unwrap().len(), 2);
        assert_eq!(*connector.prior_attempts.lock().unwrap(), vec![0, 1]);
        assert_eq!(
            monitor
                .registry()
                .lookup(&Ipv4Addr::LOCALHOST)
                .unwrap()
                .connection_attempts,
            2
        );

        // A second escalation for the old connection changes nothing
        monitor
            .handle_event(MonitorEvent::Unhealthy {
                endpoint: Ipv4Addr::LOCALHOST,
                connection_id,
            })
            .await;
        assert_eq!(connector.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_peer_close_reported_by_reader() {
        let (mut monitor, connector) = monitor(SessionLossPolicy::Reconnect);
        monitor.add_endpoint(Ipv4Addr::LOCALHOST);
        let (server, connection_id) = connect_localhost(&mut monitor).await;
        drop(server);

        let event = timeout(Duration::from_secs(2), monitor.events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match &event {
            MonitorEvent::Closed {
                endpoint,
                connection_id: closed,
            } => {
                assert_eq!(*endpoint, Ipv4Addr::LOCALHOST);
                assert_eq!(*closed, connection_id);
            }
            other => panic!("expected Closed, got {:?}", other),
        }

        assert!(monitor.handle_event(event).await.is_continue());
        assert_cleared(&monitor);
        assert_eq!(connector.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_event_ignored() {
        let (mut monitor, _) = monitor(SessionLossPolicy::Shutdown);
        monitor.add_endpoint(Ipv4Addr::LOCALHOST);
        let (_server, connection_id) = connect_localhost(&mut monitor).await;

        let flow = monitor
            .handle_event(MonitorEvent::Unhealthy {
                endpoint: Ipv4Addr::LOCALHOST,
                connection_id: connection_id + 100,
            })
            .await;
        assert!(flow.is_continue());
        assert!(monitor
            .registry()
            .lookup(&Ipv4Addr::LOCALHOST)
            .unwrap()
            .is_connected());

        let flow = monitor
            .handle_event(MonitorEvent::Closed {
                endpoint: Ipv4Addr::new(10, 9, 9, 9),
                connection_id,
            })
            .await;
        assert!(flow.is_continue());
    }

    #[tokio::test]
    async fn test_second_connection_refused_while_active() {
        let (mut monitor, _) = monitor(SessionLossPolicy::Reconnect);
        monitor.add_endpoint(Ipv4Addr::LOCALHOST);
        let (_server, connection_id) = connect_localhost(&mut monitor).await;

        let (client, mut server, port) = socket_pair().await;
        monitor
            .handle_event(MonitorEvent::Connected {
                address: Ipv4Addr::LOCALHOST,
                port,
                stream: client,
            })
            .await;

        let state = monitor.registry().lookup(&Ipv4Addr::LOCALHOST).unwrap();
        assert_eq!(state.connection_id, Some(connection_id));

        let mut buf = [0u8; 64];
        let read = timeout(Duration::from_secs(2), server.read(&mut buf)).await;
        assert_eq!(read.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_only_stream_data_refreshes_liveness() {
        let (mut monitor, _) = monitor(SessionLossPolicy::Reconnect);
        monitor.add_endpoint(Ipv4Addr::LOCALHOST);
        let _session = connect_localhost(&mut monitor).await;

        let last_heartbeat = |monitor: &Monitor| {
            monitor
                .registry()
                .lookup(&Ipv4Addr::LOCALHOST)
                .unwrap()
                .health
                .as_ref()
                .unwrap()
                .last_heartbeat()
        };
        let before = last_heartbeat(&monitor);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let source = SocketAddrV4::new(Ipv4Addr::LOCALHOST, E133_PORT);
        monitor
            .handle_event(MonitorEvent::DataReceived {
                header: TransportHeader::udp(source),
            })
            .await;
        assert_eq!(last_heartbeat(&monitor), before);

        monitor
            .handle_event(MonitorEvent::DataReceived {
                header: TransportHeader::tcp(source),
            })
            .await;
        assert!(last_heartbeat(&monitor) > before);
    }

    #[tokio::test]
    async fn test_inbound_pdu_reported_as_data() {
        let (mut monitor, _) = monitor(SessionLossPolicy::Reconnect);
        monitor.add_endpoint(Ipv4Addr::LOCALHOST);
        let (mut server, _) = connect_localhost(&mut monitor).await;

        let device = E133Sender::new(RootSender::new(Cid::generate()), "device");
        let pdu = device.rdm(ROOT_ENDPOINT, DMP_GET_PROPERTY, b"not-rdm").unwrap();
        server.write_all(&pdu).await.unwrap();

        let event = timeout(Duration::from_secs(2), monitor.events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            MonitorEvent::DataReceived { header } => {
                assert_eq!(header.transport, TransportKind::Tcp);
                assert_eq!(*header.source.ip(), Ipv4Addr::LOCALHOST);
            }
            other => panic!("expected DataReceived, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_stops_and_clears_registry() {
        let (mut monitor, connector) = monitor(SessionLossPolicy::Reconnect);
        monitor.populate_responder_list(&[Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]);
        assert_eq!(connector.calls.lock().unwrap().len(), 2);

        let handle = monitor.handle();
        assert!(handle.stop());
        timeout(Duration::from_secs(2), monitor.run())
            .await
            .unwrap()
            .unwrap();
        assert!(*connector.cancelled.lock().unwrap());
    }

    #[tokio::test]
    async fn test_reconnect_after_peer_close_waits_for_backoff() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Device that accepts every connection and drops it straight away
        let accepted = Arc::new(StdMutex::new(0usize));
        let counter = accepted.clone();
        let device = tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                *counter.lock().unwrap() += 1;
                drop(stream);
            }
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let settings = MonitorSettings {
            port,
            heartbeat_interval: Duration::from_secs(60),
            ..MonitorSettings::default()
        };
        let connector = crate::connector::TcpConnector::new(Duration::from_secs(1), tx.clone());
        let mut monitor = Monitor::new(
            settings,
            Box::new(connector),
            Arc::new(crate::backoff::LinearBackoffPolicy::default()),
            Arc::new(PidStore::default()),
            tx,
            rx,
        );
        monitor.add_endpoint(Ipv4Addr::LOCALHOST);

        let _ = timeout(Duration::from_secs(1), monitor.run()).await;
        device.abort();

        // Only the first connect happens; the reconnect sleeps for 5s
        assert_eq!(*accepted.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_health_setup_failure_is_fail_closed() {
        let connector = RecordingConnector::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let settings = MonitorSettings {
            heartbeat_interval: Duration::ZERO,
            ..MonitorSettings::default()
        };
        let mut monitor = Monitor::new(
            settings,
            Box::new(connector.clone()),
            Arc::new(crate::backoff::LinearBackoffPolicy::default()),
            Arc::new(PidStore::default()),
            tx,
            rx,
        );
        monitor.add_endpoint(Ipv4Addr::LOCALHOST);
        assert_eq!(connector.calls.lock().unwrap().len(), 1);

        let (client, mut server, port) = socket_pair().await;
        let flow = monitor
            .handle_event(MonitorEvent::Connected {
                address: Ipv4Addr::LOCALHOST,
                port,
                stream: client,
            })
            .await;
        assert!(flow.is_continue());
        assert_cleared(&monitor);

        // Socket was shut down and no retry was scheduled
        let mut buf = [0u8; 64];
        let read = timeout(Duration::from_secs(2), server.read(&mut buf)).await;
        assert_eq!(read.unwrap().unwrap(), 0);
        assert_eq!(connector.calls.lock().unwrap().len(), 1);
        assert!(monitor.events_rx.try_recv().is_err());
    }
}
