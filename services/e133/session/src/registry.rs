//! Per-endpoint session bookkeeping.
//!
//! The registry is the single owner of every socket and health check. Entries
//! are created on first registration and only removed at shutdown; a lost
//! session clears its fields but keeps its entry.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};

use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::health::{HealthCheckedConnection, SharedWriter};

/// A connected socket: its write side and the task reading it
pub struct SessionSocket {
    peer: SocketAddrV4,
    writer: SharedWriter,
    reader: JoinHandle<()>,
}

impl SessionSocket {
    /// Wrap a connected socket
    pub fn new(peer: SocketAddrV4, writer: SharedWriter, reader: JoinHandle<()>) -> Self {
        Self {
            peer,
            writer,
            reader,
        }
    }

    /// Remote address
    pub fn peer(&self) -> SocketAddrV4 {
        self.peer
    }

    /// Shared write side
    pub fn writer(&self) -> SharedWriter {
        self.writer.clone()
    }

    /// Stop reading and shut the write side down
    pub async fn close(self) {
        self.reader.abort();
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!("Shutdown of {} failed: {}", self.peer, e);
        }
    }
}

impl std::fmt::Debug for SessionSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSocket")
            .field("peer", &self.peer)
            .field("reading", &!self.reader.is_finished())
            .finish()
    }
}

impl Drop for SessionSocket {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// State kept for one endpoint
#[derive(Debug, Default)]
pub struct SessionState {
    /// Connector registrations made for this endpoint
    pub connection_attempts: u32,
    /// Live socket, once connected
    pub socket: Option<SessionSocket>,
    /// Health check, present only while `socket` is
    pub health: Option<HealthCheckedConnection>,
    /// Identifier of the current connection
    pub connection_id: Option<u64>,
}

impl SessionState {
    /// True while a socket is held
    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Release the health check and the socket; returns false if already clear
    pub async fn teardown(&mut self) -> bool {
        let had_session = self.socket.is_some() || self.health.is_some();

        // Stop heartbeats before the socket goes away
        self.health = None;
        if let Some(socket) = self.socket.take() {
            socket.close().await;
        }
        self.connection_id = None;

        had_session
    }
}

/// Result of [`SessionRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A new entry was created
    Inserted,
    /// The endpoint was already tracked
    AlreadyPresent,
}

/// Map from endpoint address to session state
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<Ipv4Addr, SessionState>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an endpoint; an existing entry is left untouched
    pub fn register(&mut self, endpoint: Ipv4Addr) -> Registration {
        if self.sessions.contains_key(&endpoint) {
            return Registration::AlreadyPresent;
        }
        self.sessions.insert(endpoint, SessionState::default());
        Registration::Inserted
    }

    /// Look an endpoint up
    pub fn lookup(&self, endpoint: &Ipv4Addr) -> Option<&SessionState> {
        self.sessions.get(endpoint)
    }

    /// Look an endpoint up for modification
    pub fn lookup_mut(&mut self, endpoint: &Ipv4Addr) -> Option<&mut SessionState> {
        self.sessions.get_mut(endpoint)
    }

    /// Release an endpoint's resources and forget it
    pub async fn remove(&mut self, endpoint: &Ipv4Addr) -> bool {
        match self.sessions.remove(endpoint) {
            Some(mut state) => {
                state.teardown().await;
                true
            }
            None => false,
        }
    }

    /// Remove every endpoint
    pub async fn clear(&mut self) {
        for (endpoint, mut state) in self.sessions.drain() {
            if state.teardown().await {
                debug!("Closed session to {}", endpoint);
            }
        }
    }

    /// Tracked endpoints
    pub fn endpoints(&self) -> impl Iterator<Item = &Ipv4Addr> {
        self.sessions.keys()
    }

    /// Number of tracked endpoints
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWrite};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::Mutex;

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = SessionRegistry::new();
        let endpoint = Ipv4Addr::new(10, 0, 0, 1);
        assert_eq!(registry.register(endpoint), Registration::Inserted);
        registry.lookup_mut(&endpoint).unwrap().connection_attempts = 3;

        assert_eq!(registry.register(endpoint), Registration::AlreadyPresent);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(&endpoint).unwrap().connection_attempts, 3);
    }

    #[tokio::test]
    async fn test_remove_closes_socket() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        let (read_half, write_half) = client.into_split();
        let reader = tokio::spawn(async move {
            let _read_half = read_half;
            std::future::pending::<()>().await
        });
        let boxed: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
        let socket = SessionSocket::new(
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, addr.port()),
            Arc::new(Mutex::new(boxed)),
            reader,
        );

        let mut registry = SessionRegistry::new();
        registry.register(Ipv4Addr::LOCALHOST);
        let state = registry.lookup_mut(&Ipv4Addr::LOCALHOST).unwrap();
        state.socket = Some(socket);
        state.connection_id = Some(1);
        assert!(state.is_connected());

        assert!(registry.remove(&Ipv4Addr::LOCALHOST).await);
        assert!(!registry.remove(&Ipv4Addr::LOCALHOST).await);
        assert!(registry.is_empty());

        // Write side was shut down, so the peer reads EOF
        let mut buf = [0u8; 16];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_teardown_of_empty_state() {
        let mut state = SessionState::default();
        assert!(!state.teardown().await);
        assert!(state.socket.is_none());
        assert!(state.health.is_none());
    }
}
