//! Session error types.

use std::net::SocketAddrV4;

use e133_wire::WireError;
use thiserror::Error;

/// Errors raised by connections and health checks
#[derive(Error, Debug)]
pub enum SessionError {
    /// The initial heartbeat could not be written
    #[error("heartbeat write failed: {0}")]
    Heartbeat(#[source] std::io::Error),

    /// A connect attempt did not complete in time
    #[error("connect to {0} timed out")]
    ConnectTimeout(SocketAddrV4),

    /// Building an outgoing PDU failed
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Heartbeat interval of zero
    #[error("heartbeat interval must be non-zero")]
    ZeroInterval,

    /// Operation called in the wrong lifecycle state
    #[error("health check {0}")]
    State(&'static str),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
