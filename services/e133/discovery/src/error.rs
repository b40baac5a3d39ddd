//! Discovery error types.

use e133_wire::UidError;
use thiserror::Error;

/// Errors raised while discovering devices
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Socket setup or I/O failed
    #[error("discovery I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A reply could not be decoded
    #[error("malformed SLP message: {0}")]
    Malformed(&'static str),

    /// A reply carried a non-zero SLP error code
    #[error("SLP error code {0}")]
    Slp(u16),

    /// Operation called in the wrong lifecycle state
    #[error("discovery {0}")]
    State(&'static str),
}

/// Errors from [`parse_slp_url`](crate::parse_slp_url)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlParseError {
    /// URL did not start with the E1.33 service type
    #[error("not an e133 service url: {0}")]
    Scheme(String),

    /// URL had no `/<uid>` part
    #[error("missing uid in url: {0}")]
    MissingUid(String),

    /// Address part was not an IPv4 address
    #[error("invalid address '{0}'")]
    Address(String),

    /// UID part did not parse
    #[error(transparent)]
    Uid(#[from] UidError),
}
