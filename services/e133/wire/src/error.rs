//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Incomplete PDU (need more data)
    #[error("incomplete pdu")]
    Incomplete,

    /// The stream did not start with the ACN packet identifier
    #[error("bad acn preamble")]
    Preamble,

    /// Size limit exceeded
    #[error("pdu block size limit exceeded: {0}")]
    Size(usize),

    /// Flags/length field is inconsistent with the bytes available
    #[error("invalid pdu length {0}")]
    Length(usize),

    /// A PDU asked to inherit a field but no previous PDU supplied one
    #[error("no previous pdu to inherit {0} from")]
    Inherit(&'static str),

    /// A layer header was shorter than its fixed size
    #[error("truncated {0} header")]
    Header(&'static str),

    /// Vector not handled by this layer
    #[error("unknown vector {0:#x}")]
    Vector(u32),
}
