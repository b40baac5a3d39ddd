//! E1.33 framing layer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::pdu::PduLayout;
use crate::WireError;

/// Well-known E1.33 TCP/UDP port
pub const E133_PORT: u16 = 5569;

/// Fixed size of the source name field
pub const SOURCE_NAME_SIZE: usize = 64;

/// Source name, sequence, endpoint and one reserved byte
pub const E133_HEADER_SIZE: usize = SOURCE_NAME_SIZE + 4 + 2 + 1;

/// E1.33 layer: 4-byte vector, fixed header
pub const E133_LAYOUT: PduLayout = PduLayout::new(4, E133_HEADER_SIZE);

/// Framing vector for RDM-carrying PDUs
pub const VECTOR_FRAMING_RDMNET: u32 = 1;

/// Framing vector for heartbeats (no payload)
pub const VECTOR_FRAMING_HEARTBEAT: u32 = 2;

/// Decoded E1.33 layer header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct E133Header {
    /// Human readable name of the sender
    pub source: String,
    /// Per-sender sequence number
    pub sequence: u32,
    /// Endpoint the PDU is addressed to (0 is the root endpoint)
    pub endpoint: u16,
}

impl E133Header {
    /// Create a header
    pub fn new(source: impl Into<String>, sequence: u32, endpoint: u16) -> Self {
        Self {
            source: source.into(),
            sequence,
            endpoint,
        }
    }

    /// Encode to the fixed wire size; long names are truncated, short ones NUL padded
    pub fn encode(&self, buf: &mut BytesMut) {
        let name = self.source.as_bytes();
        let used = name.len().min(SOURCE_NAME_SIZE);
        buf.put_slice(&name[..used]);
        buf.put_bytes(0, SOURCE_NAME_SIZE - used);
        buf.put_u32(self.sequence);
        buf.put_u16(self.endpoint);
        buf.put_u8(0); // reserved
    }

    /// Decode from raw header bytes
    pub fn decode(mut header: Bytes) -> Result<Self, WireError> {
        if header.len() < E133_HEADER_SIZE {
            return Err(WireError::Header("e1.33"));
        }

        let name = header.split_to(SOURCE_NAME_SIZE);
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        let source = String::from_utf8_lossy(&name[..end]).into_owned();
        let sequence = header.get_u32();
        let endpoint = header.get_u16();

        Ok(Self {
            source,
            sequence,
            endpoint,
        })
    }
}
