//! ACN TCP stream framing.
//!
//! A TCP stream carries a sequence of root PDU blocks, each preceded by the
//! 12-byte ACN packet identifier and a big-endian u32 block length.

use std::net::SocketAddrV4;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::WireError;

/// ACN packet identifier that opens every stream block
pub const ACN_PACKET_IDENTIFIER: [u8; 12] = *b"ASC-E1.17\0\0\0";

/// Identifier plus block length
pub const PREAMBLE_SIZE: usize = ACN_PACKET_IDENTIFIER.len() + 4;

/// Largest root block accepted from a peer (64 KiB)
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Transport a message arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Stream transport, the only one that carries session traffic
    Tcp,
    /// Datagram transport
    Udp,
}

/// Where a message came from and over which transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHeader {
    /// Peer address
    pub source: SocketAddrV4,
    /// Transport kind
    pub transport: TransportKind,
}

impl TransportHeader {
    /// Header for a message received over TCP
    pub fn tcp(source: SocketAddrV4) -> Self {
        Self {
            source,
            transport: TransportKind::Tcp,
        }
    }

    /// Header for a message received over UDP
    pub fn udp(source: SocketAddrV4) -> Self {
        Self {
            source,
            transport: TransportKind::Udp,
        }
    }
}

/// Incremental decoder splitting a TCP byte stream into root PDU blocks
#[derive(Debug)]
pub struct StreamDecoder {
    max_block_size: usize,
}

impl StreamDecoder {
    /// Create a decoder with the default block size limit
    pub fn new() -> Self {
        Self {
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
        }
    }

    /// Create a decoder with a custom block size limit
    pub fn with_max_block_size(max_block_size: usize) -> Self {
        Self { max_block_size }
    }

    /// Decode one root block from a buffer, or `None` if more bytes are needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, WireError> {
        // Reject garbage as soon as the identifier bytes disagree
        let visible = buf.len().min(ACN_PACKET_IDENTIFIER.len());
        if buf[..visible] != ACN_PACKET_IDENTIFIER[..visible] {
            return Err(WireError::Preamble);
        }

        if buf.len() < PREAMBLE_SIZE {
            return Ok(None);
        }

        let block_len = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]) as usize;
        if block_len > self.max_block_size {
            return Err(WireError::Size(block_len));
        }

        if buf.len() < PREAMBLE_SIZE + block_len {
            return Ok(None);
        }

        buf.advance(PREAMBLE_SIZE);
        Ok(Some(buf.split_to(block_len).freeze()))
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefix a root PDU block with the ACN TCP preamble
pub fn encode_stream(block: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(PREAMBLE_SIZE + block.len());
    buf.put_slice(&ACN_PACKET_IDENTIFIER);
    buf.put_u32(block.len() as u32);
    buf.put_slice(block);
    buf.freeze()
}
