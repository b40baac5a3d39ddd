//! Minimal RDM message header parsing.
//!
//! E1.33 carries RDM messages without the 0xCC start code, but captures and
//! tools often include it, so [`RdmHeader::parse`] accepts both forms. The
//! checksum always covers the start code.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::uid::{Uid, UID_SIZE};

/// RDM start code
pub const RDM_START_CODE: u8 = 0xCC;

/// RDM sub-start code
pub const RDM_SUB_START_CODE: u8 = 0x01;

/// Bytes from the start code up to and including the parameter data length
const RDM_HEADER_SIZE: usize = 24;

/// Checksum trailer size
const CHECKSUM_SIZE: usize = 2;

/// RDM parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RdmError {
    /// Message shorter than its header or declared length
    #[error("truncated rdm message ({0} bytes)")]
    Truncated(usize),

    /// Unexpected sub-start code
    #[error("bad rdm sub-start code {0:#04x}")]
    SubStartCode(u8),

    /// Message length disagrees with the parameter data length
    #[error("bad rdm message length {0}")]
    Length(u8),

    /// Checksum mismatch
    #[error("rdm checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    Checksum {
        /// Checksum computed over the message
        expected: u16,
        /// Checksum carried in the message
        actual: u16,
    },

    /// Unknown command class
    #[error("unknown rdm command class {0:#04x}")]
    CommandClass(u8),
}

/// RDM command classes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    /// Discovery command
    Discovery = 0x10,
    /// Discovery command response
    DiscoveryResponse = 0x11,
    /// Get command
    Get = 0x20,
    /// Get command response
    GetResponse = 0x21,
    /// Set command
    Set = 0x30,
    /// Set command response
    SetResponse = 0x31,
}

impl TryFrom<u8> for CommandClass {
    type Error = RdmError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(CommandClass::Discovery),
            0x11 => Ok(CommandClass::DiscoveryResponse),
            0x20 => Ok(CommandClass::Get),
            0x21 => Ok(CommandClass::GetResponse),
            0x30 => Ok(CommandClass::Set),
            0x31 => Ok(CommandClass::SetResponse),
            _ => Err(RdmError::CommandClass(value)),
        }
    }
}

impl CommandClass {
    /// True for the response classes
    pub fn is_response(self) -> bool {
        (self as u8) & 0x01 == 0x01
    }
}

/// Decoded RDM message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdmHeader {
    /// Destination UID
    pub destination: Uid,
    /// Source UID
    pub source: Uid,
    /// Transaction number
    pub transaction_number: u8,
    /// Port id on requests, response type on responses
    pub port_id: u8,
    /// Queued message count
    pub message_count: u8,
    /// Sub-device
    pub sub_device: u16,
    /// Command class
    pub command_class: CommandClass,
    /// Parameter id
    pub param_id: u16,
    /// Parameter data
    pub param_data: Bytes,
}

fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(b as u16))
}

fn read_uid(bytes: &[u8]) -> Uid {
    let mut raw = [0u8; UID_SIZE];
    raw.copy_from_slice(&bytes[..UID_SIZE]);
    Uid::from_bytes(raw)
}

impl RdmHeader {
    /// Parse a message with or without its leading start code
    pub fn parse(data: &[u8]) -> Result<Self, RdmError> {
        let body = match data.first() {
            Some(&RDM_START_CODE) => &data[1..],
            _ => data,
        };

        // body lacks the start code, so offsets below are one less than on the wire
        if body.len() < RDM_HEADER_SIZE - 1 {
            return Err(RdmError::Truncated(data.len()));
        }
        if body[0] != RDM_SUB_START_CODE {
            return Err(RdmError::SubStartCode(body[0]));
        }

        let message_length = body[1];
        let param_length = body[22] as usize;
        if message_length as usize != RDM_HEADER_SIZE + param_length {
            return Err(RdmError::Length(message_length));
        }

        let payload_end = message_length as usize - 1;
        if body.len() < payload_end + CHECKSUM_SIZE {
            return Err(RdmError::Truncated(data.len()));
        }

        let expected = checksum(&body[..payload_end]).wrapping_add(RDM_START_CODE as u16);
        let actual = u16::from_be_bytes([body[payload_end], body[payload_end + 1]]);
        if expected != actual {
            return Err(RdmError::Checksum { expected, actual });
        }

        Ok(Self {
            destination: read_uid(&body[2..]),
            source: read_uid(&body[8..]),
            transaction_number: body[14],
            port_id: body[15],
            message_count: body[16],
            sub_device: u16::from_be_bytes([body[17], body[18]]),
            command_class: CommandClass::try_from(body[19])?,
            param_id: u16::from_be_bytes([body[20], body[21]]),
            param_data: Bytes::copy_from_slice(&body[23..payload_end]),
        })
    }

    /// Encode without the start code, as carried in E1.33
    pub fn encode(&self) -> Bytes {
        let message_length = RDM_HEADER_SIZE + self.param_data.len();
        let mut buf = BytesMut::with_capacity(message_length - 1 + CHECKSUM_SIZE);
        buf.put_u8(RDM_SUB_START_CODE);
        buf.put_u8(message_length as u8);
        buf.put_slice(&self.destination.to_bytes());
        buf.put_slice(&self.source.to_bytes());
        buf.put_u8(self.transaction_number);
        buf.put_u8(self.port_id);
        buf.put_u8(self.message_count);
        buf.put_u16(self.sub_device);
        buf.put_u8(self.command_class as u8);
        buf.put_u16(self.param_id);
        buf.put_u8(self.param_data.len() as u8);
        buf.put_slice(&self.param_data);

        let sum = checksum(&buf).wrapping_add(RDM_START_CODE as u16);
        buf.put_u16(sum);
        buf.freeze()
    }
}
