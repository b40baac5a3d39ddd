//! Root layer: component identifiers and the root PDU layout.

use std::fmt;

use uuid::Uuid;

use crate::pdu::PduLayout;

/// Size of a component identifier on the wire
pub const CID_SIZE: usize = 16;

/// Root vector for E1.33 traffic
pub const VECTOR_ROOT_E133: u32 = 5;

/// Root layer: 4-byte vector, CID as the header
pub const ROOT_LAYOUT: PduLayout = PduLayout::new(4, CID_SIZE);

/// Component identifier carried in every root PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cid(Uuid);

impl Cid {
    /// Generate a random identifier for this process
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build from raw wire bytes
    pub fn from_bytes(bytes: [u8; CID_SIZE]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Raw wire bytes
    pub fn as_bytes(&self) -> &[u8; CID_SIZE] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
