//! ACN root/E1.33/DMP PDU framing, RDM UIDs and PID dictionary for the E1.33 monitor.
//!
//! This crate provides the low-level wire protocol implementation used by the
//! monitor: the nested PDU decode chain that turns a TCP byte stream into
//! endpoint-scoped RDM payloads, the senders that build heartbeat and RDM PDUs,
//! and the RDM helpers (UIDs, message headers, PID dictionary) used to describe
//! what arrived.
//!
//! ## Wire Format
//!
//! ```text
//! +------------------------------+--------------------------------+
//! | "ASC-E1.17\0\0\0" (12B)      | ACN TCP preamble               |
//! +------------------------------+--------------------------------+
//! | u32 block_len                | length of the root PDU block   |
//! +------------------------------+--------------------------------+
//! | Root PDU                     | vector (4B), CID header (16B)  |
//! |  +- E1.33 PDU                | vector (4B), header (71B)      |
//! |      +- DMP PDU              | vector (1B), addr/data type    |
//! |          +- RDM message      | raw bytes for the endpoint     |
//! +------------------------------+--------------------------------+
//! ```
//!
//! Every PDU starts with a flags/length field; a PDU without its vector, header
//! or data flag inherits that field from the previous PDU of the same block.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dmp;
pub mod e133;
pub mod error;
pub mod inflator;
pub mod pdu;
pub mod pid;
pub mod rdm;
pub mod root;
pub mod sender;
pub mod transport;
pub mod uid;

// Re-export main types
pub use dmp::{DMP_ADDRESS_DATA_TYPE, DMP_GET_PROPERTY, DMP_LAYOUT, DMP_SET_PROPERTY};
pub use e133::{
    E133Header, E133_HEADER_SIZE, E133_LAYOUT, E133_PORT, SOURCE_NAME_SIZE,
    VECTOR_FRAMING_HEARTBEAT, VECTOR_FRAMING_RDMNET,
};
pub use error::WireError;
pub use inflator::{PduPipeline, RdmHandler, ROOT_ENDPOINT};
pub use pdu::{decode_block, encode_pdu, Pdu, PduFlags, PduLayout};
pub use pid::{PidDescriptor, PidStore, PidStoreError};
pub use rdm::{CommandClass, RdmError, RdmHeader, RDM_SUB_START_CODE};
pub use root::{Cid, CID_SIZE, ROOT_LAYOUT, VECTOR_ROOT_E133};
pub use sender::{E133Sender, RootSender};
pub use transport::{
    encode_stream, StreamDecoder, TransportHeader, TransportKind, ACN_PACKET_IDENTIFIER,
    DEFAULT_MAX_BLOCK_SIZE, PREAMBLE_SIZE,
};
pub use uid::{Uid, UidError};
