//! DMP layer carried inside RDMnet framing PDUs.
//!
//! The monitor only needs the layout and the two property vectors; the DMP
//! header byte is the address/data type and the data is the raw RDM message.

use crate::pdu::PduLayout;

/// DMP layer: 1-byte vector, 1-byte address/data type header
pub const DMP_LAYOUT: PduLayout = PduLayout::new(1, 1);

/// Get property (RDM GET)
pub const DMP_GET_PROPERTY: u32 = 0x01;

/// Set property (RDM SET)
pub const DMP_SET_PROPERTY: u32 = 0x04;

/// Address/data type used for RDM payloads: non-range, single byte addresses
pub const DMP_ADDRESS_DATA_TYPE: u8 = 0x00;
