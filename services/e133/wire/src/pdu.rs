//! Generic ACN PDU block encoding and decoding.
//!
//! Each PDU starts with a flags/length field. The top nibble of the first byte
//! carries the flags; the remaining 12 bits (20 when [`PduFlags::LENGTH`] is
//! set) give the length of the PDU including the flags/length field itself.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::WireError;

/// Largest length that fits in the short flags/length form
const SHORT_LENGTH_MAX: usize = 0x0FFF;
/// Largest length the long flags/length form can carry
const LONG_LENGTH_MAX: usize = 0x0F_FFFF;

bitflags! {
    /// Flags held in the top nibble of a PDU's first byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PduFlags: u8 {
        /// Length field is three bytes instead of two
        const LENGTH = 0x80;
        /// Vector is present
        const VECTOR = 0x40;
        /// Header is present
        const HEADER = 0x20;
        /// Data is present
        const DATA = 0x10;
    }
}

/// Fixed vector and header sizes of one protocol layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduLayout {
    /// Vector width in bytes (1, 2 or 4)
    pub vector_size: usize,
    /// Header width in bytes
    pub header_size: usize,
}

impl PduLayout {
    /// Create a layout
    pub const fn new(vector_size: usize, header_size: usize) -> Self {
        Self {
            vector_size,
            header_size,
        }
    }
}

/// One decoded PDU with any inherited fields resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    /// Layer vector
    pub vector: u32,
    /// Raw layer header
    pub header: Bytes,
    /// Raw data, the next layer's PDU block
    pub data: Bytes,
}

fn read_vector(buf: &mut Bytes, size: usize) -> u32 {
    match size {
        1 => buf.get_u8() as u32,
        2 => buf.get_u16() as u32,
        _ => buf.get_u32(),
    }
}

fn put_vector(buf: &mut BytesMut, vector: u32, size: usize) {
    match size {
        1 => buf.put_u8(vector as u8),
        2 => buf.put_u16(vector as u16),
        _ => buf.put_u32(vector),
    }
}

/// Decode every PDU in a block, resolving inherited vector/header/data fields.
pub fn decode_block(mut block: Bytes, layout: PduLayout) -> Result<Vec<Pdu>, WireError> {
    let mut pdus: Vec<Pdu> = Vec::new();

    while block.has_remaining() {
        if block.len() < 2 {
            return Err(WireError::Incomplete);
        }

        let flags = PduFlags::from_bits_truncate(block[0] & 0xF0);
        let (length, field_size) = if flags.contains(PduFlags::LENGTH) {
            if block.len() < 3 {
                return Err(WireError::Incomplete);
            }
            let length = ((block[0] as usize & 0x0F) << 16)
                | ((block[1] as usize) << 8)
                | block[2] as usize;
            (length, 3)
        } else {
            (((block[0] as usize & 0x0F) << 8) | block[1] as usize, 2)
        };

        if length < field_size || length > block.len() {
            return Err(WireError::Length(length));
        }

        let mut pdu = block.split_to(length);
        pdu.advance(field_size);

        let previous = pdus.last();

        let vector = if flags.contains(PduFlags::VECTOR) {
            if pdu.len() < layout.vector_size {
                return Err(WireError::Length(length));
            }
            read_vector(&mut pdu, layout.vector_size)
        } else {
            previous.map(|p| p.vector).ok_or(WireError::Inherit("vector"))?
        };

        let header = if flags.contains(PduFlags::HEADER) {
            if pdu.len() < layout.header_size {
                return Err(WireError::Length(length));
            }
            pdu.split_to(layout.header_size)
        } else {
            previous
                .map(|p| p.header.clone())
                .ok_or(WireError::Inherit("header"))?
        };

        let data = if flags.contains(PduFlags::DATA) {
            pdu
        } else {
            previous
                .map(|p| p.data.clone())
                .ok_or(WireError::Inherit("data"))?
        };

        pdus.push(Pdu {
            vector,
            header,
            data,
        });
    }

    Ok(pdus)
}

/// Encode a single PDU carrying its own vector, header and data.
pub fn encode_pdu(
    vector: u32,
    layout: PduLayout,
    header: &[u8],
    data: &[u8],
) -> Result<Bytes, WireError> {
    let body = layout.vector_size + header.len() + data.len();
    let mut flags = PduFlags::VECTOR | PduFlags::HEADER | PduFlags::DATA;

    let length = if body + 2 > SHORT_LENGTH_MAX {
        flags |= PduFlags::LENGTH;
        body + 3
    } else {
        body + 2
    };
    if length > LONG_LENGTH_MAX {
        return Err(WireError::Size(length));
    }

    let mut buf = BytesMut::with_capacity(length);
    if flags.contains(PduFlags::LENGTH) {
        buf.put_u8(flags.bits() | ((length >> 16) as u8 & 0x0F));
        buf.put_u8((length >> 8) as u8);
        buf.put_u8(length as u8);
    } else {
        buf.put_u8(flags.bits() | ((length >> 8) as u8 & 0x0F));
        buf.put_u8(length as u8);
    }
    put_vector(&mut buf, vector, layout.vector_size);
    buf.put_slice(header);
    buf.put_slice(data);

    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: PduLayout = PduLayout::new(4, 2);

    #[test]
    fn test_encode_short_form() {
        let pdu = encode_pdu(7, LAYOUT, &[0xAA, 0xBB], b"xyz").unwrap();
        // 2 flags/length + 4 vector + 2 header + 3 data
        assert_eq!(pdu.len(), 11);
        assert_eq!(pdu[0] & 0xF0, 0x70);
        assert_eq!(pdu[1], 11);
        assert_eq!(&pdu[2..6], &[0, 0, 0, 7]);
    }

    #[test]
    fn test_encode_long_form() {
        let data = vec![0u8; 5000];
        let pdu = encode_pdu(1, LAYOUT, &[0, 0], &data).unwrap();
        assert_eq!(pdu[0] & 0xF0, 0xF0);
        assert_eq!(pdu.len(), 3 + 4 + 2 + 5000);

        let decoded = decode_block(pdu, LAYOUT).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].data.len(), 5000);
    }

    #[test]
    fn test_decode_inherits_fields() {
        let mut block = BytesMut::new();
        block.extend_from_slice(&encode_pdu(9, LAYOUT, &[1, 2], b"first").unwrap());
        // Second PDU only carries data: flags D, length 2 + 6
        block.put_u8(0x10);
        block.put_u8(8);
        block.put_slice(b"second");

        let pdus = decode_block(block.freeze(), LAYOUT).unwrap();
        assert_eq!(pdus.len(), 2);
        assert_eq!(pdus[1].vector, 9);
        assert_eq!(&pdus[1].header[..], &[1, 2]);
        assert_eq!(&pdus[1].data[..], b"second");
    }

    #[test]
    fn test_decode_inherit_without_previous() {
        let block = Bytes::from_static(&[0x10, 0x03, 0xFF]);
        assert_eq!(
            decode_block(block, LAYOUT),
            Err(WireError::Inherit("vector"))
        );
    }

    #[test]
    fn test_decode_rejects_overlong_length() {
        let block = Bytes::from_static(&[0x70, 0x40, 0, 0]);
        assert_eq!(decode_block(block, LAYOUT), Err(WireError::Length(0x40)));
    }

    #[test]
    fn test_decode_empty_block() {
        assert!(decode_block(Bytes::new(), LAYOUT).unwrap().is_empty());
    }
}
