//! Builders for outgoing root and E1.33 PDUs.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{Bytes, BytesMut};

use crate::dmp::{DMP_ADDRESS_DATA_TYPE, DMP_LAYOUT};
use crate::e133::{E133Header, E133_LAYOUT, VECTOR_FRAMING_HEARTBEAT, VECTOR_FRAMING_RDMNET};
use crate::inflator::ROOT_ENDPOINT;
use crate::pdu::encode_pdu;
use crate::root::{Cid, ROOT_LAYOUT, VECTOR_ROOT_E133};
use crate::transport::encode_stream;
use crate::WireError;

/// Wraps a block in a root PDU stamped with this component's CID
#[derive(Debug, Clone)]
pub struct RootSender {
    cid: Cid,
}

impl RootSender {
    /// Create a sender for a component identifier
    pub fn new(cid: Cid) -> Self {
        Self { cid }
    }

    /// Component identifier used in every root PDU
    pub fn cid(&self) -> Cid {
        self.cid
    }

    /// Build a complete TCP stream block carrying `data` under `vector`
    pub fn send(&self, vector: u32, data: &[u8]) -> Result<Bytes, WireError> {
        let root = encode_pdu(vector, ROOT_LAYOUT, self.cid.as_bytes(), data)?;
        Ok(encode_stream(&root))
    }
}

/// Builds E1.33 heartbeat and RDM PDUs with increasing sequence numbers
#[derive(Debug)]
pub struct E133Sender {
    root: RootSender,
    source_name: String,
    sequence: AtomicU32,
}

impl E133Sender {
    /// Create a sender
    pub fn new(root: RootSender, source_name: impl Into<String>) -> Self {
        Self {
            root,
            source_name: source_name.into(),
            sequence: AtomicU32::new(0),
        }
    }

    /// Component identifier of the underlying root sender
    pub fn cid(&self) -> Cid {
        self.root.cid()
    }

    /// Name placed in every E1.33 header
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    fn header(&self, endpoint: u16) -> BytesMut {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut buf = BytesMut::new();
        E133Header::new(self.source_name.as_str(), sequence, endpoint).encode(&mut buf);
        buf
    }

    /// Heartbeat PDU for the root endpoint, ready to write to a stream
    pub fn heartbeat(&self) -> Result<Bytes, WireError> {
        let header = self.header(ROOT_ENDPOINT);
        let e133 = encode_pdu(VECTOR_FRAMING_HEARTBEAT, E133_LAYOUT, &header, &[])?;
        self.root.send(VECTOR_ROOT_E133, &e133)
    }

    /// RDM message for an endpoint, wrapped in a DMP PDU with `dmp_vector`
    pub fn rdm(&self, endpoint: u16, dmp_vector: u32, rdm: &[u8]) -> Result<Bytes, WireError> {
        let dmp = encode_pdu(dmp_vector, DMP_LAYOUT, &[DMP_ADDRESS_DATA_TYPE], rdm)?;
        let header = self.header(endpoint);
        let e133 = encode_pdu(VECTOR_FRAMING_RDMNET, E133_LAYOUT, &header, &dmp)?;
        self.root.send(VECTOR_ROOT_E133, &e133)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::decode_block;
    use crate::transport::StreamDecoder;

    #[test]
    fn test_heartbeat_layers() {
        let cid = Cid::generate();
        let sender = E133Sender::new(RootSender::new(cid), "monitor");

        let mut buf = BytesMut::from(&sender.heartbeat().unwrap()[..]);
        let block = StreamDecoder::new().decode(&mut buf).unwrap().unwrap();

        let roots = decode_block(block, ROOT_LAYOUT).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].vector, VECTOR_ROOT_E133);
        assert_eq!(&roots[0].header[..], cid.as_bytes());

        let e133 = decode_block(roots[0].data.clone(), E133_LAYOUT).unwrap();
        assert_eq!(e133[0].vector, VECTOR_FRAMING_HEARTBEAT);
        assert!(e133[0].data.is_empty());
        let header = E133Header::decode(e133[0].header.clone()).unwrap();
        assert_eq!(header.source, "monitor");
        assert_eq!(header.endpoint, ROOT_ENDPOINT);
    }

    #[test]
    fn test_sequence_increases() {
        let sender = E133Sender::new(RootSender::new(Cid::generate()), "monitor");
        let first = sender.heartbeat().unwrap();
        let second = sender.heartbeat().unwrap();
        assert_ne!(first, second);
    }
}
