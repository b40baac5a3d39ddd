//! Nested decode chain: root → E1.33 → DMP → endpoint handler.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::dmp::{DMP_GET_PROPERTY, DMP_LAYOUT, DMP_SET_PROPERTY};
use crate::e133::{E133Header, E133_LAYOUT, VECTOR_FRAMING_HEARTBEAT, VECTOR_FRAMING_RDMNET};
use crate::pdu::decode_block;
use crate::root::{Cid, CID_SIZE, ROOT_LAYOUT, VECTOR_ROOT_E133};
use crate::transport::TransportHeader;
use crate::WireError;

/// Endpoint id of the device's root endpoint
pub const ROOT_ENDPOINT: u16 = 0;

/// Handler for RDM payloads addressed to one endpoint
pub type RdmHandler = Box<dyn Fn(&TransportHeader, &E133Header, Bytes) + Send + Sync>;

/// Hook run for every E1.33 PDU, heartbeats included
pub type DataHook = Box<dyn Fn(&TransportHeader) + Send + Sync>;

#[derive(Default)]
struct RootInflator;

impl RootInflator {
    fn inflate(&self, block: Bytes) -> Result<Vec<(Cid, Bytes)>, WireError> {
        let mut out = Vec::new();
        for pdu in decode_block(block, ROOT_LAYOUT)? {
            if pdu.vector != VECTOR_ROOT_E133 {
                debug!("Ignoring root pdu with vector {:#x}", pdu.vector);
                continue;
            }
            let mut cid = [0u8; CID_SIZE];
            cid.copy_from_slice(&pdu.header[..CID_SIZE]);
            out.push((Cid::from_bytes(cid), pdu.data));
        }
        Ok(out)
    }
}

#[derive(Default)]
struct E133Inflator {
    on_data: Option<DataHook>,
}

impl E133Inflator {
    fn inflate(
        &self,
        transport: &TransportHeader,
        block: Bytes,
    ) -> Result<Vec<(E133Header, Bytes)>, WireError> {
        let mut out = Vec::new();
        for pdu in decode_block(block, E133_LAYOUT)? {
            let header = E133Header::decode(pdu.header)?;

            if let Some(hook) = &self.on_data {
                hook(transport);
            }

            match pdu.vector {
                VECTOR_FRAMING_HEARTBEAT => {
                    trace!(
                        "Heartbeat from {} ({}, seq {})",
                        transport.source,
                        header.source,
                        header.sequence
                    );
                }
                VECTOR_FRAMING_RDMNET => out.push((header, pdu.data)),
                other => debug!("Ignoring e1.33 pdu with vector {:#x}", other),
            }
        }
        Ok(out)
    }
}

#[derive(Default)]
struct DmpInflator {
    handlers: HashMap<u16, RdmHandler>,
}

impl DmpInflator {
    fn inflate(
        &self,
        transport: &TransportHeader,
        header: &E133Header,
        block: Bytes,
    ) -> Result<usize, WireError> {
        let handler = match self.handlers.get(&header.endpoint) {
            Some(handler) => handler,
            None => {
                warn!(
                    "No handler for endpoint {} from {}, dropping",
                    header.endpoint, transport.source
                );
                return Ok(0);
            }
        };

        let mut dispatched = 0;
        for pdu in decode_block(block, DMP_LAYOUT)? {
            match pdu.vector {
                DMP_GET_PROPERTY | DMP_SET_PROPERTY => {
                    handler(transport, header, pdu.data);
                    dispatched += 1;
                }
                other => debug!("Ignoring dmp pdu with vector {:#x}", other),
            }
        }
        Ok(dispatched)
    }
}

/// Decode chain shared by every connection's reader
#[derive(Default)]
pub struct PduPipeline {
    root: RootInflator,
    e133: E133Inflator,
    dmp: DmpInflator,
}

impl PduPipeline {
    /// Create a pipeline with no hook and no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the hook run for every E1.33 PDU received
    pub fn set_on_data(&mut self, hook: impl Fn(&TransportHeader) + Send + Sync + 'static) {
        self.e133.on_data = Some(Box::new(hook));
    }

    /// Register the handler for an endpoint, replacing any previous one
    pub fn set_rdm_handler(
        &mut self,
        endpoint: u16,
        handler: impl Fn(&TransportHeader, &E133Header, Bytes) + Send + Sync + 'static,
    ) {
        self.dmp.handlers.insert(endpoint, Box::new(handler));
    }

    /// Remove an endpoint's handler
    pub fn remove_rdm_handler(&mut self, endpoint: u16) -> bool {
        self.dmp.handlers.remove(&endpoint).is_some()
    }

    /// Decode one root block; returns the number of RDM payloads dispatched
    pub fn inflate(&self, transport: &TransportHeader, block: Bytes) -> Result<usize, WireError> {
        let mut dispatched = 0;
        for (cid, e133_block) in self.root.inflate(block)? {
            trace!("Root pdu from {} (cid {})", transport.source, cid);
            for (header, dmp_block) in self.e133.inflate(transport, e133_block)? {
                dispatched += self.dmp.inflate(transport, &header, dmp_block)?;
            }
        }
        Ok(dispatched)
    }
}

impl std::fmt::Debug for PduPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PduPipeline")
            .field("has_on_data", &self.e133.on_data.is_some())
            .field("endpoints", &self.dmp.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
