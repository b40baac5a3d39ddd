//! Minimal SLPv2 (RFC 2608) user agent.
//!
//! Only what discovery needs: multicast `SrvRqst` for one service type and
//! scope, and decoding of the URL entries in `SrvRply` messages.
//!
//! ```text
//! +---------+---------+-----------+---------+-----------+-----+----------+
//! | ver (1) | fn (1)  | len (3)   | flags(2)| ext off(3)|xid 2| lang ... |
//! +---------+---------+-----------+---------+-----------+-----+----------+
//! ```

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::error::DiscoveryError;
use crate::thread::DiscoveryAgent;

/// SLP version implemented
const SLP_VERSION: u8 = 2;
/// SrvRqst function id
const FUNCTION_SRV_RQST: u8 = 1;
/// SrvRply function id
const FUNCTION_SRV_RPLY: u8 = 2;
/// Request-multicast header flag
const FLAG_REQUEST_MCAST: u16 = 0x2000;
/// Fixed header size without the language tag
const HEADER_SIZE: usize = 14;
/// Language tag sent with every request
const LANGUAGE_TAG: &str = "en";
/// Largest datagram accepted
const MAX_DATAGRAM: usize = 8192;
/// Requests sent per round; later ones carry the previous responders list
const TRANSMISSIONS: u32 = 2;

/// E1.33 SLP service type
pub const E133_SERVICE_TYPE: &str = "service:e133.esta";

/// Default SLP scope
pub const SLP_DEFAULT_SCOPE: &str = "ACN-DEFAULT";

/// SLP administratively scoped multicast group and port
pub const SLP_MULTICAST_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 253), 427);

/// SLP agent configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlpConfig {
    /// Service type requested
    pub service_type: String,
    /// Scope list requested
    pub scope: String,
    /// How long one discovery round listens for replies
    pub timeout: Duration,
    /// Where requests are sent
    pub multicast_addr: SocketAddrV4,
}

impl Default for SlpConfig {
    fn default() -> Self {
        Self {
            service_type: E133_SERVICE_TYPE.to_string(),
            scope: SLP_DEFAULT_SCOPE.to_string(),
            timeout: Duration::from_secs(3),
            multicast_addr: SLP_MULTICAST_ADDR,
        }
    }
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
}

fn put_u24(buf: &mut BytesMut, value: usize) {
    buf.put_u8((value >> 16) as u8);
    buf.put_u16(value as u16);
}

/// Build a multicast `SrvRqst` message
pub fn build_srv_rqst(xid: u16, service_type: &str, scope: &str, responders: &[Ipv4Addr]) -> Bytes {
    let pr_list = responders
        .iter()
        .map(|ip| ip.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let mut body = BytesMut::new();
    put_string(&mut body, &pr_list);
    put_string(&mut body, service_type);
    put_string(&mut body, scope);
    put_string(&mut body, ""); // predicate
    put_string(&mut body, ""); // SLP SPI

    let total = HEADER_SIZE + LANGUAGE_TAG.len() + body.len();
    let mut buf = BytesMut::with_capacity(total);
    buf.put_u8(SLP_VERSION);
    buf.put_u8(FUNCTION_SRV_RQST);
    put_u24(&mut buf, total);
    buf.put_u16(FLAG_REQUEST_MCAST);
    put_u24(&mut buf, 0); // next extension offset
    buf.put_u16(xid);
    put_string(&mut buf, LANGUAGE_TAG);
    buf.put_slice(&body);
    buf.freeze()
}

/// Decoded `SrvRply`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRply {
    /// Transaction id echoed from the request
    pub xid: u16,
    /// Service URLs
    pub urls: Vec<String>,
}

fn need(buf: &Bytes, n: usize) -> Result<(), DiscoveryError> {
    if buf.remaining() < n {
        Err(DiscoveryError::Malformed("truncated"))
    } else {
        Ok(())
    }
}

fn get_string(buf: &mut Bytes) -> Result<String, DiscoveryError> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    need(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| DiscoveryError::Malformed("non utf-8 string"))
}

/// Decode a `SrvRply`; a non-zero error code is returned as [`DiscoveryError::Slp`]
pub fn parse_srv_rply(datagram: &[u8]) -> Result<SrvRply, DiscoveryError> {
    let mut buf = Bytes::copy_from_slice(datagram);
    need(&buf, HEADER_SIZE)?;

    if buf.get_u8() != SLP_VERSION {
        return Err(DiscoveryError::Malformed("unsupported version"));
    }
    if buf.get_u8() != FUNCTION_SRV_RPLY {
        return Err(DiscoveryError::Malformed("not a SrvRply"));
    }
    buf.advance(3); // length
    buf.advance(2); // flags
    buf.advance(3); // next extension offset
    let xid = buf.get_u16();
    get_string(&mut buf)?; // language tag

    need(&buf, 4)?;
    let error_code = buf.get_u16();
    if error_code != 0 {
        return Err(DiscoveryError::Slp(error_code));
    }

    let count = buf.get_u16();
    let mut urls = Vec::with_capacity(count as usize);
    for _ in 0..count {
        need(&buf, 3)?;
        buf.advance(1); // reserved
        buf.advance(2); // lifetime
        urls.push(get_string(&mut buf)?);

        need(&buf, 1)?;
        let auth_blocks = buf.get_u8();
        for _ in 0..auth_blocks {
            need(&buf, 4)?;
            buf.advance(2); // block structure descriptor
            let len = buf.get_u16() as usize;
            if len < 4 {
                return Err(DiscoveryError::Malformed("auth block length"));
            }
            need(&buf, len - 4)?;
            buf.advance(len - 4);
        }
    }

    Ok(SrvRply { xid, urls })
}

/// Blocking SLP user agent
#[derive(Debug)]
pub struct SlpAgent {
    config: SlpConfig,
    socket: Option<UdpSocket>,
    next_xid: AtomicU16,
}

impl SlpAgent {
    /// Create an agent; the socket is opened by `init`
    pub fn new(config: SlpConfig) -> Self {
        Self {
            config,
            socket: None,
            next_xid: AtomicU16::new(1),
        }
    }

    fn collect(
        &self,
        socket: &UdpSocket,
        xid: u16,
        until: Instant,
        urls: &mut Vec<String>,
        seen: &mut HashSet<String>,
        responders: &mut Vec<Ipv4Addr>,
    ) -> Result<(), DiscoveryError> {
        let mut datagram = [0u8; MAX_DATAGRAM];
        loop {
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            socket.set_read_timeout(Some(until - now))?;

            let (len, from) = match socket.recv_from(&mut datagram) {
                Ok(received) => received,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let reply = match parse_srv_rply(&datagram[..len]) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("Ignoring SLP reply from {}: {}", from, e);
                    continue;
                }
            };
            if reply.xid != xid {
                debug!("Ignoring SLP reply from {} for xid {}", from, reply.xid);
                continue;
            }

            if let std::net::IpAddr::V4(ip) = from.ip() {
                if !responders.contains(&ip) {
                    responders.push(ip);
                }
            }
            for url in reply.urls {
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }
    }
}

impl DiscoveryAgent for SlpAgent {
    fn init(&mut self) -> Result<(), DiscoveryError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_multicast_ttl_v4(1)?;
        debug!("SLP agent bound to {}", socket.local_addr()?);
        self.socket = Some(socket);
        Ok(())
    }

    fn find_services(&self) -> Result<Vec<String>, DiscoveryError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or(DiscoveryError::State("agent not initialized"))?;

        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        let mut urls = Vec::new();
        let mut seen = HashSet::new();
        let mut responders = Vec::new();
        let wait = self.config.timeout / TRANSMISSIONS;

        for _ in 0..TRANSMISSIONS {
            let request = build_srv_rqst(
                xid,
                &self.config.service_type,
                &self.config.scope,
                &responders,
            );
            socket.send_to(&request, self.config.multicast_addr)?;
            self.collect(
                socket,
                xid,
                Instant::now() + wait,
                &mut urls,
                &mut seen,
                &mut responders,
            )?;
        }

        info!(
            "SLP discovery found {} service(s) from {} responder(s)",
            urls.len(),
            responders.len()
        );
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn build_srv_rply(xid: u16, error_code: u16, urls: &[&str]) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.put_u16(error_code);
        body.put_u16(urls.len() as u16);
        for url in urls {
            body.put_u8(0);
            body.put_u16(300);
            put_string(&mut body, url);
            body.put_u8(1); // one auth block
            body.put_u16(2);
            body.put_u16(6);
            body.put_u16(0xBEEF);
        }

        let total = HEADER_SIZE + LANGUAGE_TAG.len() + body.len();
        let mut buf = BytesMut::new();
        buf.put_u8(SLP_VERSION);
        buf.put_u8(FUNCTION_SRV_RPLY);
        put_u24(&mut buf, total);
        buf.put_u16(0);
        put_u24(&mut buf, 0);
        buf.put_u16(xid);
        put_string(&mut buf, LANGUAGE_TAG);
        buf.put_slice(&body);
        buf.to_vec()
    }

    #[test]
    fn test_build_srv_rqst() {
        let request = build_srv_rqst(0x1234, E133_SERVICE_TYPE, SLP_DEFAULT_SCOPE, &[]);
        assert_eq!(request[0], SLP_VERSION);
        assert_eq!(request[1], FUNCTION_SRV_RQST);
        let len = ((request[2] as usize) << 16) | ((request[3] as usize) << 8) | request[4] as usize;
        assert_eq!(len, request.len());
        assert_eq!(&request[10..12], &[0x12, 0x34]);

        let with_pr = build_srv_rqst(1, E133_SERVICE_TYPE, SLP_DEFAULT_SCOPE, &[Ipv4Addr::LOCALHOST]);
        assert_eq!(with_pr.len(), request.len() + "127.0.0.1".len());
    }

    #[test]
    fn test_parse_srv_rply() {
        let reply = build_srv_rply(7, 0, &["service:e133.esta://10.0.0.1/0001:00000001"]);
        let parsed = parse_srv_rply(&reply).unwrap();
        assert_eq!(parsed.xid, 7);
        assert_eq!(parsed.urls, vec!["service:e133.esta://10.0.0.1/0001:00000001"]);
    }

    #[test]
    fn test_parse_srv_rply_error_code() {
        let reply = build_srv_rply(7, 4, &[]);
        assert!(matches!(parse_srv_rply(&reply), Err(DiscoveryError::Slp(4))));
    }

    #[test]
    fn test_parse_truncated() {
        let reply = build_srv_rply(7, 0, &["service:e133.esta://10.0.0.1/0001:00000001"]);
        assert!(matches!(
            parse_srv_rply(&reply[..reply.len() - 3]),
            Err(DiscoveryError::Malformed(_))
        ));
    }

    #[test]
    fn test_find_services_against_local_responder() {
        let responder = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = match responder.local_addr().unwrap() {
            std::net::SocketAddr::V4(addr) => addr,
            _ => unreachable!(),
        };

        let handle = thread::spawn(move || {
            let mut buf = [0u8; MAX_DATAGRAM];
            for _ in 0..TRANSMISSIONS {
                let (_, from) = responder.recv_from(&mut buf).unwrap();
                let xid = u16::from_be_bytes([buf[10], buf[11]]);
                let reply = build_srv_rply(
                    xid,
                    0,
                    &[
                        "service:e133.esta://127.0.0.1/7a70:00000001",
                        "service:e133.esta://127.0.0.1/7a70:00000002",
                    ],
                );
                responder.send_to(&reply, from).unwrap();
            }
        });

        let mut agent = SlpAgent::new(SlpConfig {
            timeout: Duration::from_millis(400),
            multicast_addr: addr,
            ..SlpConfig::default()
        });
        agent.init().unwrap();
        let urls = agent.find_services().unwrap();
        handle.join().unwrap();

        // Both transmissions answered with the same URLs
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn test_find_services_requires_init() {
        let agent = SlpAgent::new(SlpConfig::default());
        assert!(matches!(
            agent.find_services(),
            Err(DiscoveryError::State(_))
        ));
    }
}
