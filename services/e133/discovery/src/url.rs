//! E1.33 SLP service URL parsing.

use std::net::Ipv4Addr;

use e133_wire::Uid;

use crate::error::UrlParseError;
use crate::slp::E133_SERVICE_TYPE;

/// Parse `service:e133.esta://<ipv4>[:port]/<uid>` into the device UID and address.
///
/// The port is accepted and ignored; sessions always use the configured port.
pub fn parse_slp_url(url: &str) -> Result<(Uid, Ipv4Addr), UrlParseError> {
    let rest = url
        .strip_prefix(E133_SERVICE_TYPE)
        .and_then(|rest| rest.strip_prefix("://"))
        .ok_or_else(|| UrlParseError::Scheme(url.to_string()))?;

    let (host, uid) = rest
        .split_once('/')
        .ok_or_else(|| UrlParseError::MissingUid(url.to_string()))?;

    let address = host.split_once(':').map_or(host, |(address, _port)| address);
    let ip: Ipv4Addr = address
        .parse()
        .map_err(|_| UrlParseError::Address(address.to_string()))?;

    Ok((uid.parse()?, ip))
}
