use rand::Rng;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::wire::message::{InvVector, Message, NetAddr, Services, VersionMessage};

/// Builds the `version` announcement that opens a handshake.
///
/// The payload layout is:
///
/// ```text
/// int32    version
/// uint64   services
/// int64    timestamp
/// net_addr addr_recv
/// net_addr addr_from
/// uint64   nonce
/// var_str  user_agent
/// int32    start_height
/// bool     relay
/// ```
///
/// This implementation:
///
/// - Advertises no services (we are a listener, not a full node)
/// - Uses the current UNIX timestamp
/// - Puts the peer's address in `addr_recv` when known, zeroes otherwise
/// - Leaves `addr_from` zeroed
/// - Draws a fresh random 64-bit nonce
///
/// # Example
///
/// ```
/// use btc_watchtower::wire;
///
/// let msg = wire::payload::version_message(70016, 100, "/watchtower:0.1.0/", true, None);
/// assert_eq!(msg.start_height, 100);
/// ```
pub fn version_message(
    protocol_version: i32,
    start_height: i32,
    user_agent: &str,
    relay: bool,
    peer: Option<SocketAddr>,
) -> VersionMessage {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default();

    VersionMessage {
        version: protocol_version,
        services: Services::NONE,
        timestamp,
        addr_recv: peer.map(NetAddr::from).unwrap_or_else(NetAddr::unspecified),
        addr_from: NetAddr::unspecified(),
        nonce: rand::thread_rng().r#gen(),
        user_agent: user_agent.to_string(),
        start_height,
        relay: Some(relay),
    }
}

/// A single `getdata` asking for every advertised item, in advertised order.
pub fn getdata_for(advertised: &[InvVector]) -> Message {
    Message::GetData(advertised.to_vec())
}
