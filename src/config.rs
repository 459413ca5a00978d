//! Session configuration.

use std::time::Duration;

use crate::error::{Result, WatchError};
use crate::wire::{Message, Network};

/// Default peer: a local testnet node.
pub const DEFAULT_PEER: &str = "127.0.0.1:18333";

/// Default dial timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound of the transaction queue.
pub const DEFAULT_TX_QUEUE_CAPACITY: usize = 5_000;

/// Client identification announced in `version` (BIP 14 format).
pub const DEFAULT_USER_AGENT: &str = concat!("/watchtower:", env!("CARGO_PKG_VERSION"), "/");

/// Everything a session needs to know before it starts.
///
/// Owned by the caller and only read by the session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Peer address as host:port.
    pub peer: String,

    /// Which deployment of the protocol to speak.
    pub network: Network,

    /// Chain height announced in our `version` message.
    pub start_height: i32,

    /// Messages written, in order, right after negotiation.
    pub extra_messages: Vec<Message>,

    /// Dial timeout.
    pub connect_timeout: Duration,

    /// User agent announced in `version`.
    pub user_agent: String,

    /// Relay flag announced in `version`; without it peers do not announce
    /// loose transactions.
    pub relay: bool,

    /// Bound of the transaction queue. The block queue is always a
    /// zero-capacity handoff.
    pub tx_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            peer: DEFAULT_PEER.to_string(),
            network: Network::default(),
            start_height: 0,
            extra_messages: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            relay: true,
            tx_queue_capacity: DEFAULT_TX_QUEUE_CAPACITY,
        }
    }
}

impl SessionConfig {
    pub fn new(peer: impl Into<String>, network: Network) -> Self {
        Self {
            peer: peer.into(),
            network,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_height < 0 {
            return Err(WatchError::Config(format!(
                "start height must be non-negative, got {}",
                self.start_height
            )));
        }
        if self.peer.trim().is_empty() {
            return Err(WatchError::Config("peer address is empty".to_string()));
        }
        if self.tx_queue_capacity == 0 {
            return Err(WatchError::Config(
                "transaction queue capacity must be at least 1".to_string(),
            ));
        }
        if self.user_agent.len() > 256 {
            return Err(WatchError::Config(
                "user agent exceeds 256 bytes".to_string(),
            ));
        }
        Ok(())
    }
}
