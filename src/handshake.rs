//! Version negotiation.
//!
//! ```text
//!   → version           (our nonce, our start height, our user agent)
//!   ← version | verack  (either order)
//!   → verack            (as soon as the peer's version arrives)
//!   ← verack | version
//!   → extra messages    (if configured)
//! ```
//!
//! https://developer.bitcoin.org/devguide/p2p_network.html#connecting-to-peers

use std::io::{Read, Write};

use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::endpoint::Endpoint;
use crate::error::{Result, WatchError, is_disconnect_kind};
use crate::params::ConnParams;
use crate::wire::payload;
use crate::wire::{Message, VersionMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    VersionSent,
    /// One of the peer's `version` / `verack` has arrived, not both.
    VersionAcked,
    Negotiated,
}

/// Drives one version/verack exchange over an endpoint.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    got_version: bool,
    got_verack: bool,
    peer: Option<VersionMessage>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Idle,
            got_version: false,
            got_verack: false,
            peer: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Sends `announce` and reads until both the peer's `version` and its
    /// `verack` have been seen. Returns the peer's `version`.
    ///
    /// Lowers `params` to the peer's version if it is older than ours and
    /// freezes them on success.
    pub fn run<S: Read + Write>(
        mut self,
        endpoint: &mut Endpoint<S>,
        params: &mut ConnParams,
        announce: VersionMessage,
    ) -> Result<VersionMessage> {
        endpoint.write_message(params, &Message::Version(announce))?;
        self.state = HandshakeState::VersionSent;

        while !(self.got_version && self.got_verack) {
            let msg = endpoint.read_message(params)?;
            self.on_message(msg, endpoint, params)?;
        }

        params.finish_negotiation()?;
        self.state = HandshakeState::Negotiated;

        self.peer.ok_or_else(|| {
            WatchError::InvalidTransition("negotiated without a peer version".to_string())
        })
    }

    fn on_message<S: Read + Write>(
        &mut self,
        msg: Message,
        endpoint: &mut Endpoint<S>,
        params: &mut ConnParams,
    ) -> Result<()> {
        match msg {
            Message::Version(peer) if self.got_version => {
                debug!(version = peer.version, "repeated version ignored");
            }
            Message::Version(peer) => {
                let ours = params.version();
                if params.lower_to(peer.version)? {
                    info!(from = ours, to = peer.version, "peer is older, lowering protocol version");
                }
                endpoint.write_message(params, &Message::Verack)?;

                debug!(
                    version = peer.version,
                    user_agent = %peer.user_agent,
                    start_height = peer.start_height,
                    services = ?peer.services,
                    "peer version"
                );
                self.got_version = true;
                self.peer = Some(peer);
            }
            Message::Verack => self.got_verack = true,
            other => debug!(command = %other.command(), "ignored during handshake"),
        }

        if self.got_version || self.got_verack {
            self.state = HandshakeState::VersionAcked;
        }
        Ok(())
    }
}

/// Runs the full opening of a session: announce, negotiate, then send the
/// configured extra messages in order.
///
/// I/O failures here are logged as a likely-full peer before being
/// returned; a peer that hangs up mid-handshake becomes
/// [`WatchError::HandshakeRejected`].
pub fn negotiate<S: Read + Write>(
    endpoint: &mut Endpoint<S>,
    params: &mut ConnParams,
    config: &SessionConfig,
) -> Result<VersionMessage> {
    let announce = payload::version_message(
        params.version(),
        config.start_height,
        &config.user_agent,
        config.relay,
        endpoint.peer_addr(),
    );

    let peer = Handshake::new()
        .run(endpoint, params, announce)
        .map_err(|err| match err {
            WatchError::Protocol(source) => {
                warn!(
                    error = %source,
                    "handshake failed; peer is likely at capacity or refused the connection"
                );
                if is_disconnect_kind(source.kind()) {
                    WatchError::HandshakeRejected { source }
                } else {
                    WatchError::Protocol(source)
                }
            }
            other => other,
        })?;

    info!(
        version = params.version(),
        peer_agent = %peer.user_agent,
        peer_height = peer.start_height,
        "connection negotiated"
    );

    for msg in &config.extra_messages {
        endpoint.write_message(params, msg)?;
    }

    Ok(peer)
}
