//! Connection parameters threaded through every read and write.

use crate::error::{Result, WatchError};
use crate::wire::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Negotiating,
    Negotiated,
}

/// Protocol version, network and negotiation phase of one connection.
///
/// Owned by the session's control thread and passed by reference to the
/// codec on every call. The version can only go down, and only while
/// negotiating; once [`Phase::Negotiated`] it is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnParams {
    version: i32,
    network: Network,
    phase: Phase,
}

impl ConnParams {
    pub fn new(version: i32, network: Network) -> Self {
        Self {
            version,
            network,
            phase: Phase::Negotiating,
        }
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_negotiated(&self) -> bool {
        self.phase == Phase::Negotiated
    }

    /// Adopts the peer's version if it is lower than ours.
    ///
    /// Returns whether the effective version changed. A higher or equal
    /// peer version leaves ours in place.
    pub fn lower_to(&mut self, peer_version: i32) -> Result<bool> {
        if self.is_negotiated() {
            return Err(WatchError::InvalidTransition(format!(
                "version change to {peer_version} after negotiation (fixed at {})",
                self.version
            )));
        }

        if peer_version < self.version {
            self.version = peer_version;
            return Ok(true);
        }

        Ok(false)
    }

    /// Freezes the parameters for the rest of the session.
    pub fn finish_negotiation(&mut self) -> Result<()> {
        if self.is_negotiated() {
            return Err(WatchError::InvalidTransition(
                "negotiation already finished".to_string(),
            ));
        }
        self.phase = Phase::Negotiated;
        Ok(())
    }
}
