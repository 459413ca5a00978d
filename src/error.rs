//! Session error types.

use std::io;
use thiserror::Error;

/// Every way a watchtower session can end.
///
/// There is no recoverable variant: the session performs no retries, so
/// each of these reaches the top-level driver, which decides what to do
/// (the bundled binary logs and exits).
#[derive(Error, Debug)]
pub enum WatchError {
    /// Address resolution, dial, or dial timeout failed.
    #[error("could not connect to {peer}: {source}")]
    Connection {
        peer: String,
        #[source]
        source: io::Error,
    },

    /// The peer hung up before negotiation finished. Full peers commonly
    /// drop the socket instead of sending an explicit rejection.
    #[error("peer closed the connection during handshake: {source}")]
    HandshakeRejected {
        #[source]
        source: io::Error,
    },

    /// Malformed, truncated or unreadable traffic, or a failed write.
    #[error("protocol error: {0}")]
    Protocol(#[source] io::Error),

    /// A connection-parameter change that would break the one-way
    /// negotiation rules.
    #[error("invalid connection transition: {0}")]
    InvalidTransition(String),

    /// Rejected session configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A pipeline stage thread could not be started.
    #[error("failed to start {stage} stage: {source}")]
    Spawn {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    /// A pipeline stage stopped receiving, so its queue has no consumer.
    #[error("{0} stage is gone")]
    PipelineClosed(&'static str),

    /// A pipeline stage thread panicked (usually inside a consumer callback).
    #[error("{0} stage panicked")]
    StagePanicked(&'static str),
}

impl WatchError {
    /// True when the error happened because the remote side closed or
    /// reset the stream rather than sending bad data.
    pub fn is_disconnect(&self) -> bool {
        let source = match self {
            WatchError::HandshakeRejected { .. } => return true,
            WatchError::Protocol(source) => source,
            _ => return false,
        };
        is_disconnect_kind(source.kind())
    }
}

pub(crate) fn is_disconnect_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, WatchError>;
