//! The top-level session driver.
//!
//! A session owns one peer connection and one pipeline for its whole
//! life. It never ends successfully: every exit is an error, returned to
//! the caller after the pipeline has drained.
//!
//! If a pipeline stage dies the connection is shut down at once, so the
//! peer sees the session go away rather than a client that still answers
//! pings but delivers nothing.

use std::convert::Infallible;
use std::io::{Read, Write};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::dispatch::Dispatcher;
use crate::endpoint::{Endpoint, Interrupt};
use crate::error::{Result, WatchError};
use crate::handshake;
use crate::params::ConnParams;
use crate::pipeline::{Consumer, Pipeline, Queues};
use crate::wire::PROTOCOL_VERSION;

pub struct Session {
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Dials the configured peer and runs until the first error.
    pub fn run<C>(&self, consumer: Arc<C>) -> Result<Infallible>
    where
        C: Consumer + ?Sized,
    {
        self.config.validate()?;
        let (pipeline, queues) = Pipeline::start(consumer, self.config.tx_queue_capacity)?;

        let err = match Endpoint::connect(&self.config.peer, self.config.connect_timeout) {
            Ok(mut endpoint) => self.drive(&mut endpoint, &pipeline, queues),
            Err(err) => {
                drop(queues);
                err
            }
        };

        finish(pipeline, err)
    }

    /// Like [`Session::run`], over an already-open stream.
    pub fn run_on<S, C>(&self, mut endpoint: Endpoint<S>, consumer: Arc<C>) -> Result<Infallible>
    where
        S: Read + Write + Interrupt,
        C: Consumer + ?Sized,
    {
        self.config.validate()?;
        let (pipeline, queues) = Pipeline::start(consumer, self.config.tx_queue_capacity)?;

        let err = self.drive(&mut endpoint, &pipeline, queues);
        finish(pipeline, err)
    }

    /// Negotiates, then dispatches. Consumes `queues` so that they are
    /// closed whichever way this returns.
    fn drive<S>(
        &self,
        endpoint: &mut Endpoint<S>,
        pipeline: &Pipeline,
        queues: Queues,
    ) -> WatchError
    where
        S: Read + Write + Interrupt,
    {
        match endpoint.interrupter() {
            Ok(interrupt) => pipeline.health().on_failure(interrupt),
            Err(source) => return WatchError::Protocol(source),
        }

        let mut params = ConnParams::new(PROTOCOL_VERSION, self.config.network);

        if let Err(err) = handshake::negotiate(endpoint, &mut params, &self.config) {
            return err;
        }

        info!(network = %params.network(), version = params.version(), "watching peer");

        match Dispatcher::new(endpoint, &params, queues).run() {
            Ok(never) => match never {},
            Err(err) => err,
        }
    }
}

/// Waits for the stages to drain, then reports `err`.
///
/// A stage that died takes precedence: the I/O error it provoked by
/// shutting the socket is only logged.
fn finish(pipeline: Pipeline, err: WatchError) -> Result<Infallible> {
    let err = match pipeline.health().failed() {
        Some(stage) => {
            debug!(error = %err, "dispatch stopped after a stage failure");
            WatchError::StagePanicked(stage)
        }
        None => err,
    };
    error!(error = %err, "session ended");
    if let Err(stage) = pipeline.shutdown() {
        warn!(error = %stage, "pipeline did not shut down cleanly");
    }
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TxWithContext;
    use crate::wire::{Block, Network};
    use std::net::{TcpListener, TcpStream};
    use std::time::SystemTime;

    struct Nothing;

    impl Consumer for Nothing {
        fn on_block(&self, _received: SystemTime, _block: &Block) {}

        fn on_transaction(&self, _tx: TxWithContext) {}
    }

    fn loopback() -> (Endpoint<TcpStream>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let ours = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (theirs, _) = listener.accept().unwrap();
        (Endpoint::new(ours), theirs)
    }

    #[test]
    fn invalid_config_fails_before_any_io() {
        let session = Session::new(SessionConfig {
            start_height: -5,
            ..SessionConfig::default()
        });
        let (endpoint, mut peer) = loopback();

        let err = session.run_on(endpoint, Arc::new(Nothing)).unwrap_err();
        assert!(matches!(err, WatchError::Config(_)));

        // Nothing was written before the session gave up.
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut peer, &mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn unreachable_peer_ends_the_session_with_a_connection_error() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let session = Session::new(SessionConfig::new(addr.to_string(), Network::Regtest));

        let err = session.run(Arc::new(Nothing)).unwrap_err();
        assert!(matches!(err, WatchError::Connection { .. }));
    }

    #[test]
    fn silent_peer_is_rejected_during_handshake() {
        let session = Session::new(SessionConfig::new("ignored:0", Network::Regtest));
        let (endpoint, peer) = loopback();
        // Hangs up without answering.
        drop(peer);

        let err = session.run_on(endpoint, Arc::new(Nothing)).unwrap_err();
        assert!(matches!(err, WatchError::HandshakeRejected { .. }));
    }
}
