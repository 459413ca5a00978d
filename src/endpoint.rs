use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, WatchError};
use crate::params::ConnParams;
use crate::wire::{self, Message};

/// Streams whose blocked reads can be cut short from another thread.
pub trait Interrupt {
    /// Returns a closure that makes pending and later reads on this stream
    /// fail.
    fn interrupter(&self) -> io::Result<Box<dyn Fn() + Send>>;
}

impl Interrupt for TcpStream {
    fn interrupter(&self) -> io::Result<Box<dyn Fn() + Send>> {
        let handle = self.try_clone()?;
        Ok(Box::new(move || {
            if let Err(err) = handle.shutdown(Shutdown::Both) {
                debug!(error = %err, "socket already closed");
            }
        }))
    }
}

/// The byte stream to the single peer.
///
/// Reads and writes are straight pass-throughs to the wire codec at the
/// version and network held in [`ConnParams`]; nothing is buffered here
/// beyond what the underlying stream does.
///
/// Generic over the stream so tests can drive it with any `Read + Write`.
#[derive(Debug)]
pub struct Endpoint<S = TcpStream> {
    stream: S,
    peer: Option<SocketAddr>,
}

impl Endpoint<TcpStream> {
    /// Resolves `peer` (host:port) and dials it with `timeout`.
    ///
    /// No retry: a failure here ends the session.
    pub fn connect(peer: &str, timeout: Duration) -> Result<Self> {
        let connection_error = |source: io::Error| WatchError::Connection {
            peer: peer.to_string(),
            source,
        };

        let addr = peer
            .to_socket_addrs()
            .map_err(connection_error)?
            .next()
            .ok_or_else(|| {
                connection_error(io::Error::new(
                    io::ErrorKind::NotFound,
                    "could not resolve address",
                ))
            })?;

        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(connection_error)?;
        stream.set_nodelay(true).map_err(connection_error)?;

        info!(%addr, "connected to peer");

        Ok(Self {
            stream,
            peer: Some(addr),
        })
    }
}

impl<S: Read + Write> Endpoint<S> {
    pub fn new(stream: S) -> Self {
        Self { stream, peer: None }
    }

    pub fn with_peer(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer: Some(peer),
        }
    }

    /// Address of the remote side, when the stream has one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Blocks until one complete, checksum-valid message has arrived.
    pub fn read_message(&mut self, params: &ConnParams) -> Result<Message> {
        let msg = wire::read_message(&mut self.stream, params.version(), params.network())
            .map_err(WatchError::Protocol)?;
        debug!(command = %msg.command(), "received");
        Ok(msg)
    }

    /// Blocks until `msg` has been fully written.
    pub fn write_message(&mut self, params: &ConnParams, msg: &Message) -> Result<()> {
        wire::write_message(&mut self.stream, params.version(), params.network(), msg)
            .map_err(WatchError::Protocol)?;
        debug!(command = %msg.command(), "sent");
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Interrupt> Endpoint<S> {
    pub fn interrupter(&self) -> io::Result<Box<dyn Fn() + Send>> {
        self.stream.interrupter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Network;
    use std::io::Cursor;
    use std::net::TcpListener;

    #[test]
    fn connect_to_closed_port_is_a_connection_error() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();

        let err = Endpoint::connect(&addr.to_string(), Duration::from_millis(500)).unwrap_err();
        assert!(matches!(err, WatchError::Connection { .. }));
    }

    #[test]
    fn unresolvable_peer_is_a_connection_error() {
        let err = Endpoint::connect("not an address", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, WatchError::Connection { .. }));
    }

    #[test]
    fn connect_records_peer_address() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let endpoint = Endpoint::connect(&addr.to_string(), Duration::from_secs(2)).unwrap();
        assert_eq!(endpoint.peer_addr(), Some(addr));
    }

    #[test]
    fn interrupter_unblocks_a_pending_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut endpoint = Endpoint::connect(&addr.to_string(), Duration::from_secs(2)).unwrap();
        // Accepted and held open, but silent.
        let (_peer, _) = listener.accept().unwrap();

        let interrupt = endpoint.interrupter().unwrap();
        let reader = std::thread::spawn(move || {
            endpoint.read_message(&ConnParams::new(70016, Network::Regtest))
        });
        std::thread::sleep(Duration::from_millis(100));
        interrupt();

        let err = reader.join().unwrap().unwrap_err();
        assert!(matches!(err, WatchError::Protocol(_)));
    }

    #[test]
    fn write_then_read_uses_session_network() {
        let params = ConnParams::new(70016, Network::Signet);

        let mut writer = Endpoint::new(Cursor::new(Vec::new()));
        writer.write_message(&params, &Message::Ping(5)).unwrap();
        let bytes = writer.into_inner().into_inner();
        assert_eq!(&bytes[..4], &Network::Signet.magic_bytes());

        let mut reader = Endpoint::new(Cursor::new(bytes));
        assert_eq!(reader.read_message(&params).unwrap(), Message::Ping(5));
    }

    #[test]
    fn read_on_empty_stream_is_a_protocol_error() {
        let params = ConnParams::new(70016, Network::Signet);
        let mut reader = Endpoint::new(Cursor::new(Vec::new()));

        let err = reader.read_message(&params).unwrap_err();
        assert!(matches!(err, WatchError::Protocol(_)));
        assert!(err.is_disconnect());
    }
}
