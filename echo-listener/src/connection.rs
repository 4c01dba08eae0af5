//! One client connection owned by the listener's event loop.
//!
//! A [`Connection`] wraps a non-blocking `mio` stream and implements the
//! per-connection half of the echo contract: drain every readable byte, treat
//! each read as one message, answer each decoded message with exactly one
//! acknowledgment before reading the next.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use thiserror::Error;

use crate::codec::{decode_message, encode_ack, CodecError};
use crate::state::ConnectionState;

/// Errors that end a single connection.  Never fatal to the listener.
#[derive(Debug, Error)]
pub enum ConnectionFault {
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("undecodable message: {0}")]
    Decode(#[from] CodecError),
    #[error("acknowledgment write failed: {0}")]
    Write(#[source] io::Error),
}

impl ConnectionFault {
    /// `true` when the peer simply went away (reset, broken pipe) rather
    /// than sending something bad.
    pub fn is_peer_gone(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            Self::Read(e) | Self::Write(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
            ),
            Self::Decode(_) => false,
        }
    }
}

/// How a readable event ended without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Socket drained; keep watching.
    Drained,
    /// Zero-length read: the peer closed its side.
    PeerClosed,
}

/// A client connection.
#[derive(Debug)]
pub struct Connection {
    pub token: Token,
    pub peer: SocketAddr,
    pub state: ConnectionState,
    /// Acknowledgments written on this connection so far.
    pub acks_sent: u64,
    stream: TcpStream,
}

impl Connection {
    /// Wrap a freshly accepted stream in the `Accepted` state.
    pub fn new(token: Token, stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            token,
            peer,
            state: ConnectionState::Accepted,
            acks_sent: 0,
            stream,
        }
    }

    /// Add the stream to the watch set: `Accepted → Active`.
    pub fn activate(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, Interest::READABLE)?;
        self.state = ConnectionState::Active;
        Ok(())
    }

    /// Serve a readable event.
    ///
    /// Reads until the socket would block.  Readiness is edge-triggered, so
    /// stopping early would leave buffered messages unanswered until the
    /// peer sends again.
    pub fn service(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, ConnectionFault> {
        loop {
            match self.stream.read(buf) {
                Ok(0) => return Ok(ReadOutcome::PeerClosed),
                Ok(n) => self.respond(&buf[..n])?,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::Drained),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConnectionFault::Read(e)),
            }
        }
    }

    fn respond(&mut self, frame: &[u8]) -> Result<(), ConnectionFault> {
        let message = decode_message(frame)?;
        log::info!("[conn {}] received from {}: {message}", self.token.0, self.peer);
        // A full send buffer surfaces as WouldBlock here; there is no
        // backpressure, so it is treated like any other write fault.
        self.stream
            .write_all(&encode_ack(&message))
            .map_err(ConnectionFault::Write)?;
        self.acks_sent += 1;
        Ok(())
    }

    /// Remove from the watch set and shut the socket down: `→ Closed`.
    pub fn close(mut self, registry: &Registry) {
        if self.state == ConnectionState::Active {
            if let Err(e) = registry.deregister(&mut self.stream) {
                log::debug!("[conn {}] deregister failed: {e}", self.token.0);
            }
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            log::trace!("[conn {}] shutdown: {e}", self.token.0);
        }
        self.state = ConnectionState::Closed;
        log::debug!(
            "[conn {}] {} closed after {} ack(s)",
            self.token.0,
            self.peer,
            self.acks_sent
        );
    }
}
