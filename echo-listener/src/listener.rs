//! Single-threaded, readiness-multiplexed TCP listener.
//!
//! # Event loop
//!
//! ```text
//!            ┌──────────── Poll::poll (only suspension point) ◀──────────┐
//!            │                                                           │
//!            ▼                                                           │
//!   token == LISTENER ── accept until WouldBlock ── register (ACTIVE) ───┤
//!            │                                                           │
//!   token == conn ──── read until WouldBlock ── decode ── write ack ─────┤
//!                            │                                           │
//!                  EOF / fault ── deregister + close (CLOSED) ───────────┘
//! ```
//!
//! The watch set is the `mio` registry: the listening socket under
//! [`LISTENER`] plus every active connection under its own token.  All of it
//! is owned by [`Listener`] and only touched from the thread running the
//! loop.  There is no idle timeout and no graceful shutdown; a connection
//! leaves the set on peer close or fault, the listener on process exit.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use thiserror::Error;

use crate::connection::{Connection, ReadOutcome};

/// Token of the listening socket.  Connections start at 1.
pub const LISTENER: Token = Token(0);

/// Default size of the per-read buffer; one read is one message.
pub const DEFAULT_READ_BUFFER: usize = 1024;

// ---------------------------------------------------------------------------
// Configuration and errors
// ---------------------------------------------------------------------------

/// Listener tunables.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind: SocketAddr,
    /// Bytes read per `read` call, i.e. the largest message.
    pub read_buffer: usize,
    /// Disable Nagle's algorithm on accepted streams.
    pub nodelay: bool,
    /// Readiness events fetched per poll.
    pub events_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            read_buffer: DEFAULT_READ_BUFFER,
            nodelay: false,
            events_capacity: 1024,
        }
    }
}

/// Errors that stop the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The listening endpoint could not be set up.  Startup precondition,
    /// not retried.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("readiness poll failed: {0}")]
    Poll(#[source] io::Error),
}

/// Counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub accepted: u64,
    pub accept_faults: u64,
    pub acks_sent: u64,
    /// Connections closed by a zero-length read.
    pub peer_closed: u64,
    /// Connections torn down by a read/decode/write/register fault.
    pub faulted: u64,
}

// ---------------------------------------------------------------------------
// Acceptor
// ---------------------------------------------------------------------------

/// The listening endpoint as seen by the loop.
///
/// Implemented for `mio::net::TcpListener`; other implementations wrap it to
/// observe or inject accept behaviour.
pub trait Acceptor: Source {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Acceptor for TcpListener {
    fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// The event loop and everything it owns.
pub struct Listener<A: Acceptor = TcpListener> {
    poll: Poll,
    events: Events,
    acceptor: A,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    buf: Vec<u8>,
    config: ListenerConfig,
    stats: ListenerStats,
}

impl Listener<TcpListener> {
    /// Bind `config.bind` and set up the watch set.
    pub fn bind(config: ListenerConfig) -> Result<Self, ListenerError> {
        let acceptor = TcpListener::bind(config.bind).map_err(|source| ListenerError::Bind {
            addr: config.bind,
            source,
        })?;
        Self::with_acceptor(acceptor, config)
    }
}

impl<A: Acceptor> Listener<A> {
    /// Build a listener around an already bound endpoint.
    pub fn with_acceptor(mut acceptor: A, config: ListenerConfig) -> Result<Self, ListenerError> {
        let poll = Poll::new().map_err(ListenerError::Poll)?;
        poll.registry()
            .register(&mut acceptor, LISTENER, Interest::READABLE)
            .map_err(|source| ListenerError::Bind {
                addr: config.bind,
                source,
            })?;

        Ok(Self {
            poll,
            events: Events::with_capacity(config.events_capacity.max(1)),
            acceptor,
            connections: HashMap::new(),
            next_token: LISTENER.0 + 1,
            buf: vec![0u8; config.read_buffer.max(1)],
            config,
            stats: ListenerStats::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    pub fn stats(&self) -> ListenerStats {
        self.stats
    }

    /// Connections currently in the watch set.
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// Serve forever.  Only returns if the readiness primitive itself fails.
    pub fn run(&mut self) -> Result<(), ListenerError> {
        match self.local_addr() {
            Ok(addr) => log::info!("[listener] serving on {addr}"),
            Err(e) => log::warn!("[listener] serving on unknown address: {e}"),
        }
        loop {
            self.turn(None)?;
        }
    }

    /// One loop iteration: wait for readiness (at most `timeout`, forever on
    /// `None`) and serve every ready member.  Returns the number of events.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<usize, ListenerError> {
        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(ListenerError::Poll(e));
        }

        let ready: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
        for &token in &ready {
            if token == LISTENER {
                self.accept_pending();
            } else {
                self.service(token);
            }
        }
        Ok(ready.len())
    }

    fn accept_pending(&mut self) {
        loop {
            match self.acceptor.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Existing connections are unaffected.  Readiness is
                    // edge-triggered, so re-arm the listener or clients still
                    // in the backlog would wait for an unrelated arrival.
                    self.stats.accept_faults += 1;
                    log::warn!("[listener] accept fault: {e}");
                    if let Err(e) = self.poll.registry().reregister(
                        &mut self.acceptor,
                        LISTENER,
                        Interest::READABLE,
                    ) {
                        log::warn!("[listener] re-arming listener failed: {e}");
                    }
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                log::warn!("[listener] TCP_NODELAY on {peer}: {e}");
            }
        }

        let token = Token(self.next_token);
        self.next_token += 1;

        let mut conn = Connection::new(token, stream, peer);
        if let Err(e) = conn.activate(self.poll.registry()) {
            self.stats.faulted += 1;
            log::warn!("[listener] could not watch {peer}: {e}");
            conn.close(self.poll.registry());
            return;
        }

        self.stats.accepted += 1;
        log::info!("[listener] accepted {peer} as conn {}", token.0);
        self.connections.insert(token, conn);
    }

    fn service(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            log::trace!("[listener] event for closed conn {}", token.0);
            return;
        };

        let before = conn.acks_sent;
        let result = conn.service(&mut self.buf);
        self.stats.acks_sent += conn.acks_sent - before;

        match result {
            Ok(ReadOutcome::Drained) => {}
            Ok(ReadOutcome::PeerClosed) => {
                self.stats.peer_closed += 1;
                self.teardown(token);
            }
            Err(fault) => {
                self.stats.faulted += 1;
                if fault.is_peer_gone() {
                    log::info!("[listener] conn {}: {fault}", token.0);
                } else {
                    log::warn!("[listener] conn {}: {fault}", token.0);
                }
                self.teardown(token);
            }
        }
    }

    fn teardown(&mut self, token: Token) {
        if let Some(conn) = self.connections.remove(&token) {
            conn.close(self.poll.registry());
        }
    }
}

/// Bind and serve forever.  Returns only on bind or poll failure.
pub fn serve(config: ListenerConfig) -> Result<(), ListenerError> {
    Listener::bind(config)?.run()
}
