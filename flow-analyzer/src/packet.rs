//! Packet and flow-key model.
//!
//! A [`PacketRecord`] is one observed frame reduced to the fields the tracker
//! cares about: when it was seen, how much payload it carried and, if it was a
//! TCP segment, its [`Transport`] header.  Frames without a transport header
//! (ARP, ICMP, truncated captures, ...) are still represented so they can be
//! counted as ignored.
//!
//! No I/O happens here; parsing of capture exports lives in
//! [`crate::capture`].

use std::fmt;
use std::net::IpAddr;

/// Bit-flag constants for the TCP `flags` header field (RFC 793 / RFC 3168
/// assignments, low byte only).
pub mod flags {
    /// Finish: sender has no more data.
    pub const FIN: u8 = 0x01;
    /// Synchronise sequence numbers (connection opening).
    pub const SYN: u8 = 0x02;
    /// Reset the connection.
    pub const RST: u8 = 0x04;
    /// Push buffered data to the application.
    pub const PSH: u8 = 0x08;
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 0x10;
    /// Urgent pointer is valid.
    pub const URG: u8 = 0x20;

    /// Either bit that terminates a connection.
    pub const CLOSING: u8 = FIN | RST;
}

/// Default maximum payload length accepted by the tracker, in bytes.
pub const DEFAULT_MAX_PAYLOAD: usize = 1500;

/// The literal, directional 4-tuple of a TCP segment.
///
/// Two directions of the same physical connection are two different keys;
/// no normalisation is applied.  The derived ordering (address before port,
/// source before destination) is what the tracker uses to break ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub src_addr: IpAddr,
    pub src_port: u16,
    pub dst_addr: IpAddr,
    pub dst_port: u16,
}

impl FlowKey {
    pub fn new(src_addr: IpAddr, src_port: u16, dst_addr: IpAddr, dst_port: u16) -> Self {
        Self {
            src_addr,
            src_port,
            dst_addr,
            dst_port,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}",
            std::net::SocketAddr::new(self.src_addr, self.src_port),
            std::net::SocketAddr::new(self.dst_addr, self.dst_port)
        )
    }
}

/// Transport-layer view of a TCP segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transport {
    pub key: FlowKey,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
}

impl Transport {
    /// `true` if the SYN bit is set.
    pub fn is_opening(&self) -> bool {
        self.flags & flags::SYN != 0
    }

    /// `true` if FIN or RST is set.
    pub fn is_closing(&self) -> bool {
        self.flags & flags::CLOSING != 0
    }
}

/// One captured frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord {
    /// Unix epoch seconds, fractional.
    pub timestamp: f64,
    /// Transport payload length in bytes.
    pub payload_len: usize,
    /// `None` for frames that carry no TCP header.
    pub transport: Option<Transport>,
}

impl PacketRecord {
    /// A TCP segment.
    pub fn tcp(timestamp: f64, key: FlowKey, flags: u8, payload_len: usize) -> Self {
        Self {
            timestamp,
            payload_len,
            transport: Some(Transport { key, flags }),
        }
    }

    /// A frame with no transport header.
    pub fn non_transport(timestamp: f64, payload_len: usize) -> Self {
        Self {
            timestamp,
            payload_len,
            transport: None,
        }
    }
}
