//! `echo-listener` — a single-threaded, readiness-multiplexed TCP listener.
//!
//! # Architecture
//!
//! ```text
//!  clients ──TCP──▶ ┌──────────────────────────────┐
//!                   │ Listener (mio Poll, 1 thread) │
//!                   │   token 0: listening socket   │
//!                   │   token n: Connection         │
//!                   └──────────────┬───────────────┘
//!                                  │ one read = one frame
//!                              ┌───▼───┐
//!                              │ codec │  base64 ⇄ UTF-8, "Ack: " echo
//!                              └───────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`codec`]      — wire encoding of messages and acknowledgments
//! - [`connection`] — per-connection read/decode/ack and teardown
//! - [`listener`]   — the event loop and its watch set
//! - [`state`]      — connection finite-state-machine types

pub mod codec;
pub mod connection;
pub mod listener;
pub mod state;

pub use codec::{decode_ack, decode_message, encode_ack, encode_message, CodecError};
pub use listener::{serve, Acceptor, Listener, ListenerConfig, ListenerError, ListenerStats};
