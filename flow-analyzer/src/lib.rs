//! `flow-analyzer` — offline TCP connection lifecycle reconstruction.
//!
//! # Architecture
//!
//! ```text
//!  capture export ──▶ capture ──▶ PacketRecord* ──▶ tracker ──▶ records + counters
//!                                                                   │
//!                                                        window ◀───┘
//!                                                           │
//!                                                        report
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]  — packet record, flow key and TCP flag constants
//! - [`capture`] — reads a comma-separated field export into packet records
//! - [`tracker`] — sequential per-flow state machine and aggregate counters
//! - [`window`]  — attack window inference from incomplete flows
//! - [`report`]  — plain-text summary

pub mod capture;
pub mod packet;
pub mod report;
pub mod tracker;
pub mod window;

pub use packet::{flags, FlowKey, PacketRecord, Transport};
pub use tracker::{
    track, AggregateCounters, ConnectionRecord, ConnectionState, ConnectionTracker,
    TrackerConfig, TrackerOutput,
};
pub use window::{estimate, estimate_with, AttackWindow, WindowConfig, WindowSource};
