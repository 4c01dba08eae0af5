//! Per-flow connection lifecycle reconstruction.
//!
//! [`ConnectionTracker`] is a strictly sequential fold over an ordered packet
//! sequence.  It owns all per-flow state: a map of *live* (opened, not yet
//! closed) flows and the list of records that have already been finalised.
//!
//! ```text
//!            SYN                 FIN | RST
//!  (none) ─────────▶  OPEN  ───────────────▶  CLOSED
//!                      │ ▲
//!                      └─┘ SYN (replaces the live record)
//! ```
//!
//! Anything still OPEN when the input ends is reported as incomplete.
//!
//! The live map is a `BTreeMap` so that end-of-input iteration, and therefore
//! the whole output, is identical across runs.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::packet::{FlowKey, PacketRecord, DEFAULT_MAX_PAYLOAD};

/// Tracker tunables.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Packets whose payload exceeds this many bytes are ignored.
    pub max_payload: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Lifecycle state of a finalised [`ConnectionRecord`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectionState {
    /// SYN seen, no FIN/RST before the end of input.
    Open,
    /// SYN followed by FIN or RST.
    Closed {
        closed_at: f64,
        /// Exactly `closed_at - opened_at`.
        duration: f64,
    },
}

impl ConnectionState {
    fn rank(&self) -> u8 {
        match self {
            Self::Closed { .. } => 0,
            Self::Open => 1,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("OPEN"),
            Self::Closed { .. } => f.write_str("CLOSED"),
        }
    }
}

/// One connection attempt as reconstructed from the trace.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionRecord {
    pub key: FlowKey,
    pub opened_at: f64,
    pub state: ConnectionState,
}

impl ConnectionRecord {
    /// `Some(duration)` for closed records.
    pub fn duration(&self) -> Option<f64> {
        match self.state {
            ConnectionState::Closed { duration, .. } => Some(duration),
            ConnectionState::Open => None,
        }
    }

    /// Opened but never closed within the trace.
    pub fn is_incomplete(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

/// Running totals.  Every packet lands in exactly one of `ignored`,
/// `opened`, `closed` or `untracked`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateCounters {
    pub total: u64,
    /// Oversize or non-transport packets.
    pub ignored: u64,
    /// SYN packets, including ones that replaced a live record.
    pub opened: u64,
    pub closed: u64,
    /// Records still open at end of input.
    pub incomplete: u64,
    /// SYNs that overwrote a live open record for the same key.
    pub superseded: u64,
    /// Accepted packets that caused no transition (unmatched FIN/RST, plain
    /// ACK/data segments).
    pub untracked: u64,
}

impl AggregateCounters {
    /// Sum of the four disjoint per-packet categories.  Equals `total`.
    pub fn accounted(&self) -> u64 {
        self.ignored + self.opened + self.closed + self.untracked
    }
}

/// Why a packet was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No TCP header.
    NonTransport,
    /// Payload longer than [`TrackerConfig::max_payload`].
    Oversize { len: usize },
}

/// Why an accepted packet changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UntrackedReason {
    /// FIN/RST for a key with no live open record.
    UnmatchedClose,
    /// Neither SYN nor FIN/RST.
    NoTransition,
}

/// What a single packet did to the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    Ignored(IgnoreReason),
    /// A live record was created; `superseded` if one already existed.
    Opened { superseded: bool },
    Closed { duration: f64 },
    Untracked(UntrackedReason),
}

/// Final tracker result.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerOutput {
    /// Sorted by open timestamp, then flow key.
    pub records: Vec<ConnectionRecord>,
    pub counters: AggregateCounters,
}

impl TrackerOutput {
    pub fn completed(&self) -> impl Iterator<Item = &ConnectionRecord> {
        self.records.iter().filter(|r| !r.is_incomplete())
    }

    pub fn incomplete(&self) -> impl Iterator<Item = &ConnectionRecord> {
        self.records.iter().filter(|r| r.is_incomplete())
    }
}

/// Sequential per-flow state machine over an ordered packet stream.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    config: TrackerConfig,
    /// Open timestamp of each live flow.
    live: BTreeMap<FlowKey, f64>,
    /// Closed records in the order they closed.
    finished: Vec<ConnectionRecord>,
    counters: AggregateCounters,
    last_timestamp: Option<f64>,
}

impl ConnectionTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Counters so far.  `incomplete` is only filled in by [`Self::finish`].
    pub fn counters(&self) -> &AggregateCounters {
        &self.counters
    }

    /// Number of flows currently open.
    pub fn live_flows(&self) -> usize {
        self.live.len()
    }

    /// Apply one packet.  Packets must be fed in capture order.
    pub fn observe(&mut self, packet: &PacketRecord) -> Observation {
        self.counters.total += 1;

        if let Some(last) = self.last_timestamp {
            if packet.timestamp < last {
                log::debug!(
                    "[tracker] timestamp went backwards ({} < {}); keeping input order",
                    packet.timestamp,
                    last
                );
            }
        }
        self.last_timestamp = Some(packet.timestamp);

        if packet.payload_len > self.config.max_payload {
            self.counters.ignored += 1;
            return Observation::Ignored(IgnoreReason::Oversize {
                len: packet.payload_len,
            });
        }
        let Some(transport) = packet.transport else {
            self.counters.ignored += 1;
            return Observation::Ignored(IgnoreReason::NonTransport);
        };

        if transport.is_opening() {
            let superseded = self
                .live
                .insert(transport.key, packet.timestamp)
                .is_some();
            self.counters.opened += 1;
            if superseded {
                self.counters.superseded += 1;
                log::debug!("[tracker] {} re-opened at {}", transport.key, packet.timestamp);
            }
            return Observation::Opened { superseded };
        }

        if transport.is_closing() {
            return match self.live.remove(&transport.key) {
                Some(opened_at) => {
                    let duration = packet.timestamp - opened_at;
                    self.finished.push(ConnectionRecord {
                        key: transport.key,
                        opened_at,
                        state: ConnectionState::Closed {
                            closed_at: packet.timestamp,
                            duration,
                        },
                    });
                    self.counters.closed += 1;
                    Observation::Closed { duration }
                }
                None => {
                    self.counters.untracked += 1;
                    Observation::Untracked(UntrackedReason::UnmatchedClose)
                }
            };
        }

        self.counters.untracked += 1;
        Observation::Untracked(UntrackedReason::NoTransition)
    }

    /// End of input: every live flow becomes an incomplete record.
    pub fn finish(self) -> TrackerOutput {
        let ConnectionTracker {
            live,
            mut finished,
            mut counters,
            ..
        } = self;

        counters.incomplete = live.len() as u64;
        finished.extend(live.into_iter().map(|(key, opened_at)| ConnectionRecord {
            key,
            opened_at,
            state: ConnectionState::Open,
        }));
        finished.sort_by(compare_records);

        log::debug!(
            "[tracker] finished: {} packets, {} opened, {} closed, {} incomplete, {} ignored",
            counters.total,
            counters.opened,
            counters.closed,
            counters.incomplete,
            counters.ignored
        );

        TrackerOutput {
            records: finished,
            counters,
        }
    }
}

fn compare_records(a: &ConnectionRecord, b: &ConnectionRecord) -> Ordering {
    a.opened_at
        .total_cmp(&b.opened_at)
        .then_with(|| a.key.cmp(&b.key))
        .then_with(|| a.state.rank().cmp(&b.state.rank()))
}

/// Run a fresh tracker over `packets` in iteration order.
pub fn track<'a, I>(packets: I, config: TrackerConfig) -> TrackerOutput
where
    I: IntoIterator<Item = &'a PacketRecord>,
{
    let mut tracker = ConnectionTracker::new(config);
    for packet in packets {
        tracker.observe(packet);
    }
    tracker.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::flags;
    use std::net::{IpAddr, Ipv4Addr};

    fn key(src_port: u16) -> FlowKey {
        FlowKey::new(
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
            src_port,
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
            8080,
        )
    }

    fn seg(ts: f64, port: u16, f: u8) -> PacketRecord {
        PacketRecord::tcp(ts, key(port), f, 0)
    }

    #[test]
    fn syn_then_fin_closes_with_exact_duration() {
        let out = track(
            &[seg(1.25, 1, flags::SYN), seg(3.75, 1, flags::FIN | flags::ACK)],
            TrackerConfig::default(),
        );
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].duration(), Some(2.5));
        assert_eq!(out.counters.closed, 1);
        assert_eq!(out.counters.incomplete, 0);
    }

    #[test]
    fn rst_closes_like_fin() {
        let out = track(
            &[seg(0.0, 1, flags::SYN), seg(4.0, 1, flags::RST)],
            TrackerConfig::default(),
        );
        assert_eq!(
            out.records[0].state,
            ConnectionState::Closed {
                closed_at: 4.0,
                duration: 4.0
            }
        );
    }

    #[test]
    fn unmatched_close_creates_nothing() {
        let mut tracker = ConnectionTracker::default();
        let obs = tracker.observe(&seg(1.0, 7, flags::FIN));
        assert_eq!(obs, Observation::Untracked(UntrackedReason::UnmatchedClose));
        let out = tracker.finish();
        assert!(out.records.is_empty());
        assert_eq!(out.counters.untracked, 1);
        assert_eq!(out.counters.closed, 0);
    }

    #[test]
    fn oversize_and_non_transport_are_ignored() {
        let mut tracker = ConnectionTracker::new(TrackerConfig { max_payload: 100 });
        assert_eq!(
            tracker.observe(&PacketRecord::tcp(0.0, key(1), flags::SYN, 101)),
            Observation::Ignored(IgnoreReason::Oversize { len: 101 })
        );
        assert_eq!(
            tracker.observe(&PacketRecord::non_transport(0.5, 60)),
            Observation::Ignored(IgnoreReason::NonTransport)
        );
        // Exactly at the limit is accepted.
        assert_eq!(
            tracker.observe(&PacketRecord::tcp(1.0, key(1), flags::SYN, 100)),
            Observation::Opened { superseded: false }
        );
        assert_eq!(tracker.counters().ignored, 2);
        assert_eq!(tracker.live_flows(), 1);
    }

    #[test]
    fn repeated_syn_replaces_live_record() {
        let mut tracker = ConnectionTracker::default();
        tracker.observe(&seg(0.0, 1, flags::SYN));
        assert_eq!(
            tracker.observe(&seg(3.0, 1, flags::SYN)),
            Observation::Opened { superseded: true }
        );
        let out = tracker.finish();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].opened_at, 3.0);
        assert!(out.records[0].is_incomplete());
        assert_eq!(out.counters.opened, 2);
        assert_eq!(out.counters.superseded, 1);
        assert_eq!(out.counters.incomplete, 1);
    }

    #[test]
    fn syn_after_close_starts_a_new_record() {
        let out = track(
            &[
                seg(0.0, 1, flags::SYN),
                seg(1.0, 1, flags::FIN),
                seg(2.0, 1, flags::SYN),
            ],
            TrackerConfig::default(),
        );
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].duration(), Some(1.0));
        assert!(out.records[1].is_incomplete());
        assert_eq!(out.records[1].opened_at, 2.0);
    }

    #[test]
    fn syn_fin_in_one_segment_only_opens() {
        let out = track(
            &[seg(0.0, 1, flags::SYN | flags::FIN)],
            TrackerConfig::default(),
        );
        assert_eq!(out.counters.opened, 1);
        assert_eq!(out.counters.closed, 0);
        assert!(out.records[0].is_incomplete());
    }

    #[test]
    fn ties_break_on_key_then_closed_first() {
        let out = track(
            &[
                seg(5.0, 9, flags::SYN),
                seg(5.0, 2, flags::SYN),
                seg(5.0, 2, flags::FIN),
                seg(5.0, 2, flags::SYN),
            ],
            TrackerConfig::default(),
        );
        let summary: Vec<_> = out
            .records
            .iter()
            .map(|r| (r.key.src_port, r.is_incomplete()))
            .collect();
        assert_eq!(summary, vec![(2, false), (2, true), (9, true)]);
    }

    #[test]
    fn plain_data_segments_are_untracked() {
        let out = track(
            &[
                seg(0.0, 1, flags::SYN),
                PacketRecord::tcp(0.1, key(1), flags::ACK | flags::PSH, 32),
                seg(0.2, 1, flags::ACK),
            ],
            TrackerConfig::default(),
        );
        assert_eq!(out.counters.untracked, 2);
        assert_eq!(out.counters.accounted(), out.counters.total);
    }

    #[test]
    fn backwards_timestamp_keeps_input_order() {
        let out = track(
            &[seg(10.0, 1, flags::SYN), seg(8.0, 1, flags::FIN)],
            TrackerConfig::default(),
        );
        assert_eq!(out.records[0].duration(), Some(-2.0));
    }
}
