//! Attack window estimation.
//!
//! A burst of connection attempts that are never answered shows up in the
//! tracker output as incomplete records.  The window spans the earliest to
//! the latest open timestamp among them.  When a trace has no incomplete
//! records at all a fixed window relative to the first connection is used
//! instead, see [`WindowConfig`].

use std::fmt;

use crate::tracker::ConnectionRecord;

/// Offsets (seconds after the first record) used when no incomplete record
/// exists.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub fallback_start: f64,
    pub fallback_end: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            fallback_start: 20.0,
            fallback_end: 100.0,
        }
    }
}

/// Where an [`AttackWindow`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSource {
    /// Derived from this many incomplete flows.
    Incomplete { flows: usize },
    /// Fixed offsets from the first record.
    Fallback,
}

impl fmt::Display for WindowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete { flows } => write!(f, "{flows} incomplete flow(s)"),
            Self::Fallback => f.write_str("fallback offsets"),
        }
    }
}

/// Inferred anomaly interval, epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttackWindow {
    pub start: f64,
    pub end: f64,
    pub source: WindowSource,
}

impl AttackWindow {
    pub fn span(&self) -> f64 {
        self.end - self.start
    }
}

/// [`estimate_with`] using the default fallback offsets.
pub fn estimate(records: &[ConnectionRecord]) -> Option<AttackWindow> {
    estimate_with(records, &WindowConfig::default())
}

/// Infer the attack window from tracker records.
///
/// Returns `None` only when `records` is empty.
pub fn estimate_with(records: &[ConnectionRecord], config: &WindowConfig) -> Option<AttackWindow> {
    let mut flows = 0usize;
    let mut bounds: Option<(f64, f64)> = None;
    for record in records.iter().filter(|r| r.is_incomplete()) {
        flows += 1;
        let t = record.opened_at;
        bounds = Some(match bounds {
            None => (t, t),
            Some((lo, hi)) => (lo.min(t), hi.max(t)),
        });
    }

    if let Some((start, end)) = bounds {
        return Some(AttackWindow {
            start,
            end,
            source: WindowSource::Incomplete { flows },
        });
    }

    let first = records
        .iter()
        .map(|r| r.opened_at)
        .min_by(|a, b| a.total_cmp(b))?;
    log::info!("[window] no incomplete flows; using fallback offsets from {first}");
    Some(AttackWindow {
        start: first + config.fallback_start,
        end: first + config.fallback_end,
        source: WindowSource::Fallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::FlowKey;
    use crate::tracker::ConnectionState;
    use std::net::{IpAddr, Ipv4Addr};

    fn record(port: u16, opened_at: f64, closed: bool) -> ConnectionRecord {
        let state = if closed {
            ConnectionState::Closed {
                closed_at: opened_at + 1.0,
                duration: 1.0,
            }
        } else {
            ConnectionState::Open
        };
        ConnectionRecord {
            key: FlowKey::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                port,
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                80,
            ),
            opened_at,
            state,
        }
    }

    #[test]
    fn window_spans_incomplete_flows() {
        let records = vec![
            record(1, 0.0, true),
            record(2, 12.0, false),
            record(3, 15.0, true),
            record(4, 31.5, false),
            record(5, 40.0, true),
        ];
        let w = estimate(&records).unwrap();
        assert_eq!(w.start, 12.0);
        assert_eq!(w.end, 31.5);
        assert_eq!(w.source, WindowSource::Incomplete { flows: 2 });
        assert_eq!(w.span(), 19.5);
    }

    #[test]
    fn single_incomplete_flow_gives_zero_width_window() {
        let w = estimate(&[record(1, 7.0, false)]).unwrap();
        assert_eq!((w.start, w.end), (7.0, 7.0));
    }

    #[test]
    fn fallback_is_offset_from_first_record() {
        let records = vec![record(1, 1000.0, true), record(2, 1005.0, true)];
        let w = estimate(&records).unwrap();
        assert_eq!(w.start, 1020.0);
        assert_eq!(w.end, 1100.0);
        assert_eq!(w.source, WindowSource::Fallback);
    }

    #[test]
    fn fallback_offsets_are_configurable() {
        let cfg = WindowConfig {
            fallback_start: 1.0,
            fallback_end: 2.0,
        };
        let w = estimate_with(&[record(1, 10.0, true)], &cfg).unwrap();
        assert_eq!((w.start, w.end), (11.0, 12.0));
    }

    #[test]
    fn no_records_no_window() {
        assert_eq!(estimate(&[]), None);
    }
}
