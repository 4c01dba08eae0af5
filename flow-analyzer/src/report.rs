//! Plain-text summary of a tracker run.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::tracker::{AggregateCounters, ConnectionRecord, TrackerOutput};
use crate::window::{estimate_with, AttackWindow, WindowConfig};

/// Counters plus the inferred window.
#[derive(Debug, Clone)]
pub struct Report {
    pub counters: AggregateCounters,
    pub window: Option<AttackWindow>,
}

impl Report {
    pub fn new(output: &TrackerOutput, window: &WindowConfig) -> Self {
        Self {
            counters: output.counters,
            window: estimate_with(&output.records, window),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        writeln!(f, "Total packets: {}", c.total)?;
        writeln!(f, "SYN packets:   {}", c.opened)?;
        writeln!(f, "Completed:     {}", c.closed)?;
        writeln!(f, "Incomplete:    {}", c.incomplete)?;
        writeln!(f, "Ignored:       {}", c.ignored)?;
        writeln!(f, "Superseded:    {}", c.superseded)?;
        writeln!(f, "Untracked:     {}", c.untracked)?;
        match &self.window {
            Some(w) => {
                writeln!(f, "Attack start:  {}", Timestamp(w.start))?;
                writeln!(f, "Attack end:    {}", Timestamp(w.end))?;
                write!(f, "Window from:   {}", w.source)
            }
            None => write!(f, "Attack window: no connections observed"),
        }
    }
}

/// Per-flow listing, one line per record.
pub struct RecordTable<'a>(pub &'a [ConnectionRecord]);

impl fmt::Display for RecordTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<20} {:<8} {:>12}  FLOW", "OPENED", "STATE", "DURATION")?;
        for r in self.0 {
            let duration = match r.duration() {
                Some(d) => format!("{d:.6}"),
                None => "-".to_string(),
            };
            writeln!(
                f,
                "{:<20.6} {:<8} {:>12}  {}",
                r.opened_at,
                r.state.to_string(),
                duration,
                r.key
            )?;
        }
        Ok(())
    }
}

/// Epoch seconds rendered both raw and as RFC 3339 UTC.
struct Timestamp(f64);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.floor();
        let nanos = ((self.0 - secs) * 1e9).round().min(999_999_999.0) as u32;
        match DateTime::<Utc>::from_timestamp(secs as i64, nanos) {
            Some(dt) => write!(
                f,
                "{:.6} ({})",
                self.0,
                dt.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
            None => write!(f, "{:.6}", self.0),
        }
    }
}
