//! Text capture export reader.
//!
//! The analyzer does not read pcap files itself.  It consumes a
//! comma-separated field export such as
//!
//! ```text
//! tshark -r trace.pcap -T fields -E separator=, \
//!     -e frame.time_epoch -e ip.src -e ip.dst \
//!     -e tcp.srcport -e tcp.dstport -e tcp.flags -e tcp.len
//! ```
//!
//! One row per frame, columns in [`COLUMNS`] order.  Frames that are not TCP
//! leave the transport columns empty and become non-transport records.  Only
//! the timestamp is mandatory: without it a row cannot be placed in the
//! sequence and the whole read fails.

use std::io;
use std::net::IpAddr;

use csv::{ReaderBuilder, StringRecord, Trim};
use thiserror::Error;

use crate::packet::{FlowKey, PacketRecord};

/// Expected column order.
pub const COLUMNS: [&str; 7] = [
    "frame.time_epoch",
    "ip.src",
    "ip.dst",
    "tcp.srcport",
    "tcp.dstport",
    "tcp.flags",
    "tcp.len",
];

const COL_TIME: usize = 0;
const COL_SRC: usize = 1;
const COL_DST: usize = 2;
const COL_SPORT: usize = 3;
const COL_DPORT: usize = 4;
const COL_FLAGS: usize = 5;
const COL_LEN: usize = 6;

/// Errors that abort reading a capture export.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("line {line}: missing or invalid timestamp {value:?}")]
    Timestamp { line: u64, value: String },
    #[error("malformed capture export: {0}")]
    Csv(#[from] csv::Error),
}

/// Read every row of a capture export, preserving row order.
pub fn read_capture<R: io::Read>(reader: R) -> Result<Vec<PacketRecord>, CaptureError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);

    let mut packets = Vec::new();
    for row in rdr.records() {
        let row = row?;
        if let Some(packet) = parse_row(&row)? {
            packets.push(packet);
        }
    }
    log::debug!("[capture] read {} packet(s)", packets.len());
    Ok(packets)
}

/// Parse one export row.  Returns `Ok(None)` for a header row.
pub fn parse_row(row: &StringRecord) -> Result<Option<PacketRecord>, CaptureError> {
    let field = |i: usize| row.get(i).unwrap_or("");
    let line = row.position().map(|p| p.line()).unwrap_or(0);

    let raw_ts = field(COL_TIME);
    if raw_ts == COLUMNS[COL_TIME] {
        return Ok(None);
    }
    let timestamp = match raw_ts.parse::<f64>() {
        Ok(ts) if ts.is_finite() => ts,
        _ => {
            return Err(CaptureError::Timestamp {
                line,
                value: raw_ts.to_string(),
            })
        }
    };

    let payload_len = field(COL_LEN).parse::<usize>().unwrap_or(0);

    let key = (|| {
        let src: IpAddr = field(COL_SRC).parse().ok()?;
        let dst: IpAddr = field(COL_DST).parse().ok()?;
        let sport: u16 = field(COL_SPORT).parse().ok()?;
        let dport: u16 = field(COL_DPORT).parse().ok()?;
        Some(FlowKey::new(src, sport, dst, dport))
    })();

    let packet = match (key, parse_flags(field(COL_FLAGS))) {
        (Some(key), Some(flags)) => PacketRecord::tcp(timestamp, key, flags, payload_len),
        _ => {
            log::trace!("[capture] line {line}: no transport header");
            PacketRecord::non_transport(timestamp, payload_len)
        }
    };
    Ok(Some(packet))
}

/// Parse `0x0012`-style hex or plain decimal.  Only the low byte (FIN..URG)
/// is kept.
fn parse_flags(s: &str) -> Option<u8> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok()?,
        None => s.parse::<u16>().ok()?,
    };
    Some((value & 0x00ff) as u8)
}
