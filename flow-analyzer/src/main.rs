//! Entry point for `flow-analyzer`.
//!
//! Reads a capture export, runs the tracker and prints the summary report.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use flow_analyzer::capture::read_capture;
use flow_analyzer::report::{RecordTable, Report};
use flow_analyzer::{track, TrackerConfig, WindowConfig};

/// Classify TCP flows in a capture export and infer the attack window.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Comma-separated field export (`-` for stdin).
    capture: PathBuf,

    /// Packets with a larger payload are ignored.
    #[arg(long, default_value_t = flow_analyzer::packet::DEFAULT_MAX_PAYLOAD)]
    max_payload: usize,

    /// Fallback window start, seconds after the first connection.
    #[arg(long, default_value_t = 20.0)]
    fallback_start: f64,

    /// Fallback window end, seconds after the first connection.
    #[arg(long, default_value_t = 100.0)]
    fallback_end: f64,

    /// Also print one line per reconstructed connection.
    #[arg(long)]
    records: bool,
}

fn main() -> Result<()> {
    // Set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let packets = if cli.capture.as_os_str() == "-" {
        read_capture(io::stdin().lock()).context("reading capture from stdin")?
    } else {
        let file = File::open(&cli.capture)
            .with_context(|| format!("opening {}", cli.capture.display()))?;
        read_capture(BufReader::new(file))
            .with_context(|| format!("reading {}", cli.capture.display()))?
    };
    log::info!("Analyzing {} packet(s)", packets.len());

    let output = track(
        &packets,
        TrackerConfig {
            max_payload: cli.max_payload,
        },
    );
    let report = Report::new(
        &output,
        &WindowConfig {
            fallback_start: cli.fallback_start,
            fallback_end: cli.fallback_end,
        },
    );

    if cli.records {
        println!("{}", RecordTable(&output.records));
    }
    println!("{report}");

    Ok(())
}
