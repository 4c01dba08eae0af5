//! Entry point for `echo-listener`.
//!
//! Parses CLI arguments and hands over to [`echo_listener::serve`], which
//! only returns on failure.  `main.rs` owns only process setup (logging,
//! argument parsing).

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;

use echo_listener::listener::DEFAULT_READ_BUFFER;
use echo_listener::{serve, ListenerConfig};

/// Multiplexed TCP listener that acknowledges base64-encoded messages.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Local address to bind.
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Bytes per read; one read is treated as one message.
    #[arg(long, default_value_t = DEFAULT_READ_BUFFER)]
    read_buffer: usize,

    /// Disable Nagle's algorithm on accepted connections.
    #[arg(long)]
    nodelay: bool,
}

fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    log::info!("Starting listener on {}", cli.bind);

    let config = ListenerConfig {
        bind: cli.bind,
        read_buffer: cli.read_buffer,
        nodelay: cli.nodelay,
        ..ListenerConfig::default()
    };
    serve(config).context("listener stopped")
}
