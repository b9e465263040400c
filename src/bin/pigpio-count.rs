//! pigpio-count - print edge counts for GPIO pins
//!
//! Starts one counter per pin on a shared daemon connection and prints the
//! running totals at a fixed interval until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Count rising edges on GPIO 21 and 23, once per second
//! pigpio-count 21 23
//!
//! # Remote daemon, both edges, ten JSON samples at 500ms
//! pigpio-count 21 --host pi.local --edge either --interval-ms 500 --samples 10 --json
//!
//! # Pins and options from a config file
//! pigpio-count --config ./counters.toml
//!
//! # Enable debug logging
//! RUST_LOG=pigpio_count_core=debug pigpio-count 21
//! ```
//!
//! # Configuration Precedence
//!
//! Command line flags, then the config file, then `PIGPIO_ADDR` /
//! `PIGPIO_PORT`, then `localhost:8888`.
//!
//! # Signal Handling
//!
//! SIGTERM/SIGINT stop every counter and exit after the final sample.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pigpio_count_core::{
    CountConfig, CounterEntry, CounterOptions, DaemonConfig, DaemonConnection, Edge, PulseCounter,
};

/// Count edge transitions on GPIO pins through the pigpio daemon
#[derive(Parser, Debug)]
#[command(name = "pigpio-count", version, about)]
struct Args {
    /// GPIO pins to count (Broadcom numbering, 0-31)
    pins: Vec<u32>,

    /// Daemon host (overrides PIGPIO_ADDR)
    #[arg(long)]
    host: Option<String>,

    /// Daemon port (overrides PIGPIO_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Transitions to count: rising, falling or either
    #[arg(long)]
    edge: Option<Edge>,

    /// Glitch filter in microseconds
    #[arg(long = "glitch-us")]
    glitch_us: Option<u32>,

    /// Milliseconds between samples
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: u64,

    /// Exit after this many samples
    #[arg(long)]
    samples: Option<u64>,

    /// Config file (defaults to <config_dir>/pigpio-count/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print samples as JSON lines
    #[arg(long)]
    json: bool,
}

/// One printed sample.
#[derive(Debug, Serialize)]
struct Sample {
    timestamp: DateTime<Utc>,
    counts: BTreeMap<u32, u64>,
}

impl Sample {
    fn text(&self) -> String {
        self.counts
            .iter()
            .map(|(pin, ticks)| format!("pin {pin}: {ticks}"))
            .collect::<Vec<_>>()
            .join("  ")
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    run(args)
}

fn load_config(path: Option<&PathBuf>) -> Result<CountConfig> {
    match path {
        Some(path) => CountConfig::load(path)
            .with_context(|| format!("Failed to load config file {}", path.display())),
        None => Ok(CountConfig::load_default()
            .context("Failed to load default config file")?
            .unwrap_or_default()),
    }
}

fn daemon_config(args: &Args, file: &CountConfig) -> Result<DaemonConfig> {
    let mut config = DaemonConfig::from_env().context("Invalid pigpio environment")?;
    config.apply(&file.daemon);
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    Ok(config)
}

/// Pins from the command line win over `[[counter]]` entries.
fn counter_entries(args: &Args, file: &CountConfig) -> Result<Vec<CounterEntry>> {
    let mut entries = if args.pins.is_empty() {
        file.counters.clone()
    } else {
        args.pins
            .iter()
            .map(|&pin| CounterEntry {
                pin,
                edge: Edge::default(),
                glitch_filter_us: None,
            })
            .collect()
    };

    if entries.is_empty() {
        bail!("No pins to count; pass pins on the command line or add [[counter]] entries");
    }

    for entry in &mut entries {
        if let Some(edge) = args.edge {
            entry.edge = edge;
        }
        if let Some(us) = args.glitch_us {
            entry.glitch_filter_us = Some(us);
        }
    }
    Ok(entries)
}

fn options_summary(options: &CounterOptions) -> String {
    match options.glitch_filter_us() {
        Some(us) => format!("{} edges, {us}us filter", options.edge),
        None => format!("{} edges", options.edge),
    }
}

/// Runs the counters (async entry point).
#[tokio::main]
async fn run(args: Args) -> Result<()> {
    // Logs go to stderr; stdout carries samples
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("pigpio_count=info".parse()?)
                .add_directive("pigpio_count_core=info".parse()?),
        )
        .init();

    let file = load_config(args.config.as_ref())?;
    let daemon = daemon_config(&args, &file)?;
    let entries = counter_entries(&args, &file)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %daemon.address(),
        pins = entries.len(),
        "pigpio-count starting"
    );

    let connection = DaemonConnection::new(daemon);
    let mut counters = Vec::with_capacity(entries.len());
    for entry in &entries {
        let options = entry.options();
        let mut counter = PulseCounter::with_options(&connection, entry.pin, options)
            .with_context(|| format!("Cannot count GPIO {}", entry.pin))?;
        counter
            .start()
            .await
            .with_context(|| format!("Failed to start counter on GPIO {}", entry.pin))?;
        info!(pin = entry.pin, options = %options_summary(&options), "Counting");
        counters.push(counter);
    }

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let mut ticker = interval(Duration::from_millis(args.interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut taken = 0u64;
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let sample = Sample {
            timestamp: Utc::now(),
            counts: counters.iter().map(|c| (c.pin(), c.tick_count())).collect(),
        };
        if args.json {
            println!("{}", serde_json::to_string(&sample)?);
        } else {
            println!("{}", sample.text());
        }

        taken += 1;
        if args.samples.is_some_and(|limit| taken >= limit) {
            break;
        }
    }

    let mut failed = 0;
    for counter in &mut counters {
        if let Err(e) = counter.stop().await {
            warn!(pin = counter.pin(), error = %e, "Counter did not stop cleanly");
            failed += 1;
        }
    }

    info!(samples = taken, "pigpio-count stopped");
    if failed > 0 {
        bail!("{failed} counter(s) did not stop cleanly");
    }
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
