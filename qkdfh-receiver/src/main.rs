// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! QKD-FH Receiver
//!
//! Connects to the sender, measures the incoming photons in random bases,
//! completes the BB84 exchange and then reconstructs the hopped message by
//! following the locally derived pattern.

use anyhow::{Context, Result};
use clap::Parser;
use qkdfh_core::{
    config::NodeConfig,
    fh,
    hopping::{generate_pattern, render_pattern},
    rng::RandomSource,
    stats::SessionStats,
    transport, QkdReceiver,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "qkdfh-receiver")]
#[command(about = "QKD-FH Receiver - BB84 photon detector and frequency-hopping receiver", long_about = None)]
struct Args {
    /// Path to a YAML configuration file (ignored if --env-mode is set)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Load configuration from QKDFH_* environment variables instead of file
    #[arg(long, default_value = "false")]
    env_mode: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit JSON log lines and JSON session summaries
    #[arg(long)]
    json: bool,

    /// Sender address
    #[arg(short, long)]
    address: Option<String>,

    /// Expected final key length (must match the sender)
    #[arg(short, long)]
    key_length: Option<usize>,

    /// Maximum acceptable QBER
    #[arg(short, long)]
    qber_threshold: Option<f64>,

    /// Expected message (its length sizes the hopping pattern)
    #[arg(short, long)]
    message: Option<String>,

    /// Seed the receiver's generator for a reproducible run
    #[arg(long)]
    seed: Option<u64>,

    /// Log the hopping pattern as a text chart
    #[arg(long)]
    plot: bool,
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = if args.env_mode {
        info!("Loading configuration from environment variables");
        NodeConfig::from_env().context("Failed to load configuration from environment")?
    } else if let Some(path) = &args.config {
        info!("Loading configuration from {}", path.display());
        NodeConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?
    } else {
        NodeConfig::default()
    };

    if let Some(address) = &args.address {
        config.address = address.clone();
    }
    if let Some(key_length) = args.key_length {
        config.protocol.key_length = key_length;
    }
    if let Some(qber_threshold) = args.qber_threshold {
        config.protocol.qber_threshold = qber_threshold;
    }
    if let Some(message) = &args.message {
        config.protocol.message = message.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn log_summary(stats: &SessionStats, json: bool) {
    if json {
        match stats.to_json() {
            Ok(summary) => info!(summary = %summary, "Receiver QKD summary"),
            Err(e) => warn!("Could not serialize session summary: {}", e),
        }
        return;
    }
    info!("--- Receiver QKD summary ---");
    for line in stats.summary_lines() {
        info!("{}", line);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.json);

    info!("QKD-FH Receiver v{}", qkdfh_core::VERSION);
    let config = load_config(&args)?;
    let protocol = config.protocol.clone();

    info!("Connecting to sender at {}", config.address);
    let mut link = transport::connect(&config.address, protocol.channel_timeout())
        .await
        .with_context(|| format!("Failed to connect to {}", config.address))?;

    let rng = match args.seed {
        Some(seed) => RandomSource::from_seed(seed),
        None => RandomSource::from_entropy(),
    };
    let mut receiver = QkdReceiver::new(protocol.clone(), rng);
    let result = receiver.run(&mut link).await;
    log_summary(receiver.stats(), args.json);

    let key = match result {
        Ok(key) => key,
        Err(e) => {
            link.shutdown().await;
            return Err(e).context("QKD session did not establish a key");
        }
    };

    let pattern = generate_pattern(
        key.seed,
        protocol.message.chars().count(),
        &protocol.frequency_pool,
    )?;
    if args.plot {
        info!(
            "Hopping pattern:\n{}",
            render_pattern(&pattern, &protocol.frequency_pool)
        );
    }

    let report = fh::receive_message(&mut link, &pattern).await;
    link.shutdown().await;
    let report = report.context("Frequency-hopping reception failed")?;

    if args.json {
        info!(report = %report.to_json()?, "Frequency-hopping report");
    } else {
        info!("--- Frequency-hopping report ---");
        info!("Expected:      {}", protocol.message);
        info!("Reconstructed: {}", report.reconstructed);
        info!(
            "Accepted {}/{} characters, {} sync errors, {} missing",
            report.accepted,
            report.expected_len,
            report.mismatches.len(),
            report.missing.len()
        );
    }
    if report.is_exact(&protocol.message) {
        info!("Message received intact");
    } else {
        warn!("Message reconstruction incomplete or altered");
    }
    Ok(())
}
