// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! QKD-FH Sender
//!
//! Listens for the receiver, runs the BB84 exchange as the photon source, then
//! transmits the configured message one character per hop.
//!
//! ```text
//! ┌──────────┐   photons + public msgs   ┌──────────┐
//! │  Sender  │ <───────── TCP ─────────> │ Receiver │
//! │ (listen) │   FH symbols after key    │(connect) │
//! └──────────┘                           └──────────┘
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use qkdfh_core::{
    config::NodeConfig,
    fh,
    hopping::{generate_pattern, render_pattern},
    rng::RandomSource,
    stats::SessionStats,
    transport, QkdSender,
};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "qkdfh-sender")]
#[command(about = "QKD-FH Sender - BB84 photon source and frequency-hopping transmitter", long_about = None)]
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

    /// Listen address
    #[arg(short, long)]
    address: Option<String>,

    /// Desired final key length in bits
    #[arg(short, long)]
    key_length: Option<usize>,

    /// Photons prepared per key bit
    #[arg(short, long)]
    photon_factor: Option<usize>,

    /// Simulated photon loss rate (0.0 to 1.0)
    #[arg(short, long)]
    loss_rate: Option<f64>,

    /// Maximum acceptable QBER
    #[arg(short, long)]
    qber_threshold: Option<f64>,

    /// Message to send over the hopping channel
    #[arg(short, long)]
    message: Option<String>,

    /// Seed the sender's generator for a reproducible run
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
    if let Some(photon_factor) = args.photon_factor {
        config.protocol.photon_factor = photon_factor;
    }
    if let Some(loss_rate) = args.loss_rate {
        config.protocol.loss_rate = loss_rate;
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
            Ok(summary) => info!(summary = %summary, "Sender QKD summary"),
            Err(e) => warn!("Could not serialize session summary: {}", e),
        }
        return;
    }
    info!("--- Sender QKD summary ---");
    for line in stats.summary_lines() {
        info!("{}", line);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.json);

    info!("QKD-FH Sender v{}", qkdfh_core::VERSION);
    let config = load_config(&args)?;
    let protocol = config.protocol.clone();
    info!(
        "Key length {}, photon factor {}, loss rate {:.1}%, QBER threshold {:.1}%",
        protocol.key_length,
        protocol.photon_factor,
        protocol.loss_rate * 100.0,
        protocol.qber_threshold * 100.0
    );

    let listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("Failed to bind {}", config.address))?;
    info!("Waiting for receiver on {}", config.address);

    let (mut link, peer) = transport::accept(&listener, protocol.channel_timeout())
        .await
        .context("Receiver did not connect")?;
    info!("Receiver connected from {}", peer);

    let rng = match args.seed {
        Some(seed) => RandomSource::from_seed(seed),
        None => RandomSource::from_entropy(),
    };
    let mut sender = QkdSender::new(protocol.clone(), rng);
    let result = sender.run(&mut link).await;
    log_summary(sender.stats(), args.json);

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

    let sent = fh::send_message(&mut link, &pattern, &protocol.message).await;
    link.shutdown().await;
    let sent = sent.context("Frequency-hopping transmission failed")?;
    info!("Frequency-hopping transmission complete ({} characters)", sent);
    info!("Sender finished");
    Ok(())
}
