// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! QKD-FH Simulator
//!
//! Runs both roles in one process over an in-memory link, optionally with an
//! intercept-resend eavesdropper spliced between them.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use qkdfh_core::{
    channel::Link,
    config::ProtocolConfig,
    eve::{spawn_intercept_resend, EveStrategy},
    fh::{self, FhReport},
    hopping::{generate_pattern, render_pattern},
    photon::Basis,
    rng::RandomSource,
    stats::SessionStats,
    QkdReceiver, QkdSender,
};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EveBasis {
    Random,
    Rect,
    Diag,
}

impl From<EveBasis> for EveStrategy {
    fn from(basis: EveBasis) -> Self {
        match basis {
            EveBasis::Random => EveStrategy::Random,
            EveBasis::Rect => EveStrategy::Fixed(Basis::Rect),
            EveBasis::Diag => EveStrategy::Fixed(Basis::Diag),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "qkdfh-sim")]
#[command(about = "QKD-FH Simulator - sender and receiver in one process", long_about = None)]
struct Args {
    /// Path to a YAML protocol configuration file (ignored if --env-mode is set)
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

    /// Put an intercept-resend eavesdropper on the link
    #[arg(long)]
    eve: bool,

    /// Eavesdropper measurement basis
    #[arg(long, value_enum, default_value = "random")]
    eve_basis: EveBasis,

    /// Seed for the sender's generator
    #[arg(long)]
    sender_seed: Option<u64>,

    /// Seed for the receiver's generator
    #[arg(long)]
    receiver_seed: Option<u64>,

    /// Seed for the eavesdropper's generator
    #[arg(long)]
    eve_seed: Option<u64>,

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

fn load_config(args: &Args) -> Result<ProtocolConfig> {
    let mut config = if args.env_mode {
        ProtocolConfig::from_env().context("Failed to load configuration from environment")?
    } else if let Some(path) = &args.config {
        ProtocolConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?
    } else {
        ProtocolConfig::default()
    };

    if let Some(key_length) = args.key_length {
        config.key_length = key_length;
    }
    if let Some(photon_factor) = args.photon_factor {
        config.photon_factor = photon_factor;
    }
    if let Some(loss_rate) = args.loss_rate {
        config.loss_rate = loss_rate;
    }
    if let Some(qber_threshold) = args.qber_threshold {
        config.qber_threshold = qber_threshold;
    }
    if let Some(message) = &args.message {
        config.message = message.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn rng(seed: Option<u64>) -> RandomSource {
    seed.map(RandomSource::from_seed)
        .unwrap_or_else(RandomSource::from_entropy)
}

fn log_summary(role: &str, stats: &SessionStats, json: bool) {
    if json {
        match stats.to_json() {
            Ok(summary) => info!(summary = %summary, "{} QKD summary", role),
            Err(e) => warn!("Could not serialize {} summary: {}", role, e),
        }
        return;
    }
    info!("--- {} QKD summary ---", role);
    for line in stats.summary_lines() {
        info!("{}", line);
    }
}

async fn run_sender(
    config: ProtocolConfig,
    rng: RandomSource,
    mut link: Link,
    plot: bool,
    json: bool,
) -> Result<usize> {
    let mut sender = QkdSender::new(config.clone(), rng);
    let result = sender.run(&mut link).await;
    log_summary("Sender", sender.stats(), json);
    let key = result.context("Sender did not establish a key")?;

    let pattern = generate_pattern(key.seed, config.message.chars().count(), &config.frequency_pool)?;
    if plot {
        info!(
            "Hopping pattern:\n{}",
            render_pattern(&pattern, &config.frequency_pool)
        );
    }
    let sent = fh::send_message(&mut link, &pattern, &config.message).await?;
    Ok(sent)
}

async fn run_receiver(
    config: ProtocolConfig,
    rng: RandomSource,
    mut link: Link,
    json: bool,
) -> Result<FhReport> {
    let mut receiver = QkdReceiver::new(config.clone(), rng);
    let result = receiver.run(&mut link).await;
    log_summary("Receiver", receiver.stats(), json);
    let key = result.context("Receiver did not establish a key")?;

    let pattern = generate_pattern(key.seed, config.message.chars().count(), &config.frequency_pool)?;
    let report = fh::receive_message(&mut link, &pattern).await?;
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.json);

    info!("QKD-FH Simulator v{}", qkdfh_core::VERSION);
    let config = load_config(&args)?;
    let timeout = config.channel_timeout();

    let (sender_link, receiver_link, eve) = if args.eve {
        let (sender_link, eve_up) = Link::pair(timeout);
        let (eve_down, receiver_link) = Link::pair(timeout);
        info!("Eavesdropper enabled ({:?} basis)", args.eve_basis);
        let eve = spawn_intercept_resend(
            eve_up,
            eve_down,
            rng(args.eve_seed),
            args.eve_basis.into(),
        );
        (sender_link, receiver_link, Some(eve))
    } else {
        let (sender_link, receiver_link) = Link::pair(timeout);
        (sender_link, receiver_link, None)
    };

    let (sent, received) = tokio::join!(
        run_sender(
            config.clone(),
            rng(args.sender_seed),
            sender_link,
            args.plot,
            args.json
        ),
        run_receiver(config.clone(), rng(args.receiver_seed), receiver_link, args.json)
    );

    if let Some(eve) = eve {
        match eve.await {
            Ok(summary) if args.json => match summary.to_json() {
                Ok(json) => info!(eavesdropper = %json, "Eavesdropper summary"),
                Err(e) => warn!("Could not serialize eavesdropper summary: {}", e),
            },
            Ok(summary) => info!(
                "Eavesdropper intercepted {} photons ({} in the wrong basis)",
                summary.intercepted, summary.wrong_basis
            ),
            Err(e) => warn!("Eavesdropper task failed: {}", e),
        }
    }

    match (sent, received) {
        (Ok(sent), Ok(report)) => {
            if args.json {
                info!(sent, report = %report.to_json()?, "Frequency-hopping report");
            } else {
                info!("--- Frequency-hopping report ---");
                info!("Sent:          {} ({} characters)", config.message, sent);
                info!("Reconstructed: {}", report.reconstructed);
            }
            if report.is_exact(&config.message) {
                info!("Message received intact");
            } else {
                warn!(
                    "Message altered: {} sync errors, {} missing",
                    report.mismatches.len(),
                    report.missing.len()
                );
            }
            Ok(())
        }
        (sent, received) => {
            if let Err(e) = &sent {
                error!("Sender: {:#}", e);
            }
            if let Err(e) = &received {
                error!("Receiver: {:#}", e);
            }
            sent.and(received).map(|_| ())
        }
    }
}
