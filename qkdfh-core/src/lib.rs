// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! QKD-FH Core Library
//!
//! Simulated BB84 key exchange whose final key seeds a frequency-hopping
//! message transfer between a Sender and a Receiver.
//!
//! # Architecture
//!
//! - `rng`: Explicitly seeded randomness, one instance per role
//! - `photon`: Photon model, measurement and loss
//! - `protocol`: Quantum and public channel messages, wire frames
//! - `channel`: Two-lane FIFO link with bounded reads
//! - `transport`: The same link over a single TCP stream
//! - `qkd`: Sender and Receiver protocol engines
//! - `seed`: Final key to seed derivation
//! - `hopping`: Seeded hopping pattern generation
//! - `fh`: Per-character frequency-hopping transfer
//! - `eve`: Intercept-resend eavesdropper
//! - `stats`: Per-session statistics
//! - `config`: Configuration with validation
//! - `error`: Unified error and abort types

pub mod channel;
pub mod config;
pub mod error;
pub mod eve;
pub mod fh;
pub mod hopping;
pub mod photon;
pub mod protocol;
pub mod qkd;
pub mod rng;
pub mod seed;
pub mod stats;
pub mod transport;

pub use error::{AbortReason, Error, Result};
pub use qkd::{KeyMaterial, QkdReceiver, QkdSender};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default hopping pool (MHz)
pub const DEFAULT_FREQUENCIES: [f64; 25] = [
    88.1, 90.5, 92.3, 94.7, 96.9, 99.1, 101.3, 104.5, 107.9, 110.2, 112.7, 115.3, 118.0, 121.5,
    124.8, 127.1, 130.6, 133.9, 136.4, 140.1, 142.5, 145.8, 148.2, 151.9, 155.0,
];

/// Two frequency tags closer than this name the same hop (MHz)
pub const FREQUENCY_TOLERANCE_MHZ: f64 = 0.01;
