// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! Configuration management for QKD-FH roles

use crate::seed::MIN_SEED_KEY_BITS;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound on photons prepared per session
///
/// Keeps the receiver's basis report well inside one transport frame.
pub const MAX_PHOTON_COUNT: usize = 100_000;

/// Protocol parameters shared by both roles
///
/// The sender and receiver must agree on `key_length`, `check_fraction`,
/// `frequency_pool` and `message` for the hopping patterns to line up.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProtocolConfig {
    /// Desired final key length in bits
    #[serde(default = "default_key_length")]
    pub key_length: usize,

    /// Photons prepared per desired key bit, to compensate for loss and sifting
    #[serde(default = "default_photon_factor")]
    pub photon_factor: usize,

    /// Probability that a prepared photon is lost before reaching the receiver
    #[serde(default = "default_loss_rate")]
    pub loss_rate: f64,

    /// Highest acceptable QBER
    #[serde(default = "default_qber_threshold")]
    pub qber_threshold: f64,

    /// Fraction of the sifted key disclosed for QBER estimation
    #[serde(default = "default_check_fraction")]
    pub check_fraction: f64,

    /// Minimum sifted key length (derived from key_length and check_fraction when unset)
    #[serde(default)]
    pub min_sifted_length: Option<usize>,

    /// Candidate hop frequencies in MHz
    #[serde(default = "default_frequency_pool")]
    pub frequency_pool: Vec<f64>,

    /// Message carried over the hopping channel
    #[serde(default = "default_message")]
    pub message: String,

    /// Upper bound on any single channel read, in milliseconds
    #[serde(default = "default_channel_timeout_ms")]
    pub channel_timeout_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            key_length: default_key_length(),
            photon_factor: default_photon_factor(),
            loss_rate: default_loss_rate(),
            qber_threshold: default_qber_threshold(),
            check_fraction: default_check_fraction(),
            min_sifted_length: None,
            frequency_pool: default_frequency_pool(),
            message: default_message(),
            channel_timeout_ms: default_channel_timeout_ms(),
        }
    }
}

impl ProtocolConfig {
    /// Load configuration from environment variables (`QKDFH_` prefix)
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed("QKDFH_")
            .from_env()
            .map_err(|e| Error::Config(format!("Failed to parse environment variables: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.key_length < MIN_SEED_KEY_BITS {
            return Err(Error::Config(format!(
                "key_length must be at least {} bits, got {}",
                MIN_SEED_KEY_BITS, self.key_length
            )));
        }

        if self.photon_factor == 0 {
            return Err(Error::Config("photon_factor must be > 0".to_string()));
        }

        if self.photon_count() > MAX_PHOTON_COUNT {
            return Err(Error::Config(format!(
                "key_length * photon_factor must not exceed {}",
                MAX_PHOTON_COUNT
            )));
        }

        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(Error::Config(format!(
                "loss_rate must be between 0.0 and 1.0, got {}",
                self.loss_rate
            )));
        }

        if !(0.0..=1.0).contains(&self.qber_threshold) {
            return Err(Error::Config(format!(
                "qber_threshold must be between 0.0 and 1.0, got {}",
                self.qber_threshold
            )));
        }

        if !(self.check_fraction > 0.0 && self.check_fraction < 1.0) {
            return Err(Error::Config(format!(
                "check_fraction must be strictly between 0.0 and 1.0, got {}",
                self.check_fraction
            )));
        }

        if self.frequency_pool.is_empty() {
            return Err(Error::Config("frequency_pool cannot be empty".to_string()));
        }

        if let Some(bad) = self
            .frequency_pool
            .iter()
            .find(|f| !f.is_finite() || **f <= 0.0)
        {
            return Err(Error::Config(format!("Invalid pool frequency: {}", bad)));
        }

        if self.message.is_empty() {
            return Err(Error::Config("message cannot be empty".to_string()));
        }

        if self.channel_timeout_ms == 0 {
            return Err(Error::Config("channel_timeout_ms must be > 0".to_string()));
        }

        Ok(())
    }

    /// Number of photon slots the sender prepares
    pub fn photon_count(&self) -> usize {
        self.key_length.saturating_mul(self.photon_factor)
    }

    /// Number of sifted bits disclosed for a sifted key of `sifted_len` bits
    pub fn check_sample_size(&self, sifted_len: usize) -> usize {
        (sifted_len as f64 * self.check_fraction).ceil() as usize
    }

    /// Smallest sifted key that leaves room for a check sample and a full key
    pub fn min_sifted_length(&self) -> usize {
        if let Some(explicit) = self.min_sifted_length {
            return explicit;
        }
        let mut n = self.key_length.max(1);
        loop {
            let m = self.check_sample_size(n);
            if m >= 1 && n - m.min(n) >= self.key_length {
                return n;
            }
            n += 1;
        }
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }
}

/// Node configuration for the TCP binaries
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Listen address (sender) or peer address (receiver)
    #[serde(default = "default_address")]
    pub address: String,

    /// Protocol parameters
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

#[derive(Deserialize)]
struct NodeEnv {
    #[serde(default = "default_address")]
    address: String,
}

impl NodeConfig {
    /// Load configuration from environment variables (`QKDFH_` prefix)
    pub fn from_env() -> Result<Self> {
        let env: NodeEnv = envy::prefixed("QKDFH_")
            .from_env()
            .map_err(|e| Error::Config(format!("Failed to parse environment variables: {}", e)))?;
        Ok(Self {
            address: env.address,
            protocol: ProtocolConfig::from_env()?,
        })
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(Error::Config("address cannot be empty".to_string()));
        }
        self.protocol.validate()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            protocol: ProtocolConfig::default(),
        }
    }
}

// Default value functions
fn default_key_length() -> usize {
    16
}

fn default_photon_factor() -> usize {
    10
}

fn default_loss_rate() -> f64 {
    0.10
}

fn default_qber_threshold() -> f64 {
    0.15
}

fn default_check_fraction() -> f64 {
    0.25
}

fn default_frequency_pool() -> Vec<f64> {
    crate::DEFAULT_FREQUENCIES.to_vec()
}

fn default_message() -> String {
    "QKD-FH SECURE CHANNEL ESTABLISHED!".to_string()
}

fn default_channel_timeout_ms() -> u64 {
    45_000
}

fn default_address() -> String {
    "127.0.0.1:12346".to_string()
}
