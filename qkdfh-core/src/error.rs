// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! Error types for the QKD-FH system
//!
//! Provides a unified error taxonomy using `thiserror`. Session aborts carry an
//! [`AbortReason`] that is also sent to the peer, so both roles end a failed
//! session with the same classification.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a QKD session was aborted
///
/// Every abort is terminal for the session. A caller may start a fresh session
/// with fresh randomness, but the engine never retries on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The receiver observed zero photons on the quantum channel
    NoPhotonsReceived,
    /// Receiver basis count differs from the sender's delivered photon count
    IndexLengthMismatch,
    /// Too few sifted or remaining bits to check the channel and keep a key
    InsufficientKeyMaterial,
    /// Estimated QBER exceeded the configured threshold
    EavesdropSuspectedOrNoisyChannel,
    /// A channel read did not complete in time
    ChannelTimeout,
    /// The peer closed its end of the link
    ChannelClosed,
    /// The peer sent a message that is out of order, malformed or out of range
    ProtocolViolation,
}

impl AbortReason {
    /// Stable upper-case name, as shown in session summaries
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoPhotonsReceived => "NO_PHOTONS_RECEIVED",
            Self::IndexLengthMismatch => "INDEX_LENGTH_MISMATCH",
            Self::InsufficientKeyMaterial => "INSUFFICIENT_KEY_MATERIAL",
            Self::EavesdropSuspectedOrNoisyChannel => "EAVESDROP_SUSPECTED_OR_NOISY_CHANNEL",
            Self::ChannelTimeout => "CHANNEL_TIMEOUT",
            Self::ChannelClosed => "CHANNEL_CLOSED",
            Self::ProtocolViolation => "PROTOCOL_VIOLATION",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seed derivation was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DerivationFailure {
    #[error("key of {len} bits is empty or shorter than the {min}-bit minimum")]
    EmptyOrShortKey { len: usize, min: usize },
}

/// Core error type for QKD-FH operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The QKD session was aborted
    #[error("Session aborted: {0}")]
    Abort(AbortReason),

    /// The final key cannot be turned into a seed
    #[error("Seed derivation failed: {0}")]
    Derivation(#[from] DerivationFailure),

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if the error ended a protocol session
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Abort(_))
    }

    /// Abort classification, if this error is a session abort
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Error::Abort(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl From<AbortReason> for Error {
    fn from(reason: AbortReason) -> Self {
        Error::Abort(reason)
    }
}

// Conversions for common error types
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
