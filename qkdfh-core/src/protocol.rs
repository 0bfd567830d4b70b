// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! Protocol messages exchanged between the sender and receiver
//!
//! Each protocol step has its own self-contained record. Frames are tagged with
//! the logical channel they travel on and serialized with MessagePack when a
//! byte transport is involved.

use crate::error::AbortReason;
use crate::photon::{Basis, Photon};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Message on the quantum channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QuantumMessage {
    /// A delivered photon
    Photon(Photon),
    /// Sender has finished transmitting; `sent` counts delivered photons
    EndOfStream { sent: u64 },
}

/// Message on the public (classical, authenticated) channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PublicMessage {
    /// Session opening, sender to receiver
    Hello { version: u8, session_id: Uuid },
    /// Receiver's basis per received photon, in arrival order
    ReceiverBases(Vec<Basis>),
    /// Positions in the receiver's received sequence where bases matched
    MatchingIndices(Vec<usize>),
    /// Sifted-key positions both sides disclose for QBER estimation
    CheckIndices(Vec<usize>),
    /// Disclosed bit values, in the order of the agreed check indices
    CheckBits(Vec<bool>),
    /// Sender accepts the QBER estimate
    KeyConfirmed,
    /// Session aborted by the peer
    Abort(AbortReason),
    /// Sender is ready to start hopping
    FhReady,
    /// Receiver acknowledges `FhReady`
    FhAck,
    /// One character sent on one hop frequency (MHz)
    FhSymbol { frequency: f64, character: char },
    /// Sender has sent every character
    FhEnd,
}

impl PublicMessage {
    /// Short message name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "HELLO",
            Self::ReceiverBases(_) => "RECEIVER_BASES",
            Self::MatchingIndices(_) => "MATCHING_INDICES",
            Self::CheckIndices(_) => "CHECK_INDICES",
            Self::CheckBits(_) => "CHECK_BITS",
            Self::KeyConfirmed => "KEY_CONFIRMED",
            Self::Abort(_) => "ABORT",
            Self::FhReady => "FH_READY",
            Self::FhAck => "FH_ACK",
            Self::FhSymbol { .. } => "FH_SYMBOL",
            Self::FhEnd => "FH_END",
        }
    }
}

/// Transport frame tagged with its logical channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Quantum(QuantumMessage),
    Public(PublicMessage),
}

impl Frame {
    /// Serialize to MessagePack
    pub fn to_msgpack(&self) -> crate::Result<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack
    pub fn from_msgpack(bytes: &[u8]) -> crate::Result<Self> {
        rmp_serde::from_slice(bytes).map_err(Into::into)
    }
}

/// Render bits as a `0`/`1` string
pub fn bits_to_string(bits: &[bool]) -> String {
    bits.iter().map(|&b| if b { '1' } else { '0' }).collect()
}
