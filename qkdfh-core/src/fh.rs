// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! Frequency-hopping message transfer
//!
//! The sender tags character `i` with `pattern[i]`. The receiver computes the
//! same pattern locally and keeps a character only when its tag matches the
//! expected hop. Desynchronized or missing characters are reported, never
//! repaired, and never abort the transfer.

use crate::channel::Link;
use crate::error::AbortReason;
use crate::protocol::PublicMessage;
use crate::{Error, Result, FREQUENCY_TOLERANCE_MHZ};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

/// Placeholder for positions that were not accepted
pub const GAP: char = '?';

/// Two frequency tags name the same hop
pub fn frequencies_match(a: f64, b: f64) -> bool {
    (a - b).abs() < FREQUENCY_TOLERANCE_MHZ
}

/// Receiver-side reconstruction report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FhReport {
    pub expected_len: usize,
    pub accepted: usize,
    /// Positions whose frequency tag did not match the local pattern
    pub mismatches: Vec<usize>,
    /// Positions never received before the stream ended
    pub missing: Vec<usize>,
    /// Accepted characters in position order, gaps rendered as [`GAP`]
    pub reconstructed: String,
}

impl FhReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_complete(&self) -> bool {
        self.accepted == self.expected_len
    }

    /// Transfer succeeded iff every position was accepted and the text matches
    pub fn is_exact(&self, expected: &str) -> bool {
        self.is_complete() && self.reconstructed == expected
    }
}

fn await_peer(message: PublicMessage, expected: PublicMessage) -> Result<()> {
    match message {
        m if m == expected => Ok(()),
        PublicMessage::Abort(reason) => {
            warn!("Peer aborted before hopping: {}", reason);
            Err(Error::Abort(reason))
        }
        other => {
            warn!("Expected {} but received {}", expected.kind(), other.kind());
            Err(Error::Abort(AbortReason::ProtocolViolation))
        }
    }
}

/// Send `message` one character per hop
#[instrument(skip_all, fields(hops = pattern.len()))]
pub async fn send_message(link: &mut Link, pattern: &[f64], message: &str) -> Result<usize> {
    let chars: Vec<char> = message.chars().collect();
    if chars.len() != pattern.len() {
        return Err(Error::Config(format!(
            "Message has {} characters but the pattern has {} hops",
            chars.len(),
            pattern.len()
        )));
    }

    link.send_public(PublicMessage::FhReady).await?;
    await_peer(link.recv_public().await?, PublicMessage::FhAck)?;
    info!("Receiver ready, hopping over {} frequencies", pattern.len());

    for (position, (&frequency, &character)) in pattern.iter().zip(&chars).enumerate() {
        debug!("Hop {}: {:.1} MHz '{}'", position, frequency, character);
        link.send_public(PublicMessage::FhSymbol {
            frequency,
            character,
        })
        .await?;
    }

    link.send_public(PublicMessage::FhEnd).await?;
    info!("Sent {} characters", chars.len());
    Ok(chars.len())
}

/// Receive a message whose length equals `pattern.len()`
#[instrument(skip_all, fields(hops = pattern.len()))]
pub async fn receive_message(link: &mut Link, pattern: &[f64]) -> Result<FhReport> {
    await_peer(link.recv_public().await?, PublicMessage::FhReady)?;
    link.send_public(PublicMessage::FhAck).await?;

    let mut slots: Vec<Option<char>> = vec![None; pattern.len()];
    let mut mismatches = Vec::new();
    let mut position = 0usize;

    loop {
        match link.recv_public().await? {
            PublicMessage::FhSymbol {
                frequency,
                character,
            } => {
                match pattern.get(position) {
                    Some(&expected) if frequencies_match(frequency, expected) => {
                        debug!("Hop {}: {:.1} MHz '{}'", position, frequency, character);
                        slots[position] = Some(character);
                    }
                    Some(&expected) => {
                        warn!(
                            "Sync error at position {}: expected {:.1} MHz, got {:.1} MHz",
                            position, expected, frequency
                        );
                        mismatches.push(position);
                    }
                    None => warn!("Extra character beyond pattern at position {}", position),
                }
                position += 1;
            }
            PublicMessage::FhEnd => break,
            PublicMessage::Abort(reason) => return Err(Error::Abort(reason)),
            other => {
                warn!("Unexpected {} during hopping", other.kind());
                return Err(Error::Abort(AbortReason::ProtocolViolation));
            }
        }
    }

    let missing: Vec<usize> = (position.min(pattern.len())..pattern.len()).collect();
    if !missing.is_empty() {
        warn!("Stream ended with {} positions missing", missing.len());
    }

    let report = FhReport {
        expected_len: pattern.len(),
        accepted: slots.iter().filter(|s| s.is_some()).count(),
        mismatches,
        missing,
        reconstructed: slots.iter().map(|s| s.unwrap_or(GAP)).collect(),
    };
    info!(
        "Reconstructed '{}' ({}/{} accepted)",
        report.reconstructed, report.accepted, report.expected_len
    );
    Ok(report)
}
