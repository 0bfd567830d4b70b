// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! Per-session statistics and summaries

use crate::error::AbortReason;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Which side of the link a session ran on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    KeyEstablished,
    Aborted(AbortReason),
    /// Configuration or derivation fault, not a protocol outcome
    Failed,
}

/// Counters collected over one QKD session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub role: Role,
    pub session_id: Option<Uuid>,
    pub photons_prepared: usize,
    pub photons_sent: usize,
    pub photons_received: usize,
    pub receiver_bases: usize,
    pub sifted_length: usize,
    pub check_bits: usize,
    pub mismatches: usize,
    pub qber: Option<f64>,
    pub final_key_length: usize,
    pub outcome: Option<Outcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SessionStats {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            session_id: None,
            photons_prepared: 0,
            photons_sent: 0,
            photons_received: 0,
            receiver_bases: 0,
            sifted_length: 0,
            check_bits: 0,
            mismatches: 0,
            qber: None,
            final_key_length: 0,
            outcome: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Record the final outcome and stamp the finish time
    pub fn finish(&mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| end.signed_duration_since(self.started_at).num_milliseconds())
    }

    /// Single-line JSON rendering for machine-readable logs
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Human-readable summary, one line per counter
    pub fn summary_lines(&self) -> Vec<String> {
        let status = match self.outcome {
            Some(Outcome::KeyEstablished) => "KEY_ESTABLISHED".to_string(),
            Some(Outcome::Aborted(reason)) => format!("ABORTED ({})", reason),
            Some(Outcome::Failed) => "FAILED".to_string(),
            None => "IN_PROGRESS".to_string(),
        };

        let mut lines = vec![format!("QKD status:        {}", status)];
        match self.role {
            Role::Sender => {
                lines.push(format!("Photons prepared:  {}", self.photons_prepared));
                lines.push(format!(
                    "Photons sent:      {} ({} lost)",
                    self.photons_sent,
                    self.photons_prepared.saturating_sub(self.photons_sent)
                ));
                lines.push(format!("Receiver bases:    {}", self.receiver_bases));
            }
            Role::Receiver => {
                lines.push(format!("Sender reported:   {}", self.photons_sent));
                lines.push(format!("Photons received:  {}", self.photons_received));
            }
        }
        lines.push(format!("Sifted key length: {}", self.sifted_length));
        match self.qber {
            Some(qber) => lines.push(format!(
                "QBER check:        {} / {} mismatches ({:.2}%)",
                self.mismatches,
                self.check_bits,
                qber * 100.0
            )),
            None => lines.push("QBER check:        not performed".to_string()),
        }
        lines.push(format!("Final key length:  {}", self.final_key_length));
        if let Some(ms) = self.duration_ms() {
            lines.push(format!("Duration:          {} ms", ms));
        }
        lines
    }
}
