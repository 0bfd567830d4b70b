// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! Intercept-resend eavesdropper
//!
//! Eve sits between two links. Public messages pass through untouched in
//! both directions; every photon is measured in Eve's basis and replaced by a
//! fresh photon carrying her result. When Eve picks the wrong basis the
//! receiver's matching-basis measurement is wrong half of the time, which
//! puts the expected QBER near 25%.

use crate::channel::{Link, LinkParts};
use crate::photon::{Basis, Photon};
use crate::protocol::QuantumMessage;
use crate::rng::RandomSource;
use crate::Result;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How Eve chooses her measurement basis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EveStrategy {
    #[default]
    Random,
    Fixed(Basis),
}

/// What Eve saw once both sides hang up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterceptSummary {
    pub intercepted: usize,
    /// Photons re-sent in a basis other than the one they were prepared in
    pub wrong_basis: usize,
    pub relayed_public: usize,
}

impl InterceptSummary {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Run Eve between `upstream` (paired with the sender) and `downstream`
/// (paired with the receiver)
pub fn spawn_intercept_resend(
    upstream: Link,
    downstream: Link,
    rng: RandomSource,
    strategy: EveStrategy,
) -> JoinHandle<InterceptSummary> {
    tokio::spawn(relay(
        upstream.into_parts(),
        downstream.into_parts(),
        rng,
        strategy,
    ))
}

async fn relay(
    mut up: LinkParts,
    mut down: LinkParts,
    mut rng: RandomSource,
    strategy: EveStrategy,
) -> InterceptSummary {
    let mut summary = InterceptSummary::default();
    let mut up_quantum_open = true;
    let mut down_quantum_open = true;

    loop {
        tokio::select! {
            biased;
            message = up.public_rx.recv() => match message {
                Some(message) => {
                    debug!(kind = message.kind(), "Relaying sender message");
                    summary.relayed_public += 1;
                    if down.public_tx.send(message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            message = down.public_rx.recv() => match message {
                Some(message) => {
                    debug!(kind = message.kind(), "Relaying receiver message");
                    summary.relayed_public += 1;
                    if up.public_tx.send(message).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            message = up.quantum_rx.recv(), if up_quantum_open => match message {
                Some(QuantumMessage::Photon(photon)) => {
                    let basis = match strategy {
                        EveStrategy::Random => Basis::random(&mut rng),
                        EveStrategy::Fixed(basis) => basis,
                    };
                    let measurement = photon.measure(basis, &mut rng);
                    summary.intercepted += 1;
                    if basis != photon.basis {
                        summary.wrong_basis += 1;
                    }
                    let resent = Photon {
                        basis: measurement.basis,
                        bit: measurement.bit,
                    };
                    if down.quantum_tx.send(QuantumMessage::Photon(resent)).await.is_err() {
                        break;
                    }
                }
                Some(marker) => {
                    if down.quantum_tx.send(marker).await.is_err() {
                        break;
                    }
                }
                None => up_quantum_open = false,
            },
            message = down.quantum_rx.recv(), if down_quantum_open => match message {
                Some(message) => {
                    if up.quantum_tx.send(message).await.is_err() {
                        break;
                    }
                }
                None => down_quantum_open = false,
            },
        }
    }

    info!(
        "Eve intercepted {} photons ({} in the wrong basis), relayed {} public messages",
        summary.intercepted, summary.wrong_basis, summary.relayed_public
    );
    summary
}
