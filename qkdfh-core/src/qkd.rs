// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! BB84 protocol engine
//!
//! Both roles walk the same state machine:
//!
//! ```text
//! INIT -> PHOTON_EXCHANGE -> BASIS_EXCHANGE -> INDEX_RECONCILIATION
//!      -> SIFTING -> QBER_CHECK -> { KEY_ESTABLISHED | ABORTED }
//! ```
//!
//! The sender owns the prepared bits and bases; the receiver owns its
//! measurements. Every cross-role step is an explicit [`PublicMessage`], so the
//! roles can run in two processes or be driven by canned message sequences.
//! A session runs once: any abort is terminal and is reported to the peer.

use crate::channel::Link;
use crate::config::ProtocolConfig;
use crate::error::AbortReason;
use crate::photon::{Basis, Measurement, TransmissionRecord};
use crate::protocol::{bits_to_string, PublicMessage, QuantumMessage, PROTOCOL_VERSION};
use crate::rng::RandomSource;
use crate::seed::{derive_seed, Seed};
use crate::stats::{Outcome, Role, SessionStats};
use crate::{Error, Result};
use std::fmt;
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

/// Protocol engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    PhotonExchange,
    BasisExchange,
    IndexReconciliation,
    Sifting,
    QberCheck,
    KeyEstablished,
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::PhotonExchange => "PHOTON_EXCHANGE",
            Self::BasisExchange => "BASIS_EXCHANGE",
            Self::IndexReconciliation => "INDEX_RECONCILIATION",
            Self::Sifting => "SIFTING",
            Self::QberCheck => "QBER_CHECK",
            Self::KeyEstablished => "KEY_ESTABLISHED",
            Self::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Output of an established session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub final_key: Vec<bool>,
    pub seed: Seed,
}

/// QBER measured over the disclosed check bits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QberEstimate {
    pub mismatches: usize,
    pub checked: usize,
    pub qber: f64,
}

impl QberEstimate {
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.qber > threshold
    }
}

/// Positions in the receiver's received sequence where both bases agree
///
/// `sender_bases` are the bases of delivered photons in send order, which is
/// the receiver's arrival order.
pub fn reconcile_indices(sender_bases: &[Basis], receiver_bases: &[Basis]) -> Result<Vec<usize>> {
    if sender_bases.len() != receiver_bases.len() {
        return Err(AbortReason::IndexLengthMismatch.into());
    }
    Ok(sender_bases
        .iter()
        .zip(receiver_bases)
        .enumerate()
        .filter(|(_, (s, r))| s == r)
        .map(|(i, _)| i)
        .collect())
}

/// Sort peer-supplied indices and reject duplicates or out-of-range entries
pub fn normalize_indices(indices: &[usize], len: usize) -> Result<Vec<usize>> {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() != indices.len() {
        warn!("Peer sent duplicate indices");
        return Err(AbortReason::ProtocolViolation.into());
    }
    if let Some(&last) = sorted.last() {
        if last >= len {
            warn!("Peer index {} out of range for {} bits", last, len);
            return Err(AbortReason::ProtocolViolation.into());
        }
    }
    Ok(sorted)
}

fn select_bits(bits: &[bool], indices: &[usize]) -> Result<Vec<bool>> {
    let indices = normalize_indices(indices, bits.len())?;
    Ok(indices.into_iter().map(|i| bits[i]).collect())
}

/// Sifted key: own bits at the matching indices, in ascending index order
pub fn sift(bits: &[bool], matching: &[usize]) -> Result<Vec<bool>> {
    select_bits(bits, matching)
}

/// Bits disclosed for the QBER check
pub fn disclose(sifted: &[bool], check_indices: &[usize]) -> Result<Vec<bool>> {
    select_bits(sifted, check_indices)
}

/// Compare own and peer disclosures position by position
pub fn estimate_qber(own: &[bool], peer: &[bool]) -> Result<QberEstimate> {
    if own.len() != peer.len() {
        warn!(
            "Check bit count mismatch: own {} vs peer {}",
            own.len(),
            peer.len()
        );
        return Err(AbortReason::ProtocolViolation.into());
    }
    if own.is_empty() {
        return Err(AbortReason::InsufficientKeyMaterial.into());
    }
    let mismatches = own.iter().zip(peer).filter(|(a, b)| a != b).count();
    Ok(QberEstimate {
        mismatches,
        checked: own.len(),
        qber: mismatches as f64 / own.len() as f64,
    })
}

/// Undisclosed sifted bits in original order, trimmed to `key_length`
///
/// `check_indices` must be sorted (see [`normalize_indices`]).
pub fn final_key(sifted: &[bool], check_indices: &[usize], key_length: usize) -> Result<Vec<bool>> {
    let mut remaining: Vec<bool> = sifted
        .iter()
        .enumerate()
        .filter(|(i, _)| check_indices.binary_search(i).is_err())
        .map(|(_, &bit)| bit)
        .collect();

    if remaining.len() < key_length {
        warn!(
            "Remaining key too short ({} < {})",
            remaining.len(),
            key_length
        );
        return Err(AbortReason::InsufficientKeyMaterial.into());
    }
    remaining.truncate(key_length);
    Ok(remaining)
}

fn require_sifted_length(config: &ProtocolConfig, sifted_len: usize) -> Result<()> {
    let minimum = config.min_sifted_length();
    if sifted_len < minimum {
        warn!("Sifted key too short ({} < {})", sifted_len, minimum);
        return Err(AbortReason::InsufficientKeyMaterial.into());
    }
    Ok(())
}

fn unexpected(expected: &str, got: &PublicMessage) -> Error {
    warn!("Expected {} but received {}", expected, got.kind());
    Error::Abort(AbortReason::ProtocolViolation)
}

/// State and bookkeeping shared by both roles
struct SessionCore {
    state: SessionState,
    stats: SessionStats,
    peer_aborted: bool,
}

impl SessionCore {
    fn new(role: Role) -> Self {
        Self {
            state: SessionState::Init,
            stats: SessionStats::new(role),
            peer_aborted: false,
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }

    fn open(&mut self, session_id: Uuid) {
        self.stats.session_id = Some(session_id);
        Span::current().record("session", tracing::field::display(session_id));
    }

    /// Next public message; a peer abort becomes our abort with the same reason
    async fn recv(&mut self, link: &mut Link) -> Result<PublicMessage> {
        match link.recv_public().await? {
            PublicMessage::Abort(reason) => {
                warn!("Peer aborted the session: {}", reason);
                self.peer_aborted = true;
                Err(Error::Abort(reason))
            }
            message => Ok(message),
        }
    }

    fn record_qber(&mut self, estimate: &QberEstimate, threshold: f64) {
        self.stats.check_bits = estimate.checked;
        self.stats.mismatches = estimate.mismatches;
        self.stats.qber = Some(estimate.qber);
        info!(
            "QBER check: {}/{} mismatches, QBER = {:.2}% (threshold {:.1}%)",
            estimate.mismatches,
            estimate.checked,
            estimate.qber * 100.0,
            threshold * 100.0
        );
    }

    fn conclude(&mut self, link: &Link, result: &Result<KeyMaterial>) {
        match result {
            Ok(key) => {
                self.advance(SessionState::KeyEstablished);
                self.stats.final_key_length = key.final_key.len();
                self.stats.finish(Outcome::KeyEstablished);
                info!(
                    "Key established: {} bits, seed {}",
                    key.final_key.len(),
                    key.seed
                );
            }
            Err(Error::Abort(reason)) => {
                error!("Session aborted during {}: {}", self.state, reason);
                self.advance(SessionState::Aborted);
                if !self.peer_aborted {
                    link.notify_abort(*reason);
                }
                self.stats.finish(Outcome::Aborted(*reason));
            }
            Err(e) => {
                error!("Session failed during {}: {}", self.state, e);
                self.advance(SessionState::Aborted);
                self.stats.finish(Outcome::Failed);
            }
        }
    }
}

/// Sender role: prepares photons, reconciles indices, chooses check bits
pub struct QkdSender {
    config: ProtocolConfig,
    rng: RandomSource,
    core: SessionCore,
}

impl QkdSender {
    pub fn new(config: ProtocolConfig, rng: RandomSource) -> Self {
        Self {
            config,
            rng,
            core: SessionCore::new(Role::Sender),
        }
    }

    pub fn state(&self) -> SessionState {
        self.core.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.core.stats
    }

    /// Run one session over `link`
    #[instrument(name = "qkd_sender", skip_all, fields(session = tracing::field::Empty))]
    pub async fn run(&mut self, link: &mut Link) -> Result<KeyMaterial> {
        let result = self.exchange(link).await;
        self.core.conclude(link, &result);
        result
    }

    async fn exchange(&mut self, link: &mut Link) -> Result<KeyMaterial> {
        self.config.validate()?;

        let session_id = Uuid::new_v4();
        self.core.open(session_id);
        link.send_public(PublicMessage::Hello {
            version: PROTOCOL_VERSION,
            session_id,
        })
        .await?;

        self.core.advance(SessionState::PhotonExchange);
        let record = self.transmit(link).await?;

        self.core.advance(SessionState::BasisExchange);
        let receiver_bases = match self.core.recv(link).await? {
            PublicMessage::ReceiverBases(bases) => bases,
            other => return Err(unexpected("RECEIVER_BASES", &other)),
        };
        self.core.stats.receiver_bases = receiver_bases.len();
        info!("Received {} bases from receiver", receiver_bases.len());

        self.core.advance(SessionState::IndexReconciliation);
        let delivered_bases = record.delivered_bases();
        if delivered_bases.len() != receiver_bases.len() {
            warn!(
                "Receiver reported {} bases for {} delivered photons",
                receiver_bases.len(),
                delivered_bases.len()
            );
        }
        let matching = reconcile_indices(&delivered_bases, &receiver_bases)?;
        info!("Found {} matching bases", matching.len());
        link.send_public(PublicMessage::MatchingIndices(matching.clone()))
            .await?;

        self.core.advance(SessionState::Sifting);
        let sifted = sift(&record.delivered_bits(), &matching)?;
        self.core.stats.sifted_length = sifted.len();
        require_sifted_length(&self.config, sifted.len())?;

        self.core.advance(SessionState::QberCheck);
        let sample = self.config.check_sample_size(sifted.len());
        if sample == 0 {
            return Err(AbortReason::InsufficientKeyMaterial.into());
        }
        let check_indices = self.rng.sample_indices(sifted.len(), sample);
        info!("Proposing {} check indices", check_indices.len());
        link.send_public(PublicMessage::CheckIndices(check_indices.clone()))
            .await?;

        let own = disclose(&sifted, &check_indices)?;
        let peer = match self.core.recv(link).await? {
            PublicMessage::CheckBits(bits) => bits,
            other => return Err(unexpected("CHECK_BITS", &other)),
        };
        link.send_public(PublicMessage::CheckBits(own.clone())).await?;

        let estimate = estimate_qber(&own, &peer)?;
        self.core.record_qber(&estimate, self.config.qber_threshold);
        if estimate.exceeds(self.config.qber_threshold) {
            return Err(AbortReason::EavesdropSuspectedOrNoisyChannel.into());
        }

        let final_key = final_key(&sifted, &check_indices, self.config.key_length)?;
        link.send_public(PublicMessage::KeyConfirmed).await?;
        debug!("Final key: {}", bits_to_string(&final_key));

        let seed = derive_seed(&final_key)?;
        Ok(KeyMaterial { final_key, seed })
    }

    async fn transmit(&mut self, link: &mut Link) -> Result<TransmissionRecord> {
        let count = self.config.photon_count();
        let record = TransmissionRecord::prepare(count, self.config.loss_rate, &mut self.rng);
        self.core.stats.photons_prepared = record.prepared();
        info!(
            "Prepared {} photons (loss rate {:.1}%)",
            count,
            self.config.loss_rate * 100.0
        );

        for photon in record.delivered() {
            link.send_quantum(QuantumMessage::Photon(*photon)).await?;
        }

        let sent = record.delivered_count();
        link.send_quantum(QuantumMessage::EndOfStream { sent: sent as u64 })
            .await?;
        self.core.stats.photons_sent = sent;
        info!("Sent {} / {} photons", sent, count);
        Ok(record)
    }
}

/// Receiver role: measures photons, reports bases, follows the sender's lead
pub struct QkdReceiver {
    config: ProtocolConfig,
    rng: RandomSource,
    core: SessionCore,
}

impl QkdReceiver {
    pub fn new(config: ProtocolConfig, rng: RandomSource) -> Self {
        Self {
            config,
            rng,
            core: SessionCore::new(Role::Receiver),
        }
    }

    pub fn state(&self) -> SessionState {
        self.core.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.core.stats
    }

    /// Run one session over `link`
    #[instrument(name = "qkd_receiver", skip_all, fields(session = tracing::field::Empty))]
    pub async fn run(&mut self, link: &mut Link) -> Result<KeyMaterial> {
        let result = self.exchange(link).await;
        self.core.conclude(link, &result);
        result
    }

    async fn exchange(&mut self, link: &mut Link) -> Result<KeyMaterial> {
        self.config.validate()?;

        let session_id = match self.core.recv(link).await? {
            PublicMessage::Hello {
                version,
                session_id,
            } if version == PROTOCOL_VERSION => session_id,
            PublicMessage::Hello { version, .. } => {
                warn!("Unsupported protocol version {}", version);
                return Err(AbortReason::ProtocolViolation.into());
            }
            other => return Err(unexpected("HELLO", &other)),
        };
        self.core.open(session_id);

        self.core.advance(SessionState::PhotonExchange);
        let measurements = self.receive_photons(link).await?;

        self.core.advance(SessionState::BasisExchange);
        let bases: Vec<Basis> = measurements.iter().map(|m| m.basis).collect();
        link.send_public(PublicMessage::ReceiverBases(bases)).await?;
        info!("Sent {} bases to sender", measurements.len());

        self.core.advance(SessionState::IndexReconciliation);
        let matching = match self.core.recv(link).await? {
            PublicMessage::MatchingIndices(indices) => indices,
            other => return Err(unexpected("MATCHING_INDICES", &other)),
        };
        info!("Received {} matching indices", matching.len());

        self.core.advance(SessionState::Sifting);
        let measured: Vec<bool> = measurements.iter().map(|m| m.bit).collect();
        let sifted = sift(&measured, &matching)?;
        self.core.stats.sifted_length = sifted.len();
        require_sifted_length(&self.config, sifted.len())?;

        self.core.advance(SessionState::QberCheck);
        let check_indices = match self.core.recv(link).await? {
            PublicMessage::CheckIndices(indices) => normalize_indices(&indices, sifted.len())?,
            other => return Err(unexpected("CHECK_INDICES", &other)),
        };
        if check_indices.is_empty() {
            warn!("Sender proposed no check bits");
            return Err(AbortReason::InsufficientKeyMaterial.into());
        }
        let expected = self.config.check_sample_size(sifted.len());
        if check_indices.len() != expected {
            warn!(
                "Sender proposed {} check bits, expected {} for {} sifted bits",
                check_indices.len(),
                expected,
                sifted.len()
            );
            return Err(AbortReason::ProtocolViolation.into());
        }

        let own = disclose(&sifted, &check_indices)?;
        link.send_public(PublicMessage::CheckBits(own.clone())).await?;
        let peer = match self.core.recv(link).await? {
            PublicMessage::CheckBits(bits) => bits,
            other => return Err(unexpected("CHECK_BITS", &other)),
        };

        let estimate = estimate_qber(&own, &peer)?;
        self.core.record_qber(&estimate, self.config.qber_threshold);
        if estimate.exceeds(self.config.qber_threshold) {
            return Err(AbortReason::EavesdropSuspectedOrNoisyChannel.into());
        }

        match self.core.recv(link).await? {
            PublicMessage::KeyConfirmed => debug!("Sender confirmed the key"),
            other => return Err(unexpected("KEY_CONFIRMED", &other)),
        }

        let final_key = final_key(&sifted, &check_indices, self.config.key_length)?;
        debug!("Final key: {}", bits_to_string(&final_key));

        let seed = derive_seed(&final_key)?;
        Ok(KeyMaterial { final_key, seed })
    }

    async fn receive_photons(&mut self, link: &mut Link) -> Result<Vec<Measurement>> {
        let mut measurements = Vec::new();
        let sent = loop {
            match link.recv_quantum().await? {
                QuantumMessage::Photon(photon) => {
                    measurements.push(Measurement::random(&photon, &mut self.rng));
                }
                QuantumMessage::EndOfStream { sent } => break sent,
            }
        };

        self.core.stats.photons_sent = sent as usize;
        self.core.stats.photons_received = measurements.len();
        info!(
            "Received {} photons (sender reports {} sent)",
            measurements.len(),
            sent
        );

        if measurements.len() as u64 > sent {
            warn!("Received more photons than the sender reports sending");
            return Err(AbortReason::ProtocolViolation.into());
        }
        if measurements.is_empty() {
            return Err(AbortReason::NoPhotonsReceived.into());
        }
        Ok(measurements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::photon::Photon;
    use std::time::Duration;

    fn config(key_length: usize, photon_factor: usize) -> ProtocolConfig {
        ProtocolConfig {
            key_length,
            photon_factor,
            loss_rate: 0.0,
            ..Default::default()
        }
    }

    fn rect(bit: bool) -> QuantumMessage {
        QuantumMessage::Photon(Photon {
            basis: Basis::Rect,
            bit,
        })
    }

    fn hello() -> PublicMessage {
        PublicMessage::Hello {
            version: PROTOCOL_VERSION,
            session_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_reconcile_indices() {
        use Basis::*;
        let sender = [Rect, Diag, Diag, Rect, Rect];
        let receiver = [Rect, Rect, Diag, Diag, Rect];
        assert_eq!(reconcile_indices(&sender, &receiver).unwrap(), vec![0, 2, 4]);

        let err = reconcile_indices(&sender, &receiver[..4]).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::IndexLengthMismatch));
    }

    #[test]
    fn test_normalize_indices() {
        assert_eq!(normalize_indices(&[4, 0, 2], 5).unwrap(), vec![0, 2, 4]);
        assert!(normalize_indices(&[], 0).unwrap().is_empty());

        let dup = normalize_indices(&[1, 1], 5).unwrap_err();
        assert_eq!(dup.abort_reason(), Some(AbortReason::ProtocolViolation));

        let out_of_range = normalize_indices(&[5], 5).unwrap_err();
        assert_eq!(out_of_range.abort_reason(), Some(AbortReason::ProtocolViolation));
    }

    #[test]
    fn test_sift_keeps_ascending_order() {
        let bits = [true, false, false, true, true];
        assert_eq!(sift(&bits, &[3, 1]).unwrap(), vec![false, true]);
    }

    #[test]
    fn test_estimate_qber() {
        let own = [true, false, true, true];
        let peer = [true, true, true, true];
        let estimate = estimate_qber(&own, &peer).unwrap();
        assert_eq!(estimate.mismatches, 1);
        assert_eq!(estimate.checked, 4);
        assert!((estimate.qber - 0.25).abs() < f64::EPSILON);
        assert!(estimate.exceeds(0.15));
        assert!(!estimate.exceeds(0.25));

        let empty = estimate_qber(&[], &[]).unwrap_err();
        assert_eq!(empty.abort_reason(), Some(AbortReason::InsufficientKeyMaterial));

        let uneven = estimate_qber(&own, &peer[..3]).unwrap_err();
        assert_eq!(uneven.abort_reason(), Some(AbortReason::ProtocolViolation));
    }

    #[test]
    fn test_final_key_skips_checks_and_truncates() {
        let sifted = [true, false, true, true, false, false];
        assert_eq!(
            final_key(&sifted, &[0, 3], 3).unwrap(),
            vec![false, true, false]
        );

        let err = final_key(&sifted, &[0, 3], 5).unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::InsufficientKeyMaterial));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::QberCheck.to_string(), "QBER_CHECK");
        assert_eq!(SessionState::KeyEstablished.to_string(), "KEY_ESTABLISHED");
    }

    #[tokio::test]
    async fn test_receiver_aborts_on_empty_check_sample() {
        let (peer, mut link) = Link::pair(Duration::from_secs(1));
        let mut cfg = config(8, 1);
        cfg.min_sifted_length = Some(0);

        peer.send_public(hello()).await.unwrap();
        for bit in [true, false, true, true, false, true, false, false] {
            peer.send_quantum(rect(bit)).await.unwrap();
        }
        peer.send_quantum(QuantumMessage::EndOfStream { sent: 8 })
            .await
            .unwrap();
        peer.send_public(PublicMessage::MatchingIndices(vec![]))
            .await
            .unwrap();
        peer.send_public(PublicMessage::CheckIndices(vec![]))
            .await
            .unwrap();

        let mut receiver = QkdReceiver::new(cfg, RandomSource::from_seed(1));
        let err = receiver.run(&mut link).await.unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::InsufficientKeyMaterial));
        assert_eq!(receiver.state(), SessionState::Aborted);
        assert_eq!(receiver.stats().photons_received, 8);

        let mut peer = peer;
        match peer.recv_public().await.unwrap() {
            PublicMessage::ReceiverBases(bases) => assert_eq!(bases.len(), 8),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            peer.recv_public().await.unwrap(),
            PublicMessage::Abort(AbortReason::InsufficientKeyMaterial)
        );
    }

    #[tokio::test]
    async fn test_receiver_rejects_undersized_check_sample() {
        let (mut peer, mut link) = Link::pair(Duration::from_secs(1));
        let mut receiver = QkdReceiver::new(config(8, 8), RandomSource::from_seed(3));

        let sender_with_one_check = async {
            peer.send_public(hello()).await.unwrap();
            for i in 0..64 {
                peer.send_quantum(rect(i % 3 == 0)).await.unwrap();
            }
            peer.send_quantum(QuantumMessage::EndOfStream { sent: 64 })
                .await
                .unwrap();
            let bases = match peer.recv_public().await.unwrap() {
                PublicMessage::ReceiverBases(bases) => bases,
                other => panic!("unexpected {:?}", other),
            };
            let matching: Vec<usize> = bases
                .iter()
                .enumerate()
                .filter(|(_, b)| **b == Basis::Rect)
                .map(|(i, _)| i)
                .take(16)
                .collect();
            assert_eq!(matching.len(), 16);
            peer.send_public(PublicMessage::MatchingIndices(matching))
                .await
                .unwrap();
            peer.send_public(PublicMessage::CheckIndices(vec![0]))
                .await
                .unwrap();
            peer.recv_public().await.unwrap()
        };

        let (result, notice) = tokio::join!(receiver.run(&mut link), sender_with_one_check);
        let err = result.unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::ProtocolViolation));
        assert_eq!(notice, PublicMessage::Abort(AbortReason::ProtocolViolation));
        assert_eq!(receiver.stats().sifted_length, 16);
        assert_eq!(receiver.stats().check_bits, 0);
    }

    #[tokio::test]
    async fn test_receiver_aborts_without_photons() {
        let (peer, mut link) = Link::pair(Duration::from_secs(1));
        peer.send_public(hello()).await.unwrap();
        peer.send_quantum(QuantumMessage::EndOfStream { sent: 0 })
            .await
            .unwrap();

        let mut receiver = QkdReceiver::new(config(8, 1), RandomSource::from_seed(1));
        let err = receiver.run(&mut link).await.unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::NoPhotonsReceived));
    }

    #[tokio::test]
    async fn test_receiver_rejects_excess_photons() {
        let (peer, mut link) = Link::pair(Duration::from_secs(1));
        peer.send_public(hello()).await.unwrap();
        peer.send_quantum(rect(true)).await.unwrap();
        peer.send_quantum(rect(false)).await.unwrap();
        peer.send_quantum(QuantumMessage::EndOfStream { sent: 1 })
            .await
            .unwrap();

        let mut receiver = QkdReceiver::new(config(8, 1), RandomSource::from_seed(1));
        let err = receiver.run(&mut link).await.unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::ProtocolViolation));
    }

    #[tokio::test]
    async fn test_receiver_rejects_unknown_version() {
        let (peer, mut link) = Link::pair(Duration::from_secs(1));
        peer.send_public(PublicMessage::Hello {
            version: PROTOCOL_VERSION + 1,
            session_id: Uuid::new_v4(),
        })
        .await
        .unwrap();

        let mut receiver = QkdReceiver::new(config(8, 1), RandomSource::from_seed(1));
        let err = receiver.run(&mut link).await.unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::ProtocolViolation));
        assert_eq!(receiver.state(), SessionState::Aborted);
    }

    #[tokio::test]
    async fn test_peer_abort_is_not_echoed() {
        let (mut peer, mut link) = Link::pair(Duration::from_secs(1));
        peer.send_public(PublicMessage::Abort(AbortReason::ChannelTimeout))
            .await
            .unwrap();

        let mut receiver = QkdReceiver::new(config(8, 1), RandomSource::from_seed(1));
        let err = receiver.run(&mut link).await.unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::ChannelTimeout));

        drop(link);
        let closed = peer.recv_public().await.unwrap_err();
        assert_eq!(closed.abort_reason(), Some(AbortReason::ChannelClosed));
    }

    #[tokio::test]
    async fn test_sender_aborts_on_basis_count_mismatch() {
        let (mut peer, mut link) = Link::pair(Duration::from_secs(1));
        peer.send_public(PublicMessage::ReceiverBases(vec![Basis::Rect; 3]))
            .await
            .unwrap();

        let mut sender = QkdSender::new(config(8, 1), RandomSource::from_seed(5));
        let err = sender.run(&mut link).await.unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::IndexLengthMismatch));
        assert_eq!(sender.stats().photons_sent, 8);

        assert!(matches!(
            peer.recv_public().await.unwrap(),
            PublicMessage::Hello { .. }
        ));
        assert_eq!(
            peer.recv_public().await.unwrap(),
            PublicMessage::Abort(AbortReason::IndexLengthMismatch)
        );
    }

    #[tokio::test]
    async fn test_sender_aborts_on_high_qber() {
        let (mut peer, mut link) = Link::pair(Duration::from_secs(1));
        let mut cfg = config(8, 2);
        cfg.check_fraction = 0.25;
        cfg.qber_threshold = 0.10;
        let mut sender = QkdSender::new(cfg, RandomSource::from_seed(11));

        let honest_receiver_with_one_flip = async {
            let _hello = peer.recv_public().await.unwrap();
            let mut photons = Vec::new();
            loop {
                match peer.recv_quantum().await.unwrap() {
                    QuantumMessage::Photon(p) => photons.push(p),
                    QuantumMessage::EndOfStream { sent } => {
                        assert_eq!(sent, 16);
                        break;
                    }
                }
            }
            let bases = photons.iter().map(|p| p.basis).collect();
            peer.send_public(PublicMessage::ReceiverBases(bases))
                .await
                .unwrap();

            match peer.recv_public().await.unwrap() {
                PublicMessage::MatchingIndices(indices) => assert_eq!(indices.len(), 16),
                other => panic!("unexpected {:?}", other),
            }
            let checks = match peer.recv_public().await.unwrap() {
                PublicMessage::CheckIndices(indices) => indices,
                other => panic!("unexpected {:?}", other),
            };
            assert_eq!(checks.len(), 4);

            let mut bits: Vec<bool> = checks.iter().map(|&i| photons[i].bit).collect();
            bits[0] = !bits[0];
            peer.send_public(PublicMessage::CheckBits(bits))
                .await
                .unwrap();

            assert!(matches!(
                peer.recv_public().await.unwrap(),
                PublicMessage::CheckBits(_)
            ));
            peer.recv_public().await.unwrap()
        };

        let (result, notice) = tokio::join!(sender.run(&mut link), honest_receiver_with_one_flip);
        let err = result.unwrap_err();
        assert_eq!(
            err.abort_reason(),
            Some(AbortReason::EavesdropSuspectedOrNoisyChannel)
        );
        assert_eq!(
            notice,
            PublicMessage::Abort(AbortReason::EavesdropSuspectedOrNoisyChannel)
        );

        let stats = sender.stats();
        assert_eq!(stats.sifted_length, 16);
        assert_eq!(stats.check_bits, 4);
        assert_eq!(stats.mismatches, 1);
        assert_eq!(stats.outcome, Some(Outcome::Aborted(AbortReason::EavesdropSuspectedOrNoisyChannel)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_times_out_on_silent_peer() {
        let (_peer, mut link) = Link::pair(Duration::from_millis(500));
        let mut sender = QkdSender::new(config(8, 1), RandomSource::from_seed(2));
        let err = sender.run(&mut link).await.unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::ChannelTimeout));
        assert_eq!(sender.state(), SessionState::Aborted);
    }
}
