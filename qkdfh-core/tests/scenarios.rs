// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! End-to-end sessions driving both roles over in-memory and TCP links

use proptest::prelude::*;
use qkdfh_core::{
    channel::Link,
    config::ProtocolConfig,
    eve::{spawn_intercept_resend, EveStrategy},
    fh::{self, FhReport},
    hopping::generate_pattern,
    photon::{Basis, Photon, TransmissionRecord},
    protocol::{PublicMessage, QuantumMessage, PROTOCOL_VERSION},
    qkd::SessionState,
    rng::RandomSource,
    stats::SessionStats,
    transport, AbortReason, KeyMaterial, QkdReceiver, QkdSender, Result,
};
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;

struct Session {
    sender: Result<KeyMaterial>,
    sender_stats: SessionStats,
    receiver: Result<KeyMaterial>,
    receiver_stats: SessionStats,
    report: Option<FhReport>,
}

fn config(key_length: usize, photon_factor: usize, loss_rate: f64, message: &str) -> ProtocolConfig {
    ProtocolConfig {
        key_length,
        photon_factor,
        loss_rate,
        qber_threshold: 0.15,
        message: message.to_string(),
        channel_timeout_ms: 5_000,
        ..Default::default()
    }
}

async fn run_session(
    config: &ProtocolConfig,
    mut sender_link: Link,
    mut receiver_link: Link,
    seeds: (u64, u64),
) -> Session {
    let hops = config.message.chars().count();

    let sender_side = async {
        let mut sender = QkdSender::new(config.clone(), RandomSource::from_seed(seeds.0));
        let result = sender.run(&mut sender_link).await;
        if let Ok(key) = &result {
            let pattern = generate_pattern(key.seed, hops, &config.frequency_pool).unwrap();
            fh::send_message(&mut sender_link, &pattern, &config.message)
                .await
                .unwrap();
        }
        sender_link.shutdown().await;
        (result, sender.stats().clone())
    };

    let receiver_side = async {
        let mut receiver = QkdReceiver::new(config.clone(), RandomSource::from_seed(seeds.1));
        let result = receiver.run(&mut receiver_link).await;
        let mut report = None;
        if let Ok(key) = &result {
            let pattern = generate_pattern(key.seed, hops, &config.frequency_pool).unwrap();
            report = Some(fh::receive_message(&mut receiver_link, &pattern).await.unwrap());
        }
        (result, receiver.stats().clone(), report)
    };

    let ((sender, sender_stats), (receiver, receiver_stats, report)) =
        tokio::join!(sender_side, receiver_side);
    Session {
        sender,
        sender_stats,
        receiver,
        receiver_stats,
        report,
    }
}

async fn run_in_memory(config: &ProtocolConfig, seeds: (u64, u64)) -> Session {
    let (sender_link, receiver_link) = Link::pair(config.channel_timeout());
    run_session(config, sender_link, receiver_link, seeds).await
}

#[tokio::test]
async fn test_scenario_a_lossless_session_delivers_message() {
    let cfg = config(16, 10, 0.0, "HELLO");
    let session = run_in_memory(&cfg, (101, 202)).await;

    let sender_key = session.sender.unwrap();
    let receiver_key = session.receiver.unwrap();
    assert_eq!(sender_key.final_key.len(), 16);
    assert_eq!(sender_key, receiver_key);
    assert_eq!(sender_key.seed, receiver_key.seed);

    assert_eq!(session.sender_stats.qber, Some(0.0));
    assert_eq!(session.receiver_stats.qber, Some(0.0));
    assert_eq!(session.sender_stats.photons_prepared, 160);
    assert_eq!(session.receiver_stats.photons_received, 160);
    assert_eq!(
        session.sender_stats.sifted_length,
        session.receiver_stats.sifted_length
    );

    let report = session.report.unwrap();
    assert_eq!(report.reconstructed, "HELLO");
    assert!(report.is_exact("HELLO"));
}

#[tokio::test]
async fn test_scenario_b_heavy_loss_aborts() {
    let cfg = config(16, 5, 0.9, "HELLO");
    let session = run_in_memory(&cfg, (7, 8)).await;

    let sender_reason = session.sender.unwrap_err().abort_reason().unwrap();
    let receiver_reason = session.receiver.unwrap_err().abort_reason().unwrap();
    assert_eq!(sender_reason, receiver_reason);
    assert!(matches!(
        sender_reason,
        AbortReason::InsufficientKeyMaterial | AbortReason::NoPhotonsReceived
    ));
    assert!(session.sender_stats.photons_sent < session.sender_stats.photons_prepared);
    assert!(session.report.is_none());
}

#[tokio::test]
async fn test_scenario_c_receiver_aborts_on_flipped_check_bit() {
    let (mut sender, mut link) = Link::pair(Duration::from_secs(5));
    let mut cfg = config(8, 8, 0.0, "HI");
    cfg.qber_threshold = 0.10;

    let bits: Vec<bool> = (0..64).map(|i| i % 3 == 0).collect();

    let scripted_sender = async {
        sender
            .send_public(PublicMessage::Hello {
                version: PROTOCOL_VERSION,
                session_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        for &bit in &bits {
            sender
                .send_quantum(QuantumMessage::Photon(Photon {
                    basis: Basis::Rect,
                    bit,
                }))
                .await
                .unwrap();
        }
        sender
            .send_quantum(QuantumMessage::EndOfStream { sent: 64 })
            .await
            .unwrap();

        let bases = match sender.recv_public().await.unwrap() {
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
        let sifted: Vec<bool> = matching.iter().map(|&i| bits[i]).collect();
        sender
            .send_public(PublicMessage::MatchingIndices(matching))
            .await
            .unwrap();

        sender
            .send_public(PublicMessage::CheckIndices(vec![0, 1, 2, 3]))
            .await
            .unwrap();
        let reported = match sender.recv_public().await.unwrap() {
            PublicMessage::CheckBits(reported) => reported,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(reported, sifted[..4].to_vec());

        let mut disclosed = sifted[..4].to_vec();
        disclosed[2] = !disclosed[2];
        sender
            .send_public(PublicMessage::CheckBits(disclosed))
            .await
            .unwrap();
        sender.recv_public().await.unwrap()
    };

    let mut receiver = QkdReceiver::new(cfg, RandomSource::from_seed(33));
    let (result, notice) = tokio::join!(receiver.run(&mut link), scripted_sender);

    assert_eq!(
        result.unwrap_err().abort_reason(),
        Some(AbortReason::EavesdropSuspectedOrNoisyChannel)
    );
    assert_eq!(
        notice,
        PublicMessage::Abort(AbortReason::EavesdropSuspectedOrNoisyChannel)
    );
    assert_eq!(receiver.state(), SessionState::Aborted);
    assert_eq!(receiver.stats().mismatches, 1);
    assert_eq!(receiver.stats().check_bits, 4);
}

#[tokio::test]
async fn test_intercept_resend_is_detected() {
    let cfg = config(64, 40, 0.0, "HELLO");
    let (sender_link, eve_up) = Link::pair(cfg.channel_timeout());
    let (eve_down, receiver_link) = Link::pair(cfg.channel_timeout());
    let eve = spawn_intercept_resend(
        eve_up,
        eve_down,
        RandomSource::from_seed(99),
        EveStrategy::Random,
    );

    let session = run_session(&cfg, sender_link, receiver_link, (1, 2)).await;

    assert_eq!(
        session.sender.unwrap_err().abort_reason(),
        Some(AbortReason::EavesdropSuspectedOrNoisyChannel)
    );
    assert_eq!(
        session.receiver.unwrap_err().abort_reason(),
        Some(AbortReason::EavesdropSuspectedOrNoisyChannel)
    );
    assert!(session.sender_stats.qber.unwrap() > 0.15);
    assert!(session.report.is_none());

    let summary = eve.await.unwrap();
    assert_eq!(summary.intercepted, 2560);
}

#[tokio::test]
async fn test_session_over_tcp() {
    let cfg = config(16, 10, 0.1, "QKD-FH OVER TCP");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let (accepted, connected) = tokio::join!(
        transport::accept(&listener, cfg.channel_timeout()),
        transport::connect(&address, cfg.channel_timeout())
    );
    let (sender_link, _) = accepted.unwrap();
    let receiver_link = connected.unwrap();

    let session = run_session(&cfg, sender_link, receiver_link, (5, 6)).await;
    assert_eq!(session.sender.unwrap(), session.receiver.unwrap());
    assert!(session.report.unwrap().is_exact("QKD-FH OVER TCP"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_lossless_sessions_agree(
        key_length in 8usize..24,
        sender_seed in any::<u64>(),
        receiver_seed in any::<u64>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let cfg = config(key_length, 10, 0.0, "PROP");
        let session = runtime.block_on(run_in_memory(&cfg, (sender_seed, receiver_seed)));

        let sender_key = session.sender.unwrap();
        let receiver_key = session.receiver.unwrap();
        prop_assert_eq!(&sender_key, &receiver_key);
        prop_assert_eq!(sender_key.final_key.len(), key_length);
        prop_assert_eq!(session.sender_stats.qber, Some(0.0));
        prop_assert!(session.report.unwrap().is_exact("PROP"));
    }

    #[test]
    fn prop_received_sequence_is_ordered_subsequence(
        count in 1usize..300,
        loss_rate in 0.01f64..0.99,
        seed in any::<u64>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let record = TransmissionRecord::prepare(count, loss_rate, &mut RandomSource::from_seed(seed));

        let received = runtime.block_on(async {
            let (tx, mut rx) = Link::pair(Duration::from_secs(1));
            let sending = async {
                for photon in record.delivered() {
                    tx.send_quantum(QuantumMessage::Photon(*photon)).await.unwrap();
                }
                tx.send_quantum(QuantumMessage::EndOfStream { sent: record.delivered_count() as u64 })
                    .await
                    .unwrap();
            };
            let receiving = async {
                let mut photons = Vec::new();
                while let QuantumMessage::Photon(p) = rx.recv_quantum().await.unwrap() {
                    photons.push(p);
                }
                photons
            };
            tokio::join!(sending, receiving).1
        });

        prop_assert!(received.len() <= record.prepared());
        let expected: Vec<Photon> = record
            .slots()
            .iter()
            .filter(|slot| slot.delivered)
            .map(|slot| slot.photon)
            .collect();
        prop_assert_eq!(received, expected);
    }
}
