// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! Simulated photon model
//!
//! A photon is a (basis, bit) pair. Measuring it in the encoding basis yields
//! the encoded bit; measuring it in the other basis yields a uniformly random
//! bit. Loss is a Bernoulli trial drawn by the sender per slot.

use crate::rng::RandomSource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encoding/measurement basis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Basis {
    /// Rectilinear (+)
    Rect,
    /// Diagonal (x)
    Diag,
}

impl Basis {
    /// Uniformly random basis
    pub fn random(rng: &mut RandomSource) -> Self {
        if rng.bit() {
            Self::Diag
        } else {
            Self::Rect
        }
    }
}

impl fmt::Display for Basis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rect => f.write_str("+"),
            Self::Diag => f.write_str("x"),
        }
    }
}

/// A prepared photon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photon {
    pub basis: Basis,
    pub bit: bool,
}

impl Photon {
    /// Prepare a photon with random basis and bit
    pub fn prepare(rng: &mut RandomSource) -> Self {
        let basis = Basis::random(rng);
        let bit = rng.bit();
        Self { basis, bit }
    }

    /// Measure in `basis`; a basis mismatch randomizes the outcome
    pub fn measure(&self, basis: Basis, rng: &mut RandomSource) -> Measurement {
        let bit = if basis == self.basis { self.bit } else { rng.bit() };
        Measurement { basis, bit }
    }
}

/// Receiver-side measurement of one received photon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub basis: Basis,
    pub bit: bool,
}

impl Measurement {
    /// Measure `photon` in a freshly drawn random basis
    pub fn random(photon: &Photon, rng: &mut RandomSource) -> Self {
        let basis = Basis::random(rng);
        photon.measure(basis, rng)
    }
}

/// One prepared slot and whether it survived the loss trial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub photon: Photon,
    pub delivered: bool,
}

/// Sender's full record of a transmission round, lost slots included
#[derive(Debug, Clone, Default)]
pub struct TransmissionRecord {
    slots: Vec<Slot>,
}

impl TransmissionRecord {
    /// Prepare `count` slots, each delivered with probability `1 - loss_rate`
    pub fn prepare(count: usize, loss_rate: f64, rng: &mut RandomSource) -> Self {
        let slots = (0..count)
            .map(|_| {
                let photon = Photon::prepare(rng);
                let delivered = rng.chance(1.0 - loss_rate);
                Slot { photon, delivered }
            })
            .collect();
        Self { slots }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Number of prepared slots
    pub fn prepared(&self) -> usize {
        self.slots.len()
    }

    /// Delivered photons in send order (which is the receiver's arrival order)
    pub fn delivered(&self) -> impl Iterator<Item = &Photon> + '_ {
        self.slots.iter().filter(|s| s.delivered).map(|s| &s.photon)
    }

    pub fn delivered_count(&self) -> usize {
        self.slots.iter().filter(|s| s.delivered).count()
    }

    pub fn delivered_bases(&self) -> Vec<Basis> {
        self.delivered().map(|p| p.basis).collect()
    }

    pub fn delivered_bits(&self) -> Vec<bool> {
        self.delivered().map(|p| p.bit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_basis_preserves_bit() {
        let mut rng = RandomSource::from_seed(11);
        for _ in 0..200 {
            let photon = Photon::prepare(&mut rng);
            let m = photon.measure(photon.basis, &mut rng);
            assert_eq!(m.bit, photon.bit);
            assert_eq!(m.basis, photon.basis);
        }
    }

    #[test]
    fn test_mismatched_basis_is_random() {
        let mut rng = RandomSource::from_seed(5);
        let photon = Photon {
            basis: Basis::Rect,
            bit: true,
        };
        let ones = (0..2000)
            .filter(|_| photon.measure(Basis::Diag, &mut rng).bit)
            .count();
        assert!(ones > 800 && ones < 1200, "ones = {}", ones);
    }

    #[test]
    fn test_lossless_record_delivers_everything() {
        let mut rng = RandomSource::from_seed(2);
        let record = TransmissionRecord::prepare(50, 0.0, &mut rng);
        assert_eq!(record.prepared(), 50);
        assert_eq!(record.delivered_count(), 50);
        assert_eq!(record.delivered_bases().len(), 50);
    }

    #[test]
    fn test_total_loss_delivers_nothing() {
        let mut rng = RandomSource::from_seed(2);
        let record = TransmissionRecord::prepare(50, 1.0, &mut rng);
        assert_eq!(record.prepared(), 50);
        assert_eq!(record.delivered_count(), 0);
    }
}
