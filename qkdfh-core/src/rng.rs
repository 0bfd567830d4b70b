// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! Seedable randomness source
//!
//! Each role owns its own [`RandomSource`] and passes it explicitly to every
//! operation that draws randomness. The only value that crosses from one role's
//! generator to the other's is the derived seed, which both feed into a fresh
//! source to build the hopping pattern.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

/// Explicitly seeded pseudo-random generator
#[derive(Debug, Clone)]
pub struct RandomSource {
    rng: StdRng,
}

impl RandomSource {
    /// Deterministic generator for a given seed
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generator seeded from operating-system entropy
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Uniform random bit
    pub fn bit(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }

    /// Bernoulli trial that succeeds with probability `p` (clamped to [0, 1])
    pub fn chance(&mut self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        self.rng.gen_bool(p)
    }

    /// Uniform index in `0..len`; `len` must be non-zero
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    /// `amount` distinct indices from `0..len`, sorted ascending
    pub fn sample_indices(&mut self, len: usize, amount: usize) -> Vec<usize> {
        let mut picked = index::sample(&mut self.rng, len, amount.min(len)).into_vec();
        picked.sort_unstable();
        picked
    }
}
