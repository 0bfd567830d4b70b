// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! Key-to-seed derivation
//!
//! The final key is rendered as its canonical `0`/`1` string, hashed with
//! SHA-256, and the first eight digest bytes are read as a big-endian `u64`.

use crate::error::DerivationFailure;
use crate::protocol::bits_to_string;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Shortest key accepted for seed derivation
pub const MIN_SEED_KEY_BITS: usize = 8;

/// Shared seed for the hopping pattern generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Seed(u64);

impl Seed {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Seed {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive the seed for a final key
pub fn derive_seed(key: &[bool]) -> Result<Seed, DerivationFailure> {
    if key.len() < MIN_SEED_KEY_BITS {
        return Err(DerivationFailure::EmptyOrShortKey {
            len: key.len(),
            min: MIN_SEED_KEY_BITS,
        });
    }

    let digest = Sha256::digest(bits_to_string(key).as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    Ok(Seed(u64::from_be_bytes(head)))
}
