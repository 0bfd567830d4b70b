// SPDX-License-Identifier: MIT
//
// QKD-FH: QKD-Seeded Frequency Hopping Simulator
// Copyright (c) 2025 QKD-FH Contributors

//! Seeded hopping pattern generation

use crate::rng::RandomSource;
use crate::seed::Seed;
use crate::{Error, Result, FREQUENCY_TOLERANCE_MHZ};
use std::fmt::Write;

/// Draw `length` frequencies from `pool`, uniformly and with replacement
///
/// Both peers call this with the same seed and pool and get the same pattern.
pub fn generate_pattern(seed: Seed, length: usize, pool: &[f64]) -> Result<Vec<f64>> {
    if length == 0 {
        return Err(Error::Config("Hopping pattern length must be > 0".to_string()));
    }
    if pool.is_empty() {
        return Err(Error::Config("Frequency pool cannot be empty".to_string()));
    }

    let mut rng = RandomSource::from_seed(seed.value());
    Ok((0..length).map(|_| pool[rng.index(pool.len())]).collect())
}

/// Text chart of a pattern: one row per pool frequency (highest first), one
/// column per hop
pub fn render_pattern(pattern: &[f64], pool: &[f64]) -> String {
    let mut chart = String::new();
    for &frequency in pool.iter().rev() {
        let row: String = pattern
            .iter()
            .map(|&f| {
                if (f - frequency).abs() < FREQUENCY_TOLERANCE_MHZ {
                    '*'
                } else {
                    '.'
                }
            })
            .collect();
        let _ = writeln!(chart, "{:>7.1} MHz |{}", frequency, row);
    }
    let _ = writeln!(chart, "{:>12}+{}", "", "-".repeat(pattern.len()));
    chart
}
