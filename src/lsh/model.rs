// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Random projection LSH model.
//!
//! The projection matrix has one row per variation; row `i` covers a
//! contiguous window of `ceil(dim / variations)` input dimensions
//! with a positive weight and all other dimensions with a negative
//! weight, so its sign bit answers "is bin `i` above the global
//! mean". With rotations, the same projection is applied to `width`
//! rotated copies of the input and the sign bits are concatenated,
//! giving `variations * width` fingerprint bits in total.
//!
//! The model is immutable once built and safe to share.

use super::simhash::SimHash;
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random projection model producing similarity fingerprints
pub struct LshModel {
    dim: usize,
    variations: usize,
    // row-major variations x dim
    projection: Vec<f64>,
    // width matrices, row-major dim x dim; index 0 is the identity
    rotations: Vec<Vec<f64>>,
}

fn gauss(rng: &mut StdRng) -> f64 {
    // Box-Muller transform
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn identity(dim: usize) -> Vec<f64> {
    let mut m = vec![0.0; dim * dim];
    for i in 0..dim {
        m[i * dim + i] = 1.0;
    }
    m
}

// Random orthonormal matrix: Gram-Schmidt over Gaussian samples.
fn random_rotation(dim: usize, rng: &mut StdRng) -> Vec<f64> {
    let mut m = vec![0.0; dim * dim];
    for row in 0..dim {
        loop {
            for col in 0..dim {
                m[row * dim + col] = gauss(rng);
            }
            // subtract projections onto the previous rows
            for prev in 0..row {
                let dot: f64 = (0..dim)
                    .map(|c| m[row * dim + c] * m[prev * dim + c])
                    .sum();
                for c in 0..dim {
                    m[row * dim + c] -= dot * m[prev * dim + c];
                }
            }
            let norm: f64 = (0..dim)
                .map(|c| m[row * dim + c] * m[row * dim + c])
                .sum::<f64>()
                .sqrt();
            if norm > 1e-9 {
                for c in 0..dim {
                    m[row * dim + c] /= norm;
                }
                break;
            }
            // numerically degenerate sample, draw the row again
        }
    }
    m
}

impl LshModel {
    /// Creates a model without extra rotations (`width` = 1).
    pub fn new(dim: usize, variations: usize) -> Result<Self> {
        Self::with_rotations(dim, variations, 1, 0)
    }

    /// Creates a model with `width` rotations; rotation 0 is the
    /// identity, the rest are seeded random orthonormal matrices.
    pub fn with_rotations(dim: usize, variations: usize, width: usize, seed: u64) -> Result<Self> {
        if dim == 0 || variations == 0 || variations > dim || width == 0 {
            return Err(Error::Config(format!(
                "invalid LSH model shape: dim={dim} variations={variations} width={width}"
            )));
        }

        let window = dim.div_ceil(variations);
        let mut projection = vec![0.0; variations * dim];
        for i in 0..variations {
            let ci = (i * window).min(dim - 1);
            let ce = (ci + window).min(dim);
            let inside = 1.0 / ((ce - ci) as f64);
            let outside = -1.0 / ((dim - (ce - ci)).max(1) as f64);
            for c in 0..dim {
                projection[i * dim + c] = if c >= ci && c < ce { inside } else { outside };
            }
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut rotations = Vec::with_capacity(width);
        rotations.push(identity(dim));
        for _ in 1..width {
            rotations.push(random_rotation(dim, &mut rng));
        }

        Ok(Self {
            dim,
            variations,
            projection,
            rotations,
        })
    }

    /// Input dimension.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of fingerprint bits (`variations * width`).
    #[must_use]
    pub fn bits(&self) -> usize {
        self.variations * self.rotations.len()
    }

    /// Computes the similarity fingerprint of a vector.
    pub fn sim_hash(&self, vec: &[f64]) -> Result<SimHash> {
        if vec.len() != self.dim {
            return Err(Error::DimensionMismatch(self.dim, vec.len()));
        }

        let mut out = SimHash::new(self.bits(), false);
        let mut rotated = vec![0.0; self.dim];

        for (r, rotation) in self.rotations.iter().enumerate() {
            for (row, slot) in rotated.iter_mut().enumerate() {
                *slot = (0..self.dim)
                    .map(|c| rotation[row * self.dim + c] * vec[c])
                    .sum();
            }
            for i in 0..self.variations {
                let dot: f64 = (0..self.dim)
                    .map(|c| self.projection[i * self.dim + c] * rotated[c])
                    .sum();
                if dot >= 0.0 {
                    out.set(r * self.variations + i, true);
                }
            }
        }
        Ok(out)
    }
}
