// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::simhash::SimHash;

/// Precomputed pairwise similarity relation of a sample set.
///
/// Row `i` holds every sample within the similarity distance of
/// sample `i`, with the measured distance. Built once before the
/// breeder iterations so the inner loops never rescan the samples.
pub struct SimRelationMap {
    rows: Vec<Vec<(usize, u16)>>,
}

impl SimRelationMap {
    /// Builds the relation for all sample pairs within `simdist`.
    #[must_use]
    pub fn build(samples: &[SimHash], simdist: u32) -> Self {
        let mut rows = vec![vec![]; samples.len()];
        for i in 0..samples.len() {
            for j in 0..i {
                if samples[i].near(&samples[j], simdist) {
                    #[allow(clippy::cast_possible_truncation)]
                    let d = samples[i].dist(&samples[j]).min(u32::from(u16::MAX)) as u16;
                    rows[i].push((j, d));
                    rows[j].push((i, d));
                }
            }
        }
        Self { rows }
    }

    /// The neighbours of a sample as `(sample index, distance)`.
    #[must_use]
    pub fn row(&self, idx: usize) -> &[(usize, u16)] {
        self.rows.get(idx).map_or(&[], Vec::as_slice)
    }
}
