// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::simhash::SimHash;
use crate::Index;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::BTreeSet;

/// One similarity group: an individual of the genetic algorithm,
/// holding its representative fingerprint ("genome"), its age and its
/// member samples.
#[derive(Clone)]
pub struct SimGroup {
    id: Index,
    gencode: SimHash,
    age: u32,
    members: BTreeSet<usize>,
}

impl SimGroup {
    /// Creates a 2-member group seeded with the first member's
    /// fingerprint.
    #[must_use]
    pub fn new(samples: &[SimHash], idx1: usize, idx2: usize, id: Index) -> Self {
        let mut members = BTreeSet::new();
        members.insert(idx1);
        members.insert(idx2);
        Self {
            id,
            gencode: samples[idx1].clone(),
            age: 0,
            members,
        }
    }

    #[must_use]
    pub fn id(&self) -> Index {
        self.id
    }

    /// The group's representative fingerprint.
    #[must_use]
    pub fn gencode(&self) -> &SimHash {
        &self.gencode
    }

    #[must_use]
    pub fn age(&self) -> u32 {
        self.age
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// The member sample indices.
    #[must_use]
    pub fn members(&self) -> &BTreeSet<usize> {
        &self.members
    }

    #[must_use]
    pub fn is_member(&self, idx: usize) -> bool {
        self.members.contains(&idx)
    }

    /// Adds a member; a fresh member rejuvenates the group by a third.
    pub fn add_member(&mut self, idx: usize) {
        if self.members.insert(idx) {
            self.age -= self.age / 3;
        }
    }

    pub fn remove_member(&mut self, idx: usize) {
        self.members.remove(&idx);
    }

    fn set_gencode(&mut self, gc: SimHash) {
        self.gencode = gc;
        self.age += 1;
    }

    /// Fitness of the group's own genome.
    #[must_use]
    pub fn fitness(&self, samples: &[SimHash]) -> f64 {
        self.fitness_of(samples, &self.gencode)
    }

    /// Fitness of a candidate genome against the members:
    /// `(1 + 1/sqrt(mean square distance))^members`. Rewards both
    /// tightness and size.
    #[must_use]
    pub fn fitness_of(&self, samples: &[SimHash], genome: &SimHash) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        let mut sqrsum = 0.0;
        for &m in &self.members {
            let dist = f64::from(genome.dist(&samples[m]));
            sqrsum += dist * dist;
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = sqrsum / self.members.len() as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        (1.0 + 1.0 / mean.sqrt()).powi(self.members.len() as i32)
    }

    /// The kernel: bits equal across all members. Kernel bits are
    /// never mutated.
    #[must_use]
    pub fn kernel(&self, samples: &[SimHash]) -> SimHash {
        let mut it = self.members.iter();
        let Some(&first_idx) = it.next() else {
            return self.gencode.clone();
        };
        let first = &samples[first_idx];
        let mut rt = SimHash::new(first.size(), true);
        for &m in it {
            rt = &rt & &!&(first ^ &samples[m]);
        }
        rt
    }

    /// One mutated genome: flips up to `mutations` non-kernel bits,
    /// each decided by the majority of `votes` randomly sampled
    /// members (ties keep the current genome bit).
    #[must_use]
    pub fn mutation(
        &self,
        samples: &[SimHash],
        rng: &mut StdRng,
        mutations: u32,
        votes: u32,
    ) -> SimHash {
        if self.members.len() < 2 {
            return self.gencode.clone();
        }
        let kernel = self.kernel(samples);
        let members = self.members.iter().copied().collect::<Vec<_>>();
        let mut rt = self.gencode.clone();

        for _ in 0..mutations {
            let mutidx = rng.random_range(0..self.gencode.size());
            if kernel.get(mutidx) {
                continue;
            }

            let mut true_cnt = 0u32;
            let mut false_cnt = 0u32;
            for _ in 0..votes.max(1) {
                let member = members[rng.random_range(0..members.len())];
                if samples[member].get(mutidx) {
                    true_cnt += 1;
                } else {
                    false_cnt += 1;
                }
            }
            if true_cnt > false_cnt {
                rt.set(mutidx, true);
            } else if true_cnt < false_cnt {
                rt.set(mutidx, false);
            }
        }
        rt
    }

    /// Breeds `descendants` mutated genomes and keeps the fittest one
    /// if it beats the current genome.
    pub fn mutate(
        &mut self,
        samples: &[SimHash],
        rng: &mut StdRng,
        descendants: u32,
        mutations: u32,
        votes: u32,
    ) {
        let mut best_fitness = self.fitness(samples);
        let mut best: Option<SimHash> = None;

        for _ in 0..descendants {
            let candidate = self.mutation(samples, rng, mutations, votes);
            let fitness = self.fitness_of(samples, &candidate);
            if fitness > best_fitness {
                best_fitness = fitness;
                best = Some(candidate);
            }
        }
        if let Some(genome) = best {
            self.set_gencode(genome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use test_log::test;

    fn sample(bits: &[usize]) -> SimHash {
        let mut h = SimHash::new(32, false);
        for &b in bits {
            h.set(b, true);
        }
        h
    }

    #[test]
    fn kernel_is_the_shared_bits() {
        let samples = vec![sample(&[0, 1, 2]), sample(&[0, 1, 3])];
        let group = SimGroup::new(&samples, 0, 1, 1);

        let kernel = group.kernel(&samples);
        // bits 2 and 3 differ between the members
        assert!(kernel.get(0));
        assert!(kernel.get(1));
        assert!(!kernel.get(2));
        assert!(!kernel.get(3));
        // bits equal in all members (both 0) are kernel too
        assert!(kernel.get(10));
    }

    #[test]
    fn fitness_rewards_tightness() {
        let samples = vec![
            sample(&[0, 1]),
            sample(&[0, 1]),
            sample(&[0, 1, 2, 3, 4, 5, 6, 7]),
        ];
        let tight = SimGroup::new(&samples, 0, 1, 1);
        let loose = SimGroup::new(&samples, 0, 2, 2);

        assert!(tight.fitness(&samples) > loose.fitness(&samples));
    }

    #[test]
    fn mutation_converges_toward_members() {
        // genome starts at member 0; members 1 and 2 agree on bit 5
        let samples = vec![sample(&[0]), sample(&[0, 5]), sample(&[0, 5])];
        let mut group = SimGroup::new(&samples, 0, 1, 1);
        group.add_member(2);

        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            group.mutate(&samples, &mut rng, 4, 8, 5);
        }
        // majority voting should have pulled bit 5 to true
        assert!(group.gencode().get(5));
        assert!(group.age() > 0);
    }

    #[test]
    fn add_member_rejuvenates() {
        let samples = vec![sample(&[0]), sample(&[1]), sample(&[2])];
        let mut group = SimGroup::new(&samples, 0, 1, 1);
        let mut rng = StdRng::seed_from_u64(1);
        group.mutate(&samples, &mut rng, 2, 4, 3);
        let age_before = group.age();

        group.add_member(2);
        assert!(group.age() <= age_before);
    }
}
