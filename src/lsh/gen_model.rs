// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Genetic breeder of similarity group representants.
//!
//! Breeds one representative fingerprint ("group genome") per cluster
//! of a sample set. Each iteration grows new 2-member groups from the
//! closest free neighbours, swallows neighbour groups within the
//! equality distance, poaches compatible members across groups within
//! the similarity distance, then mutates every genome (kernel bits
//! masked, mutation count shrinking and vote count growing with the
//! group's age) and drops members that drifted too far. Groups
//! shrinking below two members die.

use super::sim_group::SimGroup;
use super::sim_relation::SimRelationMap;
use super::simhash::SimHash;
use crate::Index;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Maximum number of groups a sample may belong to
const MAX_GROUPS_PER_SAMPLE: usize = 7;

/// Breeder configuration
#[derive(Clone, Debug)]
pub struct GenModel {
    /// Maximal distance of a member to its group genome
    pub simdist: u32,
    /// Distance below which two groups are merged
    pub eqdist: u32,
    /// Bits flipped per descendant (scaled down with age)
    pub mutations: u32,
    /// Members sampled per flipped bit (scaled up with age)
    pub votes: u32,
    /// Mutation trials per group and iteration
    pub descendants: u32,
    /// Age at which mutation stops shrinking
    pub maxage: u32,
    /// Number of breeding iterations
    pub iterations: u32,
}

struct GroupIdAllocator {
    cnt: Index,
    free_list: Vec<Index>,
}

impl GroupIdAllocator {
    fn new() -> Self {
        Self {
            cnt: 0,
            free_list: vec![],
        }
    }

    fn alloc(&mut self) -> Index {
        self.free_list.pop().unwrap_or_else(|| {
            self.cnt += 1;
            self.cnt
        })
    }

    fn free(&mut self, id: Index) {
        self.free_list.push(id);
    }
}

// Per-sample set of group ids, bounded by MAX_GROUPS_PER_SAMPLE.
struct SampleGroupMap {
    nodes: Vec<Vec<Index>>,
}

impl SampleGroupMap {
    fn new(nof_samples: usize) -> Self {
        Self {
            nodes: vec![vec![]; nof_samples],
        }
    }

    fn insert(&mut self, sample: usize, group: Index) {
        let node = &mut self.nodes[sample];
        if !node.contains(&group) {
            node.push(group);
        }
    }

    fn remove(&mut self, sample: usize, group: Index) {
        self.nodes[sample].retain(|&g| g != group);
    }

    fn groups(&self, sample: usize) -> &[Index] {
        &self.nodes[sample]
    }

    fn has_space(&self, sample: usize) -> bool {
        self.nodes[sample].len() < MAX_GROUPS_PER_SAMPLE
    }

    fn shares(&self, a: usize, b: usize) -> bool {
        self.nodes[a].iter().any(|g| self.nodes[b].contains(g))
    }
}

impl GenModel {
    fn age_mutations(&self, group: &SimGroup) -> u32 {
        (self.mutations * (self.maxage - group.age().min(self.maxage))) / self.maxage.max(1)
    }

    fn age_votes(&self, group: &SimGroup) -> u32 {
        self.votes * (group.age().min(self.maxage) / self.maxage.max(1)) + 1
    }

    /// Runs the breeder and returns one genome per surviving group.
    #[must_use]
    pub fn run(&self, samples: &[SimHash], seed: u64) -> Vec<SimHash> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ids = GroupIdAllocator::new();
        let mut groups: BTreeMap<Index, SimGroup> = BTreeMap::new();
        let mut sample_groups = SampleGroupMap::new(samples.len());
        let relation = SimRelationMap::build(samples, self.simdist);

        for iteration in 0..self.iterations {
            self.grow_groups(
                samples,
                &relation,
                &mut rng,
                &mut ids,
                &mut groups,
                &mut sample_groups,
            );
            self.unify_groups(samples, &mut rng, &mut ids, &mut groups, &mut sample_groups);
            self.mutation_step(samples, &mut rng, &mut ids, &mut groups, &mut sample_groups);
            log::trace!("breeder iteration {iteration}: {} groups", groups.len());
        }

        groups.into_values().map(|g| g.gencode().clone()).collect()
    }

    // Closest free neighbour of a sample: in relation, has group
    // space, not yet sharing a group with the sample.
    fn closest_free_sample(
        relation: &SimRelationMap,
        sample_groups: &SampleGroupMap,
        sidx: usize,
    ) -> Option<(usize, u32)> {
        let mut best: Option<(usize, u32)> = None;
        for &(col, dist) in relation.row(sidx) {
            let dist = u32::from(dist);
            if sample_groups.has_space(col)
                && !sample_groups.shares(sidx, col)
                && best.is_none_or(|(_, bd)| dist < bd)
            {
                best = Some((col, dist));
            }
        }
        best
    }

    fn try_add_group_member(
        &self,
        group_id: Index,
        new_member: usize,
        samples: &[SimHash],
        rng: &mut StdRng,
        groups: &mut BTreeMap<Index, SimGroup>,
        sample_groups: &mut SampleGroupMap,
    ) -> bool {
        let Some(group) = groups.get_mut(&group_id) else {
            return false;
        };
        let mut candidate = group.clone();
        candidate.add_member(new_member);
        candidate.mutate(
            samples,
            rng,
            self.descendants,
            self.age_mutations(&candidate),
            self.age_votes(&candidate),
        );
        if candidate.fitness(samples) >= group.fitness(samples) {
            *group = candidate;
            sample_groups.insert(new_member, group_id);
            true
        } else {
            false
        }
    }

    // Phase 1: create new groups with the closest free neighbours.
    fn grow_groups(
        &self,
        samples: &[SimHash],
        relation: &SimRelationMap,
        rng: &mut StdRng,
        ids: &mut GroupIdAllocator,
        groups: &mut BTreeMap<Index, SimGroup>,
        sample_groups: &mut SampleGroupMap,
    ) {
        for sidx in 0..samples.len() {
            if !sample_groups.has_space(sidx) {
                continue;
            }
            let Some((neighbour, neighbour_dist)) =
                Self::closest_free_sample(relation, sample_groups, sidx)
            else {
                continue;
            };

            // prefer a group of this sample that is already closer to
            // the candidate than the candidate sample itself
            let mut best_group = 0;
            for &gid in sample_groups.groups(sidx) {
                if let Some(group) = groups.get(&gid) {
                    if samples[neighbour].near(group.gencode(), neighbour_dist) {
                        best_group = gid;
                        break;
                    }
                }
            }
            if best_group != 0
                && self.try_add_group_member(
                    best_group,
                    neighbour,
                    samples,
                    rng,
                    groups,
                    sample_groups,
                )
            {
                continue;
            }

            let id = ids.alloc();
            let mut group = SimGroup::new(samples, sidx, neighbour, id);
            group.mutate(
                samples,
                rng,
                self.descendants,
                self.age_mutations(&group),
                self.age_votes(&group),
            );
            sample_groups.insert(sidx, id);
            sample_groups.insert(neighbour, id);
            groups.insert(id, group);
        }
    }

    // Phase 2: swallow neighbour groups within eqdist, poach one
    // compatible member from neighbours within simdist.
    #[allow(clippy::too_many_lines)]
    fn unify_groups(
        &self,
        samples: &[SimHash],
        rng: &mut StdRng,
        ids: &mut GroupIdAllocator,
        groups: &mut BTreeMap<Index, SimGroup>,
        sample_groups: &mut SampleGroupMap,
    ) {
        let group_ids = groups.keys().copied().collect::<Vec<_>>();

        for gid in group_ids {
            if !groups.contains_key(&gid) {
                continue; // already removed this round
            }

            // collect groups sharing at least one member
            let mut neighbours = vec![];
            {
                let group = &groups[&gid];
                for &member in group.members() {
                    for &other in sample_groups.groups(member) {
                        if other != gid && !neighbours.contains(&other) {
                            neighbours.push(other);
                        }
                    }
                }
            }

            for nid in neighbours {
                if !groups.contains_key(&nid) || !groups.contains_key(&gid) {
                    continue;
                }

                let near_eq = {
                    let group = &groups[&gid];
                    let other = &groups[&nid];
                    other.gencode().near(group.gencode(), self.eqdist)
                };
                let mut swallowed_all = false;

                if near_eq {
                    // move the neighbour's members over while the
                    // genomes stay within eqdist
                    let other_members =
                        groups[&nid].members().iter().copied().collect::<Vec<_>>();
                    swallowed_all = true;
                    for member in other_members {
                        if groups[&gid].is_member(member) {
                            continue;
                        }
                        if !sample_groups.has_space(member) {
                            swallowed_all = false;
                            break;
                        }
                        {
                            let group = groups.get_mut(&gid).unwrap_or_else(|| unreachable!());
                            group.add_member(member);
                            group.mutate(
                                samples,
                                rng,
                                self.descendants,
                                self.age_mutations(group),
                                self.age_votes(group),
                            );
                        }
                        sample_groups.insert(member, gid);
                        let still_near = groups[&nid]
                            .gencode()
                            .near(groups[&gid].gencode(), self.eqdist);
                        if !still_near {
                            swallowed_all = false;
                            break;
                        }
                    }
                    if swallowed_all
                        && groups[&nid].fitness(samples) < groups[&gid].fitness(samples)
                    {
                        Self::remove_group(nid, ids, groups, sample_groups);
                    }
                }

                if !swallowed_all && groups.contains_key(&nid) {
                    let near_sim = groups[&gid]
                        .gencode()
                        .near(groups[&nid].gencode(), self.simdist);
                    if near_sim {
                        // poach one compatible member
                        let candidates =
                            groups[&nid].members().iter().copied().collect::<Vec<_>>();
                        for member in candidates {
                            let compatible = groups[&gid]
                                .gencode()
                                .near(&samples[member], self.simdist)
                                && !groups[&gid].is_member(member)
                                && sample_groups.has_space(member);
                            if compatible
                                && self.try_add_group_member(
                                    gid,
                                    member,
                                    samples,
                                    rng,
                                    groups,
                                    sample_groups,
                                )
                            {
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    // Phase 3: mutate every genome, drop members that drifted beyond
    // simdist, delete groups below two members.
    fn mutation_step(
        &self,
        samples: &[SimHash],
        rng: &mut StdRng,
        ids: &mut GroupIdAllocator,
        groups: &mut BTreeMap<Index, SimGroup>,
        sample_groups: &mut SampleGroupMap,
    ) {
        let group_ids = groups.keys().copied().collect::<Vec<_>>();

        for gid in group_ids {
            let dropped = {
                let Some(group) = groups.get_mut(&gid) else {
                    continue;
                };
                group.mutate(
                    samples,
                    rng,
                    self.descendants,
                    self.age_mutations(group),
                    self.age_votes(group),
                );

                let dropped = group
                    .members()
                    .iter()
                    .copied()
                    .filter(|&m| !group.gencode().near(&samples[m], self.simdist))
                    .collect::<Vec<_>>();
                for &m in &dropped {
                    group.remove_member(m);
                }
                dropped
            };
            for m in dropped {
                sample_groups.remove(m, gid);
            }

            if groups[&gid].size() < 2 {
                Self::remove_group(gid, ids, groups, sample_groups);
            }
        }
    }

    fn remove_group(
        gid: Index,
        ids: &mut GroupIdAllocator,
        groups: &mut BTreeMap<Index, SimGroup>,
        sample_groups: &mut SampleGroupMap,
    ) {
        if let Some(group) = groups.remove(&gid) {
            for &member in group.members() {
                sample_groups.remove(member, gid);
            }
            ids.free(gid);
        }
    }
}
