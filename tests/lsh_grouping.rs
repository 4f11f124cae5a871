// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Similarity grouping end to end: random vectors are fingerprinted
//! through the LSH model, perturbed copies stay close in Hamming
//! space, and the genetic breeder condenses the fingerprint set into
//! group representants covering the perturbed copies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use term_index::lsh::{GenModel, LshModel, SimHash};
use test_log::test;

const DIM: usize = 64;
const VARIATIONS: usize = 16;
const WIDTH: usize = 4;

fn gauss(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn random_vec(rng: &mut StdRng) -> Vec<f64> {
    (0..DIM).map(|_| gauss(rng)).collect()
}

fn perturb(rng: &mut StdRng, v: &[f64], noise: f64) -> Vec<f64> {
    v.iter().map(|x| x + noise * gauss(rng)).collect()
}

#[test]
fn fingerprint_distance_tracks_cosine_similarity() {
    let model = LshModel::with_rotations(DIM, VARIATIONS, WIDTH, 42).expect("model");
    let mut rng = StdRng::seed_from_u64(1);

    let mut closer = 0u32;
    let trials = 50;
    for _ in 0..trials {
        let u = random_vec(&mut rng);
        let near = perturb(&mut rng, &u, 0.05);
        let far = random_vec(&mut rng);

        let hu = model.sim_hash(&u).expect("hash");
        let d_near = hu.dist(&model.sim_hash(&near).expect("hash"));
        let d_far = hu.dist(&model.sim_hash(&far).expect("hash"));
        if d_near <= d_far {
            closer += 1;
        }
    }
    // the statistical contract: monotone with overwhelming probability
    assert!(closer >= trials - 5, "only {closer}/{trials} trials were monotone");
}

#[test]
fn breeder_groups_perturbed_fingerprints_with_their_originals() {
    let model = LshModel::with_rotations(DIM, VARIATIONS, WIDTH, 42).expect("model");
    let bits = model.bits() as u32;
    let mut rng = StdRng::seed_from_u64(2);

    // originals plus close perturbations of each
    let nof_originals = 10;
    let per_original = 6;
    let mut samples: Vec<SimHash> = vec![];
    for _ in 0..nof_originals {
        let v = random_vec(&mut rng);
        samples.push(model.sim_hash(&v).expect("hash"));
        for _ in 0..per_original {
            let p = perturb(&mut rng, &v, 0.02);
            samples.push(model.sim_hash(&p).expect("hash"));
        }
    }

    let breeder = GenModel {
        simdist: bits / 8,
        eqdist: bits / 8,
        mutations: 8,
        votes: 3,
        descendants: 4,
        maxage: 8,
        iterations: 12,
    };
    let genomes = breeder.run(&samples, 7);

    assert!(!genomes.is_empty());

    // every genome stands for a real cluster: at least two samples
    // within the member distance
    for genome in &genomes {
        let covered = samples.iter().filter(|s| genome.near(s, bits / 8)).count();
        assert!(covered >= 2, "genome covers only {covered} samples");
    }

    // most samples are covered by some representant
    let covered = samples
        .iter()
        .filter(|s| genomes.iter().any(|g| g.near(s, bits / 8)))
        .count();
    assert!(
        covered * 2 >= samples.len(),
        "only {covered}/{} samples covered",
        samples.len()
    );
}
