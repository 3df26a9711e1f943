/// generator.rs – Constrained Monte-Carlo batch generator.
///
/// For each slot of the batch the generator draws up to `simulations`
/// weighted samples and keeps the best-scoring one that
///   1. has no run longer than `max_seq` consecutive items, and
///   2. differs from every game already accepted by at least `min_diff`
///      items (symmetric difference).
/// Score = sum of item weights − penalty × weak pairs contained.
/// A slot with no surviving draw fails the whole call.
use rand::Rng;
use tracing::debug;

use crate::{
    error::{TunerError, TunerResult},
    models::{Batch, Candidate, GeneratorRules, ScoreVector, WeakPairSet},
    sampler::weighted_sample,
};

/// True when no run of `max_seq + 1` or more consecutive items exists.
pub fn respects_max_run(candidate: &Candidate, max_seq: usize) -> bool {
    candidate.longest_run() <= max_seq
}

/// True when `candidate` differs from every accepted game by `min_diff` or more.
pub fn is_diverse(candidate: &Candidate, accepted: &[Candidate], min_diff: usize) -> bool {
    accepted
        .iter()
        .all(|g| candidate.symmetric_difference(g) >= min_diff)
}

pub fn candidate_score(
    candidate: &Candidate,
    scores: &ScoreVector,
    weak_pairs: &WeakPairSet,
    penalty: f64,
) -> f64 {
    let base: f64 = candidate.items().iter().map(|&d| scores.weight(d)).sum();
    base - penalty * weak_pairs.count_in(candidate.items()) as f64
}

/// Produce a full batch or fail with `ConstraintUnsatisfiable`.
pub fn generate_batch<R: Rng + ?Sized>(
    scores: &ScoreVector,
    rules: &GeneratorRules,
    weak_pairs: &WeakPairSet,
    simulations: usize,
    rng: &mut R,
) -> TunerResult<Batch> {
    let mut accepted: Vec<Candidate> = Vec::new();

    for slot in 0..rules.batch_size {
        let mut best: Option<(f64, Candidate)> = None;

        for _ in 0..simulations {
            let cand = Candidate::new(weighted_sample(scores, rules.game_size, rng));
            if !respects_max_run(&cand, rules.max_seq) {
                continue;
            }
            if !is_diverse(&cand, &accepted, rules.min_diff) {
                continue;
            }
            let sc = candidate_score(&cand, scores, weak_pairs, rules.penalty_weak_pair);
            if best.as_ref().map_or(true, |(b, _)| sc > *b) {
                best = Some((sc, cand));
            }
        }

        match best {
            Some((sc, cand)) => {
                debug!("Slot {} filled with score {:.4}: {}", slot + 1, sc, cand.render());
                accepted.push(cand);
            }
            None => {
                return Err(TunerError::ConstraintUnsatisfiable {
                    slot: slot + 1,
                    batch_size: rules.batch_size,
                    attempts: simulations,
                });
            }
        }
    }

    Ok(Batch {
        candidates: accepted,
    })
}
