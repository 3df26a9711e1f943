/// sampler.rs – Weighted sampling without replacement (Efraimidis–Spirakis).
///
/// Every item `i` gets the key `k_i = -ln(u_i) / w_i` with `u_i ~ U(0, 1)`;
/// the `k` smallest keys form the sample. One pass, no mutation of the
/// weights, and equivalent to drawing items one by one proportionally to
/// weight without replacement.
use rand::Rng;

use crate::models::{Item, ScoreVector, WEIGHT_FLOOR};

/// Draw `k` distinct items biased toward higher weight, sorted ascending.
///
/// `k` larger than the universe is clamped to the universe size.
pub fn weighted_sample<R: Rng + ?Sized>(scores: &ScoreVector, k: usize, rng: &mut R) -> Vec<Item> {
    let n = scores.len();
    let k = k.min(n);

    let mut keyed: Vec<(f64, Item)> = scores
        .as_slice()
        .iter()
        .enumerate()
        .map(|(i, &w)| {
            let w = if w > 0.0 && w.is_finite() { w } else { WEIGHT_FLOOR };
            let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
            (-u.ln() / w, (i + 1) as Item)
        })
        .collect();

    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut chosen: Vec<Item> = keyed.into_iter().take(k).map(|(_, d)| d).collect();
    chosen.sort_unstable();
    chosen
}
