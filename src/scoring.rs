/// scoring.rs – Turn per-item stats and a weight vector into sampling weights.
///
/// raw(i) = alpha × (w_short·short + w_mid·mid + w_long·long − w_staleness·staleness)
///          + w_bayes × (freq + 1) / (seen + 2)
///
/// Every raw value is floored at `SCORE_FLOOR` (non-finite included) before
/// the vector is normalised to sum 1.
use crate::models::{ItemStats, ScoreVector, StatsSnapshot, WeightVector};

pub const SCORE_FLOOR: f64 = 1e-9;

/// Beta(1, 1)-smoothed probability that the item is drawn.
pub fn bayes_probability(stats: &ItemStats) -> f64 {
    (stats.global_frequency as f64 + 1.0) / (stats.events_seen as f64 + 2.0)
}

pub fn raw_score(stats: &ItemStats, w: &WeightVector) -> f64 {
    let recency = w.w_short * stats.short_count as f64
        + w.w_mid * stats.mid_count as f64
        + w.w_long * stats.long_count as f64
        - w.w_staleness * stats.staleness as f64;
    let raw = w.alpha * recency + w.w_bayes * bayes_probability(stats);
    if raw.is_finite() {
        raw.max(SCORE_FLOOR)
    } else {
        SCORE_FLOOR
    }
}

pub fn build_score_vector(snapshot: &StatsSnapshot, weights: &WeightVector) -> ScoreVector {
    let raw: Vec<f64> = snapshot
        .iter()
        .map(|(_, stats)| raw_score(stats, weights))
        .collect();
    ScoreVector::normalized(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(short: u32, staleness: u32, freq: u32, seen: u32) -> ItemStats {
        ItemStats {
            short_count: short,
            mid_count: short,
            long_count: short,
            staleness,
            global_frequency: freq,
            events_seen: seen,
        }
    }

    #[test]
    fn bayes_smoothing_on_empty_history() {
        assert!((bayes_probability(&stats(0, 1, 0, 0)) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn raw_score_matches_formula() {
        let w = WeightVector::default();
        let s = stats(4, 2, 9, 18);
        // 1.0 × (3·4 + 2·4 + 1·4 − 0.3·2) + 0.5 × 10/20
        let expected = 23.4 + 0.25;
        assert!((raw_score(&s, &w) - expected).abs() < 1e-9);
    }

    #[test]
    fn negative_and_nan_scores_are_floored() {
        let mut w = WeightVector::default();
        w.w_staleness = 100.0;
        assert_eq!(raw_score(&stats(0, 50, 0, 60), &w), SCORE_FLOOR);
        w.alpha = f64::NAN;
        assert_eq!(raw_score(&stats(3, 0, 3, 3), &w), SCORE_FLOOR);
    }

    #[test]
    fn vector_is_normalised_and_prefers_hot_items() {
        let snapshot = StatsSnapshot::new(
            30,
            vec![stats(8, 0, 20, 30), stats(1, 10, 5, 30), stats(0, 31, 0, 30)],
        );
        let v = build_score_vector(&snapshot, &WeightVector::default());
        let sum: f64 = v.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(v.weight(1) > v.weight(2));
        assert!(v.as_slice().iter().all(|&x| x > 0.0));
    }
}
