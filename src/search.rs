/// search.rs – Local neighbourhood search over the weight vector.
///
/// Candidates are the baseline followed by random one- or two-field
/// perturbations of it. Each candidate is scored by a full backtest; the
/// best strictly-greater fitness wins. Both the candidate loop and the
/// backtest event loop share one wall-clock deadline.
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::{
    backtest::{evaluate, BacktestContext, Deadline},
    error::{TunerError, TunerResult},
    models::{Configuration, Event, SearchResult, WeakPairSet, WeightField, WeightVector},
    stats::{effective_window, StatsEngine},
};

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// Inclusive range and perturbation step of one weight field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldBound {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl FieldBound {
    pub const fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    pub fn clamp(&self, v: f64) -> f64 {
        v.max(self.min).min(self.max)
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightBounds {
    pub w_short: FieldBound,
    pub w_mid: FieldBound,
    pub w_long: FieldBound,
    pub w_staleness: FieldBound,
    pub w_bayes: FieldBound,
    pub alpha: FieldBound,
}

impl Default for WeightBounds {
    fn default() -> Self {
        Self {
            w_short: FieldBound::new(0.0, 10.0, 1.0),
            w_mid: FieldBound::new(0.0, 10.0, 1.0),
            w_long: FieldBound::new(0.0, 10.0, 1.0),
            w_staleness: FieldBound::new(0.0, 2.0, 0.1),
            w_bayes: FieldBound::new(0.0, 2.0, 0.1),
            alpha: FieldBound::new(0.0, 3.0, 0.1),
        }
    }
}

impl WeightBounds {
    pub fn get(&self, field: WeightField) -> &FieldBound {
        match field {
            WeightField::Short => &self.w_short,
            WeightField::Mid => &self.w_mid,
            WeightField::Long => &self.w_long,
            WeightField::Staleness => &self.w_staleness,
            WeightField::Bayes => &self.w_bayes,
            WeightField::Alpha => &self.alpha,
        }
    }

    /// Clamp every field into its range; integer fields are rounded.
    pub fn clamp(&self, w: &WeightVector) -> WeightVector {
        let mut out = *w;
        for field in WeightField::ALL {
            let v = round_field(field, self.get(field).clamp(w.get(field)));
            out.set(field, v);
        }
        out
    }

    pub fn contains(&self, w: &WeightVector) -> bool {
        WeightField::ALL
            .iter()
            .all(|&f| self.get(f).contains(w.get(f)))
    }
}

fn round_field(field: WeightField, v: f64) -> f64 {
    if field.is_integer() {
        v.round()
    } else {
        // Keep 0.1 steps free of binary drift so duplicates compare equal.
        (v * 1e10).round() / 1e10
    }
}

// ---------------------------------------------------------------------------
// Neighbour generation
// ---------------------------------------------------------------------------

const INTEGER_FIELDS: [WeightField; 3] = [WeightField::Short, WeightField::Mid, WeightField::Long];
const FRACTIONAL_FIELDS: [WeightField; 3] =
    [WeightField::Staleness, WeightField::Bayes, WeightField::Alpha];

fn pick_field<R: Rng + ?Sized>(rng: &mut R) -> WeightField {
    let group = if rng.gen_bool(0.5) {
        &INTEGER_FIELDS
    } else {
        &FRACTIONAL_FIELDS
    };
    group[rng.gen_range(0..group.len())]
}

fn tweak<R: Rng + ?Sized>(w: &mut WeightVector, field: WeightField, bounds: &WeightBounds, rng: &mut R) {
    let b = bounds.get(field);
    let dir = if rng.gen_bool(0.5) { -1.0 } else { 1.0 };
    let v = b.clamp(w.get(field) + dir * b.step);
    w.set(field, round_field(field, v));
}

/// The baseline followed by up to `max_candidates - 1` distinct neighbours.
///
/// Each neighbour moves one random field by one step and, with probability
/// `second_field_prob`, a second one. Attempts are capped so a baseline
/// pinned against tight bounds cannot loop forever.
pub fn neighbors<R: Rng + ?Sized>(
    base: &WeightVector,
    bounds: &WeightBounds,
    max_candidates: usize,
    second_field_prob: f64,
    rng: &mut R,
) -> Vec<WeightVector> {
    let mut out = vec![*base];
    if max_candidates <= 1 {
        out.truncate(max_candidates);
        return out;
    }

    let max_attempts = max_candidates.saturating_mul(50);
    let mut attempts = 0;
    while out.len() < max_candidates && attempts < max_attempts {
        attempts += 1;
        let mut cand = *base;
        tweak(&mut cand, pick_field(rng), bounds, rng);
        if rng.gen_bool(second_field_prob) {
            tweak(&mut cand, pick_field(rng), bounds, rng);
        }
        if !out.contains(&cand) {
            out.push(cand);
        }
    }
    if out.len() < max_candidates {
        debug!(
            "Neighbourhood exhausted: {} distinct candidate(s) after {} attempts",
            out.len(),
            attempts
        );
    }
    out
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Requested evaluation window (number of most recent events replayed).
    pub window: usize,
    /// Extra history required before the full window is used.
    pub safety_margin: usize,
    pub max_candidates: usize,
    pub max_runtime_secs: u64,
    /// Attempts per batch slot while replaying history.
    pub simulations_per_game: usize,
    pub second_field_prob: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            window: 50,
            safety_margin: 30,
            max_candidates: 14,
            max_runtime_secs: 240,
            simulations_per_game: 90,
            second_field_prob: 0.35,
        }
    }
}

impl SearchParams {
    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_secs)
    }
}

/// Running best of a search; ties keep the earlier candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Best {
    weights: WeightVector,
    score: f64,
}

impl Best {
    fn new(start: WeightVector) -> Self {
        Self {
            weights: start,
            score: f64::NEG_INFINITY,
        }
    }

    /// Take `cand` only if it scores strictly higher. Returns whether it did.
    fn offer(&mut self, cand: &WeightVector, score: f64) -> bool {
        if score > self.score {
            self.weights = *cand;
            self.score = score;
            true
        } else {
            false
        }
    }
}

/// Run a full weight search around `base`.
///
/// Stats snapshots are computed once here and, like the weak pairs, shared
/// by every candidate. Only the weights of the returned configuration
/// differ from `base`.
pub fn search<R: Rng + ?Sized>(
    history: &[Event],
    base: &Configuration,
    engine: &StatsEngine,
    weak: &WeakPairSet,
    bounds: &WeightBounds,
    params: &SearchParams,
    rng: &mut R,
) -> TunerResult<SearchResult> {
    let deadline = Deadline::new(params.max_runtime());
    let window = effective_window(history.len(), params.window, params.safety_margin);
    if window < params.window {
        info!(
            "History holds {} event(s): evaluation window reduced from {} to {}",
            history.len(),
            params.window,
            window
        );
    }

    let snapshots = engine.evaluation_snapshots(history, window);

    let ctx = BacktestContext {
        events: &history[history.len() - window..],
        snapshots: &snapshots,
        weak_pairs: weak,
        rules: &base.rules,
        simulations: params.simulations_per_game,
    };

    let start = bounds.clamp(&base.weights);
    let candidates = neighbors(
        &start,
        bounds,
        params.max_candidates,
        params.second_field_prob,
        rng,
    );

    let mut best = Best::new(start);
    let mut tested = 0usize;

    for (i, cand) in candidates.iter().enumerate() {
        if deadline.expired() {
            info!(
                "Search deadline reached after {} of {} candidate(s)",
                tested,
                candidates.len()
            );
            break;
        }
        let report = evaluate(cand, &ctx, &deadline, rng);
        tested += 1;
        debug!(
            "Candidate {} [{}] fitness {:.4} over {} event(s)",
            i + 1,
            cand,
            report.fitness,
            report.events_evaluated
        );
        best.offer(cand, report.fitness);
    }
    let Best {
        weights: best_weights,
        score: best_score,
    } = best;

    if !best_score.is_finite() || best_score < 0.0 {
        return Err(TunerError::SearchExhausted {
            best_score,
            candidates_tested: tested,
        });
    }

    info!(
        "Search finished: best fitness {:.4} from {} candidate(s) in {:.1}s",
        best_score,
        tested,
        deadline.elapsed().as_secs_f64()
    );

    Ok(SearchResult {
        best_configuration: Configuration {
            weights: best_weights,
            rules: base.rules,
        },
        best_score,
        candidates_tested: tested,
        evaluation_window: window,
    })
}
