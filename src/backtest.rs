/// backtest.rs – Replay the generator against historical outcomes.
///
/// For every event of the evaluation window a score vector is built from
/// the pre-computed causal snapshot and the candidate weights, one batch is
/// generated, and the mean number of hits of its games against the real
/// draw is recorded. Fitness is the mean of those per-event means.
///
/// The loop polls a wall-clock deadline and returns whatever it has
/// accumulated when the budget is spent. The first event for which the
/// generator cannot fill a batch stops the replay (fail-fast).
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::{
    generator::generate_batch,
    models::{Event, GeneratorRules, StatsSnapshot, WeakPairSet, WeightVector},
    scoring::build_score_vector,
};

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// Self-imposed, advisory time budget shared by search and backtest.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// A zero budget is expired from the start.
    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

// ---------------------------------------------------------------------------
// Evaluation context
// ---------------------------------------------------------------------------

/// Everything a backtest needs that does not depend on the candidate weights.
#[derive(Debug, Clone, Copy)]
pub struct BacktestContext<'a> {
    /// The evaluated events, oldest first.
    pub events: &'a [Event],
    /// `snapshots[k]` holds the stats preceding `events[k]`.
    pub snapshots: &'a [StatsSnapshot],
    pub weak_pairs: &'a WeakPairSet,
    pub rules: &'a GeneratorRules,
    /// Attempts per batch slot during replay.
    pub simulations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Deadline,
    Unsatisfiable { event_id: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestReport {
    /// Mean of per-event mean hits; `-inf` when nothing was evaluated.
    pub fitness: f64,
    pub events_evaluated: usize,
    pub stop: Option<StopReason>,
}

impl BacktestReport {
    pub fn is_complete(&self) -> bool {
        self.stop.is_none()
    }
}

pub fn evaluate<R: Rng + ?Sized>(
    weights: &WeightVector,
    ctx: &BacktestContext<'_>,
    deadline: &Deadline,
    rng: &mut R,
) -> BacktestReport {
    debug_assert_eq!(ctx.events.len(), ctx.snapshots.len());

    let mut total = 0.0;
    let mut evaluated = 0usize;
    let mut stop = None;

    for (event, snapshot) in ctx.events.iter().zip(ctx.snapshots) {
        if deadline.expired() {
            stop = Some(StopReason::Deadline);
            break;
        }

        let scores = build_score_vector(snapshot, weights);
        match generate_batch(&scores, ctx.rules, ctx.weak_pairs, ctx.simulations, rng) {
            Ok(batch) => {
                let hits: usize = batch.candidates.iter().map(|c| c.hits(event)).sum();
                total += hits as f64 / batch.len() as f64;
                evaluated += 1;
            }
            Err(e) => {
                debug!(
                    "Backtest stopped at event {} after {} event(s): {}",
                    event.id, evaluated, e
                );
                stop = Some(StopReason::Unsatisfiable { event_id: event.id });
                break;
            }
        }
    }

    let fitness = if evaluated == 0 {
        f64::NEG_INFINITY
    } else {
        total / evaluated as f64
    };

    BacktestReport {
        fitness,
        events_evaluated: evaluated,
        stop,
    }
}
