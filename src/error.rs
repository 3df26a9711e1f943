/// error.rs – Typed failures surfaced by a tuning run.
///
/// Row-level problems are absorbed where they happen (logged and skipped);
/// the variants below are what reaches the caller as a run's terminal outcome.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunerError {
    /// Malformed or missing historical/configuration data.
    #[error("data error in {stage}: {message}")]
    Data {
        stage: &'static str,
        message: String,
    },

    /// The generator could not fill a batch slot within its simulation budget.
    #[error(
        "constraints unsatisfiable: slot {slot} of {batch_size} found no valid game in {attempts} attempts \
         (rules too strict for current simulations/weights)"
    )]
    ConstraintUnsatisfiable {
        slot: usize,
        batch_size: usize,
        attempts: usize,
    },

    /// No candidate weight vector produced a finite, non-negative fitness.
    #[error("search exhausted: best fitness {best_score} after {candidates_tested} candidate(s) (insufficient history or over-tight constraints)")]
    SearchExhausted {
        best_score: f64,
        candidates_tested: usize,
    },

    /// The regression guard vetoed the new configuration and rolled it back.
    #[error("regression guard triggered: baseline={baseline:.2} new={new_score:.2} drop={drop:.2} > max_drop={max_drop:.2}; configuration restored")]
    RegressionRejected {
        baseline: f64,
        new_score: f64,
        drop: f64,
        max_drop: f64,
    },

    /// Another run holds the exclusive lock.
    #[error("another run holds the lock at {path}")]
    ConcurrencyBusy { path: String },

    /// A collaborator (history, config, audit or game store) failed.
    #[error("store failure during {stage}: {source}")]
    Store {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl TunerError {
    pub fn data(stage: &'static str, message: impl Into<String>) -> Self {
        TunerError::Data {
            stage,
            message: message.into(),
        }
    }

    /// Adapter for `map_err` on collaborator calls.
    pub fn store(stage: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |source| TunerError::Store { stage, source }
    }
}

pub type TunerResult<T> = std::result::Result<T, TunerError>;
