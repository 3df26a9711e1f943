/// guard.rs – Regression guard against configuration collapse.
///
/// Baseline = mean of the last `history` best-fitness values recorded by
/// prior searches. A new score is rejected when `baseline - new > max_drop`.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionGuard {
    /// H: number of recent best scores averaged into the baseline.
    pub history: usize,
    pub max_drop: f64,
}

impl Default for RegressionGuard {
    fn default() -> Self {
        Self {
            history: 5,
            max_drop: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GuardVerdict {
    /// Not enough prior scores: the guard is skipped.
    NoBaseline,
    Accepted { baseline: f64, drop: f64 },
    Rejected { baseline: f64, drop: f64 },
}

impl GuardVerdict {
    pub fn is_rejected(&self) -> bool {
        matches!(self, GuardVerdict::Rejected { .. })
    }
}

impl RegressionGuard {
    /// Mean of the finite values among the first `history` entries of
    /// `recent` (most recent first). `None` when there are none.
    pub fn baseline(&self, recent: &[f64]) -> Option<f64> {
        let vals: Vec<f64> = recent
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .take(self.history)
            .collect();
        if vals.is_empty() {
            None
        } else {
            Some(vals.iter().sum::<f64>() / vals.len() as f64)
        }
    }

    pub fn check(&self, recent: &[f64], new_score: f64) -> GuardVerdict {
        match self.baseline(recent) {
            None => GuardVerdict::NoBaseline,
            Some(baseline) => {
                let drop = baseline - new_score;
                if drop > self.max_drop {
                    GuardVerdict::Rejected { baseline, drop }
                } else {
                    GuardVerdict::Accepted { baseline, drop }
                }
            }
        }
    }
}
