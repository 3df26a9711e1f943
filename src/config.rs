/// config.rs – Load settings from settings.yaml + environment variables.
///
/// Environment variables always override YAML values. The mutable weight
/// and rule configuration is not part of these settings: it lives in the
/// configuration store and is read at the start of every run.
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::guard::RegressionGuard;
use crate::models::{Universe, WeightField, MAX_SIMULATIONS};
use crate::search::{SearchParams, WeightBounds};
use crate::stats::StatsWindows;

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    pub log_level: String,
    /// Path to the SQLite database file.
    pub db_path: String,
    /// Lock file guarding against concurrent runs.
    pub lock_path: String,
    /// How long to wait for a busy lock before skipping the run.
    pub lock_wait_seconds: f64,
    /// Fixed RNG seed for reproducible runs; random when absent.
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".into(),
            db_path: "lotofacil.db".into(),
            lock_path: "lotofacil-tuner.lock".into(),
            lock_wait_seconds: 25.0,
            seed: None,
        }
    }
}

/// Upper bound on the neighbourhood size of one search.
pub const MAX_CANDIDATES: usize = 10_000;

/// Longest accepted lock wait: one hour.
pub const MAX_LOCK_WAIT_SECONDS: f64 = 3600.0;

impl RunConfig {
    /// Lock wait clamped into `[0, MAX_LOCK_WAIT_SECONDS]`; NaN waits not at all.
    pub fn lock_wait(&self) -> Duration {
        Duration::try_from_secs_f64(self.lock_wait_seconds.clamp(0.0, MAX_LOCK_WAIT_SECONDS))
            .unwrap_or(Duration::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub run: RunConfig,
    pub universe: Universe,
    pub stats: StatsWindows,
    pub search: SearchParams,
    pub guard: RegressionGuard,
    pub bounds: WeightBounds,
}

impl Settings {
    /// Load settings from *config_path* YAML file, then overlay env vars.
    pub fn load(config_path: &str) -> Result<Self> {
        // Try to load .env file (ignore error if absent)
        let _ = dotenvy::dotenv();

        let mut settings = if std::path::Path::new(config_path).exists() {
            let yaml = std::fs::read_to_string(config_path).context("reading config file")?;
            serde_yaml::from_str::<Settings>(&yaml).context("parsing config YAML")?
        } else {
            Settings::default()
        };

        if let Ok(val) = std::env::var("TUNER_DB_PATH") {
            settings.run.db_path = val;
        }
        if let Ok(val) = std::env::var("TUNER_LOCK_PATH") {
            settings.run.lock_path = val;
        }
        if let Ok(val) = std::env::var("TUNER_LOG_LEVEL") {
            settings.run.log_level = val;
        }
        if let Ok(val) = std::env::var("TUNER_SEED") {
            let seed = val
                .trim()
                .parse::<u64>()
                .with_context(|| format!("TUNER_SEED must be an unsigned integer, got {val:?}"))?;
            settings.run.seed = Some(seed);
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.run.db_path.trim().is_empty() {
            bail!("run.db_path must not be empty");
        }
        if self.run.lock_path.trim().is_empty() {
            bail!("run.lock_path must not be empty");
        }
        if !(0.0..=MAX_LOCK_WAIT_SECONDS).contains(&self.run.lock_wait_seconds) {
            bail!("run.lock_wait_seconds must be in [0, {MAX_LOCK_WAIT_SECONDS}]");
        }

        if self.universe.max_item == 0 {
            bail!("universe.max_item must be > 0");
        }
        if self.universe.draw_size == 0 || self.universe.draw_size > self.universe.len() {
            bail!(
                "universe.draw_size must be in [1, {}]",
                self.universe.max_item
            );
        }

        if self.stats.short == 0 || self.stats.mid == 0 || self.stats.long == 0 {
            bail!("stats.short, stats.mid and stats.long must be > 0");
        }

        if self.search.window == 0 {
            bail!("search.window must be > 0");
        }
        if self.search.max_candidates == 0 || self.search.max_candidates > MAX_CANDIDATES {
            bail!("search.max_candidates must be in [1, {MAX_CANDIDATES}]");
        }
        if self.search.max_runtime_secs == 0 {
            bail!("search.max_runtime_secs must be > 0");
        }
        if self.search.simulations_per_game == 0 || self.search.simulations_per_game > MAX_SIMULATIONS {
            bail!("search.simulations_per_game must be in [1, {MAX_SIMULATIONS}]");
        }
        if !(0.0..=1.0).contains(&self.search.second_field_prob) {
            bail!("search.second_field_prob must be in [0, 1]");
        }

        if self.guard.history == 0 {
            bail!("guard.history must be > 0");
        }
        if !self.guard.max_drop.is_finite() || self.guard.max_drop < 0.0 {
            bail!("guard.max_drop must be a finite number >= 0");
        }

        for field in WeightField::ALL {
            let b = self.bounds.get(field);
            if !b.min.is_finite() || !b.max.is_finite() || b.min > b.max {
                bail!("bounds.{field} must satisfy finite min <= max");
            }
            validate_positive(&format!("bounds.{field}.step"), b.step)?;
        }

        Ok(())
    }
}

fn validate_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        bail!("{name} must be a finite number > 0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_oversized_draw() {
        let mut settings = Settings::default();
        settings.universe.draw_size = 26;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_candidates() {
        let mut settings = Settings::default();
        settings.search.max_candidates = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_probability_out_of_range() {
        let mut settings = Settings::default();
        settings.search.second_field_prob = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_bounds() {
        let mut settings = Settings::default();
        settings.bounds.alpha.min = 4.0;
        let err = settings.validate().unwrap_err().to_string();
        assert!(err.contains("bounds.alpha"), "{err}");
    }

    #[test]
    fn validate_rejects_negative_max_drop() {
        let mut settings = Settings::default();
        settings.guard.max_drop = -0.1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_unrepresentable_lock_wait() {
        let mut settings = Settings::default();
        settings.run.lock_wait_seconds = 1e30;
        let err = settings.validate().unwrap_err().to_string();
        assert!(err.contains("run.lock_wait_seconds"), "{err}");
        settings.run.lock_wait_seconds = f64::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn lock_wait_never_panics() {
        let mut run = RunConfig::default();
        assert_eq!(run.lock_wait(), Duration::from_secs(25));
        run.lock_wait_seconds = 1e30;
        assert_eq!(run.lock_wait(), Duration::from_secs(3600));
        run.lock_wait_seconds = -5.0;
        assert_eq!(run.lock_wait(), Duration::ZERO);
        run.lock_wait_seconds = f64::NAN;
        assert_eq!(run.lock_wait(), Duration::ZERO);
    }

    #[test]
    fn validate_caps_search_effort() {
        let mut settings = Settings::default();
        settings.search.simulations_per_game = MAX_SIMULATIONS + 1;
        assert!(settings.validate().is_err());
        settings.search.simulations_per_game = 90;
        settings.search.max_candidates = usize::MAX;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = "
search:
  window: 30
guard:
  max_drop: 1.0
bounds:
  alpha: { min: 0.5, max: 2.0, step: 0.1 }
";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.search.window, 30);
        assert_eq!(settings.search.max_candidates, 14);
        assert_eq!(settings.guard.history, 5);
        assert_eq!(settings.bounds.alpha.min, 0.5);
        assert_eq!(settings.bounds.w_short.max, 10.0);
        assert_eq!(settings.stats.long, 100);
        assert!(settings.validate().is_ok());
    }
}
