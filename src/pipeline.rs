/// pipeline.rs – Whole-run orchestration.
///
/// A full run, under the exclusive run lock:
///   1. register the latest real draw against the published games,
///   2. load the configuration (writing back missing defaults) and snapshot it,
///   3. search the weight neighbourhood by backtest and apply the winner,
///   4. append the audit record and run the regression guard
///      (restore + mark reverted + fail on an excessive drop),
///   5. generate and publish the production batch.
///
/// Collaborators are injected as trait objects; randomness comes from one
/// seedable `StdRng` owned by the tuner.
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    analytics::{self, ResultRegistration},
    config::Settings,
    error::{TunerError, TunerResult},
    generator::generate_batch,
    guard::GuardVerdict,
    lock::RunLock,
    models::{AuditRecord, ConfigSnapshot, Configuration, Event, GeneratedGame, SearchResult, WeakPairSet},
    scoring::build_score_vector,
    search::search,
    stats::{weak_pairs, StatsEngine},
    store::{reverted_note, AuditLog, ConfigStore, GameLog, HistoryStore},
};

/// The four collaborators a run talks to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub history: &'a dyn HistoryStore,
    pub config: &'a dyn ConfigStore,
    pub audit: &'a dyn AuditLog,
    pub games: &'a dyn GameLog,
}

impl<'a> Collaborators<'a> {
    /// All four roles served by one store.
    pub fn single<S>(store: &'a S) -> Self
    where
        S: HistoryStore + ConfigStore + AuditLog + GameLog,
    {
        Self {
            history: store,
            config: store,
            audit: store,
            games: store,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Register results, search, guard, generate.
    Full,
    /// Search and guard only.
    SearchOnly,
    /// Production batch from the stored configuration.
    GenerateOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSummary {
    pub result: SearchResult,
    pub changed: bool,
    pub audit_id: i64,
    pub verdict: GuardVerdict,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    /// Present when this run registered a new result.
    pub registration: Option<ResultRegistration>,
    pub search: Option<SearchSummary>,
    pub games: Vec<GeneratedGame>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunReport),
    /// Another run held the lock.
    Skipped,
}

pub struct Tuner<'a> {
    settings: Settings,
    stores: Collaborators<'a>,
    engine: StatsEngine,
    rng: StdRng,
}

impl<'a> Tuner<'a> {
    pub fn new(settings: Settings, stores: Collaborators<'a>) -> Self {
        let rng = match settings.run.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(settings, stores, rng)
    }

    pub fn with_rng(settings: Settings, stores: Collaborators<'a>, rng: StdRng) -> Self {
        let engine = StatsEngine::new(settings.stats, settings.universe);
        Self {
            settings,
            stores,
            engine,
            rng,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run `mode` under the exclusive run lock. A busy lock is a skip, not an error.
    pub fn run(&mut self, mode: RunMode) -> TunerResult<RunOutcome> {
        let path = std::path::PathBuf::from(&self.settings.run.lock_path);
        let lock = RunLock::acquire(&path, self.settings.run.lock_wait())
            .map_err(TunerError::store("run lock"))?;

        let Some(_lock) = lock else {
            let busy = TunerError::ConcurrencyBusy {
                path: path.display().to_string(),
            };
            info!("Run skipped: {}", busy);
            return Ok(RunOutcome::Skipped);
        };

        self.run_unlocked(mode).map(RunOutcome::Completed)
    }

    /// Run `mode` without taking the lock; the caller guarantees exclusion.
    pub fn run_unlocked(&mut self, mode: RunMode) -> TunerResult<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        info!("Run {} started ({:?})", run_id, mode);

        let history = self.load_history()?;

        let registration = if mode == RunMode::Full {
            self.register_latest_results()?
        } else {
            None
        };

        let (mut cfg, snapshot) = self.load_configuration()?;
        let weak = weak_pairs(&history, cfg.rules.bottom_pairs, &self.settings.universe);

        let summary = if mode == RunMode::GenerateOnly {
            None
        } else {
            let summary = self.search_and_apply(&run_id, &history, &cfg, &snapshot, &weak)?;
            cfg = summary.result.best_configuration;
            Some(summary)
        };

        let games = if mode == RunMode::SearchOnly {
            Vec::new()
        } else {
            self.generate_production(&run_id, &history, &cfg, &weak)?
        };

        info!("Run {} completed", run_id);
        Ok(RunReport {
            run_id,
            registration,
            search: summary,
            games,
        })
    }

    fn load_history(&self) -> TunerResult<Vec<Event>> {
        let history = self
            .stores
            .history
            .read_all()
            .map_err(TunerError::store("reading history"))?;
        if history.is_empty() {
            return Err(TunerError::data(
                "reading history",
                "no well-formed events in the history store",
            ));
        }
        debug!("Loaded {} event(s)", history.len());
        Ok(history)
    }

    /// Score the current games against the latest draw, once per event.
    pub fn register_latest_results(&self) -> TunerResult<Option<ResultRegistration>> {
        let Some(latest) = self
            .stores
            .history
            .read_latest()
            .map_err(TunerError::store("reading latest event"))?
        else {
            warn!("No well-formed latest event; result registration skipped");
            return Ok(None);
        };

        let games = self
            .stores
            .games
            .current_games()
            .map_err(TunerError::store("reading current games"))?;
        if games.is_empty() {
            debug!("No published games yet; nothing to register");
            return Ok(None);
        }

        let registration = analytics::register(&latest, &games, Utc::now());
        let stored = self
            .stores
            .games
            .record_results(&registration)
            .map_err(TunerError::store("recording results"))?;
        if !stored {
            info!("Event {} already registered; no new rows written", latest.id);
            return Ok(None);
        }
        info!(
            "Registered event {}: best hit {} over {} game(s), neglected [{}]",
            latest.id,
            registration.best_hit,
            registration.games.len(),
            registration.neglected_rendered()
        );
        Ok(Some(registration))
    }

    /// Read the stored configuration, write back missing defaults, validate,
    /// and return it with a snapshot of the store for rollback.
    pub fn load_configuration(&self) -> TunerResult<(Configuration, ConfigSnapshot)> {
        let map = self
            .stores
            .config
            .read_config()
            .map_err(TunerError::store("reading configuration"))?;
        let (cfg, missing) = Configuration::from_map(&map);

        let snapshot = if missing.is_empty() {
            map
        } else {
            let entries: Vec<(String, f64)> = cfg
                .entries()
                .into_iter()
                .filter(|(k, _)| missing.contains(k))
                .collect();
            info!("Writing {} missing configuration default(s)", entries.len());
            self.stores
                .config
                .upsert_many(&entries)
                .map_err(TunerError::store("writing configuration defaults"))?;
            let mut map = map;
            map.extend(entries);
            map
        };

        cfg.validate(&self.settings.universe)?;
        Ok((cfg, snapshot))
    }

    fn search_and_apply(
        &mut self,
        run_id: &str,
        history: &[Event],
        cfg: &Configuration,
        snapshot: &ConfigSnapshot,
        weak: &WeakPairSet,
    ) -> TunerResult<SearchSummary> {
        // Baseline before the new record exists.
        let recent = self
            .stores
            .audit
            .recent_best_scores(self.settings.guard.history)
            .map_err(TunerError::store("reading audit baseline"))?;

        let result = search(
            history,
            cfg,
            &self.engine,
            weak,
            &self.settings.bounds,
            &self.settings.search,
            &mut self.rng,
        )?;

        let best = result.best_configuration.weights;
        let changed = best != cfg.weights;
        if changed {
            self.stores
                .config
                .upsert_many(&best.entries())
                .map_err(TunerError::store("applying configuration"))?;
            info!("Configuration updated: [{}] -> [{}]", cfg.weights, best);
        } else {
            info!("Configuration unchanged: [{}]", cfg.weights);
        }

        let record = AuditRecord {
            run_id: run_id.to_string(),
            recorded_at: Utc::now(),
            changed,
            window_size: result.evaluation_window,
            candidates_tested: result.candidates_tested,
            best_score: result.best_score,
            before: cfg.weights,
            after: best,
            mode: format!("BACKTEST_W{}", result.evaluation_window),
        };
        let audit_id = self
            .stores
            .audit
            .record(&record)
            .map_err(TunerError::store("appending audit record"))?;

        let verdict = self.settings.guard.check(&recent, result.best_score);
        match verdict {
            GuardVerdict::NoBaseline => debug!("Regression guard skipped: no baseline yet"),
            GuardVerdict::Accepted { baseline, drop } => debug!(
                "Regression guard passed: baseline {:.2}, drop {:.2}",
                baseline, drop
            ),
            GuardVerdict::Rejected { baseline, drop } => {
                warn!(
                    "Regression guard triggered: baseline {:.2}, new {:.2}; restoring configuration",
                    baseline, result.best_score
                );
                let entries: Vec<(String, f64)> =
                    snapshot.iter().map(|(k, v)| (k.clone(), *v)).collect();
                self.stores
                    .config
                    .upsert_many(&entries)
                    .map_err(TunerError::store("restoring configuration"))?;
                self.stores
                    .audit
                    .mark_reverted(audit_id, &reverted_note(drop, baseline))
                    .map_err(TunerError::store("marking audit record reverted"))?;
                return Err(TunerError::RegressionRejected {
                    baseline,
                    new_score: result.best_score,
                    drop,
                    max_drop: self.settings.guard.max_drop,
                });
            }
        }

        Ok(SearchSummary {
            result,
            changed,
            audit_id,
            verdict,
        })
    }

    fn generate_production(
        &mut self,
        run_id: &str,
        history: &[Event],
        cfg: &Configuration,
        weak: &WeakPairSet,
    ) -> TunerResult<Vec<GeneratedGame>> {
        let snapshot = self.engine.next_snapshot(history);
        let scores = build_score_vector(&snapshot, &cfg.weights);
        let batch = generate_batch(
            &scores,
            &cfg.rules,
            weak,
            cfg.rules.simulations,
            &mut self.rng,
        )?;
        let games = batch.games();
        self.stores
            .games
            .publish(run_id, Utc::now(), &games)
            .map_err(TunerError::store("publishing games"))?;
        for g in &games {
            info!("{} {}", g.game_id, g.rendered);
        }
        Ok(games)
    }
}
