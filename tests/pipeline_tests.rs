/// Whole-run tests against the in-memory collaborators.
use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::TempDir;

use lotofacil_tuner::config::Settings;
use lotofacil_tuner::error::TunerError;
use lotofacil_tuner::lock::RunLock;
use lotofacil_tuner::models::{AuditRecord, Configuration, Event, GeneratorRules, Universe, WeightVector};
use lotofacil_tuner::pipeline::{Collaborators, RunMode, RunOutcome, Tuner};
use lotofacil_tuner::store::{AuditLog, ConfigStore, GameLog, HistoryStore, MemoryStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_settings(dir: &TempDir) -> Settings {
    let mut s = Settings::default();
    s.run.lock_path = dir.path().join("run.lock").to_string_lossy().into_owned();
    s.run.lock_wait_seconds = 0.0;
    s.run.seed = Some(42);
    s.search.max_candidates = 3;
    s.search.max_runtime_secs = 10;
    s.search.simulations_per_game = 60;
    s
}

fn relaxed_configuration() -> Configuration {
    Configuration {
        weights: WeightVector::default(),
        rules: GeneratorRules {
            batch_size: 3,
            max_seq: 6,
            min_diff: 6,
            ..GeneratorRules::default()
        },
    }
}

fn seeded_store(events: usize) -> MemoryStore {
    let universe = Universe::default();
    let store = MemoryStore::new(universe);
    let mut rng = StdRng::seed_from_u64(11);
    let pool: Vec<i64> = (1..=25).collect();
    for i in 0..events {
        let items: Vec<i64> = pool.choose_multiple(&mut rng, 15).copied().collect();
        let e = Event::from_raw(i as i64 + 1, None, &items, &universe).unwrap();
        store.append(&e).unwrap();
    }
    store.upsert_many(&relaxed_configuration().entries()).unwrap();
    store
}

fn past_audit(score: f64) -> AuditRecord {
    AuditRecord {
        run_id: "previous".into(),
        recorded_at: Utc::now(),
        changed: false,
        window_size: 50,
        candidates_tested: 3,
        best_score: score,
        before: WeightVector::default(),
        after: WeightVector::default(),
        mode: "BACKTEST_W50".into(),
    }
}

fn stored_configuration(store: &MemoryStore) -> Configuration {
    Configuration::from_map(&store.read_config().unwrap()).0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn full_run_searches_audits_and_publishes() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(60);
    let mut tuner = Tuner::new(test_settings(&dir), Collaborators::single(&store));

    let report = match tuner.run(RunMode::Full).expect("run succeeds") {
        RunOutcome::Completed(r) => r,
        RunOutcome::Skipped => panic!("lock was free"),
    };

    let summary = report.search.expect("search ran");
    assert!(summary.result.best_score.is_finite());
    assert_eq!(
        stored_configuration(&store).weights,
        summary.result.best_configuration.weights
    );

    let audit = store.audit_records().unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].changed, summary.changed);
    assert_eq!(audit[0].run_id, report.run_id);
    assert_eq!(audit[0].mode, "BACKTEST_W50");

    assert_eq!(report.games.len(), 3);
    assert_eq!(store.current_games().unwrap(), report.games);
    // The lock is free again once the run returns.
    let again = RunLock::acquire(&dir.path().join("run.lock"), Duration::ZERO).unwrap();
    assert!(again.is_some());
}

#[test]
fn regression_guard_restores_configuration() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(60);
    for _ in 0..5 {
        store.record(&past_audit(16.9)).unwrap();
    }
    let before = store.read_config().unwrap();
    let mut tuner = Tuner::new(test_settings(&dir), Collaborators::single(&store));

    let err = tuner.run(RunMode::Full).unwrap_err();
    match err {
        TunerError::RegressionRejected {
            baseline,
            drop,
            max_drop,
            ..
        } => {
            assert!((baseline - 16.9).abs() < 1e-9);
            assert!(drop > max_drop);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(store.read_config().unwrap(), before);
    let audit = store.audit_records().unwrap();
    assert_eq!(audit.len(), 6);
    assert!(audit[5].mode.starts_with("REVERTED | DROP="));
    assert!(store.current_games().unwrap().is_empty());
}

#[test]
fn busy_lock_skips_the_run() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(40);
    let settings = test_settings(&dir);
    let held = RunLock::acquire(Path::new(&settings.run.lock_path), Duration::ZERO)
        .unwrap()
        .expect("lock is free");

    let mut tuner = Tuner::new(settings.clone(), Collaborators::single(&store));
    assert_eq!(tuner.run(RunMode::Full).unwrap(), RunOutcome::Skipped);
    assert!(store.audit_records().unwrap().is_empty());
    assert!(store.current_games().unwrap().is_empty());

    drop(held);
    assert!(matches!(
        tuner.run(RunMode::GenerateOnly).unwrap(),
        RunOutcome::Completed(_)
    ));
}

#[test]
fn leftover_lock_file_does_not_block_a_run() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(40);
    let settings = test_settings(&dir);
    std::fs::write(&settings.run.lock_path, "1 crashed-run\n").unwrap();

    let mut tuner = Tuner::new(settings, Collaborators::single(&store));
    assert!(matches!(
        tuner.run(RunMode::GenerateOnly).unwrap(),
        RunOutcome::Completed(_)
    ));
}

#[test]
fn oversized_batch_in_store_is_a_data_error() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(40);
    store.upsert("BATCH_SIZE", 1e18).unwrap();
    let mut tuner = Tuner::new(test_settings(&dir), Collaborators::single(&store));

    match tuner.run_unlocked(RunMode::GenerateOnly) {
        Err(TunerError::Data { message, .. }) => assert!(message.contains("BATCH_SIZE"), "{message}"),
        other => panic!("expected a data error, got {other:?}"),
    }
    assert!(store.current_games().unwrap().is_empty());
}

#[test]
fn results_are_registered_once_per_event() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(40);
    let mut settings = test_settings(&dir);
    // Back-to-back searches on the same history; only registration is under test.
    settings.guard.max_drop = 100.0;
    let mut tuner = Tuner::new(settings, Collaborators::single(&store));

    // First run: nothing published yet, so nothing to register.
    let first = tuner.run_unlocked(RunMode::GenerateOnly).unwrap();
    assert!(first.registration.is_none());

    let latest = store.read_latest().unwrap().unwrap();
    let second = tuner.run_unlocked(RunMode::Full).unwrap();
    let reg = second.registration.expect("new registration");
    assert_eq!(reg.event_id, latest.id);
    assert_eq!(reg.games.len(), 3);

    let third = tuner.run_unlocked(RunMode::Full).unwrap();
    assert!(third.registration.is_none());
    assert_eq!(store.registrations().unwrap().len(), 1);
}

#[test]
fn generate_only_leaves_audit_untouched() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(40);
    let mut tuner = Tuner::new(test_settings(&dir), Collaborators::single(&store));

    let report = tuner.run_unlocked(RunMode::GenerateOnly).unwrap();
    assert!(report.search.is_none());
    assert_eq!(report.games.len(), 3);
    assert!(store.audit_records().unwrap().is_empty());
    assert_eq!(store.games_history_len().unwrap(), 3);
}

#[test]
fn missing_configuration_keys_are_written_back() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(10);
    store.set_raw_config("w_short", "4").unwrap();
    let tuner = Tuner::new(test_settings(&dir), Collaborators::single(&store));

    let empty = MemoryStore::new(Universe::default());
    let fresh = Tuner::new(test_settings(&dir), Collaborators::single(&empty));
    let (cfg, snapshot) = fresh.load_configuration().unwrap();
    assert_eq!(cfg, Configuration::default());
    assert_eq!(snapshot.len(), 13);
    assert_eq!(empty.read_config().unwrap().len(), 13);

    let (cfg, _) = tuner.load_configuration().unwrap();
    assert_eq!(cfg.weights.w_short, 4.0);
}

#[test]
fn empty_history_is_a_data_error() {
    let dir = TempDir::new().unwrap();
    let store = MemoryStore::new(Universe::default());
    let mut tuner = Tuner::new(test_settings(&dir), Collaborators::single(&store));
    assert!(matches!(
        tuner.run_unlocked(RunMode::SearchOnly),
        Err(TunerError::Data { .. })
    ));
}
