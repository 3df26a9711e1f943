/// Integration tests for the SQLite collaborator layer.
use chrono::Utc;
use tempfile::NamedTempFile;

use lotofacil_tuner::analytics::register;
use lotofacil_tuner::database::Database;
use lotofacil_tuner::models::{
    AuditRecord, Batch, Candidate, Event, Universe, WeightVector,
};
use lotofacil_tuner::store::{reverted_note, AuditLog, ConfigStore, GameLog, HistoryStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn tmp_db() -> (NamedTempFile, Database) {
    let f = NamedTempFile::new().expect("tempfile");
    let db = Database::open(f.path().to_str().unwrap(), Universe::default()).expect("open db");
    (f, db)
}

fn sample_event(id: i64, first: i64) -> Event {
    let items: Vec<i64> = (first..first + 15).collect();
    Event::from_raw(id, None, &items, &Universe::default()).expect("valid event")
}

fn sample_audit(score: f64) -> AuditRecord {
    AuditRecord {
        run_id: "run_test".into(),
        recorded_at: Utc::now(),
        changed: false,
        window_size: 50,
        candidates_tested: 14,
        best_score: score,
        before: WeightVector::default(),
        after: WeightVector::default(),
        mode: "BACKTEST_W50".into(),
    }
}

fn sample_batch() -> Batch {
    Batch {
        candidates: vec![
            Candidate::new((1..=17).collect()),
            Candidate::new((9..=25).collect()),
        ],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_schema_applied_on_open() {
    let (_f, db) = tmp_db();
    assert!(db.read_all().expect("read_all").is_empty());
    assert!(db.read_latest().expect("read_latest").is_none());
    assert!(db.read_config().expect("read_config").is_empty());
    assert!(db.current_games().expect("current_games").is_empty());
}

#[test]
fn test_append_is_idempotent_and_sorted() {
    let (_f, db) = tmp_db();
    assert!(db.append(&sample_event(2, 5)).unwrap());
    assert!(db.append(&sample_event(1, 1)).unwrap());
    assert!(!db.append(&sample_event(2, 7)).unwrap());

    let events = db.read_all().unwrap();
    assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
    // The duplicate append did not overwrite the stored row.
    assert_eq!(events[1].items()[0], 5);
}

#[test]
fn test_malformed_rows_are_skipped() {
    let (_f, db) = tmp_db();
    db.append(&sample_event(1, 1)).unwrap();
    db.insert_raw_event(2, None, "01-02-03").unwrap();
    db.insert_raw_event(3, None, "01-01-02-03-04-05-06-07-08-09-10-11-12-13-14")
        .unwrap();
    db.insert_raw_event(4, Some("2024-01-31"), "26-01-02-03-04-05-06-07-08-09-10-11-12-13-14")
        .unwrap();

    let events = db.read_all().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, 1);
    // Latest scans back past every malformed row.
    assert_eq!(db.read_latest().unwrap().map(|e| e.id), Some(1));
}

#[test]
fn test_event_dates_round_trip() {
    let (_f, db) = tmp_db();
    db.insert_raw_event(7, Some("31/01/2024"), "1;2;3;4;5;6;7;8;9;10;11;12;13;14;15")
        .unwrap();
    let e = db.read_latest().unwrap().expect("event");
    assert_eq!(e.drawn_on.map(|d| d.to_string()), Some("2024-01-31".into()));
}

#[test]
fn test_config_accepts_decimal_commas() {
    let (_f, db) = tmp_db();
    db.set_raw_config("w_staleness", "0,3").unwrap();
    db.set_raw_config("alpha", "not a number").unwrap();
    db.upsert("w_short", 4.0).unwrap();

    let cfg = db.read_config().unwrap();
    assert_eq!(cfg.get("w_staleness"), Some(&0.3));
    assert_eq!(cfg.get("w_short"), Some(&4.0));
    assert!(!cfg.contains_key("alpha"));
}

#[test]
fn test_upsert_many_updates_in_place() {
    let (_f, db) = tmp_db();
    db.upsert("w_mid", 2.0).unwrap();
    db.upsert_many(&[("w_mid".into(), 5.0), ("w_long".into(), 1.0)])
        .unwrap();
    let cfg = db.read_config().unwrap();
    assert_eq!(cfg.len(), 2);
    assert_eq!(cfg["w_mid"], 5.0);
}

#[test]
fn test_audit_scores_most_recent_first() {
    let (_f, db) = tmp_db();
    for s in [7.0, 8.0, 9.0] {
        db.record(&sample_audit(s)).unwrap();
    }
    assert_eq!(db.recent_best_scores(2).unwrap(), vec![9.0, 8.0]);
    assert_eq!(db.recent_best_scores(10).unwrap().len(), 3);
}

#[test]
fn test_mark_reverted_rewrites_mode() {
    let (_f, db) = tmp_db();
    let id = db.record(&sample_audit(7.3)).unwrap();
    db.mark_reverted(id, &reverted_note(0.7, 8.0)).unwrap();

    let records = db.audit_records(1).unwrap();
    assert_eq!(records[0].0, id);
    assert_eq!(records[0].1.mode, "REVERTED | DROP=0.70 | BASE=8.00");
    assert_eq!(records[0].1.before, WeightVector::default());
    assert!(db.mark_reverted(id + 100, "x").is_err());
}

#[test]
fn test_publish_replaces_current_and_keeps_history() {
    let (_f, db) = tmp_db();
    let games = sample_batch().games();
    db.publish("run_a", Utc::now(), &games).unwrap();
    db.publish("run_b", Utc::now(), &games[..1]).unwrap();

    let current = db.current_games().unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].game_id, "J01");
    assert_eq!(current[0].items, (1..=17).collect::<Vec<u8>>());
    assert_eq!(db.games_history_len().unwrap(), 3);
}

#[test]
fn test_results_are_recorded_once_per_event() {
    let (_f, db) = tmp_db();
    let games = sample_batch().games();
    let reg = register(&sample_event(3001, 1), &games, Utc::now());

    assert!(db.record_results(&reg).unwrap());
    assert!(!db.record_results(&reg).unwrap());
    assert_eq!(db.registered_events().unwrap(), vec![3001]);
}
