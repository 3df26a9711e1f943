/// store.rs – Collaborator interfaces and an in-memory implementation.
///
/// The pipeline only talks to these traits; `database::Database` backs them
/// with SQLite and `MemoryStore` keeps everything in process (tests, dry
/// runs). Both share the row-validation helpers below so malformed rows are
/// treated identically.
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::{
    analytics::ResultRegistration,
    models::{AuditRecord, ConfigSnapshot, Event, GeneratedGame, Universe},
};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Ordered sequence of past events.
pub trait HistoryStore {
    /// Every well-formed event, ascending by id. Malformed rows are skipped.
    fn read_all(&self) -> Result<Vec<Event>>;
    /// The most recent well-formed event.
    fn read_latest(&self) -> Result<Option<Event>>;
    /// Insert an event. Returns `false` when the id already exists.
    fn append(&self, event: &Event) -> Result<bool>;
}

/// Key → number configuration store.
pub trait ConfigStore {
    /// Every readable value; decimal commas are accepted, junk is omitted.
    fn read_config(&self) -> Result<ConfigSnapshot>;
    fn upsert(&self, key: &str, value: f64) -> Result<()>;
    /// All-or-nothing write of several keys.
    fn upsert_many(&self, entries: &[(String, f64)]) -> Result<()>;
}

/// Append-only record of every search.
pub trait AuditLog {
    /// Append a record and return its id.
    fn record(&self, record: &AuditRecord) -> Result<i64>;
    /// Best scores of the last `n` records, most recent first.
    fn recent_best_scores(&self, n: usize) -> Result<Vec<f64>>;
    fn mark_reverted(&self, id: i64, note: &str) -> Result<()>;
}

/// Published games and their registered results.
pub trait GameLog {
    /// Replace the current batch and append it to the cumulative history.
    fn publish(&self, run_id: &str, published_at: DateTime<Utc>, games: &[GeneratedGame])
        -> Result<()>;
    fn current_games(&self) -> Result<Vec<GeneratedGame>>;
    /// Store a registration. Returns `false` if the event was already registered.
    fn record_results(&self, registration: &ResultRegistration) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// An event row as stored, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub id: i64,
    pub drawn_on: Option<NaiveDate>,
    pub items: Vec<i64>,
}

impl From<&Event> for RawEvent {
    fn from(e: &Event) -> Self {
        Self {
            id: e.id,
            drawn_on: e.drawn_on,
            items: e.items().iter().map(|&d| d as i64).collect(),
        }
    }
}

fn validate_row(row: &RawEvent, universe: &Universe) -> Option<Event> {
    match Event::from_raw(row.id, row.drawn_on, &row.items, universe) {
        Ok(e) => Some(e),
        Err(e) => {
            warn!("Skipping malformed event row: {}", e);
            None
        }
    }
}

/// Validate rows, drop malformed ones and sort by id.
pub fn events_from_rows<'a>(
    rows: impl IntoIterator<Item = &'a RawEvent>,
    universe: &Universe,
) -> Vec<Event> {
    let mut events: Vec<Event> = rows
        .into_iter()
        .filter_map(|r| validate_row(r, universe))
        .collect();
    events.sort_by_key(|e| e.id);
    events
}

/// First well-formed row of an id-descending scan.
pub fn latest_from_rows<'a>(
    rows_desc: impl IntoIterator<Item = &'a RawEvent>,
    universe: &Universe,
) -> Option<Event> {
    rows_desc.into_iter().find_map(|r| validate_row(r, universe))
}

/// Parse a stored configuration value; "0,3" reads as 0.3.
pub fn parse_config_value(raw: &str) -> Option<f64> {
    let v: f64 = raw.trim().replace(',', ".").parse().ok()?;
    v.is_finite().then_some(v)
}

pub fn config_from_rows(rows: impl IntoIterator<Item = (String, String)>) -> ConfigSnapshot {
    let mut out = BTreeMap::new();
    for (key, raw) in rows {
        let key = key.trim().to_string();
        if key.is_empty() {
            continue;
        }
        match parse_config_value(&raw) {
            Some(v) => {
                out.insert(key, v);
            }
            None => warn!("Ignoring unreadable config value {}={:?}", key, raw),
        }
    }
    out
}

/// Audit mode tag written over a rolled-back record.
pub fn reverted_note(drop: f64, baseline: f64) -> String {
    format!("REVERTED | DROP={drop:.2} | BASE={baseline:.2}")
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    events: Vec<RawEvent>,
    config: BTreeMap<String, String>,
    audit: Vec<AuditRecord>,
    current: Vec<GeneratedGame>,
    games_history: Vec<(String, DateTime<Utc>, GeneratedGame)>,
    results: Vec<ResultRegistration>,
}

/// Process-local implementation of every collaborator trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    universe: Universe,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(universe: Universe) -> Self {
        Self {
            universe,
            state: Mutex::default(),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory store mutex poisoned"))
    }

    /// Insert a row without validation, as an external writer might.
    pub fn push_raw_event(&self, row: RawEvent) -> Result<()> {
        self.state()?.events.push(row);
        Ok(())
    }

    pub fn set_raw_config(&self, key: &str, raw: &str) -> Result<()> {
        self.state()?.config.insert(key.to_string(), raw.to_string());
        Ok(())
    }

    pub fn audit_records(&self) -> Result<Vec<AuditRecord>> {
        Ok(self.state()?.audit.clone())
    }

    pub fn registrations(&self) -> Result<Vec<ResultRegistration>> {
        Ok(self.state()?.results.clone())
    }

    pub fn games_history_len(&self) -> Result<usize> {
        Ok(self.state()?.games_history.len())
    }
}

impl HistoryStore for MemoryStore {
    fn read_all(&self) -> Result<Vec<Event>> {
        let state = self.state()?;
        Ok(events_from_rows(&state.events, &self.universe))
    }

    fn read_latest(&self) -> Result<Option<Event>> {
        let state = self.state()?;
        let mut rows: Vec<&RawEvent> = state.events.iter().collect();
        rows.sort_by_key(|r| std::cmp::Reverse(r.id));
        Ok(latest_from_rows(rows, &self.universe))
    }

    fn append(&self, event: &Event) -> Result<bool> {
        let mut state = self.state()?;
        if state.events.iter().any(|r| r.id == event.id) {
            return Ok(false);
        }
        state.events.push(RawEvent::from(event));
        Ok(true)
    }
}

impl ConfigStore for MemoryStore {
    fn read_config(&self) -> Result<ConfigSnapshot> {
        let state = self.state()?;
        Ok(config_from_rows(
            state.config.iter().map(|(k, v)| (k.clone(), v.clone())),
        ))
    }

    fn upsert(&self, key: &str, value: f64) -> Result<()> {
        self.state()?.config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn upsert_many(&self, entries: &[(String, f64)]) -> Result<()> {
        let mut state = self.state()?;
        for (k, v) in entries {
            state.config.insert(k.clone(), v.to_string());
        }
        Ok(())
    }
}

impl AuditLog for MemoryStore {
    fn record(&self, record: &AuditRecord) -> Result<i64> {
        let mut state = self.state()?;
        state.audit.push(record.clone());
        Ok(state.audit.len() as i64)
    }

    fn recent_best_scores(&self, n: usize) -> Result<Vec<f64>> {
        let state = self.state()?;
        Ok(state
            .audit
            .iter()
            .rev()
            .take(n)
            .map(|r| r.best_score)
            .filter(|v| v.is_finite())
            .collect())
    }

    fn mark_reverted(&self, id: i64, note: &str) -> Result<()> {
        let mut state = self.state()?;
        let idx = usize::try_from(id - 1).map_err(|_| anyhow!("invalid audit id {id}"))?;
        let rec = state
            .audit
            .get_mut(idx)
            .ok_or_else(|| anyhow!("audit record {id} not found"))?;
        rec.mode = note.to_string();
        Ok(())
    }
}

impl GameLog for MemoryStore {
    fn publish(
        &self,
        run_id: &str,
        published_at: DateTime<Utc>,
        games: &[GeneratedGame],
    ) -> Result<()> {
        let mut state = self.state()?;
        state.current = games.to_vec();
        state.games_history.extend(
            games
                .iter()
                .map(|g| (run_id.to_string(), published_at, g.clone())),
        );
        Ok(())
    }

    fn current_games(&self) -> Result<Vec<GeneratedGame>> {
        Ok(self.state()?.current.clone())
    }

    fn record_results(&self, registration: &ResultRegistration) -> Result<bool> {
        let mut state = self.state()?;
        if state
            .results
            .iter()
            .any(|r| r.event_id == registration.event_id)
        {
            return Ok(false);
        }
        state.results.push(registration.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: i64, items: Vec<i64>) -> RawEvent {
        RawEvent {
            id,
            drawn_on: None,
            items,
        }
    }

    #[test]
    fn decimal_commas_are_accepted() {
        assert_eq!(parse_config_value("0,3"), Some(0.3));
        assert_eq!(parse_config_value(" 12 "), Some(12.0));
        assert_eq!(parse_config_value("abc"), None);
        assert_eq!(parse_config_value("NaN"), None);
    }

    #[test]
    fn unreadable_config_values_are_omitted() {
        let store = MemoryStore::new(Universe::default());
        store.set_raw_config("w_staleness", "0,4").unwrap();
        store.set_raw_config("alpha", "oops").unwrap();
        let cfg = store.read_config().unwrap();
        assert_eq!(cfg.get("w_staleness"), Some(&0.4));
        assert!(!cfg.contains_key("alpha"));
    }

    #[test]
    fn malformed_rows_are_skipped_and_sorted() {
        let store = MemoryStore::new(Universe::default());
        store.push_raw_event(raw(2, (1..=15).collect())).unwrap();
        store.push_raw_event(raw(1, (2..=16).collect())).unwrap();
        store.push_raw_event(raw(3, (1..=14).collect())).unwrap();
        let events = store.read_all().unwrap();
        assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
        // Latest scans back past the malformed row 3.
        assert_eq!(store.read_latest().unwrap().map(|e| e.id), Some(2));
    }

    #[test]
    fn append_is_idempotent_per_id() {
        let store = MemoryStore::new(Universe::default());
        let items: Vec<i64> = (1..=15).collect();
        let e = Event::from_raw(9, None, &items, &Universe::default()).unwrap();
        assert!(store.append(&e).unwrap());
        assert!(!store.append(&e).unwrap());
        assert_eq!(store.read_all().unwrap().len(), 1);
    }

    #[test]
    fn reverted_note_format() {
        assert_eq!(reverted_note(0.7, 8.0), "REVERTED | DROP=0.70 | BASE=8.00");
    }
}
