/// database.rs – SQLite persistence layer using rusqlite.
///
/// History, configuration, the search audit log and published games live in
/// a single SQLite file with WAL journaling. Items are stored as their
/// canonical dash-joined rendering and validated on every read, so rows
/// written by other tools are checked exactly like our own.
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::{
    analytics::ResultRegistration,
    models::{
        parse_date, parse_items, render_items, AuditRecord, ConfigSnapshot, Event, GeneratedGame,
        Universe,
    },
    store::{
        config_from_rows, events_from_rows, latest_from_rows, AuditLog, ConfigStore, GameLog,
        HistoryStore, RawEvent,
    },
};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS events (
    id          INTEGER PRIMARY KEY,
    drawn_on    TEXT,
    items       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS config (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id              TEXT NOT NULL,
    recorded_at         TEXT NOT NULL,
    changed             INTEGER NOT NULL,
    window_size         INTEGER NOT NULL,
    candidates_tested   INTEGER NOT NULL,
    best_score          REAL NOT NULL,
    before_weights      TEXT NOT NULL,
    after_weights       TEXT NOT NULL,
    mode                TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS current_games (
    game_id         TEXT PRIMARY KEY,
    items           TEXT NOT NULL,
    run_id          TEXT NOT NULL,
    published_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS games_history (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id          TEXT NOT NULL,
    published_at    TEXT NOT NULL,
    game_id         TEXT NOT NULL,
    items           TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS game_results (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id        INTEGER NOT NULL,
    registered_at   TEXT NOT NULL,
    drawn           TEXT NOT NULL,
    game_id         TEXT NOT NULL,
    game_items      TEXT NOT NULL,
    hits            INTEGER NOT NULL,
    best_hit        INTEGER NOT NULL,
    neglected       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_game_results_event ON game_results(event_id);
CREATE INDEX IF NOT EXISTS idx_games_history_run  ON games_history(run_id);
";

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

pub struct Database {
    conn: Mutex<Connection>,
    universe: Universe,
}

impl Database {
    /// Open (or create) the SQLite database at *path* and apply the schema.
    pub fn open(path: &str, universe: Universe) -> Result<Self> {
        let conn = Connection::open(path).context("opening SQLite database")?;
        conn.execute_batch(SCHEMA).context("applying schema")?;
        debug!("Opened database at {}", path);
        Ok(Self {
            conn: Mutex::new(conn),
            universe,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Insert an event row verbatim, without validation.
    pub fn insert_raw_event(&self, id: i64, drawn_on: Option<&str>, items: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (id, drawn_on, items) VALUES (?1,?2,?3)",
                params![id, drawn_on, items],
            )?;
            Ok(())
        })
    }

    /// Store a raw configuration value as text, e.g. "0,3".
    pub fn set_raw_config(&self, key: &str, raw: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO config (key, value) VALUES (?1,?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, raw],
            )?;
            Ok(())
        })
    }

    pub fn audit_records(&self, limit: usize) -> Result<Vec<(i64, AuditRecord)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM audit_log ORDER BY id DESC LIMIT ?1")?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok((row.get("id")?, Self::row_to_audit(row)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(anyhow::Error::from)
        })
    }

    pub fn registered_events(&self) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT event_id FROM game_results ORDER BY event_id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(anyhow::Error::from)
        })
    }

    pub fn games_history_len(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM games_history", [], |row| {
                row.get(0)
            })?;
            Ok(n as usize)
        })
    }

    fn raw_events(&self, sql: &str) -> Result<Vec<RawEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map([], Self::row_to_raw_event)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(anyhow::Error::from)
        })
    }

    fn row_to_raw_event(row: &rusqlite::Row<'_>) -> Result<RawEvent, rusqlite::Error> {
        let text: String = row.get("items")?;
        Ok(RawEvent {
            id: row.get("id")?,
            drawn_on: row
                .get::<_, Option<String>>("drawn_on")?
                .and_then(|s| parse_date(&s)),
            items: raw_numbers(&text),
        })
    }

    fn row_to_audit(row: &rusqlite::Row<'_>) -> Result<AuditRecord, rusqlite::Error> {
        let before: String = row.get("before_weights")?;
        let after: String = row.get("after_weights")?;
        Ok(AuditRecord {
            run_id: row.get("run_id")?,
            recorded_at: parse_dt(row.get::<_, String>("recorded_at")?),
            changed: row.get::<_, i32>("changed")? != 0,
            window_size: row.get::<_, i64>("window_size")? as usize,
            candidates_tested: row.get::<_, i64>("candidates_tested")? as usize,
            best_score: row.get("best_score")?,
            before: serde_json::from_str(&before).unwrap_or_default(),
            after: serde_json::from_str(&after).unwrap_or_default(),
            mode: row.get("mode")?,
        })
    }

    fn row_to_game(&self, row: &rusqlite::Row<'_>) -> Result<GeneratedGame, rusqlite::Error> {
        let text: String = row.get("items")?;
        let items = parse_items(&text, &self.universe);
        Ok(GeneratedGame {
            game_id: row.get("game_id")?,
            rendered: render_items(&items),
            items,
        })
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

impl HistoryStore for Database {
    fn read_all(&self) -> Result<Vec<Event>> {
        let rows = self.raw_events("SELECT * FROM events ORDER BY id")?;
        let events = events_from_rows(&rows, &self.universe);
        if events.len() < rows.len() {
            info!(
                "Loaded {} event(s), skipped {} malformed row(s)",
                events.len(),
                rows.len() - events.len()
            );
        }
        Ok(events)
    }

    fn read_latest(&self) -> Result<Option<Event>> {
        let rows = self.raw_events("SELECT * FROM events ORDER BY id DESC")?;
        Ok(latest_from_rows(&rows, &self.universe))
    }

    fn append(&self, event: &Event) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT INTO events (id, drawn_on, items) VALUES (?1,?2,?3)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    event.id,
                    event.drawn_on.map(|d| d.format("%Y-%m-%d").to_string()),
                    render_items(event.items()),
                ],
            )?;
            Ok(n > 0)
        })
    }
}

impl ConfigStore for Database {
    fn read_config(&self) -> Result<ConfigSnapshot> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM config")?;
            // Values may have been typed in as numbers by hand; read any type as text.
            let rows = stmt.query_map([], |row| {
                let key: String = row.get(0)?;
                let value = match row.get_ref(1)? {
                    rusqlite::types::ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
                    rusqlite::types::ValueRef::Integer(i) => i.to_string(),
                    rusqlite::types::ValueRef::Real(f) => f.to_string(),
                    _ => String::new(),
                };
                Ok((key, value))
            })?;
            let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(config_from_rows(rows))
        })
    }

    fn upsert(&self, key: &str, value: f64) -> Result<()> {
        self.set_raw_config(key, &value.to_string())
    }

    fn upsert_many(&self, entries: &[(String, f64)]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("starting config transaction")?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO config (key, value) VALUES (?1,?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?;
            for (k, v) in entries {
                stmt.execute(params![k, v.to_string()])?;
            }
        }
        tx.commit().context("committing config transaction")?;
        Ok(())
    }
}

impl AuditLog for Database {
    fn record(&self, r: &AuditRecord) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_log
                    (run_id, recorded_at, changed, window_size, candidates_tested,
                     best_score, before_weights, after_weights, mode)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    r.run_id,
                    r.recorded_at.to_rfc3339(),
                    r.changed as i32,
                    r.window_size as i64,
                    r.candidates_tested as i64,
                    r.best_score,
                    serde_json::to_string(&r.before)?,
                    serde_json::to_string(&r.after)?,
                    r.mode,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn recent_best_scores(&self, n: usize) -> Result<Vec<f64>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT best_score FROM audit_log ORDER BY id DESC LIMIT ?1")?;
            let rows = stmt.query_map(params![n as i64], |row| row.get::<_, f64>(0))?;
            let scores = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(scores.into_iter().filter(|v| v.is_finite()).collect())
        })
    }

    fn mark_reverted(&self, id: i64, note: &str) -> Result<()> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE audit_log SET mode = ?1 WHERE id = ?2",
                params![note, id],
            )?;
            if n == 0 {
                return Err(anyhow!("audit record {id} not found"));
            }
            Ok(())
        })
    }
}

impl GameLog for Database {
    fn publish(
        &self,
        run_id: &str,
        published_at: DateTime<Utc>,
        games: &[GeneratedGame],
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("starting publish transaction")?;
        tx.execute("DELETE FROM current_games", [])?;
        {
            let mut current = tx.prepare(
                "INSERT INTO current_games (game_id, items, run_id, published_at)
                 VALUES (?1,?2,?3,?4)",
            )?;
            let mut history = tx.prepare(
                "INSERT INTO games_history (run_id, published_at, game_id, items)
                 VALUES (?1,?2,?3,?4)",
            )?;
            let ts = published_at.to_rfc3339();
            for g in games {
                current.execute(params![g.game_id, g.rendered, run_id, ts])?;
                history.execute(params![run_id, ts, g.game_id, g.rendered])?;
            }
        }
        tx.commit().context("committing published games")?;
        Ok(())
    }

    fn current_games(&self) -> Result<Vec<GeneratedGame>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM current_games ORDER BY game_id")?;
            let rows = stmt.query_map([], |row| self.row_to_game(row))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(anyhow::Error::from)
        })
    }

    fn record_results(&self, reg: &ResultRegistration) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("starting results transaction")?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM game_results WHERE event_id = ?1 LIMIT 1",
                params![reg.event_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if exists {
            return Ok(false);
        }
        {
            let mut stmt = tx.prepare(
                "INSERT INTO game_results
                    (event_id, registered_at, drawn, game_id, game_items,
                     hits, best_hit, neglected)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            )?;
            let ts = reg.registered_at.to_rfc3339();
            let neglected = reg.neglected_rendered();
            for g in &reg.games {
                stmt.execute(params![
                    reg.event_id,
                    ts,
                    reg.drawn,
                    g.game_id,
                    g.rendered,
                    g.hits as i64,
                    reg.best_hit as i64,
                    neglected,
                ])?;
            }
        }
        tx.commit().context("committing game results")?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Every integer in a stored item list, unfiltered, so validation sees
/// duplicates and out-of-range values.
fn raw_numbers(text: &str) -> Vec<i64> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

fn parse_dt(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
