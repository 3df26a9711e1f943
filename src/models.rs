/// models.rs – Core data types shared across all tuner modules.
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{TunerError, TunerResult};

/// One item of the universe (1-based).
pub type Item = u8;

// ---------------------------------------------------------------------------
// Universe
// ---------------------------------------------------------------------------

/// The fixed item universe `1..=max_item` and the size of every real draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Universe {
    pub max_item: Item,
    /// DRAW_SIZE: number of distinct items in every historical event.
    pub draw_size: usize,
}

impl Default for Universe {
    fn default() -> Self {
        Self {
            max_item: 25,
            draw_size: 15,
        }
    }
}

impl Universe {
    pub fn len(&self) -> usize {
        self.max_item as usize
    }

    pub fn is_empty(&self) -> bool {
        self.max_item == 0
    }

    pub fn contains(&self, item: i64) -> bool {
        item >= 1 && item <= self.max_item as i64
    }

    pub fn items(&self) -> impl Iterator<Item = Item> {
        1..=self.max_item
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One historical draw. Items are distinct and sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub drawn_on: Option<NaiveDate>,
    items: Vec<Item>,
}

impl Event {
    /// Validate a raw row: exactly `draw_size` distinct items, all in range.
    pub fn from_raw(
        id: i64,
        drawn_on: Option<NaiveDate>,
        raw_items: &[i64],
        universe: &Universe,
    ) -> TunerResult<Self> {
        if let Some(bad) = raw_items.iter().find(|&&n| !universe.contains(n)) {
            return Err(TunerError::data(
                "event validation",
                format!(
                    "event {id}: item {bad} outside 1..={}",
                    universe.max_item
                ),
            ));
        }
        let mut items: Vec<Item> = raw_items.iter().map(|&n| n as Item).collect();
        items.sort_unstable();
        items.dedup();
        if items.len() != universe.draw_size || raw_items.len() != universe.draw_size {
            return Err(TunerError::data(
                "event validation",
                format!(
                    "event {id}: expected {} distinct items, got {} ({} raw)",
                    universe.draw_size,
                    items.len(),
                    raw_items.len()
                ),
            ));
        }
        Ok(Self {
            id,
            drawn_on,
            items,
        })
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn contains(&self, item: Item) -> bool {
        self.items.binary_search(&item).is_ok()
    }
}

/// Extract every integer from a free-form row, keep those inside the
/// universe, de-duplicate and sort. Accepts "01-05-12", "1,5,12", "1 5 12".
pub fn parse_items(text: &str, universe: &Universe) -> Vec<Item> {
    let mut out: Vec<Item> = text
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .filter(|&n| universe.contains(n))
        .map(|n| n as Item)
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// Parse one imported history line: `id;date;d1;...;d15`, with `;`, `,`,
/// tabs or spaces as separators and the date optional. Blank lines,
/// `#` comments and header rows yield `Ok(None)`.
pub fn parse_event_line(line: &str, universe: &Universe) -> TunerResult<Option<Event>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut fields = line
        .split(|c: char| c == ';' || c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty());
    let Some(id) = fields.next().and_then(|f| f.parse::<i64>().ok()) else {
        return Ok(None);
    };
    let rest: Vec<&str> = fields.collect();
    let (drawn_on, numbers) = match rest.first().and_then(|f| parse_date(f)) {
        Some(d) => (Some(d), &rest[1..]),
        None => (None, &rest[..]),
    };
    let items = numbers
        .iter()
        .map(|f| {
            f.parse::<i64>().map_err(|_| {
                TunerError::data("import", format!("event {id}: {f:?} is not an item"))
            })
        })
        .collect::<TunerResult<Vec<i64>>>()?;
    Event::from_raw(id, drawn_on, &items, universe).map(Some)
}

/// Draw date as stored ("2024-01-31") or as published ("31/01/2024").
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let t = text.trim();
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(t, "%d/%m/%Y"))
        .ok()
}

/// Canonical rendering: sorted, zero-padded, dash-joined ("01-05-12").
pub fn render_items(items: &[Item]) -> String {
    let mut sorted = items.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .map(|n| format!("{n:02}"))
        .collect::<Vec<_>>()
        .join("-")
}

// ---------------------------------------------------------------------------
// Per-item statistics
// ---------------------------------------------------------------------------

/// Statistics for one item as seen *before* a given event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ItemStats {
    /// Occurrences in the short / mid / long rolling windows.
    pub short_count: u32,
    pub mid_count: u32,
    pub long_count: u32,
    /// Events since last occurrence, or `index + 1` if never seen.
    pub staleness: u32,
    pub global_frequency: u32,
    pub events_seen: u32,
}

/// Stats of every item of the universe at one point of the history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Index (into the full history) of the event these stats precede.
    pub event_index: usize,
    items: Vec<ItemStats>,
}

impl StatsSnapshot {
    pub fn new(event_index: usize, items: Vec<ItemStats>) -> Self {
        Self { event_index, items }
    }

    pub fn get(&self, item: Item) -> &ItemStats {
        &self.items[item as usize - 1]
    }

    /// `(item, stats)` pairs in item order.
    pub fn iter(&self) -> impl Iterator<Item = (Item, &ItemStats)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, s)| ((i + 1) as Item, s))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Weights
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightField {
    Short,
    Mid,
    Long,
    Staleness,
    Bayes,
    Alpha,
}

impl WeightField {
    pub const ALL: [WeightField; 6] = [
        WeightField::Short,
        WeightField::Mid,
        WeightField::Long,
        WeightField::Staleness,
        WeightField::Bayes,
        WeightField::Alpha,
    ];

    /// Key used in the configuration store.
    pub fn key(self) -> &'static str {
        match self {
            WeightField::Short => "w_short",
            WeightField::Mid => "w_mid",
            WeightField::Long => "w_long",
            WeightField::Staleness => "w_staleness",
            WeightField::Bayes => "w_bayes",
            WeightField::Alpha => "alpha",
        }
    }

    /// Window weights move in whole steps; the rest are fractional.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            WeightField::Short | WeightField::Mid | WeightField::Long
        )
    }
}

impl std::fmt::Display for WeightField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    pub w_short: f64,
    pub w_mid: f64,
    pub w_long: f64,
    pub w_staleness: f64,
    pub w_bayes: f64,
    pub alpha: f64,
}

impl Default for WeightVector {
    fn default() -> Self {
        Self {
            w_short: 3.0,
            w_mid: 2.0,
            w_long: 1.0,
            w_staleness: 0.3,
            w_bayes: 0.5,
            alpha: 1.0,
        }
    }
}

impl WeightVector {
    pub fn get(&self, field: WeightField) -> f64 {
        match field {
            WeightField::Short => self.w_short,
            WeightField::Mid => self.w_mid,
            WeightField::Long => self.w_long,
            WeightField::Staleness => self.w_staleness,
            WeightField::Bayes => self.w_bayes,
            WeightField::Alpha => self.alpha,
        }
    }

    pub fn set(&mut self, field: WeightField, value: f64) {
        match field {
            WeightField::Short => self.w_short = value,
            WeightField::Mid => self.w_mid = value,
            WeightField::Long => self.w_long = value,
            WeightField::Staleness => self.w_staleness = value,
            WeightField::Bayes => self.w_bayes = value,
            WeightField::Alpha => self.alpha = value,
        }
    }

    pub fn entries(&self) -> Vec<(String, f64)> {
        WeightField::ALL
            .iter()
            .map(|f| (f.key().to_string(), self.get(*f)))
            .collect()
    }
}

impl std::fmt::Display for WeightVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "short={} mid={} long={} staleness={:.2} bayes={:.2} alpha={:.2}",
            self.w_short, self.w_mid, self.w_long, self.w_staleness, self.w_bayes, self.alpha
        )
    }
}

// ---------------------------------------------------------------------------
// Score vector
// ---------------------------------------------------------------------------

/// Lowest weight any item may carry after normalisation.
pub const WEIGHT_FLOOR: f64 = 1e-12;

/// Per-item sampling weights, strictly positive and summing to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreVector {
    weights: Vec<f64>,
}

impl ScoreVector {
    /// Floor non-finite or tiny entries, then normalise to sum 1.
    pub fn normalized(raw: &[f64]) -> Self {
        let safe: Vec<f64> = raw
            .iter()
            .map(|&x| if x.is_finite() { x.max(WEIGHT_FLOOR) } else { WEIGHT_FLOOR })
            .collect();
        let sum: f64 = safe.iter().sum();
        Self {
            weights: safe.into_iter().map(|x| x / sum).collect(),
        }
    }

    pub fn uniform(len: usize) -> Self {
        Self::normalized(&vec![1.0; len])
    }

    pub fn weight(&self, item: Item) -> f64 {
        self.weights[item as usize - 1]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Candidate / Batch
// ---------------------------------------------------------------------------

/// One generated game: distinct items sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    items: Vec<Item>,
}

impl Candidate {
    pub fn new(mut items: Vec<Item>) -> Self {
        items.sort_unstable();
        items.dedup();
        Self { items }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Length of the longest run of consecutive integers.
    pub fn longest_run(&self) -> usize {
        if self.items.is_empty() {
            return 0;
        }
        let mut best = 1;
        let mut run = 1;
        for w in self.items.windows(2) {
            if w[1] == w[0] + 1 {
                run += 1;
                best = best.max(run);
            } else {
                run = 1;
            }
        }
        best
    }

    pub fn symmetric_difference(&self, other: &Candidate) -> usize {
        let (mut i, mut j, mut common) = (0, 0, 0);
        while i < self.items.len() && j < other.items.len() {
            match self.items[i].cmp(&other.items[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    common += 1;
                    i += 1;
                    j += 1;
                }
            }
        }
        (self.items.len() - common) + (other.items.len() - common)
    }

    pub fn hits(&self, event: &Event) -> usize {
        self.items.iter().filter(|&&d| event.contains(d)).count()
    }

    pub fn render(&self) -> String {
        render_items(&self.items)
    }
}

/// A batch of mutually diverse candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub candidates: Vec<Candidate>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Production rendering with stable ids `J01`, `J02`, …
    pub fn games(&self) -> Vec<GeneratedGame> {
        self.candidates
            .iter()
            .enumerate()
            .map(|(i, c)| GeneratedGame {
                game_id: game_id(i),
                items: c.items().to_vec(),
                rendered: c.render(),
            })
            .collect()
    }
}

pub fn game_id(index: usize) -> String {
    format!("J{:02}", index + 1)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedGame {
    pub game_id: String,
    pub items: Vec<Item>,
    pub rendered: String,
}

impl GeneratedGame {
    pub fn hits(&self, event: &Event) -> usize {
        self.items.iter().filter(|&&d| event.contains(d)).count()
    }
}

// ---------------------------------------------------------------------------
// Weak pairs
// ---------------------------------------------------------------------------

/// Unordered item pairs stored as `(low, high)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeakPairSet {
    pairs: HashSet<(Item, Item)>,
}

impl WeakPairSet {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Item, Item)>) -> Self {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(a, b)| if a < b { (a, b) } else { (b, a) })
                .collect(),
        }
    }

    pub fn contains(&self, a: Item, b: Item) -> bool {
        let key = if a < b { (a, b) } else { (b, a) };
        self.pairs.contains(&key)
    }

    /// Number of weak pairs fully contained in `items`.
    pub fn count_in(&self, items: &[Item]) -> usize {
        if self.pairs.is_empty() {
            return 0;
        }
        let mut n = 0;
        for (i, &a) in items.iter().enumerate() {
            for &b in &items[i + 1..] {
                if self.contains(a, b) {
                    n += 1;
                }
            }
        }
        n
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Generator and rule parameters stored next to the weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneratorRules {
    /// GAME_SIZE: items per generated game.
    pub game_size: usize,
    /// BATCH_SIZE: games per batch.
    pub batch_size: usize,
    /// MAX_SEQ: longest allowed run of consecutive items.
    pub max_seq: usize,
    /// MIN_DIFF: minimum symmetric difference between games of one batch.
    pub min_diff: usize,
    /// BOTTOM_PAIRS: size of the weak-pair set.
    pub bottom_pairs: usize,
    pub penalty_weak_pair: f64,
    /// N_SIM: attempts per slot in production generation.
    pub simulations: usize,
}

impl Default for GeneratorRules {
    fn default() -> Self {
        Self {
            game_size: 17,
            batch_size: 5,
            max_seq: 4,
            min_diff: 12,
            bottom_pairs: 60,
            penalty_weak_pair: 5.0,
            simulations: 300,
        }
    }
}

/// Largest accepted BATCH_SIZE.
pub const MAX_BATCH_SIZE: usize = 100;
/// Largest accepted attempt budget per batch slot (N_SIM and backtest).
pub const MAX_SIMULATIONS: usize = 100_000;

const RULE_KEYS: [&str; 7] = [
    "GAME_SIZE",
    "BATCH_SIZE",
    "MAX_SEQ",
    "MIN_DIFF",
    "BOTTOM_PAIRS",
    "PENALTY_WEAK_PAIR",
    "N_SIM",
];

/// Weights plus rules: the mutable production configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub weights: WeightVector,
    pub rules: GeneratorRules,
}

/// Raw key/value view of the configuration store taken before a search.
pub type ConfigSnapshot = BTreeMap<String, f64>;

impl Configuration {
    /// Build from a key/value map, falling back to defaults. Also returns
    /// the keys that were missing so the caller can write them back.
    pub fn from_map(map: &BTreeMap<String, f64>) -> (Self, Vec<String>) {
        let defaults = Configuration::default();
        let mut missing = Vec::new();
        let mut take = |key: &str, default: f64| match map.get(key) {
            Some(v) => *v,
            None => {
                missing.push(key.to_string());
                default
            }
        };

        let mut weights = WeightVector::default();
        for field in WeightField::ALL {
            let v = take(field.key(), defaults.weights.get(field));
            weights.set(field, v);
        }
        let d = defaults.rules;
        let as_count = |v: f64| if v.is_finite() && v > 0.0 { v.round() as usize } else { 0 };
        let rules = GeneratorRules {
            game_size: as_count(take("GAME_SIZE", d.game_size as f64)),
            batch_size: as_count(take("BATCH_SIZE", d.batch_size as f64)),
            max_seq: as_count(take("MAX_SEQ", d.max_seq as f64)),
            min_diff: as_count(take("MIN_DIFF", d.min_diff as f64)),
            bottom_pairs: as_count(take("BOTTOM_PAIRS", d.bottom_pairs as f64)),
            penalty_weak_pair: take("PENALTY_WEAK_PAIR", d.penalty_weak_pair),
            simulations: as_count(take("N_SIM", d.simulations as f64)),
        };
        (Self { weights, rules }, missing)
    }

    /// Every key this configuration owns, in store order.
    pub fn entries(&self) -> Vec<(String, f64)> {
        let r = &self.rules;
        let mut out = self.weights.entries();
        let values = [
            r.game_size as f64,
            r.batch_size as f64,
            r.max_seq as f64,
            r.min_diff as f64,
            r.bottom_pairs as f64,
            r.penalty_weak_pair,
            r.simulations as f64,
        ];
        out.extend(RULE_KEYS.iter().map(|k| k.to_string()).zip(values));
        out
    }

    /// Reject rules the generator can never satisfy.
    pub fn validate(&self, universe: &Universe) -> TunerResult<()> {
        let r = &self.rules;
        let fail = |msg: String| Err(TunerError::data("configuration", msg));
        if r.game_size == 0 || r.game_size > universe.len() {
            return fail(format!(
                "GAME_SIZE must be in 1..={} (got {})",
                universe.len(),
                r.game_size
            ));
        }
        if r.batch_size == 0 || r.batch_size > MAX_BATCH_SIZE {
            return fail(format!(
                "BATCH_SIZE must be in 1..={MAX_BATCH_SIZE} (got {})",
                r.batch_size
            ));
        }
        if r.max_seq == 0 {
            return fail("MAX_SEQ must be > 0".into());
        }
        // Two games of GAME_SIZE items differ by at most 2 × GAME_SIZE.
        if r.min_diff > 2 * r.game_size {
            return fail(format!(
                "MIN_DIFF must be <= {} (got {})",
                2 * r.game_size,
                r.min_diff
            ));
        }
        let n = universe.len();
        let all_pairs = n * n.saturating_sub(1) / 2;
        if r.bottom_pairs > all_pairs {
            return fail(format!(
                "BOTTOM_PAIRS must be <= {all_pairs} (got {})",
                r.bottom_pairs
            ));
        }
        if r.simulations == 0 || r.simulations > MAX_SIMULATIONS {
            return fail(format!(
                "N_SIM must be in 1..={MAX_SIMULATIONS} (got {})",
                r.simulations
            ));
        }
        if !r.penalty_weak_pair.is_finite() || r.penalty_weak_pair < 0.0 {
            return fail("PENALTY_WEAK_PAIR must be a finite number >= 0".into());
        }
        for field in WeightField::ALL {
            if !self.weights.get(field).is_finite() {
                return fail(format!("{field} must be finite"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Search result / audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub best_configuration: Configuration,
    pub best_score: f64,
    pub candidates_tested: usize,
    pub evaluation_window: usize,
}

/// One row of the append-only search audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    pub changed: bool,
    pub window_size: usize,
    pub candidates_tested: usize,
    pub best_score: f64,
    pub before: WeightVector,
    pub after: WeightVector,
    pub mode: String,
}
