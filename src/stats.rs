/// stats.rs – Causal rolling statistics and the weak-pair index.
///
/// Both computations are deterministic and independent of the candidate
/// weights, so a search computes them once and reuses them for every
/// candidate and for production generation.
///
/// Causality: the snapshot for event `i` is taken *before* event `i` is
/// folded into the counters, so it only ever reflects events `0..i`.
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

use crate::models::{Event, Item, ItemStats, StatsSnapshot, Universe, WeakPairSet};

// ---------------------------------------------------------------------------
// Window lengths
// ---------------------------------------------------------------------------

/// Lengths of the short / mid / long rolling windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsWindows {
    pub short: usize,
    pub mid: usize,
    pub long: usize,
}

impl Default for StatsWindows {
    fn default() -> Self {
        Self {
            short: 20,
            mid: 50,
            long: 100,
        }
    }
}

/// Shrink the evaluation window when the history is too young to hold it
/// plus the safety margin. Never fails.
pub fn effective_window(history_len: usize, requested: usize, margin: usize) -> usize {
    if history_len < requested + margin {
        requested.min(history_len)
    } else {
        requested
    }
}

// ---------------------------------------------------------------------------
// Rolling counters
// ---------------------------------------------------------------------------

/// Count of each item over the last `len` consumed events.
struct RollingWindow {
    len: usize,
    fifo: VecDeque<usize>,
    counts: Vec<u32>,
}

impl RollingWindow {
    fn new(len: usize, universe: usize) -> Self {
        Self {
            len,
            fifo: VecDeque::with_capacity(len + 1),
            counts: vec![0; universe + 1],
        }
    }

    fn push(&mut self, history: &[Event], index: usize) {
        for &d in history[index].items() {
            self.counts[d as usize] += 1;
        }
        self.fifo.push_back(index);
        if self.fifo.len() > self.len {
            if let Some(old) = self.fifo.pop_front() {
                for &d in history[old].items() {
                    self.counts[d as usize] -= 1;
                }
            }
        }
    }
}

struct Counters {
    short: RollingWindow,
    mid: RollingWindow,
    long: RollingWindow,
    frequency: Vec<u32>,
    last_seen: Vec<Option<usize>>,
    consumed: usize,
}

impl Counters {
    fn new(windows: &StatsWindows, universe: usize) -> Self {
        Self {
            short: RollingWindow::new(windows.short, universe),
            mid: RollingWindow::new(windows.mid, universe),
            long: RollingWindow::new(windows.long, universe),
            frequency: vec![0; universe + 1],
            last_seen: vec![None; universe + 1],
            consumed: 0,
        }
    }

    /// Stats for the event at `self.consumed`, built from prior events only.
    fn snapshot(&self, universe: &Universe) -> StatsSnapshot {
        let idx = self.consumed;
        let items = universe
            .items()
            .map(|d| {
                let d = d as usize;
                let staleness = match self.last_seen[d] {
                    Some(seen) => idx - seen,
                    None => idx + 1,
                };
                ItemStats {
                    short_count: self.short.counts[d],
                    mid_count: self.mid.counts[d],
                    long_count: self.long.counts[d],
                    staleness: staleness as u32,
                    global_frequency: self.frequency[d],
                    events_seen: idx as u32,
                }
            })
            .collect();
        StatsSnapshot::new(idx, items)
    }

    fn consume(&mut self, history: &[Event]) {
        let idx = self.consumed;
        for &d in history[idx].items() {
            self.frequency[d as usize] += 1;
            self.last_seen[d as usize] = Some(idx);
        }
        self.short.push(history, idx);
        self.mid.push(history, idx);
        self.long.push(history, idx);
        self.consumed += 1;
    }
}

// ---------------------------------------------------------------------------
// StatsEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StatsEngine {
    windows: StatsWindows,
    universe: Universe,
}

impl StatsEngine {
    pub fn new(windows: StatsWindows, universe: Universe) -> Self {
        Self { windows, universe }
    }

    /// One snapshot per event in the last `window` events of `history`,
    /// in history order. Snapshot `k` precedes event `history.len() - window + k`.
    pub fn evaluation_snapshots(&self, history: &[Event], window: usize) -> Vec<StatsSnapshot> {
        let n = history.len();
        let start = n.saturating_sub(window);
        let mut counters = Counters::new(&self.windows, self.universe.len());
        let mut out = Vec::with_capacity(n - start);
        for idx in 0..n {
            if idx >= start {
                out.push(counters.snapshot(&self.universe));
            }
            counters.consume(history);
        }
        debug!(
            "Precomputed {} stats snapshot(s) over {} event(s)",
            out.len(),
            n
        );
        out
    }

    /// Stats for the next, not yet drawn event (all history consumed).
    pub fn next_snapshot(&self, history: &[Event]) -> StatsSnapshot {
        let mut counters = Counters::new(&self.windows, self.universe.len());
        for _ in 0..history.len() {
            counters.consume(history);
        }
        counters.snapshot(&self.universe)
    }
}

// ---------------------------------------------------------------------------
// Pair weakness index
// ---------------------------------------------------------------------------

/// Global co-occurrence count of every unordered pair `(a, b)`, `a < b`.
pub fn pair_counts(history: &[Event], universe: &Universe) -> Vec<((Item, Item), u32)> {
    let n = universe.len();
    let mut matrix = vec![0u32; (n + 1) * (n + 1)];
    for event in history {
        let items = event.items();
        for (i, &a) in items.iter().enumerate() {
            for &b in &items[i + 1..] {
                matrix[a as usize * (n + 1) + b as usize] += 1;
            }
        }
    }
    let mut out = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for a in 1..=n {
        for b in a + 1..=n {
            out.push(((a as Item, b as Item), matrix[a * (n + 1) + b]));
        }
    }
    out
}

/// The `count` pairs with the lowest positive co-occurrence. Zero-count
/// pairs only fill the set when fewer positive pairs exist. Ties break on
/// ascending `(a, b)`.
pub fn weak_pairs(history: &[Event], count: usize, universe: &Universe) -> WeakPairSet {
    let counts = pair_counts(history, universe);
    let (mut positive, zero): (Vec<_>, Vec<_>) = counts.into_iter().partition(|(_, c)| *c > 0);
    positive.sort_by_key(|&(pair, c)| (c, pair));

    let mut chosen: Vec<(Item, Item)> = positive.iter().take(count).map(|(p, _)| *p).collect();
    if chosen.len() < count {
        chosen.extend(zero.iter().take(count - chosen.len()).map(|(p, _)| *p));
    }
    debug!("Selected {} weak pair(s) of {} requested", chosen.len(), count);
    WeakPairSet::from_pairs(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_universe() -> Universe {
        Universe {
            max_item: 6,
            draw_size: 2,
        }
    }

    fn ev(id: i64, items: &[i64]) -> Event {
        Event::from_raw(id, None, items, &small_universe()).unwrap()
    }

    #[test]
    fn effective_window_shrinks_on_young_history() {
        assert_eq!(effective_window(200, 50, 30), 50);
        assert_eq!(effective_window(60, 50, 30), 50);
        assert_eq!(effective_window(40, 50, 30), 40);
        assert_eq!(effective_window(0, 50, 30), 0);
    }

    #[test]
    fn snapshot_excludes_current_event() {
        let history = vec![ev(1, &[1, 2]), ev(2, &[1, 3]), ev(3, &[5, 6])];
        let engine = StatsEngine::new(
            StatsWindows {
                short: 1,
                mid: 2,
                long: 10,
            },
            small_universe(),
        );
        let snaps = engine.evaluation_snapshots(&history, 1);
        assert_eq!(snaps.len(), 1);
        let s = &snaps[0];
        assert_eq!(s.event_index, 2);
        // Items 5 and 6 belong to the evaluated event itself.
        assert_eq!(s.get(5).global_frequency, 0);
        assert_eq!(s.get(6).long_count, 0);
        assert_eq!(s.get(5).staleness, 3);
        assert_eq!(s.get(1).global_frequency, 2);
        assert_eq!(s.get(1).short_count, 1);
        assert_eq!(s.get(2).short_count, 0);
        assert_eq!(s.get(2).mid_count, 1);
        assert_eq!(s.get(1).staleness, 1);
        assert_eq!(s.get(2).staleness, 2);
        assert_eq!(s.get(1).events_seen, 2);
    }

    #[test]
    fn next_snapshot_consumes_everything() {
        let history = vec![ev(1, &[1, 2]), ev(2, &[1, 3])];
        let engine = StatsEngine::new(StatsWindows::default(), small_universe());
        let s = engine.next_snapshot(&history);
        assert_eq!(s.event_index, 2);
        assert_eq!(s.get(1).global_frequency, 2);
        assert_eq!(s.get(3).staleness, 1);
        assert_eq!(s.get(4).staleness, 3);
    }

    #[test]
    fn weak_pairs_prefer_lowest_positive_counts() {
        let history = vec![ev(1, &[1, 2]), ev(2, &[1, 2]), ev(3, &[3, 4]), ev(4, &[5, 6])];
        let weak = weak_pairs(&history, 2, &small_universe());
        assert_eq!(weak.len(), 2);
        assert!(weak.contains(3, 4));
        assert!(weak.contains(5, 6));
        assert!(!weak.contains(1, 2));
    }

    #[test]
    fn weak_pairs_fill_with_zero_counts_only_when_needed() {
        let history = vec![ev(1, &[1, 2])];
        let weak = weak_pairs(&history, 3, &small_universe());
        assert_eq!(weak.len(), 3);
        assert!(weak.contains(1, 2));
        assert!(weak.contains(1, 3));
        assert!(weak.contains(1, 4));
    }
}
