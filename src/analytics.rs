/// analytics.rs – Hit analysis of published games against real draws.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{render_items, Event, GeneratedGame, Item};

/// Hit tiers reported by the distribution summary.
pub const HIT_TIERS: [usize; 5] = [11, 12, 13, 14, 15];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameHits {
    pub game_id: String,
    pub rendered: String,
    pub hits: usize,
}

/// Outcome of one real draw against the games published before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRegistration {
    pub event_id: i64,
    pub drawn: String,
    pub registered_at: DateTime<Utc>,
    pub games: Vec<GameHits>,
    pub best_hit: usize,
    /// Drawn items that no published game contained.
    pub neglected: Vec<Item>,
}

impl ResultRegistration {
    pub fn neglected_rendered(&self) -> String {
        render_items(&self.neglected)
    }
}

pub fn register(
    event: &Event,
    games: &[GeneratedGame],
    registered_at: DateTime<Utc>,
) -> ResultRegistration {
    let hits: Vec<GameHits> = games
        .iter()
        .map(|g| GameHits {
            game_id: g.game_id.clone(),
            rendered: g.rendered.clone(),
            hits: g.hits(event),
        })
        .collect();
    let best_hit = hits.iter().map(|h| h.hits).max().unwrap_or(0);

    ResultRegistration {
        event_id: event.id,
        drawn: render_items(event.items()),
        registered_at,
        games: hits,
        best_hit,
        neglected: neglected_items(event, games),
    }
}

pub fn neglected_items(event: &Event, games: &[GeneratedGame]) -> Vec<Item> {
    let covered: BTreeSet<Item> = games.iter().flat_map(|g| g.items.iter().copied()).collect();
    event
        .items()
        .iter()
        .copied()
        .filter(|d| !covered.contains(d))
        .collect()
}

/// Per-game count of historical events reaching each hit tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitDistribution {
    pub game_id: String,
    /// tier → number of events with exactly that many hits.
    pub tiers: BTreeMap<usize, usize>,
    pub events: usize,
}

impl HitDistribution {
    pub fn count(&self, tier: usize) -> usize {
        self.tiers.get(&tier).copied().unwrap_or(0)
    }
}

/// Replay every game over the whole history.
pub fn hit_distribution(games: &[GeneratedGame], history: &[Event]) -> Vec<HitDistribution> {
    games
        .iter()
        .map(|g| {
            let mut tiers: BTreeMap<usize, usize> = HIT_TIERS.iter().map(|&t| (t, 0)).collect();
            for event in history {
                if let Some(n) = tiers.get_mut(&g.hits(event)) {
                    *n += 1;
                }
            }
            HitDistribution {
                game_id: g.game_id.clone(),
                tiers,
                events: history.len(),
            }
        })
        .collect()
}
