//! Cross-venue order book aggregation.
//!
//! Caches the latest snapshot per (symbol, venue) — last write wins — and
//! merges them on demand into a depth-limited aggregated book. Also keeps
//! time-windowed volume and spread histories per symbol for the velocity
//! and tightness signal components.

use crate::market::book::{AggregatedBook, OrderBookSnapshot};
use crate::venue::BookLevel;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::trace;

/// Retention window for volume observations.
const VOLUME_WINDOW_SECS: i64 = 20 * 60;
/// Recency window compared against the full volume history.
const RECENT_VOLUME_SECS: i64 = 60;
/// Rolling spread samples kept per symbol.
const SPREAD_HISTORY_LEN: usize = 200;

#[derive(Default)]
struct AggregatorState {
    /// symbol -> venue -> latest snapshot
    books: HashMap<String, HashMap<String, OrderBookSnapshot>>,
    /// symbol -> (timestamp, total top-of-book volume)
    volume_history: HashMap<String, VecDeque<(DateTime<Utc>, Decimal)>>,
    /// symbol -> recent per-update spreads
    spread_history: HashMap<String, VecDeque<Decimal>>,
}

/// Merges per-venue snapshots into aggregated books and derives the
/// order-flow metrics built on them.
pub struct OrderBookAggregator {
    depth: usize,
    state: RwLock<AggregatorState>,
}

impl OrderBookAggregator {
    /// Create an aggregator truncating merged books to `depth` per side.
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            state: RwLock::new(AggregatorState::default()),
        }
    }

    /// Ingest a venue snapshot, replacing that venue's previous one, and
    /// roll the volume/spread histories forward.
    pub async fn update(&self, snapshot: OrderBookSnapshot) {
        let mut state = self.state.write().await;
        let symbol = snapshot.symbol.clone();

        let volumes = state.volume_history.entry(symbol.clone()).or_default();
        volumes.push_back((snapshot.timestamp, snapshot.bid_volume + snapshot.ask_volume));
        let cutoff = Utc::now() - Duration::seconds(VOLUME_WINDOW_SECS);
        while volumes.front().is_some_and(|(ts, _)| *ts < cutoff) {
            volumes.pop_front();
        }

        let spreads = state.spread_history.entry(symbol.clone()).or_default();
        spreads.push_back(snapshot.spread);
        while spreads.len() > SPREAD_HISTORY_LEN {
            spreads.pop_front();
        }

        trace!(
            venue = %snapshot.venue,
            %symbol,
            mid = %snapshot.mid_price,
            "Book snapshot ingested"
        );

        state
            .books
            .entry(symbol)
            .or_default()
            .insert(snapshot.venue.clone(), snapshot);
    }

    /// Merge the cached venue snapshots for a symbol. `None` when no venue
    /// has reported or the merge leaves a side empty.
    pub async fn aggregate(&self, symbol: &str) -> Option<AggregatedBook> {
        let state = self.state.read().await;
        let venues = state.books.get(symbol)?;
        if venues.is_empty() {
            return None;
        }

        let mut bid_levels: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        let mut ask_levels: BTreeMap<Decimal, Decimal> = BTreeMap::new();

        for snapshot in venues.values() {
            for level in &snapshot.bids {
                *bid_levels.entry(level.price).or_default() += level.volume;
            }
            for level in &snapshot.asks {
                *ask_levels.entry(level.price).or_default() += level.volume;
            }
        }

        let bids: Vec<BookLevel> = bid_levels
            .iter()
            .rev()
            .take(self.depth)
            .map(|(p, v)| BookLevel::new(*p, *v))
            .collect();
        let asks: Vec<BookLevel> = ask_levels
            .iter()
            .take(self.depth)
            .map(|(p, v)| BookLevel::new(*p, *v))
            .collect();

        if bids.is_empty() || asks.is_empty() {
            return None;
        }

        AggregatedBook::from_sorted_levels(symbol, bids, asks, venues.len())
    }

    /// Ratio of recent (last minute) to windowed (20 minute) average volume.
    /// Returns the neutral 1.0 with fewer than two observations.
    pub async fn volume_velocity(&self, symbol: &str) -> f64 {
        let state = self.state.read().await;
        let Some(volumes) = state.volume_history.get(symbol) else {
            return 1.0;
        };
        if volumes.len() < 2 {
            return 1.0;
        }

        let recent_cutoff = Utc::now() - Duration::seconds(RECENT_VOLUME_SECS);
        let recent: Vec<f64> = volumes
            .iter()
            .filter(|(ts, _)| *ts >= recent_cutoff)
            .filter_map(|(_, v)| v.to_f64())
            .collect();
        let all: Vec<f64> = volumes.iter().filter_map(|(_, v)| v.to_f64()).collect();

        if recent.is_empty() || all.is_empty() {
            return 1.0;
        }

        let recent_avg = recent.iter().sum::<f64>() / recent.len() as f64;
        let total_avg = all.iter().sum::<f64>() / all.len() as f64;

        if total_avg <= 0.0 {
            return 1.0;
        }
        recent_avg / total_avg
    }

    /// Historical average spread over the current aggregated spread; values
    /// above 1.0 mean the book is currently tighter than usual. Falls back
    /// to the neutral 1.0 without history or a usable current spread.
    pub async fn spread_tightness(&self, symbol: &str) -> f64 {
        let current = match self.aggregate(symbol).await {
            Some(book) if book.spread > Decimal::ZERO => book.spread,
            _ => return 1.0,
        };

        let state = self.state.read().await;
        let Some(spreads) = state.spread_history.get(symbol) else {
            return 1.0;
        };
        if spreads.is_empty() {
            return 1.0;
        }

        let sum: Decimal = spreads.iter().copied().sum();
        let avg = sum / Decimal::from(spreads.len());
        (avg / current).to_f64().unwrap_or(1.0)
    }

    /// Latest snapshots per venue for a symbol, used for venue-agreement
    /// scoring.
    pub async fn venue_snapshots(&self, symbol: &str) -> Vec<OrderBookSnapshot> {
        let state = self.state.read().await;
        state
            .books
            .get(symbol)
            .map(|venues| venues.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Aggregated mid price shortcut for stop checks and sizing.
    pub async fn mid_price(&self, symbol: &str) -> Option<Decimal> {
        self.aggregate(symbol).await.map(|book| book.mid_price)
    }
}
