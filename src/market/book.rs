//! Point-in-time order book values.

use crate::venue::{BookLevel, BookLevels};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Levels counted toward the top-of-book volume sums.
const TOP_LEVELS: usize = 10;

fn top_volume(levels: &[BookLevel]) -> Decimal {
    levels
        .iter()
        .take(TOP_LEVELS)
        .map(|l| l.volume)
        .sum::<Decimal>()
}

fn imbalance_of(bid_volume: Decimal, ask_volume: Decimal) -> f64 {
    if ask_volume.is_zero() {
        return f64::INFINITY;
    }
    (bid_volume / ask_volume).to_f64().unwrap_or(f64::INFINITY)
}

/// Immutable snapshot of one venue's book for one symbol.
#[derive(Debug, Clone)]
pub struct OrderBookSnapshot {
    pub timestamp: DateTime<Utc>,
    pub venue: String,
    pub symbol: String,
    /// Bid levels, price descending
    pub bids: Vec<BookLevel>,
    /// Ask levels, price ascending
    pub asks: Vec<BookLevel>,
    pub mid_price: Decimal,
    pub spread: Decimal,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
}

impl OrderBookSnapshot {
    /// Build a snapshot from raw venue levels. Returns `None` when either
    /// side is empty — a one-sided book carries no usable quote.
    pub fn from_levels(
        venue: impl Into<String>,
        symbol: impl Into<String>,
        levels: BookLevels,
    ) -> Option<Self> {
        let mut bids = levels.bids;
        let mut asks = levels.asks;
        if bids.is_empty() || asks.is_empty() {
            return None;
        }

        // Venues differ on ordering; sort defensively
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        let best_bid = bids[0].price;
        let best_ask = asks[0].price;

        Some(Self {
            timestamp: Utc::now(),
            venue: venue.into(),
            symbol: symbol.into(),
            mid_price: (best_bid + best_ask) / Decimal::TWO,
            spread: best_ask - best_bid,
            bid_volume: top_volume(&bids),
            ask_volume: top_volume(&asks),
            bids,
            asks,
        })
    }

    /// Bid/ask volume ratio over the top levels. Infinite when the ask side
    /// carries no volume.
    pub fn imbalance(&self) -> f64 {
        imbalance_of(self.bid_volume, self.ask_volume)
    }

    /// Volume-weighted mid: best bid and ask weighted by the opposing
    /// side's top-of-book volume.
    pub fn weighted_mid(&self) -> Decimal {
        let (bid, ask) = match (self.bids.first(), self.asks.first()) {
            (Some(b), Some(a)) => (b, a),
            _ => return self.mid_price,
        };
        let total = bid.volume + ask.volume;
        if total.is_zero() {
            return self.mid_price;
        }
        (bid.price * ask.volume + ask.price * bid.volume) / total
    }
}

/// Depth-limited merge of all venues' books for one symbol.
#[derive(Debug, Clone)]
pub struct AggregatedBook {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub mid_price: Decimal,
    pub spread: Decimal,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
    /// Venues contributing to this merge
    pub venue_count: usize,
}

impl AggregatedBook {
    pub(crate) fn from_sorted_levels(
        symbol: impl Into<String>,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
        venue_count: usize,
    ) -> Option<Self> {
        let best_bid = bids.first()?.price;
        let best_ask = asks.first()?.price;

        Some(Self {
            timestamp: Utc::now(),
            symbol: symbol.into(),
            mid_price: (best_bid + best_ask) / Decimal::TWO,
            spread: best_ask - best_bid,
            bid_volume: top_volume(&bids),
            ask_volume: top_volume(&asks),
            bids,
            asks,
            venue_count,
        })
    }

    pub fn imbalance(&self) -> f64 {
        imbalance_of(self.bid_volume, self.ask_volume)
    }

    pub fn weighted_mid(&self) -> Decimal {
        let (bid, ask) = match (self.bids.first(), self.asks.first()) {
            (Some(b), Some(a)) => (b, a),
            _ => return self.mid_price,
        };
        let total = bid.volume + ask.volume;
        if total.is_zero() {
            return self.mid_price;
        }
        (bid.price * ask.volume + ask.price * bid.volume) / total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn levels(pairs: &[(Decimal, Decimal)]) -> Vec<BookLevel> {
        pairs.iter().map(|(p, v)| BookLevel::new(*p, *v)).collect()
    }

    #[test]
    fn test_snapshot_from_levels() {
        let snapshot = OrderBookSnapshot::from_levels(
            "alpha",
            "BTC-USDT",
            BookLevels {
                bids: levels(&[(dec!(99), dec!(1)), (dec!(100), dec!(2))]),
                asks: levels(&[(dec!(102), dec!(3)), (dec!(101), dec!(1))]),
            },
        )
        .unwrap();

        // Sorted best-first regardless of input order
        assert_eq!(snapshot.bids[0].price, dec!(100));
        assert_eq!(snapshot.asks[0].price, dec!(101));
        assert_eq!(snapshot.mid_price, dec!(100.5));
        assert_eq!(snapshot.spread, dec!(1));
        assert_eq!(snapshot.bid_volume, dec!(3));
        assert_eq!(snapshot.ask_volume, dec!(4));
    }

    #[test]
    fn test_empty_side_yields_none() {
        let result = OrderBookSnapshot::from_levels(
            "alpha",
            "BTC-USDT",
            BookLevels {
                bids: levels(&[(dec!(100), dec!(1))]),
                asks: vec![],
            },
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_imbalance_infinite_without_asks_volume() {
        let snapshot = OrderBookSnapshot::from_levels(
            "alpha",
            "BTC-USDT",
            BookLevels {
                bids: levels(&[(dec!(100), dec!(5))]),
                asks: levels(&[(dec!(101), dec!(0))]),
            },
        )
        .unwrap();

        assert!(snapshot.imbalance().is_infinite());
    }

    #[test]
    fn test_imbalance_ratio() {
        let snapshot = OrderBookSnapshot::from_levels(
            "alpha",
            "BTC-USDT",
            BookLevels {
                bids: levels(&[(dec!(100), dec!(6))]),
                asks: levels(&[(dec!(101), dec!(3))]),
            },
        )
        .unwrap();

        assert!((snapshot.imbalance() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_mid_leans_toward_heavier_side() {
        let snapshot = OrderBookSnapshot::from_levels(
            "alpha",
            "BTC-USDT",
            BookLevels {
                bids: levels(&[(dec!(100), dec!(9))]),
                asks: levels(&[(dec!(101), dec!(1))]),
            },
        )
        .unwrap();

        // Heavy bids push the weighted mid toward the ask
        assert_eq!(snapshot.weighted_mid(), dec!(100.9));
    }
}
