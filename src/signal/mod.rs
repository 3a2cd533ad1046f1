//! Order-flow momentum signal generation.
//!
//! Combines aggregated book imbalance with volume velocity, spread
//! tightness, and VWAP distance into directional signals, scores them for
//! quality, and filters correlated candidates down to an uncorrelated set.

use crate::config::TradingConfig;
use crate::market::{OrderBookAggregator, VwapEstimator};
use crate::portfolio::correlation::CorrelationMatrix;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Imbalance above which the book leans long.
const LONG_IMBALANCE: f64 = 1.5;
/// Imbalance below which the book leans short (1 / 1.5).
const SHORT_IMBALANCE: f64 = 0.667;
/// Signals kept per symbol for inspection.
const HISTORY_WINDOW_SECS: i64 = 3600;

/// Trade direction implied by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDirection {
    Long,
    Short,
    Neutral,
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalDirection::Long => write!(f, "LONG"),
            SignalDirection::Short => write!(f, "SHORT"),
            SignalDirection::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Immutable signal value with its component metrics.
#[derive(Debug, Clone)]
pub struct TradingSignal {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub direction: SignalDirection,
    pub strength: f64,

    // Components
    pub orderbook_imbalance: f64,
    pub volume_velocity: f64,
    pub spread_tightness: f64,
    pub distance_from_vwap: f64,

    // Confidence
    pub confidence: f64,
    pub venues_agreeing: usize,
    pub venues_total: usize,
}

impl TradingSignal {
    /// A signal is worth acting on only when all three entry gates pass.
    pub fn is_actionable(&self, config: &TradingConfig) -> bool {
        self.strength > config.signal_strength_threshold
            && self.volume_velocity > config.volume_velocity_threshold
            && self.distance_from_vwap.abs() < config.vwap_distance_threshold
    }
}

/// Generates and ranks trading signals from the aggregated market stream.
pub struct SignalEngine {
    aggregator: Arc<OrderBookAggregator>,
    vwap: Arc<VwapEstimator>,
    config: TradingConfig,
    history: RwLock<HashMap<String, VecDeque<TradingSignal>>>,
}

impl SignalEngine {
    pub fn new(
        aggregator: Arc<OrderBookAggregator>,
        vwap: Arc<VwapEstimator>,
        config: TradingConfig,
    ) -> Self {
        Self {
            aggregator,
            vwap,
            config,
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Generate a signal for a symbol. `None` when no aggregated book is
    /// available this cycle.
    pub async fn generate(&self, symbol: &str) -> Option<TradingSignal> {
        let book = self.aggregator.aggregate(symbol).await?;

        let imbalance = book.imbalance();
        let velocity = self.aggregator.volume_velocity(symbol).await;
        let tightness = self.aggregator.spread_tightness(symbol).await;

        let mid = book.mid_price.to_f64().unwrap_or_default();
        let distance_from_vwap = match self.vwap.vwap(symbol).await {
            Some(vwap) if vwap != 0.0 => (mid - vwap) / vwap,
            _ => 0.0,
        };

        let strength = imbalance * velocity * tightness;

        let direction = if strength > self.config.signal_strength_threshold {
            if imbalance > LONG_IMBALANCE {
                SignalDirection::Long
            } else if imbalance < SHORT_IMBALANCE {
                SignalDirection::Short
            } else {
                SignalDirection::Neutral
            }
        } else {
            SignalDirection::Neutral
        };

        let snapshots = self.aggregator.venue_snapshots(symbol).await;
        let venues_total = snapshots.len();
        let venues_agreeing = snapshots
            .iter()
            .filter(|snapshot| match direction {
                SignalDirection::Long => snapshot.imbalance() > LONG_IMBALANCE,
                SignalDirection::Short => snapshot.imbalance() < SHORT_IMBALANCE,
                SignalDirection::Neutral => true,
            })
            .count();
        let confidence = if venues_total > 0 {
            venues_agreeing as f64 / venues_total as f64
        } else {
            0.0
        };

        let signal = TradingSignal {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            direction,
            strength,
            orderbook_imbalance: imbalance,
            volume_velocity: velocity,
            spread_tightness: tightness,
            distance_from_vwap,
            confidence,
            venues_agreeing,
            venues_total,
        };

        trace!(
            %symbol,
            direction = %signal.direction,
            strength = signal.strength,
            confidence = signal.confidence,
            "Signal generated"
        );

        self.record(signal.clone()).await;
        Some(signal)
    }

    /// Composite quality score in [0, 1] for ranking candidates.
    pub fn quality_score(&self, signal: &TradingSignal) -> f64 {
        let strength_score = (signal.strength / 5.0).min(1.0);
        let vwap_score = 1.0 - (signal.distance_from_vwap.abs() / 0.01).min(1.0);
        let spread_score = (signal.spread_tightness / 2.0).min(1.0);

        0.4 * strength_score + 0.3 * signal.confidence + 0.2 * vwap_score + 0.1 * spread_score
    }

    /// Greedily select the highest-quality signals whose pairwise
    /// correlation stays under the configured threshold, capped at the
    /// maximum concurrent position count. Quality-first ordering means a
    /// strong late signal displaces a weaker earlier one.
    pub fn filter_correlated(
        &self,
        signals: Vec<TradingSignal>,
        matrix: &CorrelationMatrix,
    ) -> Vec<TradingSignal> {
        if signals.len() <= 1 {
            return signals;
        }

        let mut ranked = signals;
        ranked.sort_by(|a, b| {
            self.quality_score(b)
                .partial_cmp(&self.quality_score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut selected: Vec<TradingSignal> = Vec::new();
        for signal in ranked {
            let correlated = selected.iter().any(|accepted| {
                matrix.get(&signal.symbol, &accepted.symbol).abs()
                    > self.config.correlation_threshold
            });
            if correlated {
                debug!(symbol = %signal.symbol, "Signal dropped: correlated with accepted set");
                continue;
            }

            selected.push(signal);
            if selected.len() >= self.config.max_concurrent_positions {
                break;
            }
        }
        selected
    }

    /// Recent signals for a symbol, newest last.
    pub async fn recent_signals(&self, symbol: &str) -> Vec<TradingSignal> {
        let history = self.history.read().await;
        history
            .get(symbol)
            .map(|signals| signals.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn record(&self, signal: TradingSignal) {
        let mut history = self.history.write().await;
        let series = history.entry(signal.symbol.clone()).or_default();
        series.push_back(signal);

        let cutoff = Utc::now() - Duration::seconds(HISTORY_WINDOW_SECS);
        while series.front().is_some_and(|s| s.timestamp < cutoff) {
            series.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::book::OrderBookSnapshot;
    use crate::venue::{BookLevel, BookLevels};
    use rust_decimal::Decimal;

    fn snapshot(venue: &str, symbol: &str, bid_vol: f64, ask_vol: f64) -> OrderBookSnapshot {
        OrderBookSnapshot::from_levels(
            venue,
            symbol,
            BookLevels {
                bids: vec![BookLevel::new(
                    Decimal::from(100),
                    Decimal::from_f64_retain(bid_vol).unwrap(),
                )],
                asks: vec![BookLevel::new(
                    Decimal::from(101),
                    Decimal::from_f64_retain(ask_vol).unwrap(),
                )],
            },
        )
        .unwrap()
    }

    fn engine_with(aggregator: Arc<OrderBookAggregator>) -> SignalEngine {
        SignalEngine::new(aggregator, Arc::new(VwapEstimator::new()), TradingConfig::default())
    }

    fn stub_signal(symbol: &str, strength: f64, confidence: f64) -> TradingSignal {
        TradingSignal {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            direction: SignalDirection::Long,
            strength,
            orderbook_imbalance: 2.0,
            volume_velocity: 2.0,
            spread_tightness: 1.0,
            distance_from_vwap: 0.0,
            confidence,
            venues_agreeing: 2,
            venues_total: 2,
        }
    }

    #[tokio::test]
    async fn test_generate_none_without_book() {
        let engine = engine_with(Arc::new(OrderBookAggregator::new(20)));
        assert!(engine.generate("BTC-USDT").await.is_none());
    }

    #[tokio::test]
    async fn test_strong_bid_imbalance_yields_long_with_full_confidence() {
        let aggregator = Arc::new(OrderBookAggregator::new(20));
        // Both venues report bid=100/ask=101 with 6:1 bid volume
        aggregator.update(snapshot("alpha", "BTC-USDT", 6.0, 1.0)).await;
        aggregator.update(snapshot("beta", "BTC-USDT", 6.0, 1.0)).await;

        let engine = engine_with(aggregator);
        let signal = engine.generate("BTC-USDT").await.unwrap();

        // imbalance 6.0 with neutral velocity/tightness clears the 2.5 gate
        assert_eq!(signal.direction, SignalDirection::Long);
        assert_eq!(signal.venues_total, 2);
        assert_eq!(signal.venues_agreeing, 2);
        assert!((signal.confidence - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_ask_heavy_book_yields_short() {
        let aggregator = Arc::new(OrderBookAggregator::new(20));
        aggregator.update(snapshot("alpha", "BTC-USDT", 1.0, 8.0)).await;

        let engine = SignalEngine::new(
            aggregator,
            Arc::new(VwapEstimator::new()),
            TradingConfig {
                // Low gate so a sub-1 imbalance product can still clear it
                signal_strength_threshold: 0.05,
                ..TradingConfig::default()
            },
        );
        let signal = engine.generate("BTC-USDT").await.unwrap();
        assert_eq!(signal.direction, SignalDirection::Short);
    }

    #[tokio::test]
    async fn test_weak_strength_is_neutral() {
        let aggregator = Arc::new(OrderBookAggregator::new(20));
        aggregator.update(snapshot("alpha", "BTC-USDT", 1.2, 1.0)).await;

        let engine = engine_with(aggregator);
        let signal = engine.generate("BTC-USDT").await.unwrap();
        assert_eq!(signal.direction, SignalDirection::Neutral);
        // Every venue counts as agreeing with a neutral read
        assert_eq!(signal.venues_agreeing, signal.venues_total);
    }

    #[tokio::test]
    async fn test_actionable_requires_all_gates() {
        let config = TradingConfig::default();
        let mut signal = stub_signal("BTC-USDT", 3.0, 1.0);
        assert!(signal.is_actionable(&config));

        signal.volume_velocity = 1.0; // Below the 1.5 velocity gate
        assert!(!signal.is_actionable(&config));

        signal.volume_velocity = 2.0;
        signal.distance_from_vwap = 0.02; // Too far from VWAP
        assert!(!signal.is_actionable(&config));
    }

    #[test]
    fn test_quality_score_caps_components() {
        let engine = engine_with(Arc::new(OrderBookAggregator::new(20)));
        let signal = stub_signal("BTC-USDT", 50.0, 1.0);
        // strength and tightness capped: 0.4 + 0.3 + 0.2 + 0.05
        let score = engine.quality_score(&signal);
        assert!((score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_filter_correlated_prefers_higher_quality() {
        let engine = engine_with(Arc::new(OrderBookAggregator::new(20)));
        let strong = stub_signal("BTC-USDT", 5.0, 1.0);
        let weak = stub_signal("WBTC-USDT", 2.0, 0.5);

        let mut matrix = CorrelationMatrix::identity();
        matrix.set("BTC-USDT", "WBTC-USDT", 0.95);

        // Weak arrives first but the stronger correlated signal wins
        let selected = engine.filter_correlated(vec![weak, strong], &matrix);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].symbol, "BTC-USDT");
    }

    #[test]
    fn test_filter_correlated_keeps_uncorrelated_pair() {
        let engine = engine_with(Arc::new(OrderBookAggregator::new(20)));
        let a = stub_signal("BTC-USDT", 5.0, 1.0);
        let b = stub_signal("DOGE-USDT", 3.0, 0.8);

        let mut matrix = CorrelationMatrix::identity();
        matrix.set("BTC-USDT", "DOGE-USDT", 0.2);

        let selected = engine.filter_correlated(vec![a, b], &matrix);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_filter_correlated_respects_position_cap() {
        let engine = SignalEngine::new(
            Arc::new(OrderBookAggregator::new(20)),
            Arc::new(VwapEstimator::new()),
            TradingConfig {
                max_concurrent_positions: 2,
                ..TradingConfig::default()
            },
        );

        let signals = vec![
            stub_signal("A-USDT", 5.0, 1.0),
            stub_signal("B-USDT", 4.0, 1.0),
            stub_signal("C-USDT", 3.0, 1.0),
        ];
        let selected = engine.filter_correlated(signals, &CorrelationMatrix::identity());
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].symbol, "A-USDT");
    }

    #[tokio::test]
    async fn test_history_records_generated_signals() {
        let aggregator = Arc::new(OrderBookAggregator::new(20));
        aggregator.update(snapshot("alpha", "BTC-USDT", 2.0, 1.0)).await;

        let engine = engine_with(aggregator);
        engine.generate("BTC-USDT").await.unwrap();
        engine.generate("BTC-USDT").await.unwrap();

        assert_eq!(engine.recent_signals("BTC-USDT").await.len(), 2);
    }
}
