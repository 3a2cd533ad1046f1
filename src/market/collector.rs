//! Supervised market data collection.
//!
//! One polling task per (venue, symbol) keeps the aggregator's snapshot
//! cache fresh, backing off on failures and reporting liveness. A
//! per-symbol indicator task derives VWAP observations and 1-minute bars
//! from the aggregated stream and feeds the ATR/ADX estimators.

use crate::config::MarketDataConfig;
use crate::indicators::{AdxEstimator, AtrEstimator};
use crate::market::bars::BarBuilder;
use crate::market::book::OrderBookSnapshot;
use crate::market::{OrderBookAggregator, VwapEstimator};
use crate::venue::VenueAdapter;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cadence of the per-symbol indicator task.
const INDICATOR_TICK: Duration = Duration::from_secs(1);
/// Backoff ceiling for failing venue polls.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Liveness record for one (venue, symbol) polling task.
#[derive(Debug, Clone, Default)]
pub struct VenueHealth {
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl VenueHealth {
    /// A feed is live when it has succeeded at least once and is not
    /// currently failing repeatedly.
    pub fn is_live(&self) -> bool {
        self.last_success.is_some() && self.consecutive_failures < 5
    }
}

/// Spawns and tracks the market data pipeline tasks.
pub struct MarketDataCollector {
    adapters: Vec<Arc<dyn VenueAdapter>>,
    aggregator: Arc<OrderBookAggregator>,
    vwap: Arc<VwapEstimator>,
    atr: Arc<AtrEstimator>,
    adx: Arc<AdxEstimator>,
    config: MarketDataConfig,
    health: Arc<RwLock<HashMap<String, VenueHealth>>>,
}

impl MarketDataCollector {
    pub fn new(
        adapters: Vec<Arc<dyn VenueAdapter>>,
        aggregator: Arc<OrderBookAggregator>,
        vwap: Arc<VwapEstimator>,
        atr: Arc<AtrEstimator>,
        adx: Arc<AdxEstimator>,
        config: MarketDataConfig,
    ) -> Self {
        Self {
            adapters,
            aggregator,
            vwap,
            atr,
            adx,
            config,
            health: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Spawn all polling and indicator tasks. Tasks run until `shutdown`
    /// flips; the returned handles let the engine await their exit.
    pub fn spawn(&self, symbols: &[String], shutdown: Arc<AtomicBool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for symbol in symbols {
            for adapter in &self.adapters {
                handles.push(self.spawn_poll_task(
                    adapter.clone(),
                    symbol.clone(),
                    shutdown.clone(),
                ));
            }
            handles.push(self.spawn_indicator_task(symbol.clone(), shutdown.clone()));
        }

        info!(
            tasks = handles.len(),
            venues = self.adapters.len(),
            symbols = symbols.len(),
            "Market data collection started"
        );
        handles
    }

    /// Snapshot of per-feed liveness, keyed `venue:symbol`.
    pub async fn health(&self) -> HashMap<String, VenueHealth> {
        self.health.read().await.clone()
    }

    /// Shared handle to the liveness registry for long-lived monitoring
    /// tasks.
    pub fn health_handle(&self) -> Arc<RwLock<HashMap<String, VenueHealth>>> {
        self.health.clone()
    }

    fn spawn_poll_task(
        &self,
        adapter: Arc<dyn VenueAdapter>,
        symbol: String,
        shutdown: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let aggregator = self.aggregator.clone();
        let health = self.health.clone();
        let depth = self.config.orderbook_depth;
        let poll_interval = Duration::from_millis(self.config.update_frequency_ms);

        tokio::spawn(async move {
            let venue = adapter.name().to_string();
            let key = format!("{}:{}", venue, symbol);
            let mut backoff = poll_interval;

            while !shutdown.load(Ordering::SeqCst) {
                match adapter.fetch_order_book(&symbol, depth).await {
                    Ok(levels) => {
                        match OrderBookSnapshot::from_levels(venue.clone(), symbol.clone(), levels)
                        {
                            Some(snapshot) => {
                                aggregator.update(snapshot).await;
                                let mut map = health.write().await;
                                let entry = map.entry(key.clone()).or_default();
                                entry.last_success = Some(Utc::now());
                                entry.consecutive_failures = 0;
                                backoff = poll_interval;
                            }
                            None => {
                                debug!(%venue, %symbol, "One-sided book ignored");
                                Self::mark_failure(&health, &key).await;
                            }
                        }
                        tokio::time::sleep(poll_interval).await;
                    }
                    Err(e) => {
                        warn!(%venue, %symbol, error = %e, "Book fetch failed, backing off");
                        Self::mark_failure(&health, &key).await;
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
            debug!(%venue, %symbol, "Poll task stopped");
        })
    }

    fn spawn_indicator_task(&self, symbol: String, shutdown: Arc<AtomicBool>) -> JoinHandle<()> {
        let aggregator = self.aggregator.clone();
        let vwap = self.vwap.clone();
        let atr = self.atr.clone();
        let adx = self.adx.clone();

        tokio::spawn(async move {
            let mut bars = BarBuilder::minutely();

            while !shutdown.load(Ordering::SeqCst) {
                if let Some(book) = aggregator.aggregate(&symbol).await {
                    let mid = book.weighted_mid().to_f64().unwrap_or_default();
                    let volume = (book.bid_volume + book.ask_volume)
                        .to_f64()
                        .unwrap_or_default();
                    if mid > 0.0 {
                        vwap.record(&symbol, mid, volume).await;
                        if let Some(bar) = bars.update(Utc::now(), mid) {
                            atr.update(&symbol, bar.high, bar.low, bar.close).await;
                            adx.update(&symbol, bar.high, bar.low, bar.close).await;
                        }
                    }
                }
                tokio::time::sleep(INDICATOR_TICK).await;
            }
            debug!(%symbol, "Indicator task stopped");
        })
    }

    async fn mark_failure(health: &Arc<RwLock<HashMap<String, VenueHealth>>>, key: &str) {
        let mut map = health.write().await;
        map.entry(key.to_string()).or_default().consecutive_failures += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::{BookLevel, BookLevels, MockVenueAdapter};
    use rust_decimal_macros::dec;

    fn collector_with(
        venue: Arc<MockVenueAdapter>,
        aggregator: Arc<OrderBookAggregator>,
    ) -> MarketDataCollector {
        let config = MarketDataConfig {
            orderbook_depth: 10,
            update_frequency_ms: 10,
            primary_venues: vec!["alpha".to_string()],
            secondary_venues: vec![],
        };
        MarketDataCollector::new(
            vec![venue],
            aggregator,
            Arc::new(VwapEstimator::new()),
            Arc::new(AtrEstimator::new(14, 30)),
            Arc::new(AdxEstimator::new(14)),
            config,
        )
    }

    fn book() -> BookLevels {
        BookLevels {
            bids: vec![BookLevel::new(dec!(100), dec!(2))],
            asks: vec![BookLevel::new(dec!(101), dec!(2))],
        }
    }

    #[tokio::test]
    async fn test_poll_task_populates_aggregator() {
        let venue = Arc::new(MockVenueAdapter::new("alpha"));
        venue.set_book("BTC-USDT", book()).await;

        let aggregator = Arc::new(OrderBookAggregator::new(10));
        let collector = collector_with(venue, aggregator.clone());

        let shutdown = Arc::new(AtomicBool::new(false));
        let handles = collector.spawn(&["BTC-USDT".to_string()], shutdown.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.store(true, Ordering::SeqCst);
        for handle in handles {
            handle.await.unwrap();
        }

        let aggregated = aggregator.aggregate("BTC-USDT").await.unwrap();
        assert_eq!(aggregated.mid_price, dec!(100.5));

        let health = collector.health().await;
        let feed = health.get("alpha:BTC-USDT").unwrap();
        assert!(feed.is_live());
    }

    #[tokio::test]
    async fn test_failing_venue_marked_unhealthy() {
        let venue = Arc::new(MockVenueAdapter::new("alpha"));
        venue.set_book("BTC-USDT", book()).await;
        venue.fail_books(true);

        let aggregator = Arc::new(OrderBookAggregator::new(10));
        let collector = collector_with(venue, aggregator.clone());

        let shutdown = Arc::new(AtomicBool::new(false));
        let handles = collector.spawn(&["BTC-USDT".to_string()], shutdown.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.store(true, Ordering::SeqCst);
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(aggregator.aggregate("BTC-USDT").await.is_none());
        let health = collector.health().await;
        let feed = health.get("alpha:BTC-USDT").unwrap();
        assert!(feed.consecutive_failures > 0);
        assert!(feed.last_success.is_none());
    }
}
