//! The trading engine: wires the pipeline together and runs the decision
//! and monitoring loops.
//!
//! Steady-state failures inside a cycle (missing books, rejected sizing,
//! failed legs) degrade to a skipped symbol, never a crash. Shutdown
//! cancels outstanding orders, flattens every open position, and prints a
//! final report.

use crate::config::Config;
use crate::execution::{ExecutionEngine, ExecutionResult};
use crate::indicators::{AdxEstimator, AtrEstimator, RegimeDetector};
use crate::market::{MarketDataCollector, OrderBookAggregator, VwapEstimator};
use crate::persistence::TradeStore;
use crate::portfolio::{CorrelationMatrix, PortfolioMonitor};
use crate::risk::{RiskManager, RiskParameters};
use crate::signal::{SignalDirection, SignalEngine, TradingSignal};
use crate::venue::VenueAdapter;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Urgency used when flattening a position.
const EXIT_URGENCY: f64 = 2.0;

/// Top-level engine owning every pipeline component.
pub struct TradingEngine {
    config: Config,
    aggregator: Arc<OrderBookAggregator>,
    collector: MarketDataCollector,
    signals: Arc<SignalEngine>,
    risk: Arc<RiskManager>,
    execution: Arc<ExecutionEngine>,
    portfolio: Arc<PortfolioMonitor>,
    store: Option<Arc<TradeStore>>,
    atr: Arc<AtrEstimator>,
    shutdown: Arc<AtomicBool>,
    last_signal_time: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl TradingEngine {
    /// Assemble the engine. When a trade store is supplied, its history is
    /// replayed so capital and drawdown survive restarts.
    pub async fn new(
        config: Config,
        adapters: Vec<Arc<dyn VenueAdapter>>,
        store: Option<Arc<TradeStore>>,
    ) -> anyhow::Result<Self> {
        let aggregator = Arc::new(OrderBookAggregator::new(config.market_data.orderbook_depth));
        let vwap = Arc::new(VwapEstimator::new());
        let atr = Arc::new(AtrEstimator::new(
            config.trading.atr_period,
            config.trading.volatility_lookback,
        ));
        let adx = Arc::new(AdxEstimator::new(config.trading.atr_period));
        let regime = Arc::new(RegimeDetector::new(
            atr.clone(),
            adx.clone(),
            config.trading.trending_adx_threshold,
            config.trading.ranging_adx_threshold,
            config.trading.high_volatility_atr_multiple,
        ));

        let portfolio = Arc::new(PortfolioMonitor::new(config.engine.initial_capital));
        let mut capital = config.engine.initial_capital;
        if let Some(store) = &store {
            let trades = store.load_trades()?;
            if !trades.is_empty() {
                portfolio.restore(trades).await;
                capital = portfolio.current_capital().await;
                info!(%capital, "State restored from trade log");
            }
        }

        let risk = Arc::new(RiskManager::new(
            config.trading.clone(),
            atr.clone(),
            regime,
            capital,
        ));
        let signals = Arc::new(SignalEngine::new(
            aggregator.clone(),
            vwap.clone(),
            config.trading.clone(),
        ));
        let execution = Arc::new(ExecutionEngine::new(
            adapters.clone(),
            config.execution.clone(),
            config.market_data.clone(),
        ));
        let collector = MarketDataCollector::new(
            adapters,
            aggregator.clone(),
            vwap,
            atr.clone(),
            adx,
            config.market_data.clone(),
        );

        Ok(Self {
            config,
            aggregator,
            collector,
            signals,
            risk,
            execution,
            portfolio,
            store,
            atr,
            shutdown: Arc::new(AtomicBool::new(false)),
            last_signal_time: Mutex::new(HashMap::new()),
        })
    }

    /// Flag used by the signal handler to stop the engine.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run until the shutdown flag flips, then unwind cleanly.
    pub async fn run(&self) -> anyhow::Result<()> {
        let symbols = self.config.engine.symbols.clone();
        let collector_handles = self.collector.spawn(&symbols, self.shutdown.clone());

        let monitor_handle = self.spawn_monitoring_loop();

        info!(symbols = ?symbols, "Trading loop started");
        let tick = Duration::from_millis(self.config.engine.tick_interval_ms);
        while !self.shutdown.load(Ordering::SeqCst) {
            self.run_decision_cycle().await;
            tokio::time::sleep(tick).await;
        }

        info!("Shutdown requested, unwinding");
        self.shutdown_sequence().await;

        for handle in collector_handles {
            let _ = handle.await;
        }
        let _ = monitor_handle.await;
        Ok(())
    }

    /// One pass of the decision loop: stop checks, then signal generation,
    /// correlation filtering, sizing, and execution.
    pub async fn run_decision_cycle(&self) {
        let prices = self.current_prices().await;

        // Close positions whose stop or target has been crossed
        for hit in self.risk.check_stops(&prices).await {
            self.close_position(&hit.symbol).await;
        }

        // Feed the correlation tracker from the same aggregated stream
        for (symbol, price) in &prices {
            if let Some(price) = price.to_f64() {
                self.portfolio.record_price(symbol, price).await;
            }
        }

        let mut candidates: Vec<TradingSignal> = Vec::new();
        {
            let min_interval =
                ChronoDuration::seconds(self.config.engine.min_signal_interval_secs as i64);
            let last_times = self.last_signal_time.lock().await;
            for symbol in &self.config.engine.symbols {
                if let Some(last) = last_times.get(symbol) {
                    if Utc::now() - *last < min_interval {
                        continue;
                    }
                }
                let Some(signal) = self.signals.generate(symbol).await else {
                    continue;
                };
                if signal.direction != SignalDirection::Neutral
                    && signal.is_actionable(&self.config.trading)
                {
                    candidates.push(signal);
                }
            }
        }

        if candidates.is_empty() {
            return;
        }

        let symbols: Vec<String> = candidates.iter().map(|s| s.symbol.clone()).collect();
        let matrix = self.portfolio.correlation_matrix(&symbols).await;
        let selected = self.signals.filter_correlated(candidates, &matrix);

        for signal in selected {
            self.process_signal(signal, &matrix).await;
        }
    }

    async fn process_signal(&self, signal: TradingSignal, matrix: &CorrelationMatrix) {
        let Some(book) = self.aggregator.aggregate(&signal.symbol).await else {
            return;
        };
        let current_price = book.mid_price;

        let Some(params) = self.risk.size_position(&signal, current_price, matrix).await else {
            return;
        };

        // Stronger signals execute more aggressively
        let urgency = signal.strength / 3.0;
        let Some(result) = self
            .execution
            .execute(&signal.symbol, signal.direction, params.position_size, urgency)
            .await
        else {
            debug!(symbol = %signal.symbol, "Execution unavailable this cycle");
            return;
        };
        self.log_orders(&result);

        if !result.success {
            warn!(
                symbol = %signal.symbol,
                requested = %params.position_size,
                "No fills for signal"
            );
            return;
        }

        // Open with what actually filled, attributed to the largest leg
        let venue = result
            .venue_fills
            .iter()
            .max_by_key(|(_, filled)| **filled)
            .map(|(venue, _)| venue.clone())
            .unwrap_or_default();
        let filled_params = RiskParameters {
            position_size: result.total_filled,
            ..params
        };

        match self
            .risk
            .open(&signal, &filled_params, result.average_price, &venue)
            .await
        {
            Ok(_) => {
                self.last_signal_time
                    .lock()
                    .await
                    .insert(signal.symbol.clone(), Utc::now());
                info!(
                    symbol = %signal.symbol,
                    direction = %signal.direction,
                    fill = %result.average_price,
                    slippage = result.total_slippage,
                    "Signal executed"
                );
            }
            Err(e) => {
                // Lost the race against another open; flatten the fill
                error!(symbol = %signal.symbol, error = %e, "Open rejected after fill, unwinding");
                let unwind = match signal.direction {
                    SignalDirection::Long => SignalDirection::Short,
                    _ => SignalDirection::Long,
                };
                if let Some(result) = self
                    .execution
                    .execute(&signal.symbol, unwind, result.total_filled, EXIT_URGENCY)
                    .await
                {
                    self.log_orders(&result);
                }
            }
        }
    }

    /// Close an open position at the best achievable price.
    async fn close_position(&self, symbol: &str) {
        let Some(position) = self.risk.position(symbol).await else {
            return;
        };

        let close_direction = match position.direction {
            SignalDirection::Long => SignalDirection::Short,
            _ => SignalDirection::Long,
        };

        let execution = self
            .execution
            .execute(symbol, close_direction, position.size, EXIT_URGENCY)
            .await;

        let exit_price = match &execution {
            Some(result) if result.success => {
                self.log_orders(result);
                result.average_price
            }
            _ => {
                // No fill; mark out at the aggregated mid as a fallback
                warn!(%symbol, "Exit execution unavailable, marking at mid");
                self.aggregator
                    .mid_price(symbol)
                    .await
                    .unwrap_or(position.entry_price)
            }
        };

        match self.risk.close(symbol, exit_price).await {
            Ok(_) => {
                let record = self
                    .portfolio
                    .record_trade(
                        symbol,
                        position.direction,
                        position.entry_price,
                        exit_price,
                        position.size,
                        &position.venue,
                        position.entry_time,
                        Utc::now(),
                    )
                    .await;
                if let Some(store) = &self.store {
                    if let Err(e) = store.record_trade(&record) {
                        error!(error = %e, "Failed to persist trade");
                    }
                }
            }
            Err(e) => warn!(%symbol, error = %e, "Close skipped: {}", e),
        }
    }

    fn spawn_monitoring_loop(&self) -> tokio::task::JoinHandle<()> {
        let risk = self.risk.clone();
        let portfolio = self.portfolio.clone();
        let shutdown = self.shutdown.clone();
        let interval = Duration::from_secs(self.config.engine.report_interval_secs);
        let health = self.collector.health_handle();
        let atr = self.atr.clone();
        let aggregator = self.aggregator.clone();
        let symbols = self.config.engine.symbols.clone();

        tokio::spawn(async move {
            let mut elapsed = Duration::ZERO;
            let step = Duration::from_secs(1);
            while !shutdown.load(Ordering::SeqCst) {
                tokio::time::sleep(step).await;
                elapsed += step;
                if elapsed < interval {
                    continue;
                }
                elapsed = Duration::ZERO;

                let stats = risk.stats().await;
                let metrics = portfolio.performance_metrics().await;
                let feeds = health.read().await.clone();
                let live_feeds = feeds.values().filter(|h| h.is_live()).count();
                let mut warmed_symbols = 0;
                let mut prices = HashMap::new();
                for symbol in &symbols {
                    if atr.atr(symbol).await.is_some() {
                        warmed_symbols += 1;
                    }
                    if let Some(mid) = aggregator.mid_price(symbol).await {
                        prices.insert(symbol.clone(), mid);
                    }
                }
                let positions = risk.positions().await;
                let position_health = portfolio.position_health(&positions, &prices).await;

                info!(
                    capital = %stats.capital,
                    open_positions = stats.open_positions,
                    realized_pnl = %stats.realized_pnl,
                    drawdown = %stats.current_drawdown,
                    sharpe = metrics.sharpe_ratio,
                    total_trades = metrics.total_trades,
                    live_feeds,
                    total_feeds = feeds.len(),
                    warmed_symbols,
                    healthy_positions = position_health.healthy_positions,
                    at_risk_positions = position_health.at_risk_positions,
                    correlation_risk = ?position_health.correlation_risk,
                    concentration_risk = ?position_health.concentration_risk,
                    "Status report"
                );
            }
        })
    }

    /// Cancel everything, flatten every position, and report.
    async fn shutdown_sequence(&self) {
        let cancelled = self.execution.cancel_all(None).await;
        info!(cancelled, "Outstanding orders cancelled");

        for position in self.risk.positions().await {
            self.close_position(&position.symbol).await;
        }

        let report = self.portfolio.report().await;
        info!("Final report:\n{}", report);
    }

    async fn current_prices(&self) -> HashMap<String, Decimal> {
        let mut prices = HashMap::new();
        for symbol in &self.config.engine.symbols {
            if let Some(mid) = self.aggregator.mid_price(symbol).await {
                prices.insert(symbol.clone(), mid);
            }
        }
        prices
    }

    fn log_orders(&self, result: &ExecutionResult) {
        let Some(store) = &self.store else {
            return;
        };
        for order in &result.orders {
            if let Err(e) = store.record_order(order) {
                error!(error = %e, "Failed to persist order");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::book::OrderBookSnapshot;
    use crate::venue::{BookLevel, BookLevels, MockVenueAdapter};
    use rust_decimal_macros::dec;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.engine.symbols = vec!["BTC-USDT".to_string()];
        // Rate limit high enough that each test controls signal timing
        config.engine.min_signal_interval_secs = 3600;
        config.trading.atr_period = 2;
        // Steady books have unit velocity; relax the gate for tests
        config.trading.volume_velocity_threshold = 0.5;
        config.market_data.primary_venues = vec!["alpha".to_string(), "beta".to_string()];
        config
    }

    fn bid_heavy_book(bid: Decimal, ask: Decimal) -> BookLevels {
        BookLevels {
            bids: vec![BookLevel::new(bid, dec!(6))],
            asks: vec![BookLevel::new(ask, dec!(1))],
        }
    }

    fn snapshot(venue: &str, bid: Decimal, ask: Decimal) -> OrderBookSnapshot {
        OrderBookSnapshot::from_levels(venue, "BTC-USDT", bid_heavy_book(bid, ask)).unwrap()
    }

    async fn warmed_engine(
        store: Option<Arc<TradeStore>>,
    ) -> (Arc<MockVenueAdapter>, Arc<MockVenueAdapter>, TradingEngine) {
        let alpha = Arc::new(MockVenueAdapter::new("alpha"));
        let beta = Arc::new(MockVenueAdapter::new("beta"));
        alpha
            .set_book("BTC-USDT", bid_heavy_book(dec!(100), dec!(101)))
            .await;
        beta.set_book("BTC-USDT", bid_heavy_book(dec!(100), dec!(101)))
            .await;

        let engine = TradingEngine::new(
            test_config(),
            vec![alpha.clone(), beta.clone()],
            store,
        )
        .await
        .unwrap();

        // Warm the ATR (period 2, constant true range 2.0)
        for _ in 0..4 {
            engine.atr.update("BTC-USDT", 102.0, 100.0, 101.0).await;
        }
        engine
            .aggregator
            .update(snapshot("alpha", dec!(100), dec!(101)))
            .await;
        engine
            .aggregator
            .update(snapshot("beta", dec!(100), dec!(101)))
            .await;

        (alpha, beta, engine)
    }

    #[tokio::test]
    async fn test_cycle_without_data_does_nothing() {
        let alpha = Arc::new(MockVenueAdapter::new("alpha"));
        let engine = TradingEngine::new(test_config(), vec![alpha], None)
            .await
            .unwrap();

        engine.run_decision_cycle().await;
        assert!(engine.risk.position("BTC-USDT").await.is_none());
    }

    #[tokio::test]
    async fn test_signal_to_position_to_stop_out() {
        let store = Arc::new(TradeStore::open_in_memory().unwrap());
        let (alpha, beta, engine) = warmed_engine(Some(store.clone())).await;

        // Cycle 1: bid-heavy books on both venues open a long
        engine.run_decision_cycle().await;
        let position = engine.risk.position("BTC-USDT").await.expect("position opened");
        assert_eq!(position.direction, SignalDirection::Long);
        assert!(position.size > Decimal::ZERO);
        assert!(store.order_count().unwrap() >= 1);

        // Market gaps below the stop
        alpha
            .set_book("BTC-USDT", bid_heavy_book(dec!(94), dec!(95)))
            .await;
        beta.set_book("BTC-USDT", bid_heavy_book(dec!(94), dec!(95)))
            .await;
        engine
            .aggregator
            .update(snapshot("alpha", dec!(94), dec!(95)))
            .await;
        engine
            .aggregator
            .update(snapshot("beta", dec!(94), dec!(95)))
            .await;

        // Cycle 2: stop scan flattens the position and records the trade
        engine.run_decision_cycle().await;
        assert!(engine.risk.position("BTC-USDT").await.is_none());

        let metrics = engine.portfolio.performance_metrics().await;
        assert_eq!(metrics.total_trades, 1);
        assert!(engine.risk.stats().await.realized_pnl < Decimal::ZERO);

        // Persisted trade is loadable for restart
        let persisted = store.load_trades().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].symbol, "BTC-USDT");
    }

    #[tokio::test]
    async fn test_rate_limit_blocks_immediate_reentry() {
        let (_, _, engine) = warmed_engine(None).await;

        engine.run_decision_cycle().await;
        assert!(engine.risk.position("BTC-USDT").await.is_some());
        let first_entry = engine.risk.position("BTC-USDT").await.unwrap().entry_time;

        // Books unchanged and still actionable, but the symbol was signalled
        // moments ago, so the next cycle must not touch the position
        engine.run_decision_cycle().await;
        let position = engine.risk.position("BTC-USDT").await.unwrap();
        assert_eq!(position.entry_time, first_entry);
    }

    #[tokio::test]
    async fn test_shutdown_flattens_positions() {
        let (_, _, engine) = warmed_engine(None).await;

        engine.run_decision_cycle().await;
        assert!(engine.risk.position("BTC-USDT").await.is_some());

        engine.shutdown_sequence().await;
        assert!(engine.risk.position("BTC-USDT").await.is_none());
        assert_eq!(engine.portfolio.performance_metrics().await.total_trades, 1);
    }

    #[tokio::test]
    async fn test_restart_restores_capital_from_store() {
        let store = Arc::new(TradeStore::open_in_memory().unwrap());
        let (alpha, beta, engine) = warmed_engine(Some(store.clone())).await;

        engine.run_decision_cycle().await;
        alpha
            .set_book("BTC-USDT", bid_heavy_book(dec!(94), dec!(95)))
            .await;
        beta.set_book("BTC-USDT", bid_heavy_book(dec!(94), dec!(95)))
            .await;
        engine
            .aggregator
            .update(snapshot("alpha", dec!(94), dec!(95)))
            .await;
        engine.run_decision_cycle().await;
        let capital_after = engine.risk.stats().await.capital;
        assert!(capital_after < test_config().engine.initial_capital);

        // A fresh engine over the same store resumes from realized history
        let gamma = Arc::new(MockVenueAdapter::new("alpha"));
        let restarted = TradingEngine::new(test_config(), vec![gamma], Some(store))
            .await
            .unwrap();
        assert_eq!(restarted.risk.stats().await.capital, capital_after);
        assert_eq!(
            restarted.portfolio.performance_metrics().await.total_trades,
            1
        );
    }
}
