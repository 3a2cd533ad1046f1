//! Smart multi-venue order execution.
//!
//! Discovers the best quote across venues in parallel, prices a single
//! limit order off urgency, splits quantity across the configured venue
//! tiers, and fires one leg per venue concurrently. Individual leg
//! failures are tolerated; the result aggregates whatever filled.

use crate::config::{ExecutionConfig, MarketDataConfig};
use crate::signal::SignalDirection;
use crate::utils::decimal::weighted_average;
use crate::venue::{
    OrderSide, OrderStatus, OrderType, VenueAdapter, VenueOrderAck, VenueOrderRequest,
};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Quantity precision for venue allocations.
const ALLOCATION_DP: u32 = 8;

/// One venue leg of a logical execution request.
#[derive(Debug, Clone)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub direction: SignalDirection,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub venue: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub filled_quantity: Decimal,
    pub average_fill_price: Decimal,
}

/// Aggregate of all legs from one execution request.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub orders: Vec<Order>,
    pub total_filled: Decimal,
    pub average_price: Decimal,
    pub total_slippage: f64,
    pub execution_time_ms: u64,
    pub venue_fills: HashMap<String, Decimal>,
}

/// Best bid/ask found across responding venues.
#[derive(Debug, Clone, Copy)]
pub struct BestQuote {
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Routes orders across venues and aggregates fills.
pub struct ExecutionEngine {
    adapters: HashMap<String, Arc<dyn VenueAdapter>>,
    config: ExecutionConfig,
    market_config: MarketDataConfig,
    /// Append-only log of every leg placed
    order_log: RwLock<Vec<Order>>,
}

impl ExecutionEngine {
    pub fn new(
        adapters: Vec<Arc<dyn VenueAdapter>>,
        config: ExecutionConfig,
        market_config: MarketDataConfig,
    ) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|a| (a.name().to_string(), a))
            .collect();
        Self {
            adapters,
            config,
            market_config,
            order_log: RwLock::new(Vec::new()),
        }
    }

    /// Execute a directional order across venues. `None` when no venue
    /// produced a usable quote — the caller skips the symbol this cycle.
    pub async fn execute(
        &self,
        symbol: &str,
        direction: SignalDirection,
        quantity: Decimal,
        urgency: f64,
    ) -> Option<ExecutionResult> {
        if direction == SignalDirection::Neutral || quantity <= Decimal::ZERO {
            return None;
        }
        let start = Instant::now();

        let quote = self.best_quote(symbol).await?;
        let limit_price = self.limit_price(&quote, direction, urgency);
        let allocations = self.venue_split(quantity);
        if allocations.is_empty() {
            warn!(%symbol, "No venues available for allocation");
            return None;
        }

        let order_type = if self.config.use_ioc_orders {
            OrderType::Ioc
        } else {
            OrderType::Limit
        };
        let leg_timeout = Duration::from_secs(self.config.order_timeout_secs);

        let legs = allocations.iter().map(|(venue_name, allocation)| {
            let adapter = self.adapters.get(venue_name).cloned();
            let request = VenueOrderRequest {
                symbol: symbol.to_string(),
                side: match direction {
                    SignalDirection::Long => OrderSide::Buy,
                    _ => OrderSide::Sell,
                },
                order_type,
                quantity: *allocation,
                price: Some(limit_price),
                time_in_force: None,
                client_order_id: None,
            };
            let venue_name = venue_name.clone();
            async move {
                let adapter = adapter?;
                match tokio::time::timeout(leg_timeout, adapter.place_order(&request)).await {
                    Ok(Ok(ack)) => Some((venue_name, request, ack)),
                    Ok(Err(e)) => {
                        warn!(venue = %venue_name, error = %e, "Order leg failed");
                        None
                    }
                    Err(_) => {
                        warn!(venue = %venue_name, "Order leg timed out");
                        None
                    }
                }
            }
        });

        let mut orders = Vec::new();
        for leg in join_all(legs).await.into_iter().flatten() {
            let (venue_name, request, ack) = leg;
            orders.push(self.leg_to_order(venue_name, &request, direction, ack));
        }

        let total_filled: Decimal = orders.iter().map(|o| o.filled_quantity).sum();
        let venue_fills: HashMap<String, Decimal> = orders
            .iter()
            .filter(|o| o.filled_quantity > Decimal::ZERO)
            .map(|o| (o.venue.clone(), o.filled_quantity))
            .collect();

        let reference_price = match direction {
            SignalDirection::Long => quote.ask,
            _ => quote.bid,
        };

        let (average_price, total_slippage) = if total_filled > Decimal::ZERO {
            let fills: Vec<(Decimal, Decimal)> = orders
                .iter()
                .filter(|o| o.filled_quantity > Decimal::ZERO)
                .map(|o| (o.average_fill_price, o.filled_quantity))
                .collect();
            let avg = weighted_average(&fills);
            let slippage = ((avg - reference_price) / reference_price)
                .abs()
                .to_f64()
                .unwrap_or(0.0);
            (avg, slippage)
        } else {
            (Decimal::ZERO, 0.0)
        };

        self.order_log.write().await.extend(orders.iter().cloned());

        let result = ExecutionResult {
            success: total_filled > Decimal::ZERO,
            orders,
            total_filled,
            average_price,
            total_slippage,
            execution_time_ms: start.elapsed().as_millis() as u64,
            venue_fills,
        };

        info!(
            %symbol,
            direction = %direction,
            requested = %quantity,
            filled = %result.total_filled,
            avg_price = %result.average_price,
            slippage = result.total_slippage,
            time_ms = result.execution_time_ms,
            "Execution complete"
        );

        Some(result)
    }

    /// Best bid/ask across all venues, fetched concurrently with a
    /// per-venue timeout. Venues that error or time out are excluded.
    pub async fn best_quote(&self, symbol: &str) -> Option<BestQuote> {
        let timeout = Duration::from_millis(self.config.quote_timeout_ms);
        let fetches = self.adapters.values().map(|adapter| {
            let adapter = adapter.clone();
            async move {
                match tokio::time::timeout(timeout, adapter.fetch_ticker(symbol)).await {
                    Ok(Ok(ticker)) => Some(ticker),
                    Ok(Err(e)) => {
                        debug!(venue = adapter.name(), error = %e, "Ticker fetch failed");
                        None
                    }
                    Err(_) => {
                        debug!(venue = adapter.name(), "Ticker fetch timed out");
                        None
                    }
                }
            }
        });

        let mut best_bid: Option<Decimal> = None;
        let mut best_ask: Option<Decimal> = None;
        for ticker in join_all(fetches).await.into_iter().flatten() {
            if ticker.bid > Decimal::ZERO {
                best_bid = Some(best_bid.map_or(ticker.bid, |b| b.max(ticker.bid)));
            }
            if ticker.ask > Decimal::ZERO {
                best_ask = Some(best_ask.map_or(ticker.ask, |a| a.min(ticker.ask)));
            }
        }

        Some(BestQuote {
            bid: best_bid?,
            ask: best_ask?,
        })
    }

    /// Single limit price for every leg. High urgency crosses the spread
    /// by 0.2%; otherwise the order rests 0.05% inside it.
    fn limit_price(&self, quote: &BestQuote, direction: SignalDirection, urgency: f64) -> Decimal {
        let aggressive = urgency > 1.5;
        let price = match (direction, aggressive) {
            (SignalDirection::Long, true) => quote.ask * dec!(1.002),
            (SignalDirection::Long, false) => quote.ask * dec!(0.9995),
            (_, true) => quote.bid * dec!(0.998),
            (_, false) => quote.bid * dec!(1.0005),
        };
        price.round_dp(ALLOCATION_DP)
    }

    /// Split quantity across configured venues. Primary venues share the
    /// primary fraction equally, then secondary venues the secondary
    /// fraction, capped at the remainder. The lit fractions are
    /// renormalized over their sum so the split covers the whole request
    /// while the dark-pool fraction stays reserved; any rounding residue
    /// lands on the first venue.
    pub fn venue_split(&self, quantity: Decimal) -> Vec<(String, Decimal)> {
        let primaries: Vec<&String> = self
            .market_config
            .primary_venues
            .iter()
            .filter(|v| self.adapters.contains_key(*v))
            .collect();
        let secondaries: Vec<&String> = self
            .market_config
            .secondary_venues
            .iter()
            .filter(|v| self.adapters.contains_key(*v))
            .collect();

        let primary_fraction = if primaries.is_empty() {
            Decimal::ZERO
        } else {
            self.config.primary_venue_allocation
        };
        let secondary_fraction = if secondaries.is_empty() {
            Decimal::ZERO
        } else {
            self.config.secondary_venue_allocation
        };
        let lit_total = primary_fraction + secondary_fraction;
        if lit_total <= Decimal::ZERO {
            return Vec::new();
        }

        let mut allocations: Vec<(String, Decimal)> = Vec::new();
        let mut allocated = Decimal::ZERO;

        for venue in &primaries {
            let share = (quantity * primary_fraction
                / lit_total
                / Decimal::from(primaries.len()))
            .round_dp(ALLOCATION_DP);
            allocated += share;
            allocations.push(((*venue).clone(), share));
        }
        for venue in &secondaries {
            let share = (quantity * secondary_fraction
                / lit_total
                / Decimal::from(secondaries.len()))
            .round_dp(ALLOCATION_DP)
            .min(quantity - allocated);
            allocated += share;
            allocations.push(((*venue).clone(), share));
        }

        // Pin rounding residue on the first venue so the split sums exactly
        let residue = quantity - allocated;
        if let Some(first) = allocations.first_mut() {
            first.1 += residue;
        }

        allocations.retain(|(_, share)| *share > Decimal::ZERO);
        allocations
    }

    /// Concurrently cancel open orders on every venue, optionally limited
    /// to one symbol. Per-venue failures are logged and skipped. Returns
    /// the number of orders cancelled.
    pub async fn cancel_all(&self, symbol: Option<&str>) -> usize {
        let cancels = self.adapters.values().map(|adapter| {
            let adapter = adapter.clone();
            let symbol = symbol.map(str::to_string);
            async move {
                let open = match adapter.fetch_open_orders(symbol.as_deref()).await {
                    Ok(orders) => orders,
                    Err(e) => {
                        warn!(venue = adapter.name(), error = %e, "Open order fetch failed");
                        return 0usize;
                    }
                };

                let mut cancelled = 0;
                for order in open {
                    match adapter.cancel_order(&order.order_id, &order.symbol).await {
                        Ok(()) => cancelled += 1,
                        Err(e) => {
                            warn!(
                                venue = adapter.name(),
                                order_id = %order.order_id,
                                error = %e,
                                "Cancel failed"
                            );
                        }
                    }
                }
                cancelled
            }
        });

        let total: usize = join_all(cancels).await.into_iter().sum();
        if total > 0 {
            info!(cancelled = total, "Open orders cancelled");
        }
        total
    }

    /// Copy of the append-only order log.
    pub async fn order_history(&self) -> Vec<Order> {
        self.order_log.read().await.clone()
    }

    fn leg_to_order(
        &self,
        venue: String,
        request: &VenueOrderRequest,
        direction: SignalDirection,
        ack: VenueOrderAck,
    ) -> Order {
        Order {
            order_id: ack.order_id,
            symbol: request.symbol.clone(),
            direction,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            venue,
            status: ack.status,
            created_at: Utc::now(),
            filled_quantity: ack.filled_quantity,
            average_fill_price: ack.average_fill_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::{BookLevel, BookLevels, MockVenueAdapter, OpenOrder, Ticker};

    fn book(bid: Decimal, ask: Decimal) -> BookLevels {
        BookLevels {
            bids: vec![BookLevel::new(bid, dec!(10))],
            asks: vec![BookLevel::new(ask, dec!(10))],
        }
    }

    fn market_config(primary: &[&str], secondary: &[&str]) -> MarketDataConfig {
        MarketDataConfig {
            primary_venues: primary.iter().map(|s| s.to_string()).collect(),
            secondary_venues: secondary.iter().map(|s| s.to_string()).collect(),
            ..MarketDataConfig::default()
        }
    }

    async fn two_venue_engine() -> (Arc<MockVenueAdapter>, Arc<MockVenueAdapter>, ExecutionEngine) {
        let alpha = Arc::new(MockVenueAdapter::new("alpha"));
        let beta = Arc::new(MockVenueAdapter::new("beta"));
        alpha.set_book("BTC-USDT", book(dec!(100), dec!(101))).await;
        beta.set_book("BTC-USDT", book(dec!(100.5), dec!(101.5))).await;

        let engine = ExecutionEngine::new(
            vec![alpha.clone(), beta.clone()],
            ExecutionConfig::default(),
            market_config(&["alpha", "beta"], &[]),
        );
        (alpha, beta, engine)
    }

    #[tokio::test]
    async fn test_best_quote_takes_max_bid_min_ask() {
        let (_, _, engine) = two_venue_engine().await;
        let quote = engine.best_quote("BTC-USDT").await.unwrap();
        assert_eq!(quote.bid, dec!(100.5)); // beta's bid
        assert_eq!(quote.ask, dec!(101)); // alpha's ask
    }

    #[tokio::test]
    async fn test_best_quote_excludes_failing_venue() {
        let (alpha, _, engine) = two_venue_engine().await;
        alpha.fail_tickers(true);

        let quote = engine.best_quote("BTC-USDT").await.unwrap();
        assert_eq!(quote.bid, dec!(100.5));
        assert_eq!(quote.ask, dec!(101.5)); // only beta responds
    }

    #[tokio::test]
    async fn test_best_quote_none_when_all_fail() {
        let (alpha, beta, engine) = two_venue_engine().await;
        alpha.fail_tickers(true);
        beta.fail_tickers(true);
        assert!(engine.best_quote("BTC-USDT").await.is_none());
    }

    #[test]
    fn test_venue_split_sums_to_request() {
        let alpha = Arc::new(MockVenueAdapter::new("alpha"));
        let beta = Arc::new(MockVenueAdapter::new("beta"));
        let gamma = Arc::new(MockVenueAdapter::new("gamma"));
        let engine = ExecutionEngine::new(
            vec![alpha, beta, gamma],
            ExecutionConfig::default(),
            market_config(&["alpha", "beta"], &["gamma"]),
        );

        let quantity = dec!(9);
        let split = engine.venue_split(quantity);
        let total: Decimal = split.iter().map(|(_, q)| *q).sum();
        assert_eq!(total, quantity);

        // Renormalized over 0.9 lit: primaries q/3 each, secondary q/3
        let shares: HashMap<&str, Decimal> =
            split.iter().map(|(v, q)| (v.as_str(), *q)).collect();
        assert_eq!(shares["alpha"], dec!(3));
        assert_eq!(shares["beta"], dec!(3));
        assert_eq!(shares["gamma"], dec!(3));
    }

    #[test]
    fn test_venue_split_skips_unconfigured_venues() {
        let alpha = Arc::new(MockVenueAdapter::new("alpha"));
        let rogue = Arc::new(MockVenueAdapter::new("rogue"));
        let engine = ExecutionEngine::new(
            vec![alpha, rogue],
            ExecutionConfig::default(),
            market_config(&["alpha"], &[]),
        );

        let split = engine.venue_split(dec!(5));
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].0, "alpha");
        assert_eq!(split[0].1, dec!(5));
    }

    #[test]
    fn test_venue_split_skips_venues_without_adapters() {
        let alpha = Arc::new(MockVenueAdapter::new("alpha"));
        let engine = ExecutionEngine::new(
            vec![alpha],
            ExecutionConfig::default(),
            market_config(&["alpha", "offline"], &[]),
        );

        let split = engine.venue_split(dec!(4));
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].1, dec!(4));
    }

    #[tokio::test]
    async fn test_execute_fans_out_and_aggregates() {
        let (alpha, beta, engine) = two_venue_engine().await;

        let result = engine
            .execute("BTC-USDT", SignalDirection::Long, dec!(4), 1.0)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.total_filled, dec!(4));
        assert_eq!(result.venue_fills.len(), 2);
        assert_eq!(result.orders.len(), 2);

        // Passive pricing: 0.05% inside the best ask of 101
        let expected_price = (dec!(101) * dec!(0.9995)).round_dp(8);
        assert_eq!(alpha.placed_orders().await[0].price, Some(expected_price));
        assert_eq!(beta.placed_orders().await[0].price, Some(expected_price));
        assert_eq!(result.average_price, expected_price);
    }

    #[tokio::test]
    async fn test_execute_urgent_crosses_spread() {
        let (alpha, _, engine) = two_venue_engine().await;

        engine
            .execute("BTC-USDT", SignalDirection::Long, dec!(2), 2.0)
            .await
            .unwrap();

        let expected_price = (dec!(101) * dec!(1.002)).round_dp(8);
        assert_eq!(alpha.placed_orders().await[0].price, Some(expected_price));
    }

    #[tokio::test]
    async fn test_execute_short_prices_off_best_bid() {
        let (alpha, _, engine) = two_venue_engine().await;

        let result = engine
            .execute("BTC-USDT", SignalDirection::Short, dec!(2), 2.0)
            .await
            .unwrap();

        // Best bid 100.5, aggressive sell 0.2% through it
        let expected_price = (dec!(100.5) * dec!(0.998)).round_dp(8);
        assert_eq!(alpha.placed_orders().await[0].price, Some(expected_price));

        // Slippage measured against the best bid for shorts
        assert!((result.total_slippage - 0.002).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_leg_failure_does_not_abort_siblings() {
        let (alpha, beta, engine) = two_venue_engine().await;
        alpha.fail_orders(true);

        let result = engine
            .execute("BTC-USDT", SignalDirection::Long, dec!(4), 1.0)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.total_filled, dec!(2)); // only beta's half
        assert_eq!(result.venue_fills.len(), 1);
        assert!(result.venue_fills.contains_key("beta"));
        assert!(beta.placed_orders().await.len() == 1);
    }

    #[tokio::test]
    async fn test_execute_unavailable_without_quotes() {
        let (alpha, beta, engine) = two_venue_engine().await;
        alpha.fail_tickers(true);
        beta.fail_tickers(true);

        assert!(engine
            .execute("BTC-USDT", SignalDirection::Long, dec!(1), 1.0)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_execute_neutral_is_rejected() {
        let (_, _, engine) = two_venue_engine().await;
        assert!(engine
            .execute("BTC-USDT", SignalDirection::Neutral, dec!(1), 1.0)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_order_log_is_append_only_across_requests() {
        let (_, _, engine) = two_venue_engine().await;
        engine
            .execute("BTC-USDT", SignalDirection::Long, dec!(2), 1.0)
            .await
            .unwrap();
        engine
            .execute("BTC-USDT", SignalDirection::Short, dec!(2), 1.0)
            .await
            .unwrap();

        assert_eq!(engine.order_history().await.len(), 4);
    }

    #[tokio::test]
    async fn test_cancel_all_counts_and_tolerates_failures() {
        let (alpha, beta, engine) = two_venue_engine().await;
        let open = |id: &str| OpenOrder {
            order_id: id.to_string(),
            symbol: "BTC-USDT".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(1),
            price: Some(dec!(99)),
        };
        alpha.set_open_orders(vec![open("a1"), open("a2")]).await;
        beta.set_open_orders(vec![open("b1")]).await;
        beta.fail_cancels(true);

        let cancelled = engine.cancel_all(Some("BTC-USDT")).await;
        assert_eq!(cancelled, 2); // beta's cancel failed but alpha's went through
        assert_eq!(alpha.cancelled_orders().await.len(), 2);
    }

    #[tokio::test]
    async fn test_ticker_override_for_quote_discovery() {
        let alpha = Arc::new(MockVenueAdapter::new("alpha"));
        alpha
            .set_ticker(
                "BTC-USDT",
                Ticker {
                    bid: dec!(200),
                    ask: dec!(201),
                    last: dec!(200.5),
                },
            )
            .await;
        let engine = ExecutionEngine::new(
            vec![alpha],
            ExecutionConfig::default(),
            market_config(&["alpha"], &[]),
        );

        let quote = engine.best_quote("BTC-USDT").await.unwrap();
        assert_eq!(quote.bid, dec!(200));
    }
}
