//! Mock venue adapter for tests and paper trading.
//!
//! Books, tickers, and balances are injected; orders fill at the limit
//! price scaled by a configurable fill ratio. Failure switches simulate
//! venue outages per endpoint.

use crate::venue::traits::VenueAdapter;
use crate::venue::types::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct MockState {
    books: HashMap<String, BookLevels>,
    tickers: HashMap<String, Ticker>,
    balances: HashMap<String, Balance>,
    open_orders: Vec<OpenOrder>,
    placed: Vec<VenueOrderRequest>,
    cancelled: Vec<String>,
}

/// In-memory venue used by unit tests and the paper-trading mode.
pub struct MockVenueAdapter {
    name: String,
    state: Arc<RwLock<MockState>>,
    order_id_counter: AtomicU64,
    /// Fraction of each order's quantity that fills (1.0 = full fill)
    fill_ratio: RwLock<Decimal>,
    fail_books: AtomicBool,
    fail_tickers: AtomicBool,
    fail_orders: AtomicBool,
    fail_cancels: AtomicBool,
}

impl MockVenueAdapter {
    /// Create a new mock venue with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(RwLock::new(MockState::default())),
            order_id_counter: AtomicU64::new(1),
            fill_ratio: RwLock::new(Decimal::ONE),
            fail_books: AtomicBool::new(false),
            fail_tickers: AtomicBool::new(false),
            fail_orders: AtomicBool::new(false),
            fail_cancels: AtomicBool::new(false),
        }
    }

    /// Replace the book for a symbol. Also derives the matching ticker from
    /// the top of book so quote discovery stays consistent.
    pub async fn set_book(&self, symbol: &str, book: BookLevels) {
        let mut state = self.state.write().await;
        if let (Some(best_bid), Some(best_ask)) = (book.bids.first(), book.asks.first()) {
            state.tickers.insert(
                symbol.to_string(),
                Ticker {
                    bid: best_bid.price,
                    ask: best_ask.price,
                    last: (best_bid.price + best_ask.price) / Decimal::TWO,
                },
            );
        }
        state.books.insert(symbol.to_string(), book);
    }

    /// Override the ticker independently of the book.
    pub async fn set_ticker(&self, symbol: &str, ticker: Ticker) {
        self.state
            .write()
            .await
            .tickers
            .insert(symbol.to_string(), ticker);
    }

    pub async fn set_balance(&self, currency: &str, available: Decimal, total: Decimal) {
        self.state.write().await.balances.insert(
            currency.to_string(),
            Balance {
                currency: currency.to_string(),
                available,
                total,
            },
        );
    }

    pub async fn set_open_orders(&self, orders: Vec<OpenOrder>) {
        self.state.write().await.open_orders = orders;
    }

    pub async fn set_fill_ratio(&self, ratio: Decimal) {
        *self.fill_ratio.write().await = ratio;
    }

    pub fn fail_books(&self, fail: bool) {
        self.fail_books.store(fail, Ordering::SeqCst);
    }

    pub fn fail_tickers(&self, fail: bool) {
        self.fail_tickers.store(fail, Ordering::SeqCst);
    }

    pub fn fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    pub fn fail_cancels(&self, fail: bool) {
        self.fail_cancels.store(fail, Ordering::SeqCst);
    }

    /// Orders placed so far, in placement order.
    pub async fn placed_orders(&self) -> Vec<VenueOrderRequest> {
        self.state.read().await.placed.clone()
    }

    /// Order ids cancelled so far.
    pub async fn cancelled_orders(&self) -> Vec<String> {
        self.state.read().await.cancelled.clone()
    }

    fn next_order_id(&self) -> String {
        format!(
            "{}-{}",
            self.name,
            self.order_id_counter.fetch_add(1, Ordering::SeqCst)
        )
    }
}

#[async_trait]
impl VenueAdapter for MockVenueAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> Result<BookLevels> {
        if self.fail_books.load(Ordering::SeqCst) {
            return Err(anyhow!("{}: book fetch unavailable", self.name));
        }
        let state = self.state.read().await;
        let book = state
            .books
            .get(symbol)
            .ok_or_else(|| anyhow!("{}: no book for {}", self.name, symbol))?;

        Ok(BookLevels {
            bids: book.bids.iter().take(depth).copied().collect(),
            asks: book.asks.iter().take(depth).copied().collect(),
        })
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        if self.fail_tickers.load(Ordering::SeqCst) {
            return Err(anyhow!("{}: ticker fetch unavailable", self.name));
        }
        self.state
            .read()
            .await
            .tickers
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow!("{}: no ticker for {}", self.name, symbol))
    }

    async fn place_order(&self, request: &VenueOrderRequest) -> Result<VenueOrderAck> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(anyhow!("{}: order placement unavailable", self.name));
        }

        let fill_ratio = *self.fill_ratio.read().await;
        let mut state = self.state.write().await;
        state.placed.push(request.clone());

        // Fill at the limit price; market orders fill at the ticker
        let fill_price = match request.price {
            Some(price) => price,
            None => {
                let ticker = state
                    .tickers
                    .get(&request.symbol)
                    .ok_or_else(|| anyhow!("{}: no price for {}", self.name, request.symbol))?;
                match request.side {
                    OrderSide::Buy => ticker.ask,
                    OrderSide::Sell => ticker.bid,
                }
            }
        };

        let filled = (request.quantity * fill_ratio).round_dp(8);
        let status = if filled == request.quantity {
            OrderStatus::Filled
        } else if filled > Decimal::ZERO {
            OrderStatus::Partial
        } else {
            OrderStatus::Cancelled
        };

        let order_id = self.next_order_id();
        debug!(
            venue = %self.name,
            %order_id,
            symbol = %request.symbol,
            side = %request.side,
            filled = %filled,
            price = %fill_price,
            "Mock order executed"
        );

        Ok(VenueOrderAck {
            order_id,
            status,
            filled_quantity: filled,
            average_fill_price: if filled > Decimal::ZERO {
                fill_price
            } else {
                Decimal::ZERO
            },
        })
    }

    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> Result<()> {
        if self.fail_cancels.load(Ordering::SeqCst) {
            return Err(anyhow!("{}: cancel unavailable", self.name));
        }
        let mut state = self.state.write().await;
        state.cancelled.push(order_id.to_string());
        state.open_orders.retain(|o| o.order_id != order_id);
        Ok(())
    }

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<OpenOrder>> {
        let state = self.state.read().await;
        Ok(state
            .open_orders
            .iter()
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .cloned()
            .collect())
    }

    async fn fetch_balance(&self, currency: &str) -> Result<Balance> {
        self.state
            .read()
            .await
            .balances
            .get(currency)
            .cloned()
            .ok_or_else(|| anyhow!("{}: no {} balance", self.name, currency))
    }
}
