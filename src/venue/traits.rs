//! The venue capability contract.
//!
//! Every exchange integration implements `VenueAdapter`; the aggregator,
//! execution engine, and shutdown path depend only on this trait. Wire-level
//! concerns (request signing, symbol formats, rate limits) stay inside the
//! adapter.

use async_trait::async_trait;

use super::types::{Balance, BookLevels, OpenOrder, Ticker, VenueOrderAck, VenueOrderRequest};

/// Capability contract for a trading venue.
///
/// All methods may suspend on network I/O. Errors are routine during
/// steady-state operation: callers exclude the venue from the current cycle
/// and retry on the next poll tick rather than propagating failure upward.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Venue identifier as referenced in configuration allocation lists.
    fn name(&self) -> &str;

    /// Fetch order book levels for a symbol, limited to `depth` per side.
    async fn fetch_order_book(&self, symbol: &str, depth: usize) -> anyhow::Result<BookLevels>;

    /// Fetch the top-of-book quote for a symbol.
    async fn fetch_ticker(&self, symbol: &str) -> anyhow::Result<Ticker>;

    /// Place an order. The ack reflects the venue's immediate view; IOC
    /// orders report their final fill state.
    async fn place_order(&self, request: &VenueOrderRequest) -> anyhow::Result<VenueOrderAck>;

    /// Cancel a resting order.
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> anyhow::Result<()>;

    /// List resting orders, optionally restricted to one symbol.
    async fn fetch_open_orders(&self, symbol: Option<&str>) -> anyhow::Result<Vec<OpenOrder>>;

    /// Fetch the balance for a currency.
    async fn fetch_balance(&self, currency: &str) -> anyhow::Result<Balance>;
}
