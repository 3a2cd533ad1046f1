//! Market data: order book snapshots, cross-venue aggregation, session
//! VWAP, bar construction, and the supervised collection tasks that feed
//! them.

pub mod aggregator;
pub mod bars;
pub mod book;
pub mod collector;
pub mod vwap;

pub use aggregator::OrderBookAggregator;
pub use bars::{Bar, BarBuilder};
pub use book::{AggregatedBook, OrderBookSnapshot};
pub use collector::{MarketDataCollector, VenueHealth};
pub use vwap::VwapEstimator;
