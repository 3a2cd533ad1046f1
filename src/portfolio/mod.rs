//! Portfolio analytics: realized trade history, rolling correlations,
//! equity curve, drawdown, and performance metrics.

pub mod correlation;
pub mod monitor;

pub use correlation::{CorrelationMatrix, CorrelationTracker};
pub use monitor::{PerformanceMetrics, PortfolioMonitor, PositionHealth, RiskBucket, TradeRecord};
