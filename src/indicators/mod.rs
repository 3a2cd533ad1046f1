//! Volatility and trend-strength estimators feeding position sizing and
//! regime detection. All of them observe warm-up semantics: until enough
//! samples exist the value is simply unavailable, never partial.

pub mod adx;
pub mod atr;
pub mod regime;

pub use adx::AdxEstimator;
pub use atr::AtrEstimator;
pub use regime::{MarketRegime, RegimeDetector};
