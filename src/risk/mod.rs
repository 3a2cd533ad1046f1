//! Risk management: drawdown tracking, position limits, regime-aware
//! sizing, and serialized position state transitions.

pub mod drawdown;
pub mod manager;

pub use drawdown::DrawdownTracker;
pub use manager::{
    Position, PortfolioRiskStats, RiskError, RiskManager, RiskParameters, StopHit, StopReason,
};
