//! Position sizing, limits, and stop management.
//!
//! The manager owns all open-position state. Sizing, opening, and closing
//! for one symbol are serialized through a per-symbol mutex so a
//! signal-driven open can never race a stop-driven close; different
//! symbols proceed concurrently.

use crate::config::TradingConfig;
use crate::indicators::{AtrEstimator, MarketRegime, RegimeDetector};
use crate::portfolio::correlation::CorrelationMatrix;
use crate::risk::drawdown::DrawdownTracker;
use crate::signal::{SignalDirection, TradingSignal};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Trades below this reward/risk ratio are rejected.
const MIN_RISK_REWARD: f64 = 1.5;

/// Invalid position state transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RiskError {
    #[error("no open position for {0}")]
    NoOpenPosition(String),
    #[error("position already open for {0}")]
    PositionExists(String),
}

/// An open trading position. At most one exists per symbol.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub direction: SignalDirection,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub entry_time: DateTime<Utc>,
    pub venue: String,
}

impl Position {
    /// Mark-to-market P&L at the given price.
    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        match self.direction {
            SignalDirection::Short => self.size * (self.entry_price - current_price),
            _ => self.size * (current_price - self.entry_price),
        }
    }
}

/// Sizing output for a candidate entry.
#[derive(Debug, Clone)]
pub struct RiskParameters {
    pub position_size: Decimal,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    pub max_loss_amount: Decimal,
    pub risk_reward_ratio: f64,
}

/// Why a position shows up in a stop scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    StopLoss,
    TakeProfit,
}

/// A position whose stop or target has been crossed. The caller closes it.
#[derive(Debug, Clone)]
pub struct StopHit {
    pub symbol: String,
    pub reason: StopReason,
}

/// Snapshot of portfolio-level risk state for monitoring.
#[derive(Debug, Clone)]
pub struct PortfolioRiskStats {
    pub capital: Decimal,
    pub open_positions: usize,
    pub realized_pnl: Decimal,
    pub current_drawdown: Decimal,
    pub max_drawdown: Decimal,
}

struct RiskState {
    capital: Decimal,
    realized_pnl: Decimal,
    positions: HashMap<String, Position>,
    drawdown: DrawdownTracker,
}

/// Gates and sizes entries, owns open positions, and monitors stops.
pub struct RiskManager {
    config: TradingConfig,
    atr: Arc<AtrEstimator>,
    regime: Arc<RegimeDetector>,
    state: RwLock<RiskState>,
    symbol_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RiskManager {
    pub fn new(
        config: TradingConfig,
        atr: Arc<AtrEstimator>,
        regime: Arc<RegimeDetector>,
        initial_capital: Decimal,
    ) -> Self {
        let drawdown = DrawdownTracker::new(config.max_drawdown, initial_capital);
        Self {
            config,
            atr,
            regime,
            state: RwLock::new(RiskState {
                capital: initial_capital,
                realized_pnl: Decimal::ZERO,
                positions: HashMap::new(),
                drawdown,
            }),
            symbol_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a new position in `symbol` is currently allowed.
    pub async fn can_open(&self, symbol: &str, matrix: &CorrelationMatrix) -> bool {
        let state = self.state.read().await;

        if state.positions.len() >= self.config.max_concurrent_positions {
            return false;
        }
        if state.positions.contains_key(symbol) {
            return false;
        }
        if state.drawdown.current_drawdown() > self.config.max_drawdown {
            warn!(%symbol, "Drawdown limit reached, blocking new entries");
            return false;
        }

        let correlated = self.correlated_count(&state.positions, symbol, matrix);
        if correlated >= self.config.max_correlated_positions {
            return false;
        }

        true
    }

    /// Compute size, stop, and target for a signal at the current price.
    ///
    /// `None` covers every routine rejection: limits in force, ATR not yet
    /// warmed up, a neutral signal, or a reward/risk ratio under the
    /// minimum. None of these are errors.
    pub async fn size_position(
        &self,
        signal: &TradingSignal,
        current_price: Decimal,
        matrix: &CorrelationMatrix,
    ) -> Option<RiskParameters> {
        let lock = self.symbol_lock(&signal.symbol).await;
        let _guard = lock.lock().await;

        if signal.direction == SignalDirection::Neutral {
            return None;
        }
        if !self.can_open(&signal.symbol, matrix).await {
            debug!(symbol = %signal.symbol, "Sizing skipped: risk limits");
            return None;
        }

        let Some(atr) = self.atr.atr(&signal.symbol).await else {
            debug!(symbol = %signal.symbol, "Sizing skipped: ATR not warmed up");
            return None;
        };
        if atr <= 0.0 {
            return None;
        }

        let regime = self.regime.regime(&signal.symbol).await;

        let volatility_multiplier = match (
            self.atr.implied_volatility(&signal.symbol).await,
            self.atr.historical_volatility(&signal.symbol).await,
        ) {
            (Some(implied), Some(historical)) if historical > 0.0 => implied / historical,
            _ => 1.0,
        };

        let mut risk_amount = {
            let state = self.state.read().await;
            state.capital * self.config.base_risk_percent
        };
        match regime {
            MarketRegime::Volatile => risk_amount *= Decimal::new(5, 1),
            MarketRegime::Ranging => risk_amount *= Decimal::new(7, 1),
            MarketRegime::Trending => {}
        }

        let stop_distance = stop_distance(atr, regime, &self.config);
        let target_distance = target_distance(atr, regime, &self.config);

        let stop_dec = Decimal::from_f64_retain(stop_distance)?;
        let multiplier_dec = Decimal::from_f64_retain(volatility_multiplier)?;
        if stop_dec <= Decimal::ZERO || multiplier_dec <= Decimal::ZERO {
            return None;
        }
        let position_size = risk_amount / stop_dec / multiplier_dec;

        let target_dec = Decimal::from_f64_retain(target_distance)?;
        let (stop_loss_price, take_profit_price) = match signal.direction {
            SignalDirection::Long => (current_price - stop_dec, current_price + target_dec),
            SignalDirection::Short => (current_price + stop_dec, current_price - target_dec),
            SignalDirection::Neutral => return None,
        };

        let risk_reward_ratio = target_distance / stop_distance;
        if risk_reward_ratio < MIN_RISK_REWARD {
            debug!(
                symbol = %signal.symbol,
                risk_reward = risk_reward_ratio,
                "Sizing skipped: insufficient risk/reward"
            );
            return None;
        }

        Some(RiskParameters {
            position_size,
            stop_loss_price,
            take_profit_price,
            max_loss_amount: risk_amount,
            risk_reward_ratio,
        })
    }

    /// Record a filled entry, transitioning the symbol to open.
    pub async fn open(
        &self,
        signal: &TradingSignal,
        params: &RiskParameters,
        fill_price: Decimal,
        venue: &str,
    ) -> Result<Position, RiskError> {
        let lock = self.symbol_lock(&signal.symbol).await;
        let _guard = lock.lock().await;

        let mut state = self.state.write().await;
        if state.positions.contains_key(&signal.symbol) {
            return Err(RiskError::PositionExists(signal.symbol.clone()));
        }

        let position = Position {
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_price: fill_price,
            size: params.position_size,
            stop_loss: params.stop_loss_price,
            take_profit: params.take_profit_price,
            entry_time: Utc::now(),
            venue: venue.to_string(),
        };

        info!(
            symbol = %position.symbol,
            direction = %position.direction,
            entry = %position.entry_price,
            size = %position.size,
            stop = %position.stop_loss,
            target = %position.take_profit,
            "Position opened"
        );

        state.positions.insert(signal.symbol.clone(), position.clone());
        Ok(position)
    }

    /// Scan open positions against current prices. Returns the positions
    /// whose stop or target has been crossed; closing them is the caller's
    /// responsibility.
    pub async fn check_stops(&self, prices: &HashMap<String, Decimal>) -> Vec<StopHit> {
        let state = self.state.read().await;
        let mut hits = Vec::new();

        for (symbol, position) in &state.positions {
            let Some(&price) = prices.get(symbol) else {
                continue;
            };

            let reason = match position.direction {
                SignalDirection::Long if price <= position.stop_loss => Some(StopReason::StopLoss),
                SignalDirection::Long if price >= position.take_profit => {
                    Some(StopReason::TakeProfit)
                }
                SignalDirection::Short if price >= position.stop_loss => Some(StopReason::StopLoss),
                SignalDirection::Short if price <= position.take_profit => {
                    Some(StopReason::TakeProfit)
                }
                _ => None,
            };

            if let Some(reason) = reason {
                info!(%symbol, ?reason, %price, "Stop scan hit");
                hits.push(StopHit {
                    symbol: symbol.clone(),
                    reason,
                });
            }
        }
        hits
    }

    /// Close an open position at the given price, realizing its P&L.
    pub async fn close(&self, symbol: &str, exit_price: Decimal) -> Result<Decimal, RiskError> {
        let lock = self.symbol_lock(symbol).await;
        let _guard = lock.lock().await;

        let mut state = self.state.write().await;
        let position = state
            .positions
            .remove(symbol)
            .ok_or_else(|| RiskError::NoOpenPosition(symbol.to_string()))?;

        let pnl = position.unrealized_pnl(exit_price);
        state.capital += pnl;
        state.realized_pnl += pnl;
        let capital = state.capital;
        state.drawdown.update(capital);

        info!(
            %symbol,
            exit = %exit_price,
            %pnl,
            capital = %capital,
            "Position closed"
        );

        Ok(pnl)
    }

    /// The open position for a symbol, if any.
    pub async fn position(&self, symbol: &str) -> Option<Position> {
        self.state.read().await.positions.get(symbol).cloned()
    }

    /// All open positions.
    pub async fn positions(&self) -> Vec<Position> {
        self.state.read().await.positions.values().cloned().collect()
    }

    /// Current portfolio-level risk snapshot.
    pub async fn stats(&self) -> PortfolioRiskStats {
        let state = self.state.read().await;
        PortfolioRiskStats {
            capital: state.capital,
            open_positions: state.positions.len(),
            realized_pnl: state.realized_pnl,
            current_drawdown: state.drawdown.current_drawdown(),
            max_drawdown: state.drawdown.max_drawdown(),
        }
    }

    fn correlated_count(
        &self,
        positions: &HashMap<String, Position>,
        symbol: &str,
        matrix: &CorrelationMatrix,
    ) -> usize {
        positions
            .keys()
            .filter(|held| {
                base_asset(held) == base_asset(symbol)
                    || matrix.get(symbol, held).abs() > self.config.correlation_threshold
            })
            .count()
    }

    async fn symbol_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.symbol_locks.lock().await;
        locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Base asset of a symbol like "BTC-USDT" or "BTC/USDT".
fn base_asset(symbol: &str) -> &str {
    symbol
        .split(['-', '/'])
        .next()
        .unwrap_or(symbol)
}

/// Stop distance in price units for the given regime.
fn stop_distance(atr: f64, regime: MarketRegime, config: &TradingConfig) -> f64 {
    match regime {
        MarketRegime::Trending => atr * 1.0,
        MarketRegime::Volatile => atr * 0.5,
        MarketRegime::Ranging => atr * config.base_stop_atr_multiple,
    }
}

/// Take-profit distance in price units for the given regime.
fn target_distance(atr: f64, regime: MarketRegime, config: &TradingConfig) -> f64 {
    match regime {
        MarketRegime::Trending => atr * 3.0,
        MarketRegime::Volatile => atr * 1.5,
        MarketRegime::Ranging => atr * config.base_target_atr_multiple,
    }
}
