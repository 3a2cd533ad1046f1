//! Realized-trade tracking and performance analytics.

use crate::portfolio::correlation::{CorrelationMatrix, CorrelationTracker};
use crate::risk::Position;
use crate::signal::SignalDirection;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::info;

/// Trading days per year for annualization.
const TRADING_DAYS: f64 = 252.0;
/// Annual risk-free rate assumed in the Sharpe ratio.
const RISK_FREE_RATE: f64 = 0.02;
/// Correlation lookback in days.
const CORRELATION_LOOKBACK_DAYS: i64 = 60;

/// A completed round-trip trade.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub symbol: String,
    pub direction: SignalDirection,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub venue: String,
    pub pnl: Decimal,
    /// Return on the position's entry notional
    pub return_pct: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
}

/// Derived portfolio performance view. Recomputed on request.
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub average_win: Decimal,
    pub average_loss: Decimal,
    pub total_trades: usize,
}

impl PerformanceMetrics {
    fn empty() -> Self {
        Self {
            total_return: 0.0,
            annualized_return: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            win_rate: 0.0,
            profit_factor: 0.0,
            average_win: Decimal::ZERO,
            average_loss: Decimal::ZERO,
            total_trades: 0,
        }
    }
}

/// Coarse risk bucket for health summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskBucket {
    Low,
    Medium,
    High,
}

/// Health summary over the currently open positions.
#[derive(Debug, Clone)]
pub struct PositionHealth {
    pub healthy_positions: usize,
    pub at_risk_positions: usize,
    pub correlation_risk: RiskBucket,
    pub concentration_risk: RiskBucket,
    pub total_positions: usize,
}

struct MonitorState {
    current_capital: Decimal,
    trades: Vec<TradeRecord>,
    equity_curve: Vec<(DateTime<Utc>, Decimal)>,
    peak_equity: Decimal,
    max_drawdown: Decimal,
}

/// Tracks realized trades, the equity curve, and cross-asset correlation.
pub struct PortfolioMonitor {
    initial_capital: Decimal,
    correlation: CorrelationTracker,
    state: RwLock<MonitorState>,
}

impl PortfolioMonitor {
    pub fn new(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            correlation: CorrelationTracker::new(CORRELATION_LOOKBACK_DAYS),
            state: RwLock::new(MonitorState {
                current_capital: initial_capital,
                trades: Vec::new(),
                equity_curve: vec![(Utc::now(), initial_capital)],
                peak_equity: initial_capital,
                max_drawdown: Decimal::ZERO,
            }),
        }
    }

    /// Record a completed trade: computes signed P&L, appends to the
    /// history, and rolls capital and the equity curve forward.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_trade(
        &self,
        symbol: &str,
        direction: SignalDirection,
        entry_price: Decimal,
        exit_price: Decimal,
        quantity: Decimal,
        venue: &str,
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
    ) -> TradeRecord {
        let pnl = match direction {
            SignalDirection::Short => quantity * (entry_price - exit_price),
            _ => quantity * (exit_price - entry_price),
        };
        let notional = quantity * entry_price;
        let return_pct = if notional > Decimal::ZERO {
            (pnl / notional).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        let record = TradeRecord {
            symbol: symbol.to_string(),
            direction,
            entry_price,
            exit_price,
            quantity,
            venue: venue.to_string(),
            pnl,
            return_pct,
            entry_time,
            exit_time,
        };

        let mut state = self.state.write().await;
        Self::apply(&mut state, record.clone());

        info!(
            %symbol,
            direction = %direction,
            pnl = %pnl,
            return_pct,
            capital = %state.current_capital,
            "Trade recorded"
        );

        record
    }

    /// Rebuild capital, equity curve, and drawdown from a persisted trade
    /// log, oldest first.
    pub async fn restore(&self, mut trades: Vec<TradeRecord>) {
        trades.sort_by_key(|t| t.exit_time);
        let mut state = self.state.write().await;
        let count = trades.len();
        for trade in trades {
            Self::apply(&mut state, trade);
        }
        info!(trades = count, capital = %state.current_capital, "Trade history restored");
    }

    fn apply(state: &mut MonitorState, trade: TradeRecord) {
        state.current_capital += trade.pnl;
        let equity = state.current_capital;
        state.equity_curve.push((trade.exit_time, equity));

        if equity > state.peak_equity {
            state.peak_equity = equity;
        } else if state.peak_equity > Decimal::ZERO {
            let drawdown = (state.peak_equity - equity) / state.peak_equity;
            if drawdown > state.max_drawdown {
                state.max_drawdown = drawdown;
            }
        }

        state.trades.push(trade);
    }

    /// Feed a price observation into the correlation tracker.
    pub async fn record_price(&self, symbol: &str, price: f64) {
        self.correlation.record_price(symbol, price).await;
    }

    /// Rolling correlation matrix over the given symbols.
    pub async fn correlation_matrix(&self, symbols: &[String]) -> CorrelationMatrix {
        self.correlation.matrix(symbols).await
    }

    pub async fn current_capital(&self) -> Decimal {
        self.state.read().await.current_capital
    }

    pub async fn equity_curve(&self) -> Vec<(DateTime<Utc>, Decimal)> {
        self.state.read().await.equity_curve.clone()
    }

    /// Annualized Sharpe ratio over calendar-day P&L grouping. Returns 0
    /// with fewer than two daily observations or zero variance.
    pub async fn sharpe_ratio(&self) -> f64 {
        let state = self.state.read().await;
        Self::sharpe_of(&state.trades, self.initial_capital)
    }

    fn sharpe_of(trades: &[TradeRecord], initial_capital: Decimal) -> f64 {
        let mut daily_pnl: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
        for trade in trades {
            *daily_pnl.entry(trade.exit_time.date_naive()).or_default() += trade.pnl;
        }
        if daily_pnl.len() < 2 {
            return 0.0;
        }

        let mut returns = Vec::with_capacity(daily_pnl.len());
        let mut running_capital = initial_capital;
        for pnl in daily_pnl.values() {
            if running_capital > Decimal::ZERO {
                returns.push((pnl / running_capital).to_f64().unwrap_or(0.0));
            }
            running_capital += *pnl;
        }
        if returns.len() < 2 {
            return 0.0;
        }

        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();
        if std_dev < 1e-12 {
            return 0.0;
        }

        (mean * TRADING_DAYS - RISK_FREE_RATE) / (std_dev * TRADING_DAYS.sqrt())
    }

    /// Full performance view over the realized history.
    pub async fn performance_metrics(&self) -> PerformanceMetrics {
        let state = self.state.read().await;
        if state.trades.is_empty() {
            return PerformanceMetrics::empty();
        }

        let total_return = if self.initial_capital > Decimal::ZERO {
            ((state.current_capital - self.initial_capital) / self.initial_capital)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let days_active = state
            .trades
            .first()
            .map(|t| (Utc::now() - t.entry_time).num_days())
            .unwrap_or(0);
        let annualized_return = if days_active > 0 {
            (1.0 + total_return).powf(365.0 / days_active as f64) - 1.0
        } else {
            0.0
        };

        let wins: Vec<&TradeRecord> = state.trades.iter().filter(|t| t.pnl > Decimal::ZERO).collect();
        let losses: Vec<&TradeRecord> =
            state.trades.iter().filter(|t| t.pnl < Decimal::ZERO).collect();

        let win_rate = wins.len() as f64 / state.trades.len() as f64;
        let total_wins: Decimal = wins.iter().map(|t| t.pnl).sum();
        let total_losses: Decimal = losses.iter().map(|t| t.pnl).sum::<Decimal>().abs();

        let profit_factor = if total_losses > Decimal::ZERO {
            (total_wins / total_losses).to_f64().unwrap_or(0.0)
        } else {
            f64::INFINITY
        };

        let average_win = if wins.is_empty() {
            Decimal::ZERO
        } else {
            total_wins / Decimal::from(wins.len())
        };
        let average_loss = if losses.is_empty() {
            Decimal::ZERO
        } else {
            total_losses / Decimal::from(losses.len())
        };

        PerformanceMetrics {
            total_return,
            annualized_return,
            sharpe_ratio: Self::sharpe_of(&state.trades, self.initial_capital),
            max_drawdown: state.max_drawdown.to_f64().unwrap_or(0.0),
            win_rate,
            profit_factor,
            average_win,
            average_loss,
            total_trades: state.trades.len(),
        }
    }

    /// Health summary over the open positions at the given prices.
    pub async fn position_health(
        &self,
        positions: &[Position],
        prices: &std::collections::HashMap<String, Decimal>,
    ) -> PositionHealth {
        if positions.is_empty() {
            return PositionHealth {
                healthy_positions: 0,
                at_risk_positions: 0,
                correlation_risk: RiskBucket::Low,
                concentration_risk: RiskBucket::Low,
                total_positions: 0,
            };
        }

        let mut healthy = 0;
        let mut at_risk = 0;
        for position in positions {
            let Some(&price) = prices.get(&position.symbol) else {
                continue;
            };
            let notional = position.size * position.entry_price;
            if notional <= Decimal::ZERO {
                continue;
            }
            let pnl_pct = (position.unrealized_pnl(price) / notional)
                .to_f64()
                .unwrap_or(0.0);
            if pnl_pct > 0.0 {
                healthy += 1;
            } else if pnl_pct < -0.5 {
                at_risk += 1;
            }
        }

        let symbols: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
        let correlation_risk = if symbols.len() > 1 {
            let matrix = self.correlation_matrix(&symbols).await;
            let mut hot_pairs = 0;
            for (i, a) in symbols.iter().enumerate() {
                for b in symbols.iter().skip(i + 1) {
                    if matrix.get(a, b).abs() > 0.7 {
                        hot_pairs += 1;
                    }
                }
            }
            if 2 * hot_pairs > symbols.len() {
                RiskBucket::High
            } else if 2 * hot_pairs > symbols.len() / 2 {
                RiskBucket::Medium
            } else {
                RiskBucket::Low
            }
        } else {
            RiskBucket::Low
        };

        let values: Vec<Decimal> = positions
            .iter()
            .map(|p| {
                let price = prices.get(&p.symbol).copied().unwrap_or(p.entry_price);
                p.size * price
            })
            .collect();
        let total_value: Decimal = values.iter().copied().sum();
        let max_value = values.iter().copied().max().unwrap_or(Decimal::ZERO);
        let concentration = if total_value > Decimal::ZERO {
            (max_value / total_value).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };
        let concentration_risk = if concentration > 0.3 {
            RiskBucket::High
        } else if concentration > 0.2 {
            RiskBucket::Medium
        } else {
            RiskBucket::Low
        };

        PositionHealth {
            healthy_positions: healthy,
            at_risk_positions: at_risk,
            correlation_risk,
            concentration_risk,
            total_positions: positions.len(),
        }
    }

    /// Formatted performance report for the monitoring log and shutdown.
    pub async fn report(&self) -> String {
        let metrics = self.performance_metrics().await;
        let capital = self.current_capital().await;

        format!(
            r#"═══════════════════════════════════════════════
PORTFOLIO PERFORMANCE
═══════════════════════════════════════════════
RETURNS
  Total Return:      {:.2}%
  Annualized:        {:.2}%
  Sharpe Ratio:      {:.2}
  Max Drawdown:      {:.2}%

TRADING
  Total Trades:      {}
  Win Rate:          {:.1}%
  Profit Factor:     {:.2}
  Average Win:       {:.2}
  Average Loss:      {:.2}

CAPITAL
  Current Capital:   {:.2}
═══════════════════════════════════════════════"#,
            metrics.total_return * 100.0,
            metrics.annualized_return * 100.0,
            metrics.sharpe_ratio,
            metrics.max_drawdown * 100.0,
            metrics.total_trades,
            metrics.win_rate * 100.0,
            metrics.profit_factor,
            metrics.average_win,
            metrics.average_loss,
            capital,
        )
    }
}
