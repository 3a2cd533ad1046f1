//! Portfolio drawdown tracking.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::warn;

/// A single equity observation.
#[derive(Debug, Clone)]
pub struct EquitySnapshot {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

/// Tracks peak equity, the live drawdown from it, and the worst drawdown
/// observed. The current drawdown resets when equity makes a new peak; the
/// maximum is monotone.
pub struct DrawdownTracker {
    /// Maximum allowed drawdown (e.g. 0.10 for 10%)
    limit: Decimal,
    peak_equity: Decimal,
    current_drawdown: Decimal,
    max_drawdown: Decimal,
    history: VecDeque<EquitySnapshot>,
    max_history: usize,
}

impl DrawdownTracker {
    pub fn new(limit: Decimal, initial_equity: Decimal) -> Self {
        let mut history = VecDeque::new();
        history.push_back(EquitySnapshot {
            timestamp: Utc::now(),
            equity: initial_equity,
        });

        Self {
            limit,
            peak_equity: initial_equity,
            current_drawdown: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            history,
            max_history: 1000,
        }
    }

    /// Fold in a new equity value. Returns true when the current drawdown
    /// breaches the configured limit.
    pub fn update(&mut self, equity: Decimal) -> bool {
        if equity > self.peak_equity {
            self.peak_equity = equity;
            self.current_drawdown = Decimal::ZERO;
        } else if self.peak_equity > Decimal::ZERO {
            self.current_drawdown = (self.peak_equity - equity) / self.peak_equity;

            if self.current_drawdown > self.max_drawdown {
                self.max_drawdown = self.current_drawdown;
                warn!(
                    drawdown = %self.max_drawdown,
                    peak = %self.peak_equity,
                    current = %equity,
                    "New maximum drawdown recorded"
                );
            }
        }

        self.history.push_back(EquitySnapshot {
            timestamp: Utc::now(),
            equity,
        });
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }

        self.current_drawdown >= self.limit
    }

    /// Live drawdown from the running peak (0.0-1.0).
    pub fn current_drawdown(&self) -> Decimal {
        self.current_drawdown
    }

    /// Worst drawdown observed so far (0.0-1.0).
    pub fn max_drawdown(&self) -> Decimal {
        self.max_drawdown
    }

    pub fn peak_equity(&self) -> Decimal {
        self.peak_equity
    }

    /// True while the live drawdown sits beyond the configured limit.
    pub fn limit_breached(&self) -> bool {
        self.current_drawdown >= self.limit
    }
}
