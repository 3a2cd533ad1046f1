//! Average True Range and close-based historical volatility.

use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Trading days per year, used to annualize volatilities.
const TRADING_DAYS: f64 = 252.0;
/// History bound as a multiple of the period.
const HISTORY_MULTIPLE: usize = 10;

#[derive(Debug, Default)]
struct AtrSeries {
    prev_close: Option<f64>,
    true_ranges: VecDeque<f64>,
    closes: VecDeque<f64>,
    /// Recent ATR values, the baseline for spike detection
    recent_atrs: VecDeque<f64>,
}

/// Per-symbol ATR estimator over (high, low, close) bars.
///
/// The ATR is the mean of the last `period` true ranges and is unavailable
/// until that many true-range samples exist.
pub struct AtrEstimator {
    period: usize,
    volatility_lookback: usize,
    state: RwLock<HashMap<String, AtrSeries>>,
}

impl AtrEstimator {
    pub fn new(period: usize, volatility_lookback: usize) -> Self {
        Self {
            period,
            volatility_lookback,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Fold in a completed bar.
    pub async fn update(&self, symbol: &str, high: f64, low: f64, close: f64) {
        let max_history = self.period * HISTORY_MULTIPLE;
        let mut state = self.state.write().await;
        let series = state.entry(symbol.to_string()).or_default();

        if let Some(prev_close) = series.prev_close {
            let true_range = (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs());
            series.true_ranges.push_back(true_range);
            while series.true_ranges.len() > max_history {
                series.true_ranges.pop_front();
            }
        }
        series.prev_close = Some(close);

        series.closes.push_back(close);
        while series.closes.len() > max_history.max(self.volatility_lookback + 1) {
            series.closes.pop_front();
        }

        if let Some(atr) = Self::atr_of(&series.true_ranges, self.period) {
            series.recent_atrs.push_back(atr);
            while series.recent_atrs.len() > self.period {
                series.recent_atrs.pop_front();
            }
        }
    }

    /// Current ATR; `None` until `period` true-range samples exist.
    pub async fn atr(&self, symbol: &str) -> Option<f64> {
        let state = self.state.read().await;
        Self::atr_of(&state.get(symbol)?.true_ranges, self.period)
    }

    /// Annualized implied volatility proxy from the current ATR.
    pub async fn implied_volatility(&self, symbol: &str) -> Option<f64> {
        Some(self.atr(symbol).await? * TRADING_DAYS.sqrt())
    }

    /// Annualized standard deviation of close-to-close log returns over the
    /// volatility lookback. `None` with fewer than two closes.
    pub async fn historical_volatility(&self, symbol: &str) -> Option<f64> {
        let state = self.state.read().await;
        let series = state.get(symbol)?;

        let closes: Vec<f64> = series
            .closes
            .iter()
            .rev()
            .take(self.volatility_lookback)
            .rev()
            .copied()
            .collect();
        if closes.len() < 2 {
            return None;
        }

        let returns: Vec<f64> = closes
            .windows(2)
            .filter(|w| w[0] > 0.0 && w[1] > 0.0)
            .map(|w| (w[1] / w[0]).ln())
            .collect();
        if returns.len() < 2 {
            return None;
        }

        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;

        Some(variance.sqrt() * TRADING_DAYS.sqrt())
    }

    /// Mean of the recent ATR window, the spike-detection baseline.
    pub async fn recent_average_atr(&self, symbol: &str) -> Option<f64> {
        let state = self.state.read().await;
        let recent = &state.get(symbol)?.recent_atrs;
        if recent.is_empty() {
            return None;
        }
        Some(recent.iter().sum::<f64>() / recent.len() as f64)
    }

    fn atr_of(true_ranges: &VecDeque<f64>, period: usize) -> Option<f64> {
        if true_ranges.len() < period {
            return None;
        }
        let sum: f64 = true_ranges.iter().rev().take(period).sum();
        Some(sum / period as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_atr_unavailable_before_warmup() {
        let estimator = AtrEstimator::new(14, 30);
        // 14 bars produce only 13 true ranges
        for _ in 0..14 {
            estimator.update("BTC-USDT", 110.0, 100.0, 105.0).await;
        }
        assert!(estimator.atr("BTC-USDT").await.is_none());
    }

    #[tokio::test]
    async fn test_atr_constant_true_range() {
        let estimator = AtrEstimator::new(14, 30);
        // 15 bars with range 10 and unchanged close: every TR is 10.0
        for _ in 0..15 {
            estimator.update("BTC-USDT", 110.0, 100.0, 105.0).await;
        }
        let atr = estimator.atr("BTC-USDT").await.unwrap();
        assert!((atr - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_true_range_uses_previous_close_gap() {
        let estimator = AtrEstimator::new(2, 30);
        estimator.update("BTC-USDT", 101.0, 99.0, 100.0).await;
        // Gap up: high-low is 2 but |low - prev_close| = 4
        estimator.update("BTC-USDT", 106.0, 104.0, 105.0).await;
        estimator.update("BTC-USDT", 106.0, 104.0, 105.0).await;

        // TRs: max(2, 6, 4) = 6 then max(2, 1, 1) = 2; ATR = 4
        let atr = estimator.atr("BTC-USDT").await.unwrap();
        assert!((atr - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_historical_volatility_zero_for_flat_closes() {
        let estimator = AtrEstimator::new(2, 30);
        for _ in 0..10 {
            estimator.update("BTC-USDT", 101.0, 99.0, 100.0).await;
        }
        let vol = estimator.historical_volatility("BTC-USDT").await.unwrap();
        assert!(vol.abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_historical_volatility_unavailable_with_one_close() {
        let estimator = AtrEstimator::new(2, 30);
        estimator.update("BTC-USDT", 101.0, 99.0, 100.0).await;
        assert!(estimator
            .historical_volatility("BTC-USDT")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_recent_average_tracks_atr() {
        let estimator = AtrEstimator::new(3, 30);
        for _ in 0..10 {
            estimator.update("BTC-USDT", 105.0, 100.0, 102.0).await;
        }
        let avg = estimator.recent_average_atr("BTC-USDT").await.unwrap();
        assert!((avg - 5.0).abs() < 1e-9);
    }
}
