//! Average Directional Index with Wilder smoothing.
//!
//! Directional movement and true range are smoothed over `period` bars,
//! DX is derived from the DI spread, and the ADX itself is seeded as the
//! mean of the first `period` DX values before switching to the Wilder
//! recurrence. Unavailable until that full warm-up completes.

use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct AdxSeries {
    prev: Option<(f64, f64, f64)>,
    /// Count of (TR, DM) samples folded in so far
    samples: usize,
    sm_tr: f64,
    sm_plus_dm: f64,
    sm_minus_dm: f64,
    /// DX accumulation while seeding the ADX
    dx_sum: f64,
    dx_count: usize,
    adx: Option<f64>,
}

/// Per-symbol trend-strength estimator in [0, 100].
pub struct AdxEstimator {
    period: usize,
    state: RwLock<HashMap<String, AdxSeries>>,
}

impl AdxEstimator {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Fold in a completed bar.
    pub async fn update(&self, symbol: &str, high: f64, low: f64, close: f64) {
        let period = self.period as f64;
        let mut state = self.state.write().await;
        let series = state.entry(symbol.to_string()).or_default();

        let Some((prev_high, prev_low, prev_close)) = series.prev else {
            series.prev = Some((high, low, close));
            return;
        };
        series.prev = Some((high, low, close));

        let true_range = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());

        let up_move = high - prev_high;
        let down_move = prev_low - low;
        let plus_dm = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        let minus_dm = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };

        series.samples += 1;

        if series.samples <= self.period {
            // Seed the smoothed values with plain sums
            series.sm_tr += true_range;
            series.sm_plus_dm += plus_dm;
            series.sm_minus_dm += minus_dm;
            if series.samples < self.period {
                return;
            }
        } else {
            series.sm_tr = series.sm_tr - series.sm_tr / period + true_range;
            series.sm_plus_dm = series.sm_plus_dm - series.sm_plus_dm / period + plus_dm;
            series.sm_minus_dm = series.sm_minus_dm - series.sm_minus_dm / period + minus_dm;
        }

        if series.sm_tr <= 0.0 {
            return;
        }
        let plus_di = 100.0 * series.sm_plus_dm / series.sm_tr;
        let minus_di = 100.0 * series.sm_minus_dm / series.sm_tr;
        let di_sum = plus_di + minus_di;
        if di_sum <= 0.0 {
            return;
        }
        let dx = 100.0 * (plus_di - minus_di).abs() / di_sum;

        match series.adx {
            Some(adx) => {
                series.adx = Some((adx * (period - 1.0) + dx) / period);
            }
            None => {
                series.dx_sum += dx;
                series.dx_count += 1;
                if series.dx_count >= self.period {
                    series.adx = Some(series.dx_sum / series.dx_count as f64);
                }
            }
        }
    }

    /// Current ADX; `None` until the smoothing has fully warmed up.
    pub async fn adx(&self, symbol: &str) -> Option<f64> {
        self.state.read().await.get(symbol)?.adx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn feed_trend(estimator: &AdxEstimator, symbol: &str, bars: usize, step: f64) {
        let mut price = 100.0;
        for _ in 0..bars {
            estimator
                .update(symbol, price + 1.0, price - 1.0, price)
                .await;
            price += step;
        }
    }

    #[tokio::test]
    async fn test_adx_unavailable_before_warmup() {
        let estimator = AdxEstimator::new(14);
        // Warm-up needs roughly two periods of bars
        feed_trend(&estimator, "BTC-USDT", 14, 2.0).await;
        assert!(estimator.adx("BTC-USDT").await.is_none());
    }

    #[tokio::test]
    async fn test_strong_trend_reads_high_adx() {
        let estimator = AdxEstimator::new(14);
        feed_trend(&estimator, "BTC-USDT", 60, 2.0).await;

        let adx = estimator.adx("BTC-USDT").await.unwrap();
        assert!(adx > 25.0, "steady uptrend should read trending, got {}", adx);
        assert!(adx <= 100.0);
    }

    #[tokio::test]
    async fn test_alternating_market_reads_low_adx() {
        let estimator = AdxEstimator::new(14);
        // Price oscillates so up and down movement cancel out
        for i in 0..80 {
            let price = if i % 2 == 0 { 100.0 } else { 102.0 };
            estimator
                .update("BTC-USDT", price + 1.0, price - 1.0, price)
                .await;
        }

        let adx = estimator.adx("BTC-USDT").await.unwrap();
        assert!(adx < 25.0, "choppy series should not read trending, got {}", adx);
    }

    #[tokio::test]
    async fn test_symbols_are_independent() {
        let estimator = AdxEstimator::new(14);
        feed_trend(&estimator, "BTC-USDT", 60, 2.0).await;

        assert!(estimator.adx("BTC-USDT").await.is_some());
        assert!(estimator.adx("ETH-USDT").await.is_none());
    }
}
