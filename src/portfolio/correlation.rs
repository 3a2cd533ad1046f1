//! Rolling cross-asset return correlation.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Minimum aligned return observations for a meaningful correlation.
const MIN_ALIGNED_RETURNS: usize = 6;

/// Symmetric pairwise correlation matrix over a symbol set.
///
/// Unknown pairs read as 0.0 (uncorrelated) and the diagonal as 1.0, so a
/// missing estimate never blocks a trade by accident.
#[derive(Debug, Clone)]
pub struct CorrelationMatrix {
    values: HashMap<(String, String), f64>,
}

impl CorrelationMatrix {
    /// Identity matrix: nothing correlated with anything else.
    pub fn identity() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    pub(crate) fn set(&mut self, a: &str, b: &str, value: f64) {
        let key = Self::key(a, b);
        self.values.insert(key, value);
    }

    /// Pairwise correlation in [-1, 1].
    pub fn get(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        self.values.get(&Self::key(a, b)).copied().unwrap_or(0.0)
    }

    fn key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }
}

/// Accumulates per-symbol price observations and computes the rolling
/// correlation matrix over a day-bounded lookback.
pub struct CorrelationTracker {
    lookback: Duration,
    state: RwLock<HashMap<String, VecDeque<(DateTime<Utc>, f64)>>>,
}

impl CorrelationTracker {
    pub fn new(lookback_days: i64) -> Self {
        Self {
            lookback: Duration::days(lookback_days),
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Record a price observation, evicting anything past the lookback.
    pub async fn record_price(&self, symbol: &str, price: f64) {
        let mut state = self.state.write().await;
        let series = state.entry(symbol.to_string()).or_default();
        let now = Utc::now();
        series.push_back((now, price));

        let cutoff = now - self.lookback;
        while series.front().is_some_and(|(ts, _)| *ts < cutoff) {
            series.pop_front();
        }
    }

    /// Correlation matrix for the given symbols. Falls back to identity
    /// unless at least two symbols carry the minimum aligned return count.
    pub async fn matrix(&self, symbols: &[String]) -> CorrelationMatrix {
        let state = self.state.read().await;

        let returns: HashMap<&str, Vec<f64>> = symbols
            .iter()
            .filter_map(|symbol| {
                let series = state.get(symbol.as_str())?;
                Some((symbol.as_str(), Self::returns_of(series)))
            })
            .collect();

        let usable = returns
            .values()
            .filter(|r| r.len() >= MIN_ALIGNED_RETURNS)
            .count();
        if usable < 2 {
            return CorrelationMatrix::identity();
        }

        let mut matrix = CorrelationMatrix::identity();
        for (i, a) in symbols.iter().enumerate() {
            for b in symbols.iter().skip(i + 1) {
                let (Some(ra), Some(rb)) = (returns.get(a.as_str()), returns.get(b.as_str()))
                else {
                    continue;
                };
                // Align on the trailing window both series cover
                let n = ra.len().min(rb.len());
                if n < MIN_ALIGNED_RETURNS {
                    continue;
                }
                let a_tail = &ra[ra.len() - n..];
                let b_tail = &rb[rb.len() - n..];
                if let Some(rho) = Self::pearson(a_tail, b_tail) {
                    matrix.set(a, b, rho);
                }
            }
        }
        matrix
    }

    fn returns_of(series: &VecDeque<(DateTime<Utc>, f64)>) -> Vec<f64> {
        let prices: Vec<f64> = series.iter().map(|(_, p)| *p).collect();
        prices
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect()
    }

    fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
        let n = a.len() as f64;
        let mean_a = a.iter().sum::<f64>() / n;
        let mean_b = b.iter().sum::<f64>() / n;

        let mut cov = 0.0;
        let mut var_a = 0.0;
        let mut var_b = 0.0;
        for (x, y) in a.iter().zip(b.iter()) {
            let da = x - mean_a;
            let db = y - mean_b;
            cov += da * db;
            var_a += da * da;
            var_b += db * db;
        }

        if var_a <= 0.0 || var_b <= 0.0 {
            return None;
        }
        Some(cov / (var_a.sqrt() * var_b.sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn feed(tracker: &CorrelationTracker, symbol: &str, prices: &[f64]) {
        for price in prices {
            tracker.record_price(symbol, *price).await;
        }
    }

    #[tokio::test]
    async fn test_identity_without_enough_history() {
        let tracker = CorrelationTracker::new(60);
        feed(&tracker, "BTC-USDT", &[100.0, 101.0]).await;
        feed(&tracker, "ETH-USDT", &[50.0, 51.0]).await;

        let matrix = tracker
            .matrix(&["BTC-USDT".to_string(), "ETH-USDT".to_string()])
            .await;
        assert_eq!(matrix.get("BTC-USDT", "ETH-USDT"), 0.0);
        assert_eq!(matrix.get("BTC-USDT", "BTC-USDT"), 1.0);
    }

    #[tokio::test]
    async fn test_perfectly_correlated_series() {
        let tracker = CorrelationTracker::new(60);
        let base: Vec<f64> = (0..10).map(|i| 100.0 + (i % 3) as f64).collect();
        let scaled: Vec<f64> = base.iter().map(|p| p * 2.0).collect();
        feed(&tracker, "BTC-USDT", &base).await;
        feed(&tracker, "WBTC-USDT", &scaled).await;

        let matrix = tracker
            .matrix(&["BTC-USDT".to_string(), "WBTC-USDT".to_string()])
            .await;
        let rho = matrix.get("BTC-USDT", "WBTC-USDT");
        assert!(rho > 0.99, "expected near-perfect correlation, got {}", rho);
    }

    #[tokio::test]
    async fn test_anticorrelated_series() {
        let tracker = CorrelationTracker::new(60);
        let up: Vec<f64> = (0..10).map(|i| 100.0 + (i % 3) as f64).collect();
        let down: Vec<f64> = (0..10).map(|i| 100.0 - (i % 3) as f64).collect();
        feed(&tracker, "UP-USDT", &up).await;
        feed(&tracker, "DOWN-USDT", &down).await;

        let matrix = tracker
            .matrix(&["UP-USDT".to_string(), "DOWN-USDT".to_string()])
            .await;
        assert!(matrix.get("UP-USDT", "DOWN-USDT") < -0.99);
    }

    #[test]
    fn test_matrix_is_symmetric() {
        let mut matrix = CorrelationMatrix::identity();
        matrix.set("A", "B", 0.8);
        assert_eq!(matrix.get("A", "B"), 0.8);
        assert_eq!(matrix.get("B", "A"), 0.8);
    }
}
