//! Session-windowed volume-weighted average price.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Session window for VWAP observations.
const SESSION_WINDOW_HOURS: i64 = 8;

#[derive(Debug, Clone, Copy)]
struct TradeObs {
    timestamp: DateTime<Utc>,
    price: f64,
    volume: f64,
}

/// Rolling VWAP with volume-weighted bands, one series per symbol.
pub struct VwapEstimator {
    window: Duration,
    state: RwLock<HashMap<String, VecDeque<TradeObs>>>,
}

impl Default for VwapEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl VwapEstimator {
    pub fn new() -> Self {
        Self {
            window: Duration::hours(SESSION_WINDOW_HOURS),
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Append a (price, volume) observation and evict anything older than
    /// the session window.
    pub async fn record(&self, symbol: &str, price: f64, volume: f64) {
        let mut state = self.state.write().await;
        let series = state.entry(symbol.to_string()).or_default();

        let now = Utc::now();
        series.push_back(TradeObs {
            timestamp: now,
            price,
            volume,
        });

        let cutoff = now - self.window;
        while series.front().is_some_and(|obs| obs.timestamp < cutoff) {
            series.pop_front();
        }
    }

    /// Σ(price·volume) / Σvolume over the session window. `None` without
    /// observations or with zero total volume.
    pub async fn vwap(&self, symbol: &str) -> Option<f64> {
        let state = self.state.read().await;
        let series = state.get(symbol)?;
        Self::vwap_of(series)
    }

    /// VWAP with bands at `k` volume-weighted standard deviations:
    /// (lower, vwap, upper).
    pub async fn bands(&self, symbol: &str, k: f64) -> Option<(f64, f64, f64)> {
        let state = self.state.read().await;
        let series = state.get(symbol)?;
        let vwap = Self::vwap_of(series)?;

        let total_volume: f64 = series.iter().map(|obs| obs.volume).sum();
        let weighted_var: f64 = series
            .iter()
            .map(|obs| (obs.price - vwap).powi(2) * obs.volume)
            .sum::<f64>()
            / total_volume;
        let std_dev = weighted_var.sqrt();

        Some((vwap - k * std_dev, vwap, vwap + k * std_dev))
    }

    fn vwap_of(series: &VecDeque<TradeObs>) -> Option<f64> {
        if series.is_empty() {
            return None;
        }
        let total_volume: f64 = series.iter().map(|obs| obs.volume).sum();
        if total_volume <= 0.0 {
            return None;
        }
        let weighted: f64 = series.iter().map(|obs| obs.price * obs.volume).sum();
        Some(weighted / total_volume)
    }
}
