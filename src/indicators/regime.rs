//! Market regime classification from trend strength and volatility spikes.

use crate::indicators::{AdxEstimator, AtrEstimator};
use std::fmt;
use std::sync::Arc;

/// Market regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketRegime {
    Trending,
    Ranging,
    Volatile,
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketRegime::Trending => write!(f, "TRENDING"),
            MarketRegime::Ranging => write!(f, "RANGING"),
            MarketRegime::Volatile => write!(f, "VOLATILE"),
        }
    }
}

/// Classifies the current regime for a symbol. The regime is always derived
/// on demand from the estimators, never stored.
pub struct RegimeDetector {
    atr: Arc<AtrEstimator>,
    adx: Arc<AdxEstimator>,
    trending_adx_threshold: f64,
    ranging_adx_threshold: f64,
    spike_multiple: f64,
}

impl RegimeDetector {
    pub fn new(
        atr: Arc<AtrEstimator>,
        adx: Arc<AdxEstimator>,
        trending_adx_threshold: f64,
        ranging_adx_threshold: f64,
        spike_multiple: f64,
    ) -> Self {
        Self {
            atr,
            adx,
            trending_adx_threshold,
            ranging_adx_threshold,
            spike_multiple,
        }
    }

    /// Current regime for a symbol.
    pub async fn regime(&self, symbol: &str) -> MarketRegime {
        let spike = self.volatility_spike(symbol).await;
        let adx = self.adx.adx(symbol).await;
        self.classify(adx, spike)
    }

    /// The latest ATR spiking above its recent average flags a volatile
    /// market regardless of trend strength.
    async fn volatility_spike(&self, symbol: &str) -> bool {
        let (Some(latest), Some(average)) = (
            self.atr.atr(symbol).await,
            self.atr.recent_average_atr(symbol).await,
        ) else {
            return false;
        };
        average > 0.0 && latest >= self.spike_multiple * average
    }

    /// Pure classification rule: spike wins, then the ADX bands; ties and
    /// unavailable ADX both resolve to ranging.
    pub fn classify(&self, adx: Option<f64>, volatility_spike: bool) -> MarketRegime {
        if volatility_spike {
            return MarketRegime::Volatile;
        }
        match adx {
            Some(value) if value > self.trending_adx_threshold => MarketRegime::Trending,
            Some(value) if value < self.ranging_adx_threshold => MarketRegime::Ranging,
            _ => MarketRegime::Ranging,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> RegimeDetector {
        RegimeDetector::new(
            Arc::new(AtrEstimator::new(14, 30)),
            Arc::new(AdxEstimator::new(14)),
            25.0,
            20.0,
            2.0,
        )
    }

    #[test]
    fn test_spike_dominates_trend() {
        let d = detector();
        assert_eq!(d.classify(Some(40.0), true), MarketRegime::Volatile);
    }

    #[test]
    fn test_adx_bands() {
        let d = detector();
        assert_eq!(d.classify(Some(30.0), false), MarketRegime::Trending);
        assert_eq!(d.classify(Some(15.0), false), MarketRegime::Ranging);
    }

    #[test]
    fn test_middle_band_and_unavailable_default_to_ranging() {
        let d = detector();
        assert_eq!(d.classify(Some(22.0), false), MarketRegime::Ranging);
        assert_eq!(d.classify(Some(25.0), false), MarketRegime::Ranging);
        assert_eq!(d.classify(None, false), MarketRegime::Ranging);
    }

    #[tokio::test]
    async fn test_unwarmed_symbol_is_ranging() {
        let d = detector();
        assert_eq!(d.regime("BTC-USDT").await, MarketRegime::Ranging);
    }
}
