//! Configuration management for the trading engine.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Engine-level settings (capital, symbols, loop cadence)
    #[serde(default)]
    pub engine: EngineConfig,
    /// Signal and risk parameters
    #[serde(default)]
    pub trading: TradingConfig,
    /// Market data collection settings
    #[serde(default)]
    pub market_data: MarketDataConfig,
    /// Order execution parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// KuCoin API credentials
    #[serde(default)]
    pub kucoin: KucoinConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Starting capital in quote currency
    #[serde(default = "default_initial_capital")]
    pub initial_capital: Decimal,
    /// Symbols to trade
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    /// Decision loop tick interval in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Minimum seconds between signals for the same symbol
    #[serde(default = "default_min_signal_interval_secs")]
    pub min_signal_interval_secs: u64,
    /// Seconds between monitoring status reports
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Fraction of capital risked per trade (0.0-1.0)
    #[serde(default = "default_base_risk_percent")]
    pub base_risk_percent: Decimal,
    /// Maximum number of open positions
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,
    /// Maximum positions in correlated assets
    #[serde(default = "default_max_correlated_positions")]
    pub max_correlated_positions: usize,
    /// Pairwise correlation above which two symbols are treated as one bet
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,

    // Signal gates
    /// Minimum composite strength for a directional signal
    #[serde(default = "default_signal_strength_threshold")]
    pub signal_strength_threshold: f64,
    /// Minimum volume velocity for an actionable signal
    #[serde(default = "default_volume_velocity_threshold")]
    pub volume_velocity_threshold: f64,
    /// Maximum relative distance from VWAP for an actionable signal
    #[serde(default = "default_vwap_distance_threshold")]
    pub vwap_distance_threshold: f64,

    // Stops and targets
    /// Stop distance in ATR multiples for ranging markets
    #[serde(default = "default_base_stop_atr_multiple")]
    pub base_stop_atr_multiple: f64,
    /// Target distance in ATR multiples for ranging markets
    #[serde(default = "default_base_target_atr_multiple")]
    pub base_target_atr_multiple: f64,

    // Regime detection
    /// ADX above which the market is considered trending
    #[serde(default = "default_trending_adx_threshold")]
    pub trending_adx_threshold: f64,
    /// ADX below which the market is considered ranging
    #[serde(default = "default_ranging_adx_threshold")]
    pub ranging_adx_threshold: f64,
    /// ATR spike multiple that flags a volatile regime
    #[serde(default = "default_high_volatility_atr_multiple")]
    pub high_volatility_atr_multiple: f64,

    // Estimators
    /// ATR / ADX period in bars
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    /// Bars of close history for historical volatility
    #[serde(default = "default_volatility_lookback")]
    pub volatility_lookback: usize,

    /// Maximum tolerated drawdown before new entries are blocked (0.0-1.0)
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// Order book depth per side
    #[serde(default = "default_orderbook_depth")]
    pub orderbook_depth: usize,
    /// Order book poll interval in milliseconds
    #[serde(default = "default_update_frequency_ms")]
    pub update_frequency_ms: u64,
    /// Venues receiving the primary allocation tier
    #[serde(default = "default_primary_venues")]
    pub primary_venues: Vec<String>,
    /// Venues receiving the secondary allocation tier
    #[serde(default)]
    pub secondary_venues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Per-venue quote fetch timeout in milliseconds
    #[serde(default = "default_quote_timeout_ms")]
    pub quote_timeout_ms: u64,
    /// Per-leg order placement timeout in seconds
    #[serde(default = "default_order_timeout_secs")]
    pub order_timeout_secs: u64,
    /// Place legs as IOC limit orders instead of plain limit
    #[serde(default = "default_use_ioc_orders")]
    pub use_ioc_orders: bool,
    /// Fraction of quantity routed to primary venues
    #[serde(default = "default_primary_venue_allocation")]
    pub primary_venue_allocation: Decimal,
    /// Fraction of quantity routed to secondary venues
    #[serde(default = "default_secondary_venue_allocation")]
    pub secondary_venue_allocation: Decimal,
    /// Fraction reserved for dark-pool routing (not yet wired to a venue)
    #[serde(default = "default_dark_pool_allocation")]
    pub dark_pool_allocation: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KucoinConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub api_passphrase: String,
    /// Use the sandbox environment instead of production
    #[serde(default)]
    pub sandbox: bool,
}

// Default value functions

fn default_initial_capital() -> Decimal {
    Decimal::new(100_000, 0)
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTC-USDT".to_string(),
        "ETH-USDT".to_string(),
        "SOL-USDT".to_string(),
    ]
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_min_signal_interval_secs() -> u64 {
    60
}

fn default_report_interval_secs() -> u64 {
    300
}

fn default_base_risk_percent() -> Decimal {
    Decimal::new(25, 4) // 0.0025 = 0.25% per trade
}

fn default_max_concurrent_positions() -> usize {
    10
}

fn default_max_correlated_positions() -> usize {
    3
}

fn default_correlation_threshold() -> f64 {
    0.7
}

fn default_signal_strength_threshold() -> f64 {
    2.5
}

fn default_volume_velocity_threshold() -> f64 {
    1.5
}

fn default_vwap_distance_threshold() -> f64 {
    0.005 // 0.5%
}

fn default_base_stop_atr_multiple() -> f64 {
    0.75
}

fn default_base_target_atr_multiple() -> f64 {
    2.0
}

fn default_trending_adx_threshold() -> f64 {
    25.0
}

fn default_ranging_adx_threshold() -> f64 {
    20.0
}

fn default_high_volatility_atr_multiple() -> f64 {
    2.0
}

fn default_atr_period() -> usize {
    14
}

fn default_volatility_lookback() -> usize {
    30
}

fn default_max_drawdown() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_orderbook_depth() -> usize {
    20
}

fn default_update_frequency_ms() -> u64 {
    100
}

fn default_primary_venues() -> Vec<String> {
    vec!["kucoin".to_string()]
}

fn default_quote_timeout_ms() -> u64 {
    2000
}

fn default_order_timeout_secs() -> u64 {
    5
}

fn default_use_ioc_orders() -> bool {
    true
}

fn default_primary_venue_allocation() -> Decimal {
    Decimal::new(6, 1) // 0.6
}

fn default_secondary_venue_allocation() -> Decimal {
    Decimal::new(3, 1) // 0.3
}

fn default_dark_pool_allocation() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("OFT"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values. A failure here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.engine.initial_capital > Decimal::ZERO,
            "initial_capital must be positive"
        );

        anyhow::ensure!(!self.engine.symbols.is_empty(), "symbols must not be empty");

        anyhow::ensure!(
            self.trading.base_risk_percent > Decimal::ZERO
                && self.trading.base_risk_percent < Decimal::new(1, 2),
            "base_risk_percent must be between 0 and 1%"
        );

        anyhow::ensure!(
            self.trading.max_concurrent_positions >= 1,
            "max_concurrent_positions must allow at least 1 position"
        );

        anyhow::ensure!(
            self.trading.signal_strength_threshold > 1.0,
            "signal_strength_threshold must be > 1"
        );

        anyhow::ensure!(
            self.trading.max_drawdown > Decimal::ZERO && self.trading.max_drawdown <= Decimal::ONE,
            "max_drawdown must be between 0 and 1"
        );

        anyhow::ensure!(self.trading.atr_period >= 2, "atr_period must be at least 2");

        anyhow::ensure!(
            self.market_data.orderbook_depth >= 1,
            "orderbook_depth must be at least 1"
        );

        anyhow::ensure!(
            !self.market_data.primary_venues.is_empty(),
            "at least one primary venue is required"
        );

        let total_allocation = self.execution.primary_venue_allocation
            + self.execution.secondary_venue_allocation
            + self.execution.dark_pool_allocation;
        anyhow::ensure!(
            self.execution.primary_venue_allocation > Decimal::ZERO
                && total_allocation <= Decimal::ONE,
            "venue allocations must be positive and sum to at most 1"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            trading: TradingConfig::default(),
            market_data: MarketDataConfig::default(),
            execution: ExecutionConfig::default(),
            kucoin: KucoinConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
            symbols: default_symbols(),
            tick_interval_ms: default_tick_interval_ms(),
            min_signal_interval_secs: default_min_signal_interval_secs(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            base_risk_percent: default_base_risk_percent(),
            max_concurrent_positions: default_max_concurrent_positions(),
            max_correlated_positions: default_max_correlated_positions(),
            correlation_threshold: default_correlation_threshold(),
            signal_strength_threshold: default_signal_strength_threshold(),
            volume_velocity_threshold: default_volume_velocity_threshold(),
            vwap_distance_threshold: default_vwap_distance_threshold(),
            base_stop_atr_multiple: default_base_stop_atr_multiple(),
            base_target_atr_multiple: default_base_target_atr_multiple(),
            trending_adx_threshold: default_trending_adx_threshold(),
            ranging_adx_threshold: default_ranging_adx_threshold(),
            high_volatility_atr_multiple: default_high_volatility_atr_multiple(),
            atr_period: default_atr_period(),
            volatility_lookback: default_volatility_lookback(),
            max_drawdown: default_max_drawdown(),
        }
    }
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            orderbook_depth: default_orderbook_depth(),
            update_frequency_ms: default_update_frequency_ms(),
            primary_venues: default_primary_venues(),
            secondary_venues: Vec::new(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            quote_timeout_ms: default_quote_timeout_ms(),
            order_timeout_secs: default_order_timeout_secs(),
            use_ioc_orders: default_use_ioc_orders(),
            primary_venue_allocation: default_primary_venue_allocation(),
            secondary_venue_allocation: default_secondary_venue_allocation(),
            dark_pool_allocation: default_dark_pool_allocation(),
        }
    }
}

impl Default for KucoinConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            api_passphrase: String::new(),
            sandbox: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capital_rejected() {
        let mut config = Config::default();
        config.engine.initial_capital = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_excessive_risk_rejected() {
        let mut config = Config::default();
        config.trading.base_risk_percent = Decimal::new(5, 2); // 5% per trade
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overallocated_venues_rejected() {
        let mut config = Config::default();
        config.execution.primary_venue_allocation = Decimal::new(8, 1);
        config.execution.secondary_venue_allocation = Decimal::new(3, 1);
        assert!(config.validate().is_err());
    }
}
