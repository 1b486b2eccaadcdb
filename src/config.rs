//! Engine configuration.
//!
//! All tunable parameters live in a single [`EngineConfig`] value, constructed
//! once at startup (defaults or a TOML file) and passed by reference to every
//! component. The value is never mutated after construction.

use crate::covariance::CovMethod;
use crate::engine::RebalanceFreq;
use crate::error::{PortfolioError, Result};
use crate::monte_carlo::SimulationMode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Asset universe (informational; the price table defines the actual columns).
    #[serde(default)]
    pub assets: Vec<String>,
    /// Backtest start date (inclusive). None = from the first available date.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Backtest end date (inclusive). None = to the last available date.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Starting portfolio value.
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    /// Rebalance frequency.
    #[serde(default)]
    pub rebalance_freq: RebalanceFreq,
    /// Transaction cost in basis points on traded notional.
    #[serde(default = "default_transaction_cost_bps")]
    pub transaction_cost_bps: f64,
    /// Slippage in basis points on traded notional.
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: f64,
    /// Annualized risk-free rate.
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// Kelly scaling factor in (0, 1]. 0.5 = half-Kelly.
    #[serde(default = "default_kelly_fraction")]
    pub kelly_fraction: f64,
    /// Cap on any single asset's absolute weight.
    #[serde(default = "default_max_position_weight")]
    pub max_position_weight: f64,
    /// Cap on total gross exposure (sum of absolute weights).
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,
    /// Trailing window (trading days) for return/covariance estimation.
    #[serde(default = "default_lookback_window")]
    pub lookback_window: usize,
    /// Covariance estimation method.
    #[serde(default)]
    pub cov_method: CovMethod,
    /// Decay factor for EWMA covariance.
    #[serde(default = "default_ewma_lambda")]
    pub ewma_lambda: f64,
    /// Number of Monte Carlo paths.
    #[serde(default = "default_mc_num_paths")]
    pub mc_num_paths: usize,
    /// Monte Carlo forward horizon in trading days.
    #[serde(default = "default_mc_horizon_days")]
    pub mc_horizon_days: usize,
    /// Monte Carlo seed. Identical seeds reproduce identical ensembles.
    #[serde(default = "default_mc_seed")]
    pub mc_seed: u64,
    /// Retain the full path × day matrix (memory-heavy) or summaries only.
    #[serde(default)]
    pub mc_store_paths: bool,
    /// Univariate portfolio-return simulation or correlated multi-asset simulation.
    #[serde(default)]
    pub mc_mode: SimulationMode,
    /// Confidence level for VaR/CVaR (e.g. 0.95).
    #[serde(default = "default_var_confidence")]
    pub var_confidence: f64,
    /// Trailing window for rolling Sharpe.
    #[serde(default = "default_rolling_sharpe_window")]
    pub rolling_sharpe_window: usize,
}

fn default_initial_capital() -> f64 {
    1_000_000.0
}
fn default_transaction_cost_bps() -> f64 {
    10.0
}
fn default_slippage_bps() -> f64 {
    5.0
}
fn default_risk_free_rate() -> f64 {
    0.04
}
fn default_kelly_fraction() -> f64 {
    0.5
}
fn default_max_position_weight() -> f64 {
    0.40
}
fn default_max_leverage() -> f64 {
    1.5
}
fn default_lookback_window() -> usize {
    252
}
fn default_ewma_lambda() -> f64 {
    0.94
}
fn default_mc_num_paths() -> usize {
    50_000
}
fn default_mc_horizon_days() -> usize {
    252
}
fn default_mc_seed() -> u64 {
    42
}
fn default_var_confidence() -> f64 {
    0.95
}
fn default_rolling_sharpe_window() -> usize {
    252
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            assets: Vec::new(),
            start_date: None,
            end_date: None,
            initial_capital: default_initial_capital(),
            rebalance_freq: RebalanceFreq::default(),
            transaction_cost_bps: default_transaction_cost_bps(),
            slippage_bps: default_slippage_bps(),
            risk_free_rate: default_risk_free_rate(),
            kelly_fraction: default_kelly_fraction(),
            max_position_weight: default_max_position_weight(),
            max_leverage: default_max_leverage(),
            lookback_window: default_lookback_window(),
            cov_method: CovMethod::default(),
            ewma_lambda: default_ewma_lambda(),
            mc_num_paths: default_mc_num_paths(),
            mc_horizon_days: default_mc_horizon_days(),
            mc_seed: default_mc_seed(),
            mc_store_paths: false,
            mc_mode: SimulationMode::default(),
            var_confidence: default_var_confidence(),
            rolling_sharpe_window: default_rolling_sharpe_window(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PortfolioError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate cross-field invariants. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        if self.initial_capital <= 0.0 {
            return Err(PortfolioError::ConfigError(
                "initial_capital must be positive".to_string(),
            ));
        }
        if self.kelly_fraction <= 0.0 || self.kelly_fraction > 1.0 {
            return Err(PortfolioError::ConfigError(format!(
                "kelly_fraction must be in (0, 1], got {}",
                self.kelly_fraction
            )));
        }
        if self.max_position_weight <= 0.0 {
            return Err(PortfolioError::ConfigError(
                "max_position_weight must be positive".to_string(),
            ));
        }
        if self.max_leverage < self.max_position_weight {
            return Err(PortfolioError::ConfigError(
                "max_leverage must be at least max_position_weight".to_string(),
            ));
        }
        if self.lookback_window < 2 {
            return Err(PortfolioError::ConfigError(
                "lookback_window must be at least 2".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.ewma_lambda) {
            return Err(PortfolioError::ConfigError(format!(
                "ewma_lambda must be in [0, 1), got {}",
                self.ewma_lambda
            )));
        }
        if !(0.0..1.0).contains(&self.var_confidence) || self.var_confidence < 0.5 {
            return Err(PortfolioError::ConfigError(format!(
                "var_confidence must be in [0.5, 1), got {}",
                self.var_confidence
            )));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start >= end {
                return Err(PortfolioError::ConfigError(format!(
                    "start_date {} must precede end_date {}",
                    start, end
                )));
            }
        }
        Ok(())
    }

    /// Per-rebalance cost rate applied to traded notional.
    pub fn cost_rate(&self) -> f64 {
        (self.transaction_cost_bps + self.slippage_bps) / 10_000.0
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Quantfolio engine configuration

assets = ["SPY", "QQQ", "TLT", "GLD"]
# start_date = "2015-01-01"
# end_date = "2024-12-31"

initial_capital = 1000000.0
rebalance_freq = "monthly"      # "daily" or "monthly"
transaction_cost_bps = 10.0
slippage_bps = 5.0

risk_free_rate = 0.04
kelly_fraction = 0.5            # 0.5 = half-Kelly
max_position_weight = 0.40
max_leverage = 1.5
lookback_window = 252
cov_method = "ledoit_wolf"      # "sample", "ledoit_wolf", or "ewma"
ewma_lambda = 0.94

mc_num_paths = 50000
mc_horizon_days = 252
mc_seed = 42
mc_store_paths = false
mc_mode = "univariate"          # "univariate" or "multi_asset"

var_confidence = 0.95
rolling_sharpe_window = 252
"#
        .to_string()
    }
}
