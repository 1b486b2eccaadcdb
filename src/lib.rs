//! Quantfolio - a portfolio backtesting and risk analysis engine.
//!
//! # Overview
//!
//! Quantfolio replays multi-asset allocation strategies against historical
//! prices and stress-tests the results:
//!
//! - **Covariance estimation**: sample, Ledoit-Wolf shrinkage, and EWMA, all
//!   PSD-enforced
//! - **Allocation signals**: equal-weight, fractional Kelly, and closed-form
//!   mean-variance, with position and leverage caps
//! - **Daily backtest engine**: mark-to-market, calendar-driven rebalancing,
//!   basis-point transaction costs and slippage
//! - **Walk-forward validation**: in-sample/out-of-sample comparison with an
//!   independent lookahead check at the split
//! - **Monte Carlo simulation**: seeded, parallel forward wealth ensembles,
//!   univariate or correlated multi-asset
//! - **Risk metrics**: Sharpe, Sortino, drawdown, VaR/CVaR, Calmar, rolling
//!   Sharpe
//!
//! # Quick Start
//!
//! ```no_run
//! use quantfolio::{
//!     config::EngineConfig,
//!     data::PriceMatrix,
//!     engine::BacktestEngine,
//!     signal::SignalGenerator,
//! };
//!
//! let config = EngineConfig::default();
//! let prices = PriceMatrix::from_csv("data/prices.csv").unwrap();
//!
//! let engine = BacktestEngine::new(config).unwrap();
//! let result = engine.run(&prices, &SignalGenerator::EqualWeight).unwrap();
//!
//! println!("{}", result.summary());
//! ```
//!
//! # Modules
//!
//! - [`config`]: TOML-backed engine configuration
//! - [`data`]: price table, return series, synthetic data generation
//! - [`covariance`]: covariance estimators and PSD utilities
//! - [`signal`]: weight vectors and signal generators
//! - [`engine`]: the daily backtest state machine
//! - [`metrics`]: stateless risk/performance metrics
//! - [`walkforward`]: in-sample/out-of-sample harness
//! - [`monte_carlo`]: forward wealth simulation

pub mod config;
pub mod covariance;
pub mod data;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod monte_carlo;
pub mod signal;
pub mod walkforward;

// Re-exports for convenience
pub use config::EngineConfig;
pub use covariance::{CovMethod, CovarianceEstimator};
pub use data::{PriceMatrix, ReturnSeries};
pub use engine::{BacktestEngine, BacktestResult, RebalanceFreq};
pub use error::{PortfolioError, Result};
pub use metrics::MetricsSummary;
pub use monte_carlo::{MonteCarloConfig, MonteCarloResult, MonteCarloSimulator, SimulationMode};
pub use signal::{MvObjective, SignalGenerator, WeightVector};
pub use walkforward::{Anchor, WalkForwardConfig, WalkForwardHarness, WalkForwardResult};
