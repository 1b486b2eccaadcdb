//! Monte Carlo forward simulation.
//!
//! Calibrates a return distribution from realized history and simulates an
//! ensemble of forward wealth paths. Generation is parallel across paths but
//! deterministic: every path derives its own RNG from `seed + path_index`, so
//! neither thread count nor scheduling order can change a single draw, and
//! the aggregation step only reads the index-ordered terminal vector.

use crate::config::EngineConfig;
use crate::covariance::{nearest_psd, CovMethod, CovarianceEstimator};
use crate::data::ReturnSeries;
use crate::error::{PortfolioError, Result};
use crate::signal::WeightVector;
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

/// What the simulator draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimulationMode {
    /// I.i.d. normal draws calibrated from a single portfolio-return series.
    #[default]
    Univariate,
    /// Correlated asset draws from a Cholesky-factorized covariance,
    /// recombined through a fixed weight vector.
    MultiAsset,
}

/// Simulation parameters, usually lifted from [`EngineConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    pub num_paths: usize,
    pub horizon_days: usize,
    pub seed: u64,
    /// Keep the full path x day matrix. 50k paths x 252 days of f64 is
    /// ~100 MB, so this defaults off.
    pub store_paths: bool,
    pub mode: SimulationMode,
}

impl MonteCarloConfig {
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self {
            num_paths: config.mc_num_paths,
            horizon_days: config.mc_horizon_days,
            seed: config.mc_seed,
            store_paths: config.mc_store_paths,
            mode: config.mc_mode,
        }
    }
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            num_paths: 50_000,
            horizon_days: 252,
            seed: 42,
            store_paths: false,
            mode: SimulationMode::default(),
        }
    }
}

/// Terminal-wealth percentiles of the ensemble.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TerminalPercentiles {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

/// Ensemble summary, plus the raw paths when `store_paths` was set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub num_paths: usize,
    pub horizon_days: usize,
    pub initial_capital: f64,
    /// Fraction of paths ending above the starting capital.
    pub prob_profit: f64,
    pub mean_terminal_wealth: f64,
    pub median_terminal_wealth: f64,
    pub percentiles: TerminalPercentiles,
    /// Wealth per path per day, `num_paths x horizon_days`, index-ordered.
    pub equity_paths: Option<Vec<Vec<f64>>>,
}

impl MonteCarloResult {
    /// Serialize for external reporting tools. Heavy when `store_paths` was
    /// set; the path matrix serializes too.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn summary(&self) -> String {
        format!(
            "Monte Carlo: {} paths x {} days, P(profit) {:.1}%, median {:.0}, 5%..95% [{:.0}, {:.0}]",
            self.num_paths,
            self.horizon_days,
            self.prob_profit * 100.0,
            self.median_terminal_wealth,
            self.percentiles.p5,
            self.percentiles.p95
        )
    }
}

/// Generates and aggregates the forward ensemble.
pub struct MonteCarloSimulator {
    config: MonteCarloConfig,
}

impl MonteCarloSimulator {
    pub fn new(config: MonteCarloConfig) -> Result<Self> {
        if config.num_paths == 0 {
            return Err(PortfolioError::SimulationError(
                "num_paths must be positive".to_string(),
            ));
        }
        if config.horizon_days == 0 {
            return Err(PortfolioError::SimulationError(
                "horizon_days must be positive".to_string(),
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &MonteCarloConfig {
        &self.config
    }

    /// Univariate simulation from a realized daily-return series.
    ///
    /// Calibrates `N(mu, sigma)` from the series and draws i.i.d. daily
    /// returns per path. Wealth compounds as `capital * prod(1 + r)`.
    pub fn simulate(&self, daily_returns: &[f64], initial_capital: f64) -> Result<MonteCarloResult> {
        if daily_returns.len() < 2 {
            return Err(PortfolioError::SimulationError(format!(
                "need at least 2 realized returns to calibrate, have {}",
                daily_returns.len()
            )));
        }
        let n = daily_returns.len() as f64;
        let mu = daily_returns.iter().sum::<f64>() / n;
        let var = daily_returns.iter().map(|r| (r - mu).powi(2)).sum::<f64>() / (n - 1.0);
        let normal = Normal::new(mu, var.sqrt())
            .map_err(|e| PortfolioError::SimulationError(e.to_string()))?;

        info!(
            "Monte Carlo (univariate): {} paths x {} days, mu {:.5}, sigma {:.5}",
            self.config.num_paths,
            self.config.horizon_days,
            mu,
            var.sqrt()
        );

        self.run_paths(initial_capital, move |rng| normal.sample(rng))
    }

    /// Multi-asset simulation: correlated draws recombined through weights.
    ///
    /// Asset log returns are drawn from `mu + L z` with `L L^T` the
    /// PSD-floored sample covariance of the series, converted to simple
    /// returns, and weighted into a portfolio daily return, so compounding
    /// matches the univariate path. Falls back to an eigen square root when
    /// the covariance is singular and Cholesky fails.
    pub fn simulate_portfolio(
        &self,
        returns: &ReturnSeries,
        weights: &WeightVector,
        initial_capital: f64,
    ) -> Result<MonteCarloResult> {
        if weights.len() != returns.n_assets() {
            return Err(PortfolioError::SimulationError(format!(
                "{} weights for {} assets",
                weights.len(),
                returns.n_assets()
            )));
        }
        let estimator = CovarianceEstimator::new(CovMethod::Sample, 0.94, 2);
        let cov = estimator.estimate(returns)?;
        let factor = covariance_factor(&cov);
        let mu = returns.mean_daily();
        let w = DVector::from_column_slice(weights.as_slice());
        let n_assets = returns.n_assets();

        info!(
            "Monte Carlo (multi-asset): {} paths x {} days over {} assets",
            self.config.num_paths, self.config.horizon_days, n_assets
        );

        self.run_paths(initial_capital, move |rng| {
            let z = DVector::<f64>::from_fn(n_assets, |_, _| StandardNormal.sample(rng));
            let r = &mu + &factor * z;
            r.iter()
                .zip(w.iter())
                .map(|(log_r, weight)| weight * (log_r.exp() - 1.0))
                .sum::<f64>()
        })
    }

    /// Drive the ensemble: one RNG per path, aggregation over the
    /// index-ordered terminal vector.
    fn run_paths<F>(&self, initial_capital: f64, draw: F) -> Result<MonteCarloResult>
    where
        F: Fn(&mut StdRng) -> f64 + Sync + Send,
    {
        let horizon = self.config.horizon_days;
        let store = self.config.store_paths;
        let seed = self.config.seed;

        let outcomes: Vec<(f64, Option<Vec<f64>>)> = (0..self.config.num_paths)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let mut wealth = initial_capital;
                let mut path = if store {
                    Some(Vec::with_capacity(horizon))
                } else {
                    None
                };
                for _ in 0..horizon {
                    wealth *= 1.0 + draw(&mut rng);
                    if let Some(p) = path.as_mut() {
                        p.push(wealth);
                    }
                }
                (wealth, path)
            })
            .collect();

        let terminals: Vec<f64> = outcomes.iter().map(|(t, _)| *t).collect();
        let equity_paths = if store {
            Some(
                outcomes
                    .into_iter()
                    .filter_map(|(_, p)| p)
                    .collect::<Vec<_>>(),
            )
        } else {
            None
        };

        let profitable = terminals.iter().filter(|t| **t > initial_capital).count();
        let mean = terminals.iter().sum::<f64>() / terminals.len() as f64;

        let mut sorted = terminals.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let percentiles = TerminalPercentiles {
            p5: percentile(&sorted, 0.05),
            p25: percentile(&sorted, 0.25),
            p50: percentile(&sorted, 0.50),
            p75: percentile(&sorted, 0.75),
            p95: percentile(&sorted, 0.95),
        };

        Ok(MonteCarloResult {
            num_paths: self.config.num_paths,
            horizon_days: horizon,
            initial_capital,
            prob_profit: profitable as f64 / terminals.len() as f64,
            mean_terminal_wealth: mean,
            median_terminal_wealth: percentiles.p50,
            percentiles,
            equity_paths,
        })
    }
}

/// Nearest-rank percentile of an ascending-sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let idx = (q * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// A matrix `L` with `L L^T` equal to the PSD-floored covariance: Cholesky
/// when it succeeds, eigen square root otherwise.
fn covariance_factor(cov: &DMatrix<f64>) -> DMatrix<f64> {
    match Cholesky::new(cov.clone()) {
        Some(chol) => chol.l(),
        None => {
            let psd = nearest_psd(cov);
            let eigen = psd.symmetric_eigen();
            let sqrt_vals = DMatrix::from_diagonal(&eigen.eigenvalues.map(|v| v.max(0.0).sqrt()));
            &eigen.eigenvectors * sqrt_vals
        }
    }
}
