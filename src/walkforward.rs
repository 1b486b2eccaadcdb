//! Walk-forward validation.
//!
//! Splits the price history into an in-sample segment and a trailing
//! out-of-sample window, runs the same strategy configuration on each, and
//! compares the two metric summaries. Inside the out-of-sample window the
//! harness can refit on a fixed cadence: at each refit boundary the weights
//! are re-estimated from all history strictly before the boundary and held
//! until the next one. The harness also re-checks the no-lookahead contract
//! at the split on its own: it regenerates the in-sample-end weights after
//! scrambling every post-boundary price and requires a bit-identical weight
//! vector.

use crate::config::EngineConfig;
use crate::data::{PriceMatrix, ReturnSeries};
use crate::engine::{BacktestEngine, BacktestResult};
use crate::error::{PortfolioError, Result};
use crate::metrics::{self, MetricsSummary};
use crate::signal::SignalGenerator;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// In-sample anchoring policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    /// In-sample always starts at the first available date.
    #[default]
    Expanding,
    /// In-sample is a trailing window of fixed length ending at the split.
    Rolling,
}

/// Harness configuration, separate from the engine's own config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    /// Length of the trailing out-of-sample window in trading days.
    pub oos_window_days: usize,
    /// Refit cadence inside the out-of-sample window, in trading days.
    /// 0 disables intra-window refits: the out-of-sample segment is then an
    /// independent engine run on its own rebalance calendar.
    pub refit_frequency_days: usize,
    /// Expanding or rolling in-sample.
    pub anchor: Anchor,
    /// Rolling in-sample length; ignored for `Expanding`.
    pub is_window_days: usize,
    /// Reject splits that leave the in-sample shorter than this.
    pub min_is_days: usize,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            oos_window_days: 252,
            refit_frequency_days: 21,
            anchor: Anchor::Expanding,
            is_window_days: 756,
            min_is_days: 60,
        }
    }
}

/// One refit window inside the out-of-sample segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefitWindow {
    pub index: usize,
    /// First trading date of the window, which is also its refit date.
    pub start_date: NaiveDate,
    pub n_days: usize,
    /// Whether the refit produced new weights (false = signal failed and the
    /// prior weights were held).
    pub rebalanced: bool,
    pub metrics: MetricsSummary,
}

/// Everything one walk-forward pass produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardResult {
    /// First trading date of the out-of-sample window.
    pub oos_start_date: NaiveDate,
    pub in_sample_result: BacktestResult,
    pub oos_result: BacktestResult,
    pub in_sample_metrics: MetricsSummary,
    pub oos_metrics: MetricsSummary,
    /// Per-window breakdown; empty when refits are disabled.
    pub refit_windows: Vec<RefitWindow>,
    /// OOS Sharpe minus IS Sharpe; strongly negative flags overfitting.
    pub sharpe_degradation: f64,
}

impl WalkForwardResult {
    /// Serialize for external reporting tools.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn summary(&self) -> String {
        format!(
            "Walk-forward ({}): IS Sharpe {:.2}, OOS Sharpe {:.2}, degradation {:.2}, {} refit windows",
            self.oos_start_date,
            self.in_sample_metrics.sharpe_ratio,
            self.oos_metrics.sharpe_ratio,
            self.sharpe_degradation,
            self.refit_windows.len()
        )
    }
}

/// Runs the in-sample/out-of-sample comparison.
pub struct WalkForwardHarness {
    config: WalkForwardConfig,
    engine_config: EngineConfig,
}

impl WalkForwardHarness {
    pub fn new(config: WalkForwardConfig, engine_config: EngineConfig) -> Result<Self> {
        if config.oos_window_days == 0 {
            return Err(PortfolioError::ConfigError(
                "oos_window_days must be positive".to_string(),
            ));
        }
        if config.anchor == Anchor::Rolling && config.is_window_days < config.min_is_days {
            return Err(PortfolioError::ConfigError(
                "is_window_days must be at least min_is_days".to_string(),
            ));
        }
        engine_config.validate()?;
        Ok(Self {
            config,
            engine_config,
        })
    }

    /// Split, run both segments, and compare.
    pub fn run(&self, prices: &PriceMatrix, signal: &SignalGenerator) -> Result<WalkForwardResult> {
        let n = prices.n_days();
        if n <= self.config.oos_window_days + self.config.min_is_days {
            return Err(PortfolioError::DataError(format!(
                "{} days cannot fit {} OOS days plus {} in-sample days",
                n, self.config.oos_window_days, self.config.min_is_days
            )));
        }

        let split = n - self.config.oos_window_days;
        let is_start = match self.config.anchor {
            Anchor::Expanding => 0,
            Anchor::Rolling => split.saturating_sub(self.config.is_window_days),
        };

        let is_prices = prices.slice_rows(is_start, split)?;
        let oos_start_date = prices.dates()[split];

        info!(
            "Walk-forward split: IS {} days ({}..{}), OOS {} days from {}",
            is_prices.n_days(),
            is_prices.dates()[0],
            is_prices.dates()[is_prices.n_days() - 1],
            n - split,
            oos_start_date
        );

        let returns = prices.log_returns();
        self.check_boundary_leakage(prices, &returns, split, signal)?;

        let engine = BacktestEngine::new(EngineConfig {
            start_date: None,
            end_date: None,
            ..self.engine_config.clone()
        })?;
        let in_sample_result = engine.run(&is_prices, signal)?;

        let (oos_result, refit_windows) = if self.config.refit_frequency_days > 0 {
            self.run_refit_oos(prices, &returns, split, signal)?
        } else {
            // Segments share nothing but the immutable price table, so the
            // OOS gets a fresh engine run over its own date range.
            let oos_prices = prices.slice_rows(split, n)?;
            (engine.run(&oos_prices, signal)?, Vec::new())
        };

        let in_sample_metrics = MetricsSummary::from_returns(
            &in_sample_result.daily_returns,
            &in_sample_result.equity_curve,
            self.engine_config.risk_free_rate,
            self.engine_config.var_confidence,
        );
        let oos_metrics = MetricsSummary::from_returns(
            &oos_result.daily_returns,
            &oos_result.equity_curve,
            self.engine_config.risk_free_rate,
            self.engine_config.var_confidence,
        );

        let sharpe_degradation = oos_metrics.sharpe_ratio - in_sample_metrics.sharpe_ratio;
        if sharpe_degradation < -1.0 {
            warn!(
                "Severe out-of-sample Sharpe degradation: {:.2}",
                sharpe_degradation
            );
        }

        Ok(WalkForwardResult {
            oos_start_date,
            in_sample_result,
            oos_result,
            in_sample_metrics,
            oos_metrics,
            refit_windows,
            sharpe_degradation,
        })
    }

    /// Replay the out-of-sample window with periodic refits.
    ///
    /// At each boundary the weights come from all history strictly before it
    /// (trimmed to the trailing in-sample window under a rolling anchor) and
    /// are held until the next boundary. Costs are charged on the traded
    /// notional at each refit, as in the engine.
    fn run_refit_oos(
        &self,
        prices: &PriceMatrix,
        returns: &ReturnSeries,
        split: usize,
        signal: &SignalGenerator,
    ) -> Result<(BacktestResult, Vec<RefitWindow>)> {
        let n = prices.n_days();
        let n_assets = prices.n_assets();
        let freq = self.config.refit_frequency_days;
        let cost_rate = self.engine_config.cost_rate();
        let initial_capital = self.engine_config.initial_capital;

        let mut cash = initial_capital;
        let mut units = vec![0.0; n_assets];
        let mut equity_curve = Vec::with_capacity(n - split);
        let mut daily_returns = Vec::with_capacity(n - split - 1);
        let mut positions = Vec::with_capacity(n - split);
        let mut turnover = Vec::with_capacity(n - split);
        let mut rebalanced_flags = Vec::new();
        let mut skipped = 0usize;

        for t in split..n {
            let mark = |cash: f64, units: &[f64]| -> f64 {
                cash + units
                    .iter()
                    .enumerate()
                    .map(|(i, u)| u * prices.price(t, i))
                    .sum::<f64>()
            };

            let equity = mark(cash, &units);
            if let Some(prev) = equity_curve.last() {
                daily_returns.push(equity / prev - 1.0);
            }
            equity_curve.push(equity);

            let mut traded = 0.0;
            if (t - split) % freq == 0 {
                let visible = returns.head(t.saturating_sub(1));
                let history = match self.config.anchor {
                    Anchor::Expanding => visible,
                    Anchor::Rolling => visible.tail(self.config.is_window_days),
                };
                match signal.generate(&history, &self.engine_config) {
                    Ok(target) if equity > 0.0 => {
                        for (i, w) in target.as_slice().iter().enumerate() {
                            let current = units[i] * prices.price(t, i) / equity;
                            traded += (w - current).abs();
                        }
                        let post_equity = equity - traded * equity * cost_rate;
                        for (i, w) in target.as_slice().iter().enumerate() {
                            units[i] = w * post_equity / prices.price(t, i);
                        }
                        cash = post_equity * (1.0 - target.net_exposure());
                        rebalanced_flags.push(true);
                    }
                    Ok(_) => {
                        rebalanced_flags.push(false);
                    }
                    Err(e) => {
                        warn!(
                            "{}: refit on {} skipped: {}",
                            signal.name(),
                            prices.dates()[t],
                            e
                        );
                        skipped += 1;
                        rebalanced_flags.push(false);
                    }
                }
            }

            let held = mark(cash, &units);
            positions.push(if held.abs() > f64::EPSILON {
                (0..n_assets)
                    .map(|i| units[i] * prices.price(t, i) / held)
                    .collect()
            } else {
                vec![0.0; n_assets]
            });
            turnover.push(traded);
        }

        let final_equity = *equity_curve.last().unwrap_or(&initial_capital);
        let cagr = metrics::cagr(initial_capital, final_equity, daily_returns.len().max(1));

        let m = equity_curve.len();
        let windows: Vec<RefitWindow> = (0..rebalanced_flags.len())
            .map(|k| {
                let a = k * freq;
                let b = ((k + 1) * freq).min(m);
                let window_returns = if b > a + 1 {
                    &daily_returns[a..b - 1]
                } else {
                    &daily_returns[a..a]
                };
                RefitWindow {
                    index: k,
                    start_date: prices.dates()[split + a],
                    n_days: b - a,
                    rebalanced: rebalanced_flags[k],
                    metrics: MetricsSummary::from_returns(
                        window_returns,
                        &equity_curve[a..b],
                        self.engine_config.risk_free_rate,
                        self.engine_config.var_confidence,
                    ),
                }
            })
            .collect();

        let result = BacktestResult {
            strategy_name: signal.name(),
            assets: prices.assets().to_vec(),
            initial_capital,
            final_equity,
            dates: prices.dates()[split..].to_vec(),
            equity_curve,
            daily_returns,
            positions,
            turnover,
            cagr,
            skipped_rebalances: skipped,
        };
        Ok((result, windows))
    }

    /// Re-validate the no-lookahead contract at the split.
    ///
    /// The weights a signal would set on the first OOS day are generated
    /// twice: once from the true table and once after doubling every price at
    /// or after the split. Any difference means some statistic reached across
    /// the boundary.
    fn check_boundary_leakage(
        &self,
        prices: &PriceMatrix,
        returns: &ReturnSeries,
        split: usize,
        signal: &SignalGenerator,
    ) -> Result<()> {
        // History visible when rebalancing on day `split`: return rows
        // strictly before the one that uses day-split's price.
        let history = returns.head(split.saturating_sub(1));

        let clean = match signal.generate(&history, &self.engine_config) {
            Ok(w) => w,
            // Not enough history to form weights at the boundary: nothing to
            // leak through.
            Err(_) => return Ok(()),
        };

        let perturbed_prices = perturb_after(prices, split)?;
        let perturbed_history = perturbed_prices.log_returns().head(split.saturating_sub(1));
        let perturbed = signal
            .generate(&perturbed_history, &self.engine_config)
            .map_err(|e| {
                PortfolioError::LeakageDetected(format!(
                    "boundary signal failed only under post-split perturbation: {}",
                    e
                ))
            })?;

        if clean.as_slice() != perturbed.as_slice() {
            return Err(PortfolioError::LeakageDetected(format!(
                "weights at OOS start changed under post-split perturbation: {:?} vs {:?}",
                clean.as_slice(),
                perturbed.as_slice()
            )));
        }
        Ok(())
    }
}

/// Copy of the price table with every row at or after `split` doubled.
fn perturb_after(prices: &PriceMatrix, split: usize) -> Result<PriceMatrix> {
    let columns: Vec<(String, Vec<f64>)> = prices
        .assets()
        .iter()
        .enumerate()
        .map(|(j, ticker)| {
            let series = (0..prices.n_days())
                .map(|t| {
                    let p = prices.price(t, j);
                    if t >= split {
                        p * 2.0
                    } else {
                        p
                    }
                })
                .collect();
            (ticker.clone(), series)
        })
        .collect();
    PriceMatrix::from_columns(prices.dates().to_vec(), columns)
}
