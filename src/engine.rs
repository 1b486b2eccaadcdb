//! Daily backtest engine.
//!
//! The engine replays a strategy against a price table one day at a time:
//! mark holdings to the close, rebalance if the calendar says so (charging
//! transaction costs and slippage on traded notional), then record the day's
//! return and turnover. Each day's state depends on the prior day, so the
//! loop is sequential; independent strategy variants run in parallel over the
//! shared read-only price table.

use crate::config::EngineConfig;
use crate::data::PriceMatrix;
use crate::error::{PortfolioError, Result};
use crate::metrics;
use crate::signal::SignalGenerator;
use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const TRADING_DAYS: f64 = 252.0;

/// Rebalance frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceFreq {
    /// Every trading day.
    Daily,
    /// First trading day of each calendar month.
    #[default]
    Monthly,
}

/// One flag per date: is this a rebalance date?
pub fn rebalance_flags(dates: &[NaiveDate], freq: RebalanceFreq) -> Result<Vec<bool>> {
    if dates.is_empty() {
        return Err(PortfolioError::CalendarError(
            "empty trading calendar".to_string(),
        ));
    }
    let flags = match freq {
        RebalanceFreq::Daily => vec![true; dates.len()],
        RebalanceFreq::Monthly => dates
            .iter()
            .enumerate()
            .map(|(i, d)| {
                i == 0
                    || (d.year(), d.month()) != (dates[i - 1].year(), dates[i - 1].month())
            })
            .collect(),
    };
    Ok(flags)
}

/// Cash plus per-asset unit holdings. Engine-internal; folded into the
/// result at run end.
#[derive(Debug, Clone)]
struct PortfolioState {
    cash: f64,
    units: Vec<f64>,
}

impl PortfolioState {
    fn new(cash: f64, n_assets: usize) -> Self {
        Self {
            cash,
            units: vec![0.0; n_assets],
        }
    }

    fn market_value(&self, prices: &PriceMatrix, day: usize) -> f64 {
        let holdings: f64 = self
            .units
            .iter()
            .enumerate()
            .map(|(i, u)| u * prices.price(day, i))
            .sum();
        self.cash + holdings
    }
}

/// Immutable bundle of everything a backtest run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Strategy name.
    pub strategy_name: String,
    /// Asset tickers, in column order.
    pub assets: Vec<String>,
    /// Starting capital.
    pub initial_capital: f64,
    /// Final equity.
    pub final_equity: f64,
    /// Trading dates covered, aligned with `equity_curve`.
    pub dates: Vec<NaiveDate>,
    /// Mark-to-market equity per day; `equity_curve[0] == initial_capital`.
    pub equity_curve: Vec<f64>,
    /// Simple daily returns, one fewer than `equity_curve`.
    pub daily_returns: Vec<f64>,
    /// Held weights per day (post-rebalance, mark-to-market).
    pub positions: Vec<Vec<f64>>,
    /// Sum of absolute weight changes traded each day; 0 off rebalance dates.
    pub turnover: Vec<f64>,
    /// Annualized growth rate: `(final/initial)^(252/n) - 1` over n return days.
    pub cagr: f64,
    /// Rebalance dates where signal generation failed and prior weights were held.
    pub skipped_rebalances: usize,
}

impl BacktestResult {
    /// Total return over the run as a fraction.
    pub fn total_return(&self) -> f64 {
        self.final_equity / self.initial_capital - 1.0
    }

    /// Trailing rolling Sharpe of the daily returns over the configured
    /// window, aligned with `daily_returns` (NAN until a full window).
    pub fn rolling_sharpe(&self, config: &EngineConfig) -> Vec<f64> {
        metrics::rolling_sharpe(
            &self.daily_returns,
            config.rolling_sharpe_window,
            config.risk_free_rate,
        )
    }

    /// Serialize for external reporting tools.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} days, final equity {:.0}, total return {:.2}%, CAGR {:.2}%, {} skipped rebalances",
            self.strategy_name,
            self.dates.len(),
            self.final_equity,
            self.total_return() * 100.0,
            self.cagr * 100.0,
            self.skipped_rebalances
        )
    }
}

/// Drives the daily simulation loop.
pub struct BacktestEngine {
    config: EngineConfig,
}

impl BacktestEngine {
    /// Create an engine with a validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one strategy over the price table.
    pub fn run(&self, prices: &PriceMatrix, signal: &SignalGenerator) -> Result<BacktestResult> {
        let prices = prices.restrict(self.config.start_date, self.config.end_date)?;
        let n_days = prices.n_days();
        let n_assets = prices.n_assets();
        if n_days < 2 {
            return Err(PortfolioError::DataError(format!(
                "need at least 2 trading days, have {}",
                n_days
            )));
        }

        info!(
            "Running backtest: {} on {} assets x {} days",
            signal.name(),
            n_assets,
            n_days
        );

        let returns = prices.log_returns();
        let flags = rebalance_flags(prices.dates(), self.config.rebalance_freq)?;
        let cost_rate = self.config.cost_rate();

        let mut state = PortfolioState::new(self.config.initial_capital, n_assets);
        let mut equity_curve = Vec::with_capacity(n_days);
        let mut daily_returns = Vec::with_capacity(n_days - 1);
        let mut positions = Vec::with_capacity(n_days);
        let mut turnover = Vec::with_capacity(n_days);
        let mut skipped = 0usize;

        for t in 0..n_days {
            // 1. Mark to market at today's close and record. The curve holds
            // pre-trade equity, so day 0 is the starting capital exactly; a
            // rebalance cost charged today shows up in tomorrow's mark.
            let equity = state.market_value(&prices, t);
            if let Some(prev) = equity_curve.last() {
                daily_returns.push(equity / prev - 1.0);
            }
            equity_curve.push(equity);

            // 2. Rebalance with history strictly before today. Return row
            // t-1 spans yesterday's close to today's, so the usable slice is
            // the first t-1 rows.
            let mut traded = 0.0;
            if flags[t] && equity > 0.0 {
                let history = returns.head(t.saturating_sub(1));
                match signal.generate(&history, &self.config) {
                    Ok(target) => {
                        for (i, w) in target.as_slice().iter().enumerate() {
                            let current = state.units[i] * prices.price(t, i) / equity;
                            traded += (w - current).abs();
                        }
                        let cost = traded * equity * cost_rate;
                        let post_equity = equity - cost;

                        for (i, w) in target.as_slice().iter().enumerate() {
                            state.units[i] = w * post_equity / prices.price(t, i);
                        }
                        state.cash = post_equity * (1.0 - target.net_exposure());

                        debug!(
                            "Rebalanced on {}: turnover {:.4}, cost {:.2}",
                            prices.dates()[t],
                            traded,
                            cost
                        );
                    }
                    Err(e) => {
                        warn!(
                            "{}: rebalance on {} skipped: {}",
                            signal.name(),
                            prices.dates()[t],
                            e
                        );
                        skipped += 1;
                    }
                }
            }

            // 3. Record post-trade weights and turnover.
            let held = state.market_value(&prices, t);
            positions.push(if held.abs() > f64::EPSILON {
                (0..n_assets)
                    .map(|i| state.units[i] * prices.price(t, i) / held)
                    .collect()
            } else {
                vec![0.0; n_assets]
            });
            turnover.push(traded);
        }

        let final_equity = *equity_curve.last().unwrap_or(&self.config.initial_capital);
        let n = daily_returns.len().max(1) as f64;
        let cagr = if final_equity > 0.0 {
            (final_equity / self.config.initial_capital).powf(TRADING_DAYS / n) - 1.0
        } else {
            f64::NAN
        };

        Ok(BacktestResult {
            strategy_name: signal.name(),
            assets: prices.assets().to_vec(),
            initial_capital: self.config.initial_capital,
            final_equity,
            dates: prices.dates().to_vec(),
            equity_curve,
            daily_returns,
            positions,
            turnover,
            cagr,
            skipped_rebalances: skipped,
        })
    }

    /// Run several strategy variants in parallel over the shared read-only
    /// price table. One variant failing does not stop the others; each slot
    /// carries its own result.
    pub fn run_all(
        &self,
        prices: &PriceMatrix,
        signals: &[SignalGenerator],
    ) -> Vec<(String, Result<BacktestResult>)> {
        signals
            .par_iter()
            .map(|signal| (signal.name(), self.run(prices, signal)))
            .collect()
    }
}
