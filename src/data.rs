//! Price table and return series.
//!
//! [`PriceMatrix`] is the input boundary of the engine: an immutable
//! date × asset table of positive adjusted closes with a strictly ascending
//! date index and no missing values. Gap handling (forward-fill or drop) is
//! the data fetcher's concern and happens upstream.

use crate::error::{PortfolioError, Result};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::path::Path;
use tracing::{info, warn};

/// Immutable date × asset price table.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceMatrix {
    dates: Vec<NaiveDate>,
    assets: Vec<String>,
    /// Rows are dates, columns are assets.
    prices: DMatrix<f64>,
}

impl PriceMatrix {
    /// Build a price table from per-asset columns, validating as we go.
    ///
    /// Columns containing non-finite or non-positive values, or with a length
    /// that does not match the date index, are dropped with a warning. Fails
    /// only when the date index is invalid or no usable column remains.
    pub fn from_columns(
        dates: Vec<NaiveDate>,
        columns: Vec<(String, Vec<f64>)>,
    ) -> Result<Self> {
        if dates.is_empty() {
            return Err(PortfolioError::DataError("empty date index".to_string()));
        }
        for pair in dates.windows(2) {
            if pair[1] <= pair[0] {
                return Err(PortfolioError::DataError(format!(
                    "date index must be strictly ascending: {} followed by {}",
                    pair[0], pair[1]
                )));
            }
        }

        let n_days = dates.len();
        let mut assets = Vec::with_capacity(columns.len());
        let mut kept: Vec<Vec<f64>> = Vec::with_capacity(columns.len());

        for (ticker, values) in columns {
            if values.len() != n_days {
                warn!(
                    "Dropping {}: {} prices for {} dates",
                    ticker,
                    values.len(),
                    n_days
                );
                continue;
            }
            if values.iter().any(|p| !p.is_finite() || *p <= 0.0) {
                warn!("Dropping {}: non-positive or missing prices", ticker);
                continue;
            }
            assets.push(ticker);
            kept.push(values);
        }

        if assets.is_empty() {
            return Err(PortfolioError::DataError(
                "no usable asset columns remain".to_string(),
            ));
        }

        let prices = DMatrix::from_fn(n_days, assets.len(), |r, c| kept[c][r]);
        Ok(Self {
            dates,
            assets,
            prices,
        })
    }

    /// Load a wide-format CSV: a `date` column (YYYY-MM-DD) followed by one
    /// column per ticker.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)?;

        let headers = reader.headers()?.clone();
        if headers.len() < 2 {
            return Err(PortfolioError::DataError(format!(
                "{}: expected a date column plus at least one ticker",
                path.display()
            )));
        }
        let tickers: Vec<String> = headers.iter().skip(1).map(|h| h.to_string()).collect();

        let mut dates = Vec::new();
        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); tickers.len()];

        for record in reader.records() {
            let record = record?;
            let date = NaiveDate::parse_from_str(&record[0], "%Y-%m-%d")?;
            dates.push(date);
            for (i, field) in record.iter().skip(1).enumerate() {
                let value = field.trim().parse::<f64>().unwrap_or(f64::NAN);
                columns[i].push(value);
            }
        }

        info!(
            "Loaded {}: {} tickers x {} rows",
            path.display(),
            tickers.len(),
            dates.len()
        );

        Self::from_columns(dates, tickers.into_iter().zip(columns).collect())
    }

    /// Date index.
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Asset tickers, in column order.
    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn n_days(&self) -> usize {
        self.dates.len()
    }

    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    /// Close price for asset column `asset` on day row `day`.
    pub fn price(&self, day: usize, asset: usize) -> f64 {
        self.prices[(day, asset)]
    }

    /// Prices for one day as a vector over assets.
    pub fn row(&self, day: usize) -> DVector<f64> {
        self.prices.row(day).transpose()
    }

    /// A new table covering rows `[start, end)` of this one.
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Self> {
        if start >= end || end > self.n_days() {
            return Err(PortfolioError::DataError(format!(
                "invalid row slice [{}, {}) of {} days",
                start,
                end,
                self.n_days()
            )));
        }
        Ok(Self {
            dates: self.dates[start..end].to_vec(),
            assets: self.assets.clone(),
            prices: self.prices.rows(start, end - start).into_owned(),
        })
    }

    /// Restrict to an inclusive date range.
    pub fn restrict(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Self> {
        let lo = match start {
            Some(s) => self.dates.partition_point(|d| *d < s),
            None => 0,
        };
        let hi = match end {
            Some(e) => self.dates.partition_point(|d| *d <= e),
            None => self.n_days(),
        };
        if lo >= hi {
            return Err(PortfolioError::DataError(
                "no data in requested date range".to_string(),
            ));
        }
        self.slice_rows(lo, hi)
    }

    /// Daily log returns, one row shorter than the price table. Each return
    /// row is dated by the later of the two prices it spans.
    pub fn log_returns(&self) -> ReturnSeries {
        let n = self.n_days();
        let returns = DMatrix::from_fn(n.saturating_sub(1), self.n_assets(), |r, c| {
            (self.prices[(r + 1, c)] / self.prices[(r, c)]).ln()
        });
        ReturnSeries {
            dates: self.dates[1..].to_vec(),
            assets: self.assets.clone(),
            returns,
        }
    }
}

/// Daily log returns for a set of assets.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnSeries {
    dates: Vec<NaiveDate>,
    assets: Vec<String>,
    returns: DMatrix<f64>,
}

impl ReturnSeries {
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    /// Number of observations (rows).
    pub fn n_obs(&self) -> usize {
        self.dates.len()
    }

    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    /// The underlying observations × assets matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.returns
    }

    /// One asset's return column.
    pub fn column(&self, asset: usize) -> Vec<f64> {
        self.returns.column(asset).iter().copied().collect()
    }

    /// The first `n` observations. Used by the engine to hand signal
    /// generators history strictly before the rebalance date.
    pub fn head(&self, n: usize) -> ReturnSeries {
        let n = n.min(self.n_obs());
        ReturnSeries {
            dates: self.dates[..n].to_vec(),
            assets: self.assets.clone(),
            returns: self.returns.rows(0, n).into_owned(),
        }
    }

    /// The last `n` observations.
    pub fn tail(&self, n: usize) -> ReturnSeries {
        let n = n.min(self.n_obs());
        let start = self.n_obs() - n;
        ReturnSeries {
            dates: self.dates[start..].to_vec(),
            assets: self.assets.clone(),
            returns: self.returns.rows(start, n).into_owned(),
        }
    }

    /// Per-asset mean daily return.
    pub fn mean_daily(&self) -> DVector<f64> {
        let n = self.n_obs().max(1) as f64;
        DVector::from_fn(self.n_assets(), |c, _| self.returns.column(c).sum() / n)
    }
}

/// Consecutive business days (Mon-Fri) starting at `start`.
pub fn business_days(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(n);
    let mut d = start;
    while dates.len() < n {
        if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(d);
        }
        d += Duration::days(1);
    }
    dates
}

/// Synthetic geometric-Brownian-motion price table for tests and demos.
///
/// Each asset follows `p_t = s0 * exp(cumsum(N(drift, vol)))` with daily
/// drift and volatility, drawn sequentially per asset from one seeded RNG.
pub fn synthetic_gbm(
    tickers: &[&str],
    days: usize,
    start: NaiveDate,
    s0: f64,
    daily_drift: f64,
    daily_vol: f64,
    seed: u64,
) -> Result<PriceMatrix> {
    if days == 0 || tickers.is_empty() {
        return Err(PortfolioError::DataError(
            "synthetic table needs at least one asset and one day".to_string(),
        ));
    }
    let normal = Normal::new(daily_drift, daily_vol)
        .map_err(|e| PortfolioError::DataError(format!("bad GBM parameters: {}", e)))?;
    let mut rng = StdRng::seed_from_u64(seed);

    let columns: Vec<(String, Vec<f64>)> = tickers
        .iter()
        .map(|ticker| {
            let mut log_price = 0.0;
            let prices: Vec<f64> = (0..days)
                .map(|_| {
                    log_price += normal.sample(&mut rng);
                    s0 * log_price.exp()
                })
                .collect();
            (ticker.to_string(), prices)
        })
        .collect();

    PriceMatrix::from_columns(business_days(start, days), columns)
}
