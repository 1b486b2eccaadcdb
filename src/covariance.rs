//! Covariance estimation.
//!
//! Three estimators over a trailing return window: plain sample covariance,
//! Ledoit-Wolf shrinkage toward a mean-variance diagonal target, and an EWMA
//! recursion. Every estimate leaves here symmetrized and eigenvalue-floored,
//! so downstream consumers can rely on positive semi-definiteness rather than
//! hope for it.

use crate::data::ReturnSeries;
use crate::error::{PortfolioError, Result};
use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Covariance estimation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CovMethod {
    /// Unbiased sample covariance.
    Sample,
    /// Sample covariance shrunk toward a diagonal target with analytically
    /// chosen intensity.
    #[default]
    LedoitWolf,
    /// Exponentially weighted recursion seeded from the window's sample
    /// covariance.
    Ewma,
}

/// Estimates a risk model from a trailing return window.
#[derive(Debug, Clone)]
pub struct CovarianceEstimator {
    method: CovMethod,
    ewma_lambda: f64,
    min_observations: usize,
}

impl CovarianceEstimator {
    pub fn new(method: CovMethod, ewma_lambda: f64, min_observations: usize) -> Self {
        Self {
            method,
            ewma_lambda,
            min_observations: min_observations.max(2),
        }
    }

    pub fn method(&self) -> CovMethod {
        self.method
    }

    /// Estimate the covariance of daily returns over `window`.
    ///
    /// The result is symmetric with all eigenvalues >= 0. Fails with
    /// `InsufficientHistory` when the window is shorter than the configured
    /// lookback; the caller is expected to skip the rebalance.
    pub fn estimate(&self, window: &ReturnSeries) -> Result<DMatrix<f64>> {
        if window.n_obs() < self.min_observations {
            return Err(PortfolioError::InsufficientHistory {
                needed: self.min_observations,
                available: window.n_obs(),
            });
        }

        let raw = match self.method {
            CovMethod::Sample => sample_covariance(window.matrix()),
            CovMethod::LedoitWolf => ledoit_wolf(window.matrix()),
            CovMethod::Ewma => ewma(window.matrix(), self.ewma_lambda),
        };

        Ok(nearest_psd(&raw))
    }
}

/// Unbiased sample covariance of an observations × assets matrix.
fn sample_covariance(returns: &DMatrix<f64>) -> DMatrix<f64> {
    let l = returns.nrows();
    let centered = center(returns);
    (centered.transpose() * &centered) / (l as f64 - 1.0)
}

/// Ledoit-Wolf shrinkage toward `mean(diag(S)) * I`.
///
/// The intensity minimizes expected Frobenius loss against the unobserved
/// true covariance: lambda = b^2 / d^2 with d^2 the distance from sample to
/// target and b^2 the (capped) estimation variance of the sample entries.
fn ledoit_wolf(returns: &DMatrix<f64>) -> DMatrix<f64> {
    let l = returns.nrows() as f64;
    let n = returns.ncols();
    let sample = sample_covariance(returns);

    let mean_var = sample.diagonal().sum() / n as f64;
    let target = DMatrix::from_diagonal_element(n, n, mean_var);

    let diff = &sample - &target;
    let d2: f64 = diff.iter().map(|x| x * x).sum();
    if d2 <= f64::EPSILON {
        return sample;
    }

    let centered = center(returns);
    let mut b2_bar = 0.0;
    for t in 0..returns.nrows() {
        let row = centered.row(t).transpose();
        let outer = &row * row.transpose();
        b2_bar += (&outer - &sample).iter().map(|x| x * x).sum::<f64>();
    }
    b2_bar /= l * l;

    let b2 = b2_bar.min(d2);
    let lambda = b2 / d2;
    debug!("Ledoit-Wolf shrinkage intensity: {:.4}", lambda);

    target * lambda + sample * (1.0 - lambda)
}

/// EWMA recursion `S_t = lambda * S_{t-1} + (1 - lambda) * r_t r_t^T`,
/// seeded from the window's sample covariance.
fn ewma(returns: &DMatrix<f64>, lambda: f64) -> DMatrix<f64> {
    let mut cov = sample_covariance(returns);
    for t in 0..returns.nrows() {
        let r = returns.row(t).transpose();
        let outer = &r * r.transpose();
        cov = cov * lambda + outer * (1.0 - lambda);
    }
    cov
}

fn center(returns: &DMatrix<f64>) -> DMatrix<f64> {
    let l = returns.nrows();
    let mut centered = returns.clone();
    for c in 0..returns.ncols() {
        let mean = returns.column(c).sum() / l as f64;
        for r in 0..l {
            centered[(r, c)] -= mean;
        }
    }
    centered
}

/// Symmetrize and floor eigenvalues at zero.
pub fn nearest_psd(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    let sym = (matrix + matrix.transpose()) * 0.5;
    let eigen = SymmetricEigen::new(sym);
    let floored = eigen.eigenvalues.map(|ev| ev.max(0.0));
    let reconstructed =
        &eigen.eigenvectors * DMatrix::from_diagonal(&floored) * eigen.eigenvectors.transpose();
    (&reconstructed + reconstructed.transpose()) * 0.5
}

/// Moore-Penrose pseudo-inverse with an eigenvalue floor.
///
/// Eigenvalues below `rel_floor * max_eigenvalue` are treated as zero rather
/// than inverted, so a near-singular risk model yields a usable (if flat)
/// solution instead of exploding weights.
pub fn pseudo_inverse(matrix: &DMatrix<f64>, rel_floor: f64) -> Result<DMatrix<f64>> {
    let sym = (matrix + matrix.transpose()) * 0.5;
    let eigen = SymmetricEigen::new(sym);
    let max_ev = eigen.eigenvalues.iter().cloned().fold(0.0_f64, f64::max);
    if max_ev <= 0.0 {
        return Err(PortfolioError::EstimationError(
            "covariance matrix has no positive eigenvalues".to_string(),
        ));
    }

    let floor = max_ev * rel_floor;
    let inverted = eigen
        .eigenvalues
        .map(|ev| if ev > floor { 1.0 / ev } else { 0.0 });
    Ok(&eigen.eigenvectors * DMatrix::from_diagonal(&inverted) * eigen.eigenvectors.transpose())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{business_days, PriceMatrix};
    use chrono::NaiveDate;
    use nalgebra::DMatrix;

    fn series_from(rows: &[[f64; 2]]) -> ReturnSeries {
        // Build a price table whose log returns equal `rows` exactly.
        let mut a = vec![100.0];
        let mut b = vec![100.0];
        for row in rows {
            a.push(a.last().unwrap() * row[0].exp());
            b.push(b.last().unwrap() * row[1].exp());
        }
        let dates = business_days(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), rows.len() + 1);
        PriceMatrix::from_columns(
            dates,
            vec![("AAA".to_string(), a), ("BBB".to_string(), b)],
        )
        .unwrap()
        .log_returns()
    }

    fn gbm_returns(days: usize, seed: u64) -> ReturnSeries {
        crate::data::synthetic_gbm(
            &["A", "B", "C"],
            days,
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            100.0,
            0.0002,
            0.0126,
            seed,
        )
        .unwrap()
        .log_returns()
    }

    #[test]
    fn test_sample_covariance_hand_computed() {
        let series = series_from(&[[0.01, 0.02], [-0.01, 0.00], [0.02, 0.01], [0.00, -0.01]]);
        let est = CovarianceEstimator::new(CovMethod::Sample, 0.94, 2);
        let cov = est.estimate(&series).unwrap();

        // Means: a = 0.005, b = 0.005; unbiased divisor 3.
        let var_a = (0.005f64.powi(2) + 0.015f64.powi(2) + 0.015f64.powi(2) + 0.005f64.powi(2)) / 3.0;
        assert!((cov[(0, 0)] - var_a).abs() < 1e-10);
        assert!((cov[(0, 1)] - cov[(1, 0)]).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_is_symmetric_and_psd() {
        let series = gbm_returns(120, 42);
        for method in [CovMethod::Sample, CovMethod::LedoitWolf, CovMethod::Ewma] {
            let est = CovarianceEstimator::new(method, 0.94, 2);
            let cov = est.estimate(&series).unwrap();

            for i in 0..cov.nrows() {
                for j in 0..cov.ncols() {
                    assert!(
                        (cov[(i, j)] - cov[(j, i)]).abs() < 1e-12,
                        "{:?} not symmetric",
                        method
                    );
                }
            }

            let eigen = SymmetricEigen::new(cov.clone());
            for ev in eigen.eigenvalues.iter() {
                assert!(*ev >= -1e-10, "{:?} eigenvalue {} below floor", method, ev);
            }
        }
    }

    #[test]
    fn test_insufficient_history() {
        let series = gbm_returns(30, 1);
        let est = CovarianceEstimator::new(CovMethod::Sample, 0.94, 252);
        match est.estimate(&series) {
            Err(PortfolioError::InsufficientHistory { needed, available }) => {
                assert_eq!(needed, 252);
                assert_eq!(available, 29);
            }
            other => panic!("expected InsufficientHistory, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_ledoit_wolf_shrinks_off_diagonals() {
        let series = gbm_returns(60, 7);
        let sample = CovarianceEstimator::new(CovMethod::Sample, 0.94, 2)
            .estimate(&series)
            .unwrap();
        let shrunk = CovarianceEstimator::new(CovMethod::LedoitWolf, 0.94, 2)
            .estimate(&series)
            .unwrap();

        // Shrinkage pulls off-diagonal mass toward zero on average.
        let off = |m: &DMatrix<f64>| {
            let mut s = 0.0;
            for i in 0..m.nrows() {
                for j in 0..m.ncols() {
                    if i != j {
                        s += m[(i, j)].abs();
                    }
                }
            }
            s
        };
        assert!(off(&shrunk) <= off(&sample) + 1e-12);
    }

    #[test]
    fn test_ewma_tracks_recent_scale() {
        // A window whose second half is much more volatile: EWMA should sit
        // above the flat sample estimate for the volatile asset.
        let mut rows = Vec::new();
        for _ in 0..30 {
            rows.push([0.001, 0.001]);
        }
        for i in 0..30 {
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            rows.push([0.03 * sign, 0.001]);
        }
        let series = series_from(&rows);

        let sample = CovarianceEstimator::new(CovMethod::Sample, 0.94, 2)
            .estimate(&series)
            .unwrap();
        let ewma = CovarianceEstimator::new(CovMethod::Ewma, 0.94, 2)
            .estimate(&series)
            .unwrap();
        assert!(ewma[(0, 0)] > sample[(0, 0)]);
    }

    #[test]
    fn test_pseudo_inverse_of_invertible_matrix() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let pinv = pseudo_inverse(&m, 1e-10).unwrap();
        let identity = &m * &pinv;
        assert!((identity[(0, 0)] - 1.0).abs() < 1e-9);
        assert!((identity[(1, 1)] - 1.0).abs() < 1e-9);
        assert!(identity[(0, 1)].abs() < 1e-9);
    }

    #[test]
    fn test_pseudo_inverse_singular_does_not_explode() {
        // Rank-1 matrix: two perfectly correlated assets.
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let pinv = pseudo_inverse(&m, 1e-10).unwrap();
        for v in pinv.iter() {
            assert!(v.is_finite());
            assert!(v.abs() < 10.0);
        }
    }

    #[test]
    fn test_nearest_psd_floors_negative_eigenvalue() {
        // Indefinite symmetric matrix.
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let psd = nearest_psd(&m);
        let eigen = SymmetricEigen::new(psd);
        for ev in eigen.eigenvalues.iter() {
            assert!(*ev >= -1e-12);
        }
    }
}
