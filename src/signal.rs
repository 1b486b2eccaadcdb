//! Target-weight signal generation.
//!
//! A [`SignalGenerator`] is a tagged variant selected at construction and
//! never mutated. Its single operation maps return history strictly before
//! the effective date to a [`WeightVector`]; it never sees data at or after
//! that date, so lookahead is impossible by construction.

use crate::config::EngineConfig;
use crate::covariance::{pseudo_inverse, CovMethod, CovarianceEstimator};
use crate::data::ReturnSeries;
use crate::error::{PortfolioError, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::warn;

const TRADING_DAYS: f64 = 252.0;
const PINV_FLOOR: f64 = 1e-10;

/// Per-asset target weights satisfying the position and leverage caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    weights: Vec<f64>,
}

impl WeightVector {
    /// Wrap weights as-is, without constraint enforcement. For callers that
    /// already hold a constrained vector (or deliberately want a fixed one,
    /// like the Monte Carlo portfolio mode).
    pub fn from_raw(weights: Vec<f64>) -> Self {
        Self { weights }
    }

    /// Constrain raw weights to `max|w| <= max_position` and
    /// `sum|w| <= max_leverage`.
    ///
    /// Leverage is satisfied by proportional shrinkage, which preserves
    /// relative ratios. When a single-position cap binds, that position is
    /// clipped and the freed budget is redistributed across the uncapped
    /// remainder (again proportionally), so ratios change only among the
    /// clipped positions. Returns the vector plus whether any adjustment
    /// was made.
    pub fn constrained(raw: &[f64], max_position: f64, max_leverage: f64) -> (Self, bool) {
        let mut w: Vec<f64> = raw.to_vec();
        let gross: f64 = w.iter().map(|x| x.abs()).sum();
        let mut adjusted = false;

        if gross > max_leverage && gross > 0.0 {
            let scale = max_leverage / gross;
            for x in w.iter_mut() {
                *x *= scale;
            }
            adjusted = true;
        }

        let target_gross = gross.min(max_leverage);

        // Clip-and-redistribute waterfall. Each pass either caps at least one
        // more position or terminates, so it runs at most n times.
        for _ in 0..w.len() {
            let mut newly_capped = false;
            for x in w.iter_mut() {
                if x.abs() > max_position {
                    *x = max_position.copysign(*x);
                    adjusted = true;
                    newly_capped = true;
                }
            }

            let capped_gross: f64 = w
                .iter()
                .filter(|x| (x.abs() - max_position).abs() < 1e-12)
                .map(|x| x.abs())
                .sum();
            let uncapped_gross: f64 = w
                .iter()
                .filter(|x| (x.abs() - max_position).abs() >= 1e-12)
                .map(|x| x.abs())
                .sum();

            if !newly_capped || uncapped_gross <= 1e-12 {
                break;
            }

            let factor = (target_gross - capped_gross) / uncapped_gross;
            if factor <= 1.0 + 1e-12 {
                break;
            }
            for x in w.iter_mut() {
                if (x.abs() - max_position).abs() >= 1e-12 {
                    *x *= factor;
                }
            }
        }

        // Final safety clip against accumulation error.
        for x in w.iter_mut() {
            if x.abs() > max_position {
                *x = max_position.copysign(*x);
            }
        }

        (Self { weights: w }, adjusted)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn get(&self, i: usize) -> f64 {
        self.weights[i]
    }

    /// Sum of absolute weights.
    pub fn gross_exposure(&self) -> f64 {
        self.weights.iter().map(|w| w.abs()).sum()
    }

    /// Signed sum of weights; the remainder to 1.0 is held as cash.
    pub fn net_exposure(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn max_abs(&self) -> f64 {
        self.weights.iter().map(|w| w.abs()).fold(0.0, f64::max)
    }
}

/// Mean-variance objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MvObjective {
    /// Maximize (mu - rf) / sigma.
    #[default]
    MaxSharpe,
    /// Ignore expected returns, minimize variance.
    MinVariance,
}

/// Portfolio signal variant, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SignalGenerator {
    /// Static 1/N allocation; needs no estimation.
    EqualWeight,
    /// Fractional Kelly: `fraction * pinv(Sigma) * (mu - rf)`.
    Kelly { fraction: f64, cov_method: CovMethod },
    /// Classic mean-variance allocation over the same risk model.
    MeanVariance {
        objective: MvObjective,
        cov_method: CovMethod,
    },
}

impl SignalGenerator {
    /// Kelly variant sized by the configuration's `kelly_fraction` and
    /// estimated with its `cov_method`.
    pub fn kelly_from(config: &EngineConfig) -> Self {
        SignalGenerator::Kelly {
            fraction: config.kelly_fraction,
            cov_method: config.cov_method,
        }
    }

    /// Mean-variance variant estimated with the configuration's `cov_method`.
    pub fn mean_variance_from(objective: MvObjective, config: &EngineConfig) -> Self {
        SignalGenerator::MeanVariance {
            objective,
            cov_method: config.cov_method,
        }
    }

    /// The standard comparison set for a `run_all` sweep: equal weight, the
    /// configured Kelly, and both mean-variance objectives.
    pub fn standard_set(config: &EngineConfig) -> Vec<Self> {
        vec![
            SignalGenerator::EqualWeight,
            Self::kelly_from(config),
            Self::mean_variance_from(MvObjective::MaxSharpe, config),
            Self::mean_variance_from(MvObjective::MinVariance, config),
        ]
    }

    /// Human-readable strategy name for logs and reports.
    pub fn name(&self) -> String {
        match self {
            SignalGenerator::EqualWeight => "Equal Weight".to_string(),
            SignalGenerator::Kelly { fraction, .. } => {
                if (fraction - 0.5).abs() < 1e-9 {
                    "Half-Kelly".to_string()
                } else if (fraction - 1.0).abs() < 1e-9 {
                    "Full Kelly".to_string()
                } else {
                    format!("Kelly {:.2}", fraction)
                }
            }
            SignalGenerator::MeanVariance { objective, .. } => match objective {
                MvObjective::MaxSharpe => "Mean-Variance (max Sharpe)".to_string(),
                MvObjective::MinVariance => "Mean-Variance (min variance)".to_string(),
            },
        }
    }

    /// Produce target weights from return history strictly before the
    /// effective date.
    ///
    /// Estimation failures (insufficient history, degenerate risk model)
    /// propagate as errors; the engine treats them as a skipped rebalance.
    pub fn generate(&self, history: &ReturnSeries, config: &EngineConfig) -> Result<WeightVector> {
        let n = history.n_assets();
        if n == 0 {
            return Err(PortfolioError::DataError("no assets in history".to_string()));
        }

        let raw = match self {
            SignalGenerator::EqualWeight => vec![1.0 / n as f64; n],
            SignalGenerator::Kelly {
                fraction,
                cov_method,
            } => {
                let (mu_excess, sigma_inv) = self.estimate(history, *cov_method, config)?;
                let kelly = &sigma_inv * &mu_excess * *fraction;
                kelly.iter().copied().collect()
            }
            SignalGenerator::MeanVariance {
                objective,
                cov_method,
            } => {
                let (mu_excess, sigma_inv) = self.estimate(history, *cov_method, config)?;
                let unscaled = match objective {
                    MvObjective::MaxSharpe if mu_excess.iter().any(|m| *m > 0.0) => {
                        &sigma_inv * &mu_excess
                    }
                    // No asset beats the risk-free rate (or min-variance was
                    // asked for): fall back to the minimum-variance solution.
                    _ => &sigma_inv * DVector::from_element(n, 1.0),
                };
                let net: f64 = unscaled.sum();
                if net.abs() < 1e-12 {
                    return Err(PortfolioError::EstimationError(
                        "mean-variance solution has zero net weight".to_string(),
                    ));
                }
                unscaled.iter().map(|w| w / net).collect()
            }
        };

        if raw.iter().any(|w| !w.is_finite()) {
            return Err(PortfolioError::EstimationError(
                "non-finite weights from risk model".to_string(),
            ));
        }

        let (weights, clipped) = WeightVector::constrained(
            &raw,
            config.max_position_weight,
            config.max_leverage,
        );
        if clipped {
            warn!(
                "{}: weights clipped to position/leverage caps (gross {:.3})",
                self.name(),
                weights.gross_exposure()
            );
        }
        Ok(weights)
    }

    /// Annualized excess mean and floored pseudo-inverse of the annualized
    /// covariance over the trailing lookback window.
    fn estimate(
        &self,
        history: &ReturnSeries,
        cov_method: CovMethod,
        config: &EngineConfig,
    ) -> Result<(DVector<f64>, nalgebra::DMatrix<f64>)> {
        let window = history.tail(config.lookback_window);
        let estimator =
            CovarianceEstimator::new(cov_method, config.ewma_lambda, config.lookback_window);
        let sigma = estimator.estimate(&window)? * TRADING_DAYS;

        let mu = window.mean_daily() * TRADING_DAYS;
        let mu_excess = mu.map(|m| m - config.risk_free_rate);
        let sigma_inv = pseudo_inverse(&sigma, PINV_FLOOR)?;
        Ok((mu_excess, sigma_inv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{business_days, synthetic_gbm, PriceMatrix};
    use chrono::NaiveDate;

    fn loose_config() -> EngineConfig {
        EngineConfig {
            max_position_weight: 100.0,
            max_leverage: 100.0,
            lookback_window: 252,
            ..Default::default()
        }
    }

    /// One asset whose returns alternate a+b, a-b: mean a, known variance.
    fn alternating_returns(n: usize, a: f64, b: f64) -> ReturnSeries {
        let mut prices = vec![100.0];
        for i in 0..n {
            let r = if i % 2 == 0 { a + b } else { a - b };
            prices.push(prices.last().unwrap() * r.exp());
        }
        let dates = business_days(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), n + 1);
        PriceMatrix::from_columns(dates, vec![("AAA".to_string(), prices)])
            .unwrap()
            .log_returns()
    }

    fn gbm_history(days: usize) -> ReturnSeries {
        synthetic_gbm(
            &["A", "B", "C", "D"],
            days,
            NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            100.0,
            0.0002,
            0.0126,
            42,
        )
        .unwrap()
        .log_returns()
    }

    #[test]
    fn test_equal_weight() {
        let history = gbm_history(10);
        let config = EngineConfig::default();
        let weights = SignalGenerator::EqualWeight.generate(&history, &config).unwrap();

        assert_eq!(weights.len(), 4);
        for i in 0..4 {
            assert!((weights.get(i) - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn test_kelly_single_asset_closed_form() {
        let n = 252;
        let a = 0.001;
        let b = 0.01;
        let history = alternating_returns(n, a, b);
        let config = loose_config();

        let generator = SignalGenerator::Kelly {
            fraction: 0.5,
            cov_method: CovMethod::Sample,
        };
        let weights = generator.generate(&history, &config).unwrap();

        // Unbiased sample variance of the alternating series.
        let var_daily = b * b * n as f64 / (n as f64 - 1.0);
        let mu_ann = a * 252.0;
        let expected = 0.5 * (mu_ann - config.risk_free_rate) / (var_daily * 252.0);
        assert!(
            (weights.get(0) - expected).abs() < 1e-6,
            "got {}, expected {}",
            weights.get(0),
            expected
        );
    }

    #[test]
    fn test_kelly_fraction_scales_linearly() {
        let history = alternating_returns(252, 0.001, 0.01);
        let config = loose_config();

        let half = SignalGenerator::Kelly {
            fraction: 0.5,
            cov_method: CovMethod::Sample,
        }
        .generate(&history, &config)
        .unwrap();
        let full = SignalGenerator::Kelly {
            fraction: 1.0,
            cov_method: CovMethod::Sample,
        }
        .generate(&history, &config)
        .unwrap();

        assert!((full.get(0) - 2.0 * half.get(0)).abs() < 1e-9);
    }

    #[test]
    fn test_kelly_insufficient_history_errors() {
        let history = gbm_history(50);
        let config = EngineConfig::default(); // lookback 252
        let result = SignalGenerator::Kelly {
            fraction: 0.5,
            cov_method: CovMethod::LedoitWolf,
        }
        .generate(&history, &config);
        assert!(matches!(
            result,
            Err(PortfolioError::InsufficientHistory { .. })
        ));
    }

    #[test]
    fn test_generated_weights_satisfy_caps() {
        let history = gbm_history(300);
        let config = EngineConfig::default();

        let generators = [
            SignalGenerator::EqualWeight,
            SignalGenerator::Kelly {
                fraction: 1.0,
                cov_method: CovMethod::LedoitWolf,
            },
            SignalGenerator::MeanVariance {
                objective: MvObjective::MaxSharpe,
                cov_method: CovMethod::Sample,
            },
            SignalGenerator::MeanVariance {
                objective: MvObjective::MinVariance,
                cov_method: CovMethod::Ewma,
            },
        ];

        for generator in &generators {
            let w = generator.generate(&history, &config).unwrap();
            assert!(
                w.max_abs() <= config.max_position_weight + 1e-9,
                "{} breaks position cap",
                generator.name()
            );
            assert!(
                w.gross_exposure() <= config.max_leverage + 1e-9,
                "{} breaks leverage cap",
                generator.name()
            );
        }
    }

    #[test]
    fn test_variants_derived_from_config() {
        let config = EngineConfig {
            kelly_fraction: 0.75,
            cov_method: CovMethod::Ewma,
            ..Default::default()
        };

        assert_eq!(
            SignalGenerator::kelly_from(&config),
            SignalGenerator::Kelly {
                fraction: 0.75,
                cov_method: CovMethod::Ewma,
            }
        );
        assert_eq!(
            SignalGenerator::mean_variance_from(MvObjective::MinVariance, &config),
            SignalGenerator::MeanVariance {
                objective: MvObjective::MinVariance,
                cov_method: CovMethod::Ewma,
            }
        );

        let set = SignalGenerator::standard_set(&config);
        assert_eq!(set.len(), 4);
        assert_eq!(set[0], SignalGenerator::EqualWeight);
        assert_eq!(set[1], SignalGenerator::kelly_from(&config));
    }

    #[test]
    fn test_loaded_kelly_fraction_changes_weights() {
        // A TOML-configured fraction must actually drive position sizing.
        let history = alternating_returns(252, 0.001, 0.01);

        let full: EngineConfig = toml::from_str(
            "kelly_fraction = 1.0\ncov_method = \"sample\"\n\
             max_position_weight = 100.0\nmax_leverage = 100.0",
        )
        .unwrap();
        let half: EngineConfig = toml::from_str(
            "kelly_fraction = 0.5\ncov_method = \"sample\"\n\
             max_position_weight = 100.0\nmax_leverage = 100.0",
        )
        .unwrap();

        let w_full = SignalGenerator::kelly_from(&full)
            .generate(&history, &full)
            .unwrap();
        let w_half = SignalGenerator::kelly_from(&half)
            .generate(&history, &half)
            .unwrap();

        assert!((w_full.get(0) - 2.0 * w_half.get(0)).abs() < 1e-9);
    }

    #[test]
    fn test_no_lookahead() {
        // A signal computed from the first 260 observations must not change
        // when everything after them does.
        let history = gbm_history(400);
        let config = EngineConfig::default();
        let generator = SignalGenerator::Kelly {
            fraction: 0.5,
            cov_method: CovMethod::LedoitWolf,
        };

        let full_head = history.head(260);
        let truncated = gbm_history(400).head(260);
        let w1 = generator.generate(&full_head, &config).unwrap();
        let w2 = generator.generate(&truncated, &config).unwrap();
        assert_eq!(w1.as_slice(), w2.as_slice());
    }

    #[test]
    fn test_constrain_proportional_shrink_preserves_ratios() {
        let (w, adjusted) = WeightVector::constrained(&[0.8, 0.4, -0.4], 1.0, 0.8);
        assert!(adjusted);
        assert!((w.gross_exposure() - 0.8).abs() < 1e-12);
        // 2:1 ratio preserved
        assert!((w.get(0) / w.get(1) - 2.0).abs() < 1e-9);
        assert!((w.get(2) / w.get(1) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_constrain_clips_and_redistributes() {
        let (w, adjusted) = WeightVector::constrained(&[1.0, 0.2, 0.2], 0.4, 1.5);
        assert!(adjusted);
        assert!((w.get(0) - 0.4).abs() < 1e-12);
        // Freed budget flows to the uncapped remainder, equally here.
        assert!(w.get(1) > 0.2);
        assert!((w.get(1) - w.get(2)).abs() < 1e-12);
        assert!(w.gross_exposure() <= 1.5 + 1e-9);
        assert!(w.max_abs() <= 0.4 + 1e-12);
    }

    #[test]
    fn test_constrain_leaves_valid_weights_untouched() {
        let raw = [0.3, 0.3, 0.2];
        let (w, adjusted) = WeightVector::constrained(&raw, 0.4, 1.5);
        assert!(!adjusted);
        assert_eq!(w.as_slice(), &raw);
    }

    #[test]
    fn test_mean_variance_min_variance_prefers_low_vol() {
        // Two uncorrelated assets, one far more volatile: min-variance should
        // overweight the calm one.
        let mut a = vec![100.0];
        let mut b = vec![100.0];
        for i in 0..252 {
            let sign: f64 = if i % 2 == 0 { 1.0 } else { -1.0 };
            a.push(a.last().unwrap() * (0.0005 + 0.005 * sign).exp());
            // Out of phase so the pair is roughly uncorrelated.
            let sign_b: f64 = if (i / 2) % 2 == 0 { 1.0 } else { -1.0 };
            b.push(b.last().unwrap() * (0.0005 + 0.025 * sign_b).exp());
        }
        let dates = business_days(NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(), 253);
        let history = PriceMatrix::from_columns(
            dates,
            vec![("CALM".to_string(), a), ("WILD".to_string(), b)],
        )
        .unwrap()
        .log_returns();

        let config = loose_config();
        let w = SignalGenerator::MeanVariance {
            objective: MvObjective::MinVariance,
            cov_method: CovMethod::Sample,
        }
        .generate(&history, &config)
        .unwrap();

        assert!(w.get(0) > w.get(1), "calm {} vs wild {}", w.get(0), w.get(1));
    }
}
