//! Risk and performance metrics.
//!
//! Stateless functions over daily return series and equity curves. Degenerate
//! input (empty series, zero variance, no drawdown) yields `f64::NAN` rather
//! than a panic or a silent zero, so callers can always distinguish "not
//! computable" from "computed as zero".

use serde::{Deserialize, Serialize};

const TRADING_DAYS: f64 = 252.0;

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn std_dev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return f64::NAN;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.sqrt()
}

/// Annualized Sharpe ratio from daily returns.
///
/// `risk_free_rate` is annualized; it is de-annualized to a daily hurdle
/// before differencing. NAN on fewer than 2 observations or zero volatility.
pub fn sharpe_ratio(daily_returns: &[f64], risk_free_rate: f64) -> f64 {
    if daily_returns.len() < 2 {
        return f64::NAN;
    }
    let daily_rf = risk_free_rate / TRADING_DAYS;
    let excess: Vec<f64> = daily_returns.iter().map(|r| r - daily_rf).collect();
    let sd = std_dev(&excess);
    if !sd.is_finite() || sd <= 0.0 {
        return f64::NAN;
    }
    mean(&excess) / sd * TRADING_DAYS.sqrt()
}

/// Annualized Sortino ratio: excess mean over downside deviation.
///
/// Downside deviation uses only returns below the daily hurdle, normalized by
/// the full sample count. NAN when no downside observations exist.
pub fn sortino_ratio(daily_returns: &[f64], risk_free_rate: f64) -> f64 {
    if daily_returns.len() < 2 {
        return f64::NAN;
    }
    let daily_rf = risk_free_rate / TRADING_DAYS;
    let downside_sq: f64 = daily_returns
        .iter()
        .map(|r| (r - daily_rf).min(0.0).powi(2))
        .sum();
    let downside_dev = (downside_sq / daily_returns.len() as f64).sqrt();
    if downside_dev <= 0.0 {
        return f64::NAN;
    }
    let excess = mean(daily_returns) - daily_rf;
    excess / downside_dev * TRADING_DAYS.sqrt()
}

/// Maximum drawdown of an equity curve: `min(equity / running_max - 1)`.
///
/// Always <= 0; a monotonically rising curve returns exactly 0. NAN on an
/// empty curve.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    if equity_curve.is_empty() {
        return f64::NAN;
    }
    let mut peak = equity_curve[0];
    let mut worst = 0.0f64;
    for &e in equity_curve {
        if e > peak {
            peak = e;
        }
        if peak > 0.0 {
            worst = worst.min(e / peak - 1.0);
        }
    }
    worst
}

/// Historical value-at-risk at the given confidence level.
///
/// Returns the loss threshold as a (typically negative) daily return: with
/// `confidence = 0.95`, 5% of observed days were at or below the result.
pub fn value_at_risk(daily_returns: &[f64], confidence: f64) -> f64 {
    if daily_returns.is_empty() || !(0.5..1.0).contains(&confidence) {
        return f64::NAN;
    }
    let mut sorted = daily_returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((1.0 - confidence) * sorted.len() as f64).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Conditional VaR: mean of returns at or below the VaR threshold.
pub fn conditional_var(daily_returns: &[f64], confidence: f64) -> f64 {
    let var = value_at_risk(daily_returns, confidence);
    if !var.is_finite() {
        return f64::NAN;
    }
    let tail: Vec<f64> = daily_returns.iter().copied().filter(|r| *r <= var).collect();
    mean(&tail)
}

/// Annualized growth rate over `n` daily returns.
pub fn cagr(initial: f64, terminal: f64, n_days: usize) -> f64 {
    if initial <= 0.0 || terminal <= 0.0 || n_days == 0 {
        return f64::NAN;
    }
    (terminal / initial).powf(TRADING_DAYS / n_days as f64) - 1.0
}

/// Calmar ratio: CAGR over absolute max drawdown. NAN when the curve never
/// drew down.
pub fn calmar_ratio(equity_curve: &[f64]) -> f64 {
    if equity_curve.len() < 2 {
        return f64::NAN;
    }
    let dd = max_drawdown(equity_curve);
    if !dd.is_finite() || dd == 0.0 {
        return f64::NAN;
    }
    let growth = cagr(
        equity_curve[0],
        equity_curve[equity_curve.len() - 1],
        equity_curve.len() - 1,
    );
    growth / dd.abs()
}

/// Annualized volatility of daily returns.
pub fn annualized_volatility(daily_returns: &[f64]) -> f64 {
    let sd = std_dev(daily_returns);
    if !sd.is_finite() {
        return f64::NAN;
    }
    sd * TRADING_DAYS.sqrt()
}

/// Rolling Sharpe ratio over a trailing window.
///
/// Output aligns with the input: entry `i` is the Sharpe of the window ending
/// at `i`, NAN until a full window is available.
pub fn rolling_sharpe(daily_returns: &[f64], window: usize, risk_free_rate: f64) -> Vec<f64> {
    let mut out = vec![f64::NAN; daily_returns.len()];
    if window < 2 {
        return out;
    }
    for i in (window - 1)..daily_returns.len() {
        out[i] = sharpe_ratio(&daily_returns[i + 1 - window..=i], risk_free_rate);
    }
    out
}

/// All headline metrics for one strategy run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_return: f64,
    pub cagr: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub calmar_ratio: f64,
    pub value_at_risk: f64,
    pub conditional_var: f64,
    pub var_confidence: f64,
}

impl MetricsSummary {
    /// Compute the full bundle from a daily return series and its equity curve.
    pub fn from_returns(
        daily_returns: &[f64],
        equity_curve: &[f64],
        risk_free_rate: f64,
        var_confidence: f64,
    ) -> Self {
        let total_return = if equity_curve.len() >= 2 && equity_curve[0] > 0.0 {
            equity_curve[equity_curve.len() - 1] / equity_curve[0] - 1.0
        } else {
            f64::NAN
        };
        let growth = if equity_curve.len() >= 2 {
            cagr(
                equity_curve[0],
                equity_curve[equity_curve.len() - 1],
                equity_curve.len() - 1,
            )
        } else {
            f64::NAN
        };
        Self {
            total_return,
            cagr: growth,
            annualized_volatility: annualized_volatility(daily_returns),
            sharpe_ratio: sharpe_ratio(daily_returns, risk_free_rate),
            sortino_ratio: sortino_ratio(daily_returns, risk_free_rate),
            max_drawdown: max_drawdown(equity_curve),
            calmar_ratio: calmar_ratio(equity_curve),
            value_at_risk: value_at_risk(daily_returns, var_confidence),
            conditional_var: conditional_var(daily_returns, var_confidence),
            var_confidence,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "return {:.2}%, CAGR {:.2}%, vol {:.2}%, Sharpe {:.2}, Sortino {:.2}, \
             MaxDD {:.2}%, Calmar {:.2}, VaR({:.0}%) {:.2}%, CVaR {:.2}%",
            self.total_return * 100.0,
            self.cagr * 100.0,
            self.annualized_volatility * 100.0,
            self.sharpe_ratio,
            self.sortino_ratio,
            self.max_drawdown * 100.0,
            self.calmar_ratio,
            self.var_confidence * 100.0,
            self.value_at_risk * 100.0,
            self.conditional_var * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharpe_constant_positive_returns() {
        // Zero variance: Sharpe is undefined, not infinite.
        let returns = vec![0.001; 100];
        assert!(sharpe_ratio(&returns, 0.0).is_nan());
    }

    #[test]
    fn test_sharpe_sign_follows_mean_excess() {
        let up: Vec<f64> = (0..100).map(|i| 0.002 + 0.001 * ((i % 3) as f64 - 1.0)).collect();
        assert!(sharpe_ratio(&up, 0.0) > 0.0);

        let down: Vec<f64> = up.iter().map(|r| -r).collect();
        assert!(sharpe_ratio(&down, 0.0) < 0.0);
    }

    #[test]
    fn test_sharpe_hand_computed() {
        // Alternating +1%/-0.5%: mean 0.25%, sd = 0.75%*sqrt(n/(n-1)).
        let returns: Vec<f64> = (0..100)
            .map(|i| if i % 2 == 0 { 0.01 } else { -0.005 })
            .collect();
        let m = 0.0025;
        let sd = (returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / 99.0).sqrt();
        let expected = m / sd * 252.0f64.sqrt();
        assert!((sharpe_ratio(&returns, 0.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_sortino_ignores_upside_volatility() {
        // Same downside, larger upside: Sortino rewards it, unlike Sharpe.
        let calm: Vec<f64> = (0..100)
            .map(|i| if i % 2 == 0 { 0.01 } else { -0.01 })
            .collect();
        let spiky: Vec<f64> = (0..100)
            .map(|i| if i % 2 == 0 { 0.01 } else { -0.01 })
            .map(|r: f64| if r > 0.0 { r * 3.0 } else { r })
            .collect();
        assert!(sortino_ratio(&spiky, 0.0) > sortino_ratio(&calm, 0.0));
    }

    #[test]
    fn test_sortino_no_downside_is_nan() {
        let returns = vec![0.01; 50];
        assert!(sortino_ratio(&returns, 0.0).is_nan());
    }

    #[test]
    fn test_max_drawdown_known_curve() {
        // Peak 120, trough 90: drawdown = 90/120 - 1 = -0.25.
        let curve = vec![100.0, 120.0, 110.0, 90.0, 130.0];
        assert!((max_drawdown(&curve) - (-0.25)).abs() < 1e-12);
    }

    #[test]
    fn test_max_drawdown_monotone_rise_is_zero() {
        let curve = vec![100.0, 101.0, 105.0, 110.0];
        assert_eq!(max_drawdown(&curve), 0.0);
    }

    #[test]
    fn test_max_drawdown_never_positive() {
        let curve = vec![100.0, 90.0, 95.0, 85.0, 100.0, 99.0];
        assert!(max_drawdown(&curve) <= 0.0);
    }

    #[test]
    fn test_var_cvar_ordering() {
        // 100 returns from -5% to +4.9%; the 5% tail is the 5 worst.
        let returns: Vec<f64> = (0..100).map(|i| -0.05 + 0.001 * i as f64).collect();
        let var = value_at_risk(&returns, 0.95);
        let cvar = conditional_var(&returns, 0.95);

        // Tail index 5 -> -0.045; CVaR averages the six values <= it.
        assert!((var - (-0.045)).abs() < 1e-12);
        assert!(cvar <= var);
        assert!((cvar - (-0.0475)).abs() < 1e-12);
    }

    #[test]
    fn test_var_empty_is_nan() {
        assert!(value_at_risk(&[], 0.95).is_nan());
        assert!(conditional_var(&[], 0.95).is_nan());
    }

    #[test]
    fn test_cagr_doubling_in_a_year() {
        let g = cagr(100.0, 200.0, 252);
        assert!((g - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_calmar_flat_curve_is_nan() {
        let curve = vec![100.0; 50];
        assert!(calmar_ratio(&curve).is_nan());
    }

    #[test]
    fn test_rolling_sharpe_alignment() {
        let returns: Vec<f64> = (0..300)
            .map(|i| if i % 2 == 0 { 0.01 } else { -0.005 })
            .collect();
        let rolling = rolling_sharpe(&returns, 252, 0.0);

        assert_eq!(rolling.len(), returns.len());
        for v in &rolling[..251] {
            assert!(v.is_nan());
        }
        for v in &rolling[251..] {
            assert!(v.is_finite());
        }
        // The full-window value at the first valid index matches a direct call.
        let direct = sharpe_ratio(&returns[..252], 0.0);
        assert!((rolling[251] - direct).abs() < 1e-12);
    }

    #[test]
    fn test_summary_bundle_consistency() {
        let curve: Vec<f64> = (0..253).map(|i| 100.0 * (1.0 + 0.0005 * i as f64)).collect();
        let returns: Vec<f64> = curve.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
        let summary = MetricsSummary::from_returns(&returns, &curve, 0.0, 0.95);

        assert!((summary.total_return - (curve[252] / curve[0] - 1.0)).abs() < 1e-12);
        assert!(summary.max_drawdown == 0.0);
        assert!(summary.calmar_ratio.is_nan());
        assert!(summary.sharpe_ratio > 0.0);
    }
}
