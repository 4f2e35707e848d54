//! finhub-risk - Risk analysis tools
//!
//! Value-at-Risk (parametric and historical) and volatility estimation,
//! exposed as schema-described tools on a spoke runtime.

pub mod tools;

mod math {
    //! Risk math. Z-scores for the common confidence levels, with linear
    //! interpolation in between.

    pub const Z_SCORE_90: f64 = 1.282;
    pub const Z_SCORE_95: f64 = 1.645;
    pub const Z_SCORE_99: f64 = 2.326;

    pub fn z_score_for_confidence(confidence: f64) -> f64 {
        match confidence {
            c if (c - 0.90).abs() < 0.001 => Z_SCORE_90,
            c if (c - 0.95).abs() < 0.001 => Z_SCORE_95,
            c if (c - 0.99).abs() < 0.001 => Z_SCORE_99,
            c if c < 0.95 => Z_SCORE_90 + (c - 0.90) / 0.05 * (Z_SCORE_95 - Z_SCORE_90),
            c => Z_SCORE_95 + (c - 0.95) / 0.04 * (Z_SCORE_99 - Z_SCORE_95),
        }
    }

    /// Variance-covariance VaR: `z × σ × √t × V`.
    pub fn parametric_var(
        portfolio_value: f64,
        daily_volatility: f64,
        confidence: f64,
        horizon_days: u32,
    ) -> f64 {
        z_score_for_confidence(confidence)
            * daily_volatility
            * f64::from(horizon_days).sqrt()
            * portfolio_value
    }

    /// Historical VaR: the loss at the (1 − confidence) percentile of the
    /// return series, scaled to the portfolio value.
    pub fn historical_var(returns: &[f64], confidence: f64, portfolio_value: f64) -> Option<f64> {
        if returns.is_empty() {
            return None;
        }
        let mut sorted = returns.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let index = ((1.0 - confidence) * sorted.len() as f64).floor() as usize;
        let cutoff = sorted[index.min(sorted.len() - 1)];
        Some((-cutoff).max(0.0) * portfolio_value)
    }

    /// Sample standard deviation of daily log returns.
    pub fn daily_log_volatility(prices: &[f64]) -> Option<f64> {
        if prices.len() < 2 || prices.iter().any(|p| *p <= 0.0) {
            return None;
        }
        let returns: Vec<f64> = prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        if returns.len() < 2 {
            return Some(0.0);
        }
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / (returns.len() - 1) as f64;
        Some(variance.sqrt())
    }

    /// Annualization over 252 trading days.
    pub fn annualize(daily_volatility: f64) -> f64 {
        daily_volatility * 252.0_f64.sqrt()
    }

}

pub use math::{annualize, daily_log_volatility, historical_var, parametric_var};
