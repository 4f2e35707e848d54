//! finhub-portfolio - Portfolio construction tools
//!
//! Inverse-variance allocation and rebalancing drift analysis, exposed as
//! schema-described tools on a spoke runtime.

pub mod tools;

mod math {
    //! Portfolio math over uncorrelated asset inputs.

    const RISK_FREE_RATE: f64 = 0.03;

    /// Inverse-variance weights. Assets with zero variance are treated as
    /// having the smallest observed positive variance to avoid a single
    /// asset absorbing the whole allocation.
    pub fn inverse_variance_weights(variances: &[f64]) -> Option<Vec<f64>> {
        if variances.is_empty() || variances.iter().any(|v| *v < 0.0) {
            return None;
        }
        let floor = variances
            .iter()
            .copied()
            .filter(|v| *v > 0.0)
            .fold(f64::INFINITY, f64::min);
        let floor = if floor.is_finite() { floor } else { 1e-8 };

        let inverses: Vec<f64> = variances
            .iter()
            .map(|v| 1.0 / v.max(floor))
            .collect();
        let total: f64 = inverses.iter().sum();
        Some(inverses.into_iter().map(|i| i / total).collect())
    }

    /// Expected portfolio return: `w · r`.
    pub fn portfolio_return(weights: &[f64], expected_returns: &[f64]) -> f64 {
        weights
            .iter()
            .zip(expected_returns)
            .map(|(w, r)| w * r)
            .sum()
    }

    /// Portfolio volatility under the uncorrelated assumption:
    /// `√(Σ w²σ²)`.
    pub fn portfolio_volatility(weights: &[f64], variances: &[f64]) -> f64 {
        weights
            .iter()
            .zip(variances)
            .map(|(w, v)| w * w * v)
            .sum::<f64>()
            .sqrt()
    }

    pub fn sharpe_ratio(expected_return: f64, volatility: f64) -> Option<f64> {
        if volatility <= 0.0 {
            return None;
        }
        Some((expected_return - RISK_FREE_RATE) / volatility)
    }

}

pub use math::{inverse_variance_weights, portfolio_return, portfolio_volatility, sharpe_ratio};
