//! Black-Scholes pricing with zero rate and zero dividend yield, and the
//! per-strike reversal solver built on it.
//!
//! Volatilities are taken in percent (as the upstream reports them) and time in
//! fractional calendar days; both are converted here.

use crate::constants::{
    DAYS_PER_YEAR, IV_PERCENT_SCALE, MIN_REVERSAL_SLOPE, REVERSAL_MAX_ITERS, REVERSAL_TOLERANCE,
};
use crate::error::AppError;
use crate::models::{OptionSide, ReversalResult};
use libm::erf;
use std::f64::consts::SQRT_2;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum PricingError {
    #[error("contract expired ({days_to_expiry:.4} days to expiry)")]
    Expired { days_to_expiry: f64 },

    #[error("invalid {side} volatility: {iv}")]
    InvalidVolatility { side: OptionSide, iv: f64 },

    #[error("missing {0}")]
    MissingInput(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("degenerate call-put delta spread: {slope}")]
    DegenerateSlope { slope: f64 },

    #[error("no convergence after {iterations} iterations")]
    NoConvergence { iterations: u32 },

    #[error("non-finite result")]
    NonFinite,
}

impl From<PricingError> for AppError {
    fn from(err: PricingError) -> Self {
        AppError::Computation(err.to_string())
    }
}

/// Inputs of one reversal computation, straight from a chain strike
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReversalInputs {
    pub spot: f64,
    pub strike: f64,
    pub days_to_expiry: f64,
    /// Percent
    pub ce_iv: f64,
    /// Percent
    pub pe_iv: f64,
    pub ce_ltp: f64,
    pub pe_ltp: f64,
    pub ce_delta: f64,
    pub pe_delta: f64,
}

/// Price and delta of one option
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub price: f64,
    pub delta: f64,
}

pub fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / SQRT_2))
}

/// Price and delta with annualised `vol` (decimal) and `tau` in years
pub fn price_and_delta(side: OptionSide, spot: f64, strike: f64, vol: f64, tau: f64) -> Option<Quote> {
    if !(spot > 0.0 && strike > 0.0 && vol > 0.0 && tau > 0.0) {
        return None;
    }
    let denom = vol * tau.sqrt();
    if !denom.is_finite() || denom <= 0.0 {
        return None;
    }
    let log_term = (spot / strike).ln();
    if !log_term.is_finite() {
        return None;
    }

    let d1 = (log_term + 0.5 * vol * vol * tau) / denom;
    let d2 = d1 - denom;

    let quote = match side {
        OptionSide::Call => Quote {
            price: spot * norm_cdf(d1) - strike * norm_cdf(d2),
            delta: norm_cdf(d1),
        },
        OptionSide::Put => Quote {
            price: strike * norm_cdf(-d2) - spot * norm_cdf(-d1),
            delta: norm_cdf(d1) - 1.0,
        },
    };

    (quote.price.is_finite() && quote.delta.is_finite()).then_some(quote)
}

/// Model delta at `spot` from a percent IV and calendar days to expiry
pub fn model_delta(side: OptionSide, spot: f64, strike: f64, iv_percent: f64, days_to_expiry: f64) -> Option<f64> {
    price_and_delta(
        side,
        spot,
        strike,
        iv_percent / IV_PERCENT_SCALE,
        days_to_expiry / DAYS_PER_YEAR,
    )
    .map(|q| q.delta)
}

/// Underlying level at which the model call and put on `strike` are worth the same.
///
/// Newton iteration on `f(S) = C(S) - P(S)` with `f'(S) = delta_c(S) - delta_p(S)`,
/// seeded with the first-order estimate from market premiums and deltas:
/// `S0 = spot - (ce_ltp - pe_ltp) / (ce_delta - pe_delta)`.
pub fn reversal(inputs: &ReversalInputs) -> Result<ReversalResult, PricingError> {
    let ReversalInputs {
        spot,
        strike,
        days_to_expiry,
        ce_iv,
        pe_iv,
        ce_ltp,
        pe_ltp,
        ce_delta,
        pe_delta,
    } = *inputs;

    if !(days_to_expiry > 0.0) {
        return Err(PricingError::Expired { days_to_expiry });
    }
    if !(spot > 0.0 && spot.is_finite()) {
        return Err(PricingError::InvalidInput(format!("spot {}", spot)));
    }
    if !(strike > 0.0 && strike.is_finite()) {
        return Err(PricingError::InvalidInput(format!("strike {}", strike)));
    }
    for (side, iv) in [(OptionSide::Call, ce_iv), (OptionSide::Put, pe_iv)] {
        if !(iv > 0.0 && iv.is_finite()) {
            return Err(PricingError::InvalidVolatility { side, iv });
        }
    }

    let slope = ce_delta - pe_delta;
    if !slope.is_finite() || slope.abs() < MIN_REVERSAL_SLOPE {
        return Err(PricingError::DegenerateSlope { slope });
    }
    let linear_estimate = spot - (ce_ltp - pe_ltp) / slope;
    if !linear_estimate.is_finite() {
        return Err(PricingError::NonFinite);
    }

    let tau = days_to_expiry / DAYS_PER_YEAR;
    let ce_vol = ce_iv / IV_PERCENT_SCALE;
    let pe_vol = pe_iv / IV_PERCENT_SCALE;

    let spread = |s: f64| -> Option<(f64, f64)> {
        let call = price_and_delta(OptionSide::Call, s, strike, ce_vol, tau)?;
        let put = price_and_delta(OptionSide::Put, s, strike, pe_vol, tau)?;
        Some((call.price - put.price, call.delta - put.delta))
    };

    // A negative first-order estimate can't be priced; start from the strike instead
    let mut s = if linear_estimate > 0.0 { linear_estimate } else { strike };

    for iteration in 1..=REVERSAL_MAX_ITERS {
        let (f, df) = spread(s).ok_or(PricingError::NonFinite)?;
        if df.abs() < MIN_REVERSAL_SLOPE {
            return Err(PricingError::DegenerateSlope { slope: df });
        }

        let step = f / df;
        let mut next = s - step;
        if next <= 0.0 {
            // Stay in the positive domain
            next = s / 2.0;
        }

        if (next - s).abs() <= REVERSAL_TOLERANCE * s.max(1.0) {
            if !next.is_finite() {
                return Err(PricingError::NonFinite);
            }
            return Ok(ReversalResult {
                reversal: next,
                linear_estimate,
                distance: next - spot,
                iterations: iteration,
            });
        }
        s = next;
    }

    Err(PricingError::NoConvergence {
        iterations: REVERSAL_MAX_ITERS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_norm_cdf() {
        assert!(approx(norm_cdf(0.0), 0.5, 1e-12));
        assert!(approx(norm_cdf(1.96), 0.975, 1e-3));
        assert!(approx(norm_cdf(-1.96), 0.025, 1e-3));
    }

    #[test]
    fn test_put_call_parity_zero_rate() {
        let tau = 7.0 / DAYS_PER_YEAR;
        let call = price_and_delta(OptionSide::Call, 18050.0, 18000.0, 0.15, tau).unwrap();
        let put = price_and_delta(OptionSide::Put, 18050.0, 18000.0, 0.15, tau).unwrap();
        assert!(approx(call.price - put.price, 50.0, 1e-6));
        assert!(approx(call.delta - put.delta, 1.0, 1e-12));
        assert!(call.delta > 0.5 && put.delta < 0.0);
    }

    #[test]
    fn test_price_rejects_degenerate_inputs() {
        assert!(price_and_delta(OptionSide::Call, 18000.0, 18000.0, 0.15, 0.0).is_none());
        assert!(price_and_delta(OptionSide::Call, 18000.0, 18000.0, 0.0, 0.1).is_none());
        assert!(price_and_delta(OptionSide::Put, -1.0, 18000.0, 0.15, 0.1).is_none());
    }

    fn consistent_inputs(spot: f64, strike: f64, days: f64, iv: f64) -> ReversalInputs {
        let tau = days / DAYS_PER_YEAR;
        let call = price_and_delta(OptionSide::Call, spot, strike, iv / 100.0, tau).unwrap();
        let put = price_and_delta(OptionSide::Put, spot, strike, iv / 100.0, tau).unwrap();
        ReversalInputs {
            spot,
            strike,
            days_to_expiry: days,
            ce_iv: iv,
            pe_iv: iv,
            ce_ltp: call.price,
            pe_ltp: put.price,
            ce_delta: call.delta,
            pe_delta: put.delta,
        }
    }

    #[test]
    fn test_symmetric_chain_reverses_at_strike() {
        let inputs = consistent_inputs(18040.0, 18000.0, 6.5, 14.0);
        let result = reversal(&inputs).unwrap();

        assert!(approx(result.reversal, 18000.0, 1e-4));
        assert!(approx(result.linear_estimate, 18000.0, 1e-6));
        assert!(approx(result.distance, -40.0, 1e-4));
        assert!(result.iterations >= 1);
    }

    #[test]
    fn test_skewed_chain_prices_equal_at_reversal() {
        let inputs = ReversalInputs {
            spot: 18040.0,
            strike: 18000.0,
            days_to_expiry: 6.5,
            ce_iv: 12.5,
            pe_iv: 16.0,
            ce_ltp: 190.0,
            pe_ltp: 160.0,
            ce_delta: 0.55,
            pe_delta: -0.45,
        };
        let result = reversal(&inputs).unwrap();

        let tau = 6.5 / DAYS_PER_YEAR;
        let call = price_and_delta(OptionSide::Call, result.reversal, 18000.0, 0.125, tau).unwrap();
        let put = price_and_delta(OptionSide::Put, result.reversal, 18000.0, 0.16, tau).unwrap();
        assert!(approx(call.price, put.price, 1e-4));
        assert!(approx(result.linear_estimate, 18010.0, 1e-9));
        // Richer put vol pushes the crossover above the strike
        assert!(result.reversal > 18000.0);
    }

    #[test]
    fn test_expired_contract_fails() {
        let mut inputs = consistent_inputs(18040.0, 18000.0, 1.0, 14.0);
        inputs.days_to_expiry = 0.0;
        assert!(matches!(reversal(&inputs), Err(PricingError::Expired { .. })));

        inputs.days_to_expiry = -0.5;
        assert!(matches!(reversal(&inputs), Err(PricingError::Expired { .. })));
    }

    #[test]
    fn test_zero_iv_and_flat_deltas_fail() {
        let mut inputs = consistent_inputs(18040.0, 18000.0, 3.0, 14.0);
        inputs.pe_iv = 0.0;
        assert!(matches!(
            reversal(&inputs),
            Err(PricingError::InvalidVolatility { side: OptionSide::Put, .. })
        ));

        let mut inputs = consistent_inputs(18040.0, 18000.0, 3.0, 14.0);
        inputs.ce_delta = 0.0;
        inputs.pe_delta = 0.0;
        assert!(matches!(reversal(&inputs), Err(PricingError::DegenerateSlope { .. })));
    }

    #[test]
    fn test_model_delta() {
        let delta = model_delta(OptionSide::Call, 18000.0, 18000.0, 15.0, 7.0).unwrap();
        assert!(delta > 0.5 && delta < 0.52);
        assert!(model_delta(OptionSide::Put, 18000.0, 18000.0, 15.0, 0.0).is_none());
    }
}
