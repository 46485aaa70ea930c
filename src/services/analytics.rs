use crate::constants::UPSTREAM_EXPIRY_EPOCH_OFFSET_SECS;
use crate::error::{AppError, Result};
use crate::models::{
    parse_strike, Expiry, MetricName, OptionChainPayload, OptionSide, ReversalReport, SideMetrics, SideQuote, StrikeEntry,
    SECONDS_PER_DAY,
};
use crate::services::black_scholes::{self, PricingError, ReversalInputs};
use crate::services::metric_extractor::side_metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

/// Derived analytics over a live chain
#[derive(Debug, Clone, Copy)]
pub struct AnalyticsEngine {
    /// Seconds to add to an upstream expiry id to get Unix seconds
    expiry_epoch_offset: i64,
}

impl Default for AnalyticsEngine {
    fn default() -> Self {
        Self::new(UPSTREAM_EXPIRY_EPOCH_OFFSET_SECS)
    }
}

impl AnalyticsEngine {
    pub fn new(expiry_epoch_offset: i64) -> Self {
        Self { expiry_epoch_offset }
    }

    pub fn expiry_unix(&self, expiry: Expiry) -> i64 {
        expiry + self.expiry_epoch_offset
    }

    /// Fractional calendar days from `now` until expiry. Negative once expired.
    pub fn time_to_expiry_days(&self, expiry: Expiry, now: DateTime<Utc>) -> f64 {
        let now_secs = now.timestamp_millis() as f64 / 1000.0;
        (self.expiry_unix(expiry) as f64 - now_secs) / SECONDS_PER_DAY as f64
    }

    /// Attach a reversal to every strike of the chain.
    ///
    /// Strikes whose computation fails keep `reversal: null`; the failure is
    /// recorded in the report and the remaining strikes are still processed.
    pub fn compute_reversal(
        &self,
        chain: &mut OptionChainPayload,
        expiry: Expiry,
        now: DateTime<Utc>,
    ) -> ReversalReport {
        let days = self.time_to_expiry_days(expiry, now);
        let strikes: Vec<f64> = chain.strikes().into_iter().map(|(_, strike)| strike).collect();
        self.compute_reversals_for(chain, &strikes, days)
    }

    /// Same as [`compute_reversal`](Self::compute_reversal) over an explicit strike list
    pub fn compute_reversals_for(
        &self,
        chain: &mut OptionChainPayload,
        strikes: &[f64],
        days_to_expiry: f64,
    ) -> ReversalReport {
        let mut report = ReversalReport {
            days_to_expiry,
            ..ReversalReport::default()
        };
        let spot = chain.spot();

        for &strike in strikes {
            let Some(entry) = chain.strike_entry_mut(strike) else {
                warn!(strike, "Strike missing from raw chain, skipping reversal");
                report.skipped.push(format_strike(strike));
                continue;
            };

            let outcome = spot
                .ok_or(PricingError::MissingInput("spot price"))
                .and_then(|spot| reversal_inputs(entry, spot, strike, days_to_expiry))
                .and_then(|inputs| black_scholes::reversal(&inputs));

            match outcome {
                Ok(result) => {
                    entry.reversal = Some(result);
                    report.computed += 1;
                }
                Err(e) => {
                    debug!(strike, error = %e, "Reversal not computed");
                    entry.reversal = None;
                    report.failed.push((format_strike(strike), e.to_string()));
                }
            }
        }

        report
    }
}

/// Gather the nine model inputs of one strike.
///
/// A missing delta is replaced by the model delta at spot for that leg's IV.
fn reversal_inputs(
    entry: &StrikeEntry,
    spot: f64,
    strike: f64,
    days_to_expiry: f64,
) -> std::result::Result<ReversalInputs, PricingError> {
    if !(days_to_expiry > 0.0) {
        return Err(PricingError::Expired { days_to_expiry });
    }

    let ce = entry.ce.as_ref().ok_or(PricingError::MissingInput("CE leg"))?;
    let pe = entry.pe.as_ref().ok_or(PricingError::MissingInput("PE leg"))?;

    let ce_iv = ce.iv.ok_or(PricingError::MissingInput("CE iv"))?;
    let pe_iv = pe.iv.ok_or(PricingError::MissingInput("PE iv"))?;
    let ce_ltp = ce.ltp.ok_or(PricingError::MissingInput("CE ltp"))?;
    let pe_ltp = pe.ltp.ok_or(PricingError::MissingInput("PE ltp"))?;

    let ce_delta = ce
        .delta()
        .or_else(|| black_scholes::model_delta(OptionSide::Call, spot, strike, ce_iv, days_to_expiry))
        .ok_or(PricingError::MissingInput("CE delta"))?;
    let pe_delta = pe
        .delta()
        .or_else(|| black_scholes::model_delta(OptionSide::Put, spot, strike, pe_iv, days_to_expiry))
        .ok_or(PricingError::MissingInput("PE delta"))?;

    Ok(ReversalInputs {
        spot,
        strike,
        days_to_expiry,
        ce_iv,
        pe_iv,
        ce_ltp,
        pe_ltp,
        ce_delta,
        pe_delta,
    })
}

fn format_strike(strike: f64) -> String {
    if strike.fract() == 0.0 {
        format!("{:.0}", strike)
    } else {
        strike.to_string()
    }
}

fn side_quote(chain: &OptionChainPayload, strike: f64, side: OptionSide) -> Result<&SideQuote> {
    let (_, entry) = chain
        .strike_entry(strike)
        .ok_or_else(|| AppError::not_found(format!("Strike {} not found in option chain", strike)))?;

    entry
        .side(side)
        .ok_or_else(|| AppError::not_found(format!("No {} quote at strike {}", side, strike)))
}

fn require(value: Option<f64>, field: &str, strike: f64, side: OptionSide) -> Result<f64> {
    value.ok_or_else(|| AppError::not_found(format!("{} not available for {} at strike {}", field, side, strike)))
}

/// `OI_percentage` of one leg
pub fn get_percentage(chain: &OptionChainPayload, strike: f64, side: OptionSide) -> Result<f64> {
    get_metric(chain, strike, side, MetricName::OiPercentage)
}

/// One tracked metric of one leg
pub fn get_metric(chain: &OptionChainPayload, strike: f64, side: OptionSide, name: MetricName) -> Result<f64> {
    let metrics = get_percentage_metrics(chain, strike, side)?;
    require(metrics.get(name), name.as_str(), strike, side)
}

/// All three tracked metrics of one leg
pub fn get_percentage_metrics(chain: &OptionChainPayload, strike: f64, side: OptionSide) -> Result<SideMetrics> {
    side_quote(chain, strike, side).map(|quote| side_metrics(Some(quote)))
}

pub fn get_iv(chain: &OptionChainPayload, strike: f64, side: OptionSide) -> Result<f64> {
    let quote = side_quote(chain, strike, side)?;
    require(quote.iv, "IV", strike, side)
}

/// Upstream-reported delta; never substituted here
pub fn get_delta(chain: &OptionChainPayload, strike: f64, side: OptionSide) -> Result<f64> {
    let quote = side_quote(chain, strike, side)?;
    require(quote.delta(), "delta", strike, side)
}

/// Synthetic future from put-call parity at the at-the-money strike
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FutureQuote {
    pub future: f64,
    pub atm_strike: f64,
    pub spot: f64,
}

/// `K_atm + C_ltp - P_ltp`, where the ATM strike is the one closest to spot with both premiums
pub fn get_future(chain: &OptionChainPayload) -> Result<FutureQuote> {
    let spot = chain
        .spot()
        .ok_or_else(|| AppError::not_found("Spot price not available in option chain"))?;

    let (atm_strike, call_ltp, put_ltp) = chain
        .data
        .oc
        .iter()
        .filter_map(|(key, entry)| {
            let strike = parse_strike(key)?;
            let call = entry.ce.as_ref()?.ltp?;
            let put = entry.pe.as_ref()?.ltp?;
            Some((strike, call, put))
        })
        .min_by(|a, b| (a.0 - spot).abs().total_cmp(&(b.0 - spot).abs()))
        .ok_or_else(|| AppError::not_found("No strike with both call and put premiums"))?;

    Ok(FutureQuote {
        future: atm_strike + call_ltp - put_ltp,
        atm_strike,
        spot,
    })
}
