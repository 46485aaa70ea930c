use crate::models::{MetricSnapshot, OptionChainPayload, SideMetrics, SideQuote};

/// Project a live chain onto the three tracked per-strike metrics.
///
/// Every strike of `data.oc` appears on both sides, in upstream order. A missing
/// leg or field becomes `null`; values are copied, never recomputed.
pub fn extract(payload: &OptionChainPayload) -> MetricSnapshot {
    let mut snapshot = MetricSnapshot::default();

    for (strike, entry) in &payload.data.oc {
        snapshot
            .ce_data
            .insert(strike.clone(), side_metrics(entry.ce.as_ref()));
        snapshot
            .pe_data
            .insert(strike.clone(), side_metrics(entry.pe.as_ref()));
    }

    snapshot
}

pub fn side_metrics(quote: Option<&SideQuote>) -> SideMetrics {
    match quote {
        Some(quote) => SideMetrics {
            oi_percentage: quote.oi_percentage,
            oichng_percentage: quote.oichng_percentage,
            vol_percentage: quote.vol_percentage,
        },
        None => SideMetrics::default(),
    }
}
