use serde::{Deserialize, Serialize};

/// Reversal level computed for one strike
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReversalResult {
    /// Underlying price at which the model call and put on this strike are worth the same
    pub reversal: f64,
    /// First-order estimate from market premiums and deltas, before model refinement
    pub linear_estimate: f64,
    /// `reversal - spot`
    pub distance: f64,
    /// Newton steps taken to converge
    pub iterations: u32,
}

/// Summary of a batch reversal pass over a chain
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReversalReport {
    pub computed: usize,
    /// Strikes requested but absent from the raw chain
    pub skipped: Vec<String>,
    /// Strikes whose computation failed, with the reason
    pub failed: Vec<(String, String)>,
    /// Time to expiry in fractional calendar days used for the pass
    pub days_to_expiry: f64,
}
