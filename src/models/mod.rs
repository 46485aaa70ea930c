mod metric_snapshot;
mod option_chain;
mod poll_config;
mod reversal;
mod side;
mod snapshot_record;

pub use metric_snapshot::{MetricName, MetricSnapshot, SideMetrics};
pub use option_chain::{
    parse_strike, value_as_f64, Greeks, OptionChainData, OptionChainPayload, SideQuote, StrikeEntry,
    STRIKE_EPSILON,
};
pub use poll_config::{PollConfig, TrackedContract};
pub use reversal::{ReversalReport, ReversalResult};
pub use side::OptionSide;
pub use snapshot_record::{
    bucket_for, trading_day_of, BlobHandle, DayReadout, Expiry, SampleTimestamp, SnapshotRecord, TradingDay,
    SECONDS_PER_DAY,
};
