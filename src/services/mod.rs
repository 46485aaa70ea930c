pub mod analytics;
pub mod black_scholes;
pub mod blob_archive;
pub mod database;
pub mod health;
pub mod metric_extractor;
pub mod query_service;
pub mod snapshot_store;
pub mod stream_registry;
pub mod trading_hours;
pub mod upstream;

pub use analytics::{AnalyticsEngine, FutureQuote};
pub use blob_archive::BlobArchive;
pub use database::{get_database_stats, DatabaseStats, SnapshotDatabase};
pub use health::{new_shared_health_stats, HealthStats, SchedulerState, SharedHealthStats, WorkerStats};
pub use query_service::{DeltaAnswer, LiveChain, LookupParams, QueryService, SharedQueryService};
pub use snapshot_store::{ExpirySummary, RepairReport, SnapshotStore, StrikeHistory, WriteOutcome};
pub use stream_registry::{SharedStreamRegistry, StreamEvent, StreamRegistry, StreamStatus};
pub use trading_hours::MaintenanceWindow;
pub use upstream::{HttpFetcher, MarketDataFetcher};
