mod cache;
mod checks;
mod metrics;
mod models;
mod probes;

pub use cache::{CacheEntry, Clock, ResultCache, SystemClock};
pub use checks::{HealthChecker, StampProbes};
pub use metrics::HealthMetrics;
pub use models::{
    AggregateResult, CheckOutcome, HealthError, HealthScoreSample, HealthStatus, ProbeIdentity,
};
pub use probes::{
    DatabaseProbe, Probe, ProducerProbe, StorageProbe, TelemetryScoreProbe,
    HEALTH_SCORE_LOOKBACK, HEALTH_SCORE_THRESHOLD,
};
