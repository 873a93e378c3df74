use super::models::{HealthScoreSample, ProbeIdentity};
use crate::configuration::EmptyWindowPolicy;
use crate::connectors::{BlobStore, DatabaseService, HealthScoreSource, MessageProducer};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A health score at or below this marks the stamp unhealthy.
pub const HEALTH_SCORE_THRESHOLD: f64 = 0.5;
pub const HEALTH_SCORE_LOOKBACK: Duration = Duration::from_secs(10 * 60);

/// One dependency check. Implementations never fail: anything that keeps
/// them from confirming health is reported as `false`.
#[async_trait]
pub trait Probe: Send + Sync {
    fn identity(&self) -> ProbeIdentity;

    async fn probe(&self, cancel: &CancellationToken) -> bool;
}

/// Healthy while the marker blob exists in the health container.
pub struct StorageProbe {
    store: Arc<dyn BlobStore>,
    container_name: String,
    blob_name: String,
}

impl StorageProbe {
    pub fn new(store: Arc<dyn BlobStore>, container_name: String, blob_name: String) -> Self {
        Self {
            store,
            container_name,
            blob_name,
        }
    }
}

#[async_trait]
impl Probe for StorageProbe {
    fn identity(&self) -> ProbeIdentity {
        ProbeIdentity::Storage
    }

    #[tracing::instrument(name = "Check state blob health", skip(self, cancel))]
    async fn probe(&self, cancel: &CancellationToken) -> bool {
        match self
            .store
            .exists(&self.container_name, &self.blob_name, cancel)
            .await
        {
            Ok(exists) => {
                if !exists {
                    tracing::warn!(
                        "State blob {}/{} does not exist",
                        self.container_name,
                        self.blob_name
                    );
                }
                exists
            }
            Err(e) => {
                tracing::error!(
                    "Could not check health state blob. Responding with UNHEALTHY state: {}",
                    e
                );
                false
            }
        }
    }
}

pub struct ProducerProbe {
    producer: Arc<dyn MessageProducer>,
}

impl ProducerProbe {
    pub fn new(producer: Arc<dyn MessageProducer>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl Probe for ProducerProbe {
    fn identity(&self) -> ProbeIdentity {
        ProbeIdentity::Producer
    }

    #[tracing::instrument(name = "Check message producer health", skip(self, cancel))]
    async fn probe(&self, cancel: &CancellationToken) -> bool {
        self.producer.is_healthy(cancel).await.unwrap_or_else(|e| {
            tracing::error!("Message producer health check failed: {}", e);
            false
        })
    }
}

pub struct DatabaseProbe {
    database: Arc<dyn DatabaseService>,
}

impl DatabaseProbe {
    pub fn new(database: Arc<dyn DatabaseService>) -> Self {
        Self { database }
    }
}

#[async_trait]
impl Probe for DatabaseProbe {
    fn identity(&self) -> ProbeIdentity {
        ProbeIdentity::Database
    }

    #[tracing::instrument(name = "Check database health", skip(self, cancel))]
    async fn probe(&self, cancel: &CancellationToken) -> bool {
        self.database.is_healthy(cancel).await.unwrap_or_else(|e| {
            tracing::error!("Database health check failed: {}", e);
            false
        })
    }
}

/// Reads the most recent stamp health score from the regional workspace.
pub struct TelemetryScoreProbe {
    source: Arc<dyn HealthScoreSource>,
    workspace_id: String,
    empty_window_policy: EmptyWindowPolicy,
}

impl TelemetryScoreProbe {
    pub fn new(
        source: Arc<dyn HealthScoreSource>,
        workspace_id: String,
        empty_window_policy: EmptyWindowPolicy,
    ) -> Self {
        Self {
            source,
            workspace_id,
            empty_window_policy,
        }
    }
}

fn score_is_ok(sample: &HealthScoreSample) -> bool {
    !sample.health_score.is_nan() && sample.health_score > HEALTH_SCORE_THRESHOLD
}

#[async_trait]
impl Probe for TelemetryScoreProbe {
    fn identity(&self) -> ProbeIdentity {
        ProbeIdentity::Telemetry
    }

    #[tracing::instrument(name = "Check stamp health score", skip(self, cancel))]
    async fn probe(&self, cancel: &CancellationToken) -> bool {
        let samples = match self
            .source
            .query_recent_scores(&self.workspace_id, HEALTH_SCORE_LOOKBACK, cancel)
            .await
        {
            Ok(samples) => samples,
            Err(e) => {
                tracing::error!(
                    "Could not query Log Analytics health score. Responding with UNHEALTHY state: {}",
                    e
                );
                return false;
            }
        };

        let latest = match samples.iter().max_by_key(|sample| sample.time_generated) {
            Some(sample) => sample,
            None => {
                let verdict = self.empty_window_policy.verdict();
                tracing::warn!(
                    policy = ?self.empty_window_policy,
                    "No HealthScore within the last {} minutes. Reporting healthy = {}",
                    HEALTH_SCORE_LOOKBACK.as_secs() / 60,
                    verdict
                );
                return verdict;
            }
        };

        tracing::debug!(
            "TimeGenerated: [{}] HealthScore: {}",
            latest.time_generated,
            latest.health_score
        );

        if !score_is_ok(latest) {
            tracing::info!(
                "HealthScore of {} is <= {}. Reporting stamp as unhealthy!",
                latest.health_score,
                HEALTH_SCORE_THRESHOLD
            );
            return false;
        }

        true
    }
}
