use super::{BlobStore, ConnectorError, DatabaseService, HealthScoreSource, MessageProducer};
use crate::health::HealthScoreSample;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Canned connector answer shared by the mocks below.
#[derive(Debug, Clone)]
pub enum Answer<T> {
    Value(T),
    Unreachable,
    /// Never answers on its own; resolves only through cancellation.
    Hang,
}

pub struct MockConnector<T> {
    answer: Answer<T>,
    calls: AtomicUsize,
}

impl<T: Clone + Send + Sync> MockConnector<T> {
    pub fn new(answer: Answer<T>) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self, cancel: &CancellationToken) -> Result<T, ConnectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.answer {
            Answer::Value(value) => Ok(value.clone()),
            Answer::Unreachable => Err(ConnectorError::ServiceUnavailable(
                "Connection failed: refused".to_string(),
            )),
            Answer::Hang => {
                cancel.cancelled().await;
                Err(ConnectorError::Cancelled)
            }
        }
    }
}

#[async_trait]
impl BlobStore for MockConnector<bool> {
    async fn exists(
        &self,
        _container: &str,
        _blob: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ConnectorError> {
        self.respond(cancel).await
    }
}

#[async_trait]
impl MessageProducer for MockConnector<bool> {
    async fn is_healthy(&self, cancel: &CancellationToken) -> Result<bool, ConnectorError> {
        self.respond(cancel).await
    }
}

#[async_trait]
impl DatabaseService for MockConnector<bool> {
    async fn is_healthy(&self, cancel: &CancellationToken) -> Result<bool, ConnectorError> {
        self.respond(cancel).await
    }
}

#[async_trait]
impl HealthScoreSource for MockConnector<Vec<HealthScoreSample>> {
    async fn query_recent_scores(
        &self,
        _workspace_id: &str,
        _lookback: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<HealthScoreSample>, ConnectorError> {
        self.respond(cancel).await
    }
}
