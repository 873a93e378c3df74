use super::ConnectorError;
use async_trait::async_trait;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait DatabaseService: Send + Sync {
    /// Whether the database accepts connections and answers a trivial query
    async fn is_healthy(&self, cancel: &CancellationToken) -> Result<bool, ConnectorError>;
}

pub struct PgDatabaseService {
    pool: PgPool,
}

impl PgDatabaseService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabaseService for PgDatabaseService {
    #[tracing::instrument(name = "Ping database", skip(self, cancel))]
    async fn is_healthy(&self, cancel: &CancellationToken) -> Result<bool, ConnectorError> {
        let query = sqlx::query("SELECT 1 as health_check").fetch_one(&self.pool);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
            row = query => row.map(|_| true).map_err(ConnectorError::from),
        }
    }
}
