use super::ConnectorError;
use async_trait::async_trait;
use deadpool_lapin::{Config, CreatePoolError, Pool, PoolConfig, Runtime, Timeouts};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const POOL_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Whether the broker can be reached and a channel opened for publishing
    async fn is_healthy(&self, cancel: &CancellationToken) -> Result<bool, ConnectorError>;
}

#[derive(Debug)]
pub struct AmqpProducer {
    pool: Pool,
}

impl AmqpProducer {
    pub fn try_new(url: String) -> Result<Self, ConnectorError> {
        Self::with_timeout(url, POOL_TIMEOUT)
    }

    /// Every pool wait, connect and recycle is bounded by `timeout`, so an
    /// unresponsive broker fails the check instead of stalling it.
    pub fn with_timeout(url: String, timeout: Duration) -> Result<Self, ConnectorError> {
        let mut cfg = Config::default();
        cfg.url = Some(url);
        cfg.pool = Some(PoolConfig {
            timeouts: Timeouts {
                wait: Some(timeout),
                create: Some(timeout),
                recycle: Some(timeout),
            },
            ..PoolConfig::default()
        });
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|err| {
            tracing::error!("{:?}", err);

            match err {
                CreatePoolError::Config(err) => {
                    ConnectorError::Configuration(format!("amqp pool config error {:?}", err))
                }
                CreatePoolError::Build(err) => {
                    ConnectorError::Internal(format!("amqp pool build error {:?}", err))
                }
            }
        })?;

        Ok(Self { pool })
    }

    async fn open_channel(&self) -> Result<bool, ConnectorError> {
        let connection = self.pool.get().await.map_err(|err| {
            ConnectorError::ServiceUnavailable(format!("getting connection from pool {:?}", err))
        })?;

        let channel = connection.create_channel().await.map_err(|err| {
            ConnectorError::ServiceUnavailable(format!("creating RabbitMQ channel {:?}", err))
        })?;

        let connected = channel.status().connected();
        if let Err(err) = channel.close(200, "health probe done").await {
            tracing::debug!("closing probe channel {:?}", err);
        }

        Ok(connected)
    }
}

#[async_trait]
impl MessageProducer for AmqpProducer {
    #[tracing::instrument(name = "Check message broker connection", skip(self, cancel))]
    async fn is_healthy(&self, cancel: &CancellationToken) -> Result<bool, ConnectorError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
            healthy = self.open_channel() => healthy,
        }
    }
}
