use super::ConnectorError;
use crate::configuration::TelemetrySettings;
use crate::health::HealthScoreSample;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

const HEALTH_SCORE_QUERY: &str =
    "StampHealthScore | project TimeGenerated,HealthScore | order by TimeGenerated desc | take 1";
const LOG_ANALYTICS_RESOURCE: &str = "https://api.loganalytics.io";
const IMDS_API_VERSION: &str = "2018-02-01";
// Tokens closer than this to expiry are fetched again.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[async_trait]
pub trait HealthScoreSource: Send + Sync {
    /// Health score samples generated within `lookback`, most recent first.
    async fn query_recent_scores(
        &self,
        workspace_id: &str,
        lookback: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<HealthScoreSample>, ConnectorError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Bearer tokens from the instance metadata identity endpoint, optionally
/// selecting a user-assigned identity by client id.
pub struct ManagedIdentityCredential {
    client: reqwest::Client,
    identity_endpoint: String,
    client_id: Option<String>,
    cached: RwLock<Option<CachedToken>>,
}

impl ManagedIdentityCredential {
    pub fn new(client: reqwest::Client, identity_endpoint: String, client_id: Option<String>) -> Self {
        Self {
            client,
            identity_endpoint,
            client_id,
            cached: RwLock::new(None),
        }
    }

    pub async fn token(&self, resource: &str) -> Result<String, ConnectorError> {
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref() {
                if entry.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                    return Ok(entry.token.clone());
                }
            }
        }

        let mut query = vec![("api-version", IMDS_API_VERSION), ("resource", resource)];
        if let Some(client_id) = self.client_id.as_deref().filter(|id| !id.is_empty()) {
            query.push(("client_id", client_id));
        }

        let response = self
            .client
            .get(&self.identity_endpoint)
            .header("Metadata", "true")
            .query(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ConnectorError::Unauthorized(format!(
                "identity endpoint returned status: {}",
                response.status()
            )));
        }

        let body: TokenResponse = response.json().await?;
        let lifetime = body
            .expires_in
            .as_deref()
            .and_then(|secs| secs.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(TOKEN_REFRESH_MARGIN);

        let mut cached = self.cached.write().await;
        *cached = Some(CachedToken {
            token: body.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(body.access_token)
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    tables: Vec<QueryTable>,
}

#[derive(Debug, Deserialize)]
struct QueryTable {
    columns: Vec<QueryColumn>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct QueryColumn {
    name: String,
}

fn column_index(table: &QueryTable, name: &str) -> Result<usize, ConnectorError> {
    table
        .columns
        .iter()
        .position(|column| column.name == name)
        .ok_or_else(|| ConnectorError::InvalidResponse(format!("column {} is missing", name)))
}

fn parse_samples(response: QueryResponse) -> Result<Vec<HealthScoreSample>, ConnectorError> {
    let table = match response.tables.into_iter().next() {
        Some(table) => table,
        None => return Ok(vec![]),
    };

    let time_idx = column_index(&table, "TimeGenerated")?;
    let score_idx = column_index(&table, "HealthScore")?;

    table
        .rows
        .iter()
        .map(|row| {
            let time_generated = row
                .get(time_idx)
                .and_then(Value::as_str)
                .and_then(|raw| raw.parse::<DateTime<Utc>>().ok())
                .ok_or_else(|| {
                    ConnectorError::InvalidResponse(format!("bad TimeGenerated in row {:?}", row))
                })?;
            let health_score = row
                .get(score_idx)
                .and_then(|value| match value {
                    Value::String(raw) => raw.parse::<f64>().ok(),
                    other => other.as_f64(),
                })
                .ok_or_else(|| {
                    ConnectorError::InvalidResponse(format!("bad HealthScore in row {:?}", row))
                })?;

            Ok(HealthScoreSample {
                time_generated,
                health_score,
            })
        })
        .collect()
}

/// Log Analytics query API client for the regional workspace.
pub struct LogAnalyticsClient {
    client: reqwest::Client,
    api_endpoint: String,
    credential: ManagedIdentityCredential,
}

impl LogAnalyticsClient {
    pub fn new(
        client: reqwest::Client,
        api_endpoint: String,
        credential: ManagedIdentityCredential,
    ) -> Self {
        Self {
            client,
            api_endpoint: api_endpoint.trim_end_matches('/').to_string(),
            credential,
        }
    }

    pub fn from_settings(settings: &TelemetrySettings) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| ConnectorError::Internal(format!("HTTP client error: {}", err)))?;

        let credential = ManagedIdentityCredential::new(
            client.clone(),
            settings.identity_endpoint.clone(),
            settings.managed_identity_client_id.clone(),
        );

        Ok(Self::new(client, settings.api_endpoint.clone(), credential))
    }

    async fn query(
        &self,
        workspace_id: &str,
        lookback: Duration,
    ) -> Result<Vec<HealthScoreSample>, ConnectorError> {
        let token = self.credential.token(LOG_ANALYTICS_RESOURCE).await?;
        let url = format!("{}/v1/workspaces/{}/query", self.api_endpoint, workspace_id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&json!({
                "query": HEALTH_SCORE_QUERY,
                "timespan": format!("PT{}S", lookback.as_secs()),
            }))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ConnectorError::Unauthorized(format!(
                "log analytics returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(ConnectorError::HttpError(format!(
                "log analytics returned status: {}",
                status
            )));
        }

        parse_samples(response.json::<QueryResponse>().await?)
    }
}

#[async_trait]
impl HealthScoreSource for LogAnalyticsClient {
    #[tracing::instrument(name = "Query stamp health score", skip(self, cancel))]
    async fn query_recent_scores(
        &self,
        workspace_id: &str,
        lookback: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<HealthScoreSample>, ConnectorError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
            samples = self.query(workspace_id, lookback) => samples,
        }
    }
}
