//! Blob existence checks against the Azure Blob REST API.
//!
//! Requests are authorized either with a SAS token or with a SharedKey
//! signature, depending on what the storage connection string carries.

use super::ConnectorError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{StatusCode, Url};
use sha2::Sha256;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const STORAGE_API_VERSION: &str = "2021-08-06";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether `blob` exists in `container`. Errors when the endpoint cannot be
    /// asked at all.
    async fn exists(
        &self,
        container: &str,
        blob: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ConnectorError>;
}

/// The parts of a storage connection string needed to address the blob service.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageAccount {
    pub account_name: String,
    pub blob_endpoint: String,
    account_key: Option<Vec<u8>>,
    sas_token: Option<String>,
}

impl StorageAccount {
    /// Parses `Key=Value;Key=Value` connection strings such as
    /// `DefaultEndpointsProtocol=https;AccountName=..;AccountKey=..;EndpointSuffix=core.windows.net`.
    pub fn from_connection_string(connection_string: &str) -> Result<Self, ConnectorError> {
        let mut protocol = "https".to_string();
        let mut suffix = "core.windows.net".to_string();
        let mut account_name = None;
        let mut account_key = None;
        let mut blob_endpoint = None;
        let mut sas_token = None;

        for part in connection_string.split(';').filter(|p| !p.trim().is_empty()) {
            let (key, value) = part.trim().split_once('=').ok_or_else(|| {
                ConnectorError::Configuration(format!("malformed connection string segment '{}'", part))
            })?;

            match key {
                "DefaultEndpointsProtocol" => protocol = value.to_string(),
                "EndpointSuffix" => suffix = value.to_string(),
                "AccountName" => account_name = Some(value.to_string()),
                "AccountKey" => {
                    let decoded = STANDARD.decode(value).map_err(|err| {
                        ConnectorError::Configuration(format!("AccountKey is not base64: {}", err))
                    })?;
                    account_key = Some(decoded);
                }
                "BlobEndpoint" => blob_endpoint = Some(value.trim_end_matches('/').to_string()),
                "SharedAccessSignature" => {
                    sas_token = Some(value.trim_start_matches('?').to_string())
                }
                _ => {}
            }
        }

        let account_name = account_name
            .ok_or_else(|| ConnectorError::Configuration("AccountName is missing".to_string()))?;

        if account_key.is_none() && sas_token.is_none() {
            return Err(ConnectorError::Configuration(
                "either AccountKey or SharedAccessSignature is required".to_string(),
            ));
        }

        let blob_endpoint = blob_endpoint
            .unwrap_or_else(|| format!("{}://{}.blob.{}", protocol, account_name, suffix));

        Ok(Self {
            account_name,
            blob_endpoint,
            account_key,
            sas_token,
        })
    }

    fn blob_url(&self, container: &str, blob: &str) -> Result<Url, ConnectorError> {
        let blob_path = blob
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let mut url = Url::parse(&format!(
            "{}/{}/{}",
            self.blob_endpoint,
            urlencoding::encode(container),
            blob_path
        ))
        .map_err(|err| ConnectorError::Configuration(format!("invalid blob url: {}", err)))?;

        if let Some(sas) = self.sas_token.as_deref() {
            url.set_query(Some(sas));
        }

        Ok(url)
    }

    /// SharedKey signature over a bodiless HEAD request.
    fn sign_head(&self, key: &[u8], url: &Url, date: &str) -> Result<String, ConnectorError> {
        let string_to_sign = format!(
            "HEAD\n\n\n\n\n\n\n\n\n\n\n\nx-ms-date:{}\nx-ms-version:{}\n/{}{}",
            date,
            STORAGE_API_VERSION,
            self.account_name,
            url.path()
        );

        let mut mac = Hmac::<Sha256>::new_from_slice(key)
            .map_err(|err| ConnectorError::Internal(format!("hmac key error: {}", err)))?;
        mac.update(string_to_sign.as_bytes());

        Ok(format!(
            "SharedKey {}:{}",
            self.account_name,
            STANDARD.encode(mac.finalize().into_bytes())
        ))
    }
}

fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub struct BlobStorageClient {
    client: reqwest::Client,
    account: StorageAccount,
}

impl BlobStorageClient {
    pub fn new(account: StorageAccount) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ConnectorError::Internal(format!("HTTP client error: {}", err)))?;

        Ok(Self { client, account })
    }

    pub fn from_connection_string(connection_string: &str) -> Result<Self, ConnectorError> {
        Self::new(StorageAccount::from_connection_string(connection_string)?)
    }

    async fn head_blob(&self, container: &str, blob: &str) -> Result<bool, ConnectorError> {
        let url = self.account.blob_url(container, blob)?;
        tracing::debug!(
            "Checking health state blob in container {}/{}",
            self.account.blob_endpoint,
            container
        );

        let date = http_date(Utc::now());
        let mut request = self
            .client
            .head(url.clone())
            .header("x-ms-date", &date)
            .header("x-ms-version", STORAGE_API_VERSION);

        if self.account.sas_token.is_none() {
            if let Some(key) = self.account.account_key.as_deref() {
                request = request.header("Authorization", self.account.sign_head(key, &url, &date)?);
            }
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ConnectorError::Unauthorized(
                format!("blob service returned {}", response.status()),
            )),
            status => Err(ConnectorError::HttpError(format!(
                "blob service returned status: {}",
                status
            ))),
        }
    }
}

#[async_trait]
impl BlobStore for BlobStorageClient {
    async fn exists(
        &self,
        container: &str,
        blob: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ConnectorError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
            exists = self.head_blob(container, blob) => exists,
        }
    }
}
