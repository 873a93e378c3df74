use serde;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub app_port: u16,
    pub app_host: String,
    pub amqp: AmqpSettings,
    pub health: HealthSettings,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AmqpSettings {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct HealthSettings {
    /// How long a probe verdict is served from cache
    pub cache_duration_seconds: u64,
    pub storage: StorageSettings,
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct StorageSettings {
    pub connection_string: String,
    pub container_name: String,
    pub blob_name: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TelemetrySettings {
    pub workspace_id: String,
    /// Selects a user-assigned managed identity; system-assigned when absent
    #[serde(default)]
    pub managed_identity_client_id: Option<String>,
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    #[serde(default = "default_identity_endpoint")]
    pub identity_endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub empty_window_policy: EmptyWindowPolicy,
}

/// Verdict of the health score check when no sample exists in the lookback window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyWindowPolicy {
    FailOpen,
    #[default]
    FailClosed,
}

impl EmptyWindowPolicy {
    pub fn verdict(self) -> bool {
        matches!(self, Self::FailOpen)
    }
}

fn default_api_endpoint() -> String {
    "https://api.loganalytics.io".to_string()
}

fn default_identity_endpoint() -> String {
    "http://169.254.169.254/metadata/identity/oauth2/token".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl DatabaseSettings {
    // Connection string: postgresql://<username>:<password>@<host>:<port>/<database_name>
    pub fn connection_string(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name,
        )
    }
}

impl AmqpSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/%2f",
            self.username, self.password, self.host, self.port,
        )
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // `configuration.yaml` first, then APP__HEALTH__CACHE_DURATION_SECONDS style overrides
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration"))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize()
}
