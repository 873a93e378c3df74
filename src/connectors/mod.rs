//! Stamp dependency connectors
//!
//! Every dependency the health service probes is reached through a connector
//! trait, so probes can be exercised against in-memory doubles.
//!
//! ## Architecture Pattern
//!
//! 1. Define trait in `{dependency}.rs` next to its real client
//! 2. Real clients honor the caller's `CancellationToken`
//! 3. Probes hold `Arc<dyn Trait>` and never depend on the transport

pub mod blob_storage;
pub mod database;
pub mod errors;
pub mod log_analytics;
pub mod message_producer;
#[cfg(test)]
pub mod mock;

pub use blob_storage::{BlobStorageClient, BlobStore, StorageAccount};
pub use database::{DatabaseService, PgDatabaseService};
pub use errors::ConnectorError;
pub use log_analytics::{HealthScoreSource, LogAnalyticsClient, ManagedIdentityCredential};
pub use message_producer::{AmqpProducer, MessageProducer};
