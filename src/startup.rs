use crate::configuration::Settings;
use crate::connectors::{
    AmqpProducer, BlobStorageClient, ConnectorError, LogAnalyticsClient, PgDatabaseService,
};
use crate::health::{
    DatabaseProbe, HealthChecker, HealthMetrics, ProducerProbe, ResultCache, StampProbes,
    StorageProbe, TelemetryScoreProbe,
};
use crate::routes;
use actix_web::{dev::Server, web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tracing_actix_web::TracingLogger;

const MAX_METRIC_SNAPSHOTS: usize = 1000;

fn into_io_error(err: ConnectorError) -> std::io::Error {
    tracing::error!("{}", err);
    std::io::Error::new(std::io::ErrorKind::Other, err)
}

/// Wires the real dependency clients into a [`HealthChecker`].
///
/// Nothing here connects eagerly: an unreachable dependency must show up as an
/// unhealthy check, not as a failed start.
pub fn build_health_checker(settings: &Settings) -> Result<HealthChecker, std::io::Error> {
    let health = &settings.health;

    let blob_store = BlobStorageClient::from_connection_string(&health.storage.connection_string)
        .map_err(into_io_error)?;

    let producer =
        AmqpProducer::try_new(settings.amqp.connection_string()).map_err(into_io_error)?;

    let pg_pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(&settings.database.connection_string())
        .map_err(|err| into_io_error(ConnectorError::from(err)))?;

    let scores = LogAnalyticsClient::from_settings(&health.telemetry).map_err(into_io_error)?;

    let probes = StampProbes {
        storage: Arc::new(StorageProbe::new(
            Arc::new(blob_store),
            health.storage.container_name.clone(),
            health.storage.blob_name.clone(),
        )),
        producer: Arc::new(ProducerProbe::new(Arc::new(producer))),
        database: Arc::new(DatabaseProbe::new(Arc::new(PgDatabaseService::new(pg_pool)))),
        telemetry: Arc::new(TelemetryScoreProbe::new(
            Arc::new(scores),
            health.telemetry.workspace_id.clone(),
            health.telemetry.empty_window_policy,
        )),
    };

    tracing::info!(
        cache_duration_seconds = health.cache_duration_seconds,
        "Health checker configured"
    );

    Ok(HealthChecker::new(
        ResultCache::with_system_clock(health.cache_duration_seconds),
        probes,
    ))
}

pub fn run(listener: TcpListener, settings: Settings) -> Result<Server, std::io::Error> {
    let health_checker = Arc::new(build_health_checker(&settings)?);
    serve(listener, health_checker)
}

pub fn serve(
    listener: TcpListener,
    health_checker: Arc<HealthChecker>,
) -> Result<Server, std::io::Error> {
    let health_checker = web::Data::new(health_checker);

    let health_metrics = Arc::new(HealthMetrics::new(MAX_METRIC_SNAPSHOTS));
    let health_metrics = web::Data::new(health_metrics);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(health_checker.clone())
            .app_data(health_metrics.clone())
            .service(
                web::scope("/health")
                    .service(routes::health_check)
                    .service(routes::liveness)
                    .service(routes::health_metrics),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
