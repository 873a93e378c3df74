use crate::health::{HealthChecker, HealthError, HealthMetrics};
use actix_web::{error::ResponseError, get, http::StatusCode, web, HttpResponse};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

impl ResponseError for HealthError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Cancelled => StatusCode::REQUEST_TIMEOUT,
        }
    }

    // No verdict for a cancelled check.
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).finish()
    }
}

/// Aggregated stamp health: 200 when every dependency is healthy, 503 otherwise.
#[tracing::instrument(name = "Stamp health check", skip(checker, metrics))]
#[get("")]
pub async fn health_check(
    checker: web::Data<Arc<HealthChecker>>,
    metrics: web::Data<Arc<HealthMetrics>>,
) -> Result<HttpResponse, HealthError> {
    // Actix drops this future when the client goes away; the guard turns
    // that into cancellation of every probe still running.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let result = checker.check_health(&cancel).await?;
    metrics.record(&result).await;

    let mut response = if result.is_healthy() {
        HttpResponse::Ok()
    } else {
        HttpResponse::ServiceUnavailable()
    };

    Ok(response.json(&result))
}

/// Process liveness only; never touches a dependency.
#[get("/liveness")]
pub async fn liveness() -> HttpResponse {
    HttpResponse::Ok().finish()
}

#[tracing::instrument(name = "Health metrics", skip(metrics))]
#[get("/metrics")]
pub async fn health_metrics(metrics: web::Data<Arc<HealthMetrics>>) -> HttpResponse {
    HttpResponse::Ok().json(metrics.get_all_stats().await)
}
