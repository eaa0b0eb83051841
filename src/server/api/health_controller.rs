use axum::Extension;
use axum::Json;
use axum::http::StatusCode;
use chrono::Utc;

use crate::server::dtos::health_dto::{HealthResponse, HealthStatus, SessionHealth};
use crate::server::services::ProxyServices;
use crate::server::services::credential_services::SessionPhase;
use crate::server::{get_app_version, get_uptime_seconds};

/// never calls upstream, a failed session only marks us degraded since the next request
/// retries it anyway
pub async fn health_endpoint(
    Extension(services): Extension<ProxyServices>,
) -> (StatusCode, Json<HealthResponse>) {
    let (state, expires_at) = services.credentials.phase();

    let status = match state {
        SessionPhase::Failed => HealthStatus::Degraded,
        _ => HealthStatus::Healthy,
    };

    let response = HealthResponse {
        status,
        timestamp: Utc::now(),
        uptime_seconds: get_uptime_seconds(),
        version: get_app_version().to_string(),
        environment: format!("{:?}", services.config.cargo_env).to_lowercase(),
        session: SessionHealth {
            state,
            expires_at,
            last_error: services.credentials.last_error(),
        },
    };

    (StatusCode::OK, Json(response))
}
