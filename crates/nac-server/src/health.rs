//! Health endpoint for load balancers and monitoring

use crate::server::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use nac_directory::MemberStatus;
use serde::Serialize;

/// Health check status
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// "healthy" when a directory endpoint can be tried
    pub status: String,
    pub directory: DirectoryHealth,
    /// Open accounting sessions
    pub sessions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryHealth {
    /// Whether a read-write endpoint is currently usable
    pub writable: bool,
    pub endpoints: Vec<MemberStatus>,
}

impl HealthStatus {
    pub fn collect(state: &AppState) -> Self {
        let client = state.engine.schema().client();
        let status = if client.is_available() {
            "healthy"
        } else {
            "unhealthy"
        };

        HealthStatus {
            status: status.to_string(),
            directory: DirectoryHealth {
                writable: client.has_writable(),
                endpoints: client.pool_status(),
            },
            sessions: state.tracker.session_count(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let health = HealthStatus::collect(&state);

    let status_code = if health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health)).into_response()
}
