//! HTTP surface consumed by the RADIUS server's REST module
//!
//! | Route                    | Input | Success | Failure        |
//! |--------------------------|-------|---------|----------------|
//! | `GET /check`             | query | 200     | 401            |
//! | `POST /authorize`        | form  | 200     | 401            |
//! | `POST /post-auth`        | form  | 204     | 403, 503       |
//! | `POST /post-auth/reject` | form  | 204     |                |
//! | `POST /log`              | form  | 204     |                |
//! | `GET /health`            |       | 200     | 503            |

use crate::accounting::{Counters, Transition, combine_octets};
use crate::audit::{AuditEntry, AuditEventType};
use crate::decision::{AuthOutcome, Decision, PostAuthDecision, PostAuthOutcome, VlanAssignment};
use crate::health::health_handler;
use crate::request::{AccessRequest, normalize_identity, normalize_mac};
use crate::server::AppState;
use crate::tasks::VlanTask;
use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::future::Future;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Fields shared by every identity route
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityParams {
    #[serde(default)]
    pub switch_ip: String,
    #[serde(default)]
    pub switch_port: String,
    pub client_mac: String,
    pub uid: String,
}

impl IdentityParams {
    fn request(&self) -> AccessRequest {
        AccessRequest::new(&self.client_mac, &self.uid)
    }

    fn audit_entry(&self, event_type: AuditEventType, request: &AccessRequest) -> AuditEntry {
        AuditEntry::new(event_type)
            .with_nas(&self.switch_ip, &self.switch_port)
            .with_client(&request.mac, &request.identity)
    }
}

/// Accounting event as sent by the RADIUS server
///
/// Octet counters arrive as 32-bit values plus a gigaword overflow count.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountingParams {
    pub status: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub mac: String,
    pub timestamp: i64,
    pub session: String,
    #[serde(default)]
    pub in_packets: u64,
    #[serde(default)]
    pub out_packets: u64,
    #[serde(default)]
    pub in_octets: u32,
    #[serde(default)]
    pub in_over: u32,
    #[serde(default)]
    pub out_octets: u32,
    #[serde(default)]
    pub out_over: u32,
    #[serde(default)]
    pub reason: Option<String>,
}

impl AccountingParams {
    fn counters(&self) -> Counters {
        Counters::new(
            self.in_packets,
            self.out_packets,
            combine_octets(self.in_over, self.in_octets),
            combine_octets(self.out_over, self.out_octets),
        )
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/check", get(check_handler))
        .route("/authorize", post(authorize_handler))
        .route("/post-auth", post(post_auth_handler))
        .route("/post-auth/reject", post(post_auth_reject_handler))
        .route("/log", post(accounting_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run a decision under the request deadline; expiry counts as a directory error
async fn decide<F>(state: &AppState, request: &AccessRequest, decision: F) -> Decision
where
    F: Future<Output = Decision>,
{
    match tokio::time::timeout(state.request_timeout, decision).await {
        Ok(decision) => decision,
        Err(_) => {
            error!(uid = %request.identity, mac = %request.mac, "Decision timed out");
            Decision::new(request.mode(), AuthOutcome::DirectoryError, Utc::now())
        }
    }
}

fn decision_response(decision: &Decision) -> Response {
    let status = if decision.is_authenticated() {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    (status, Json(decision.reply())).into_response()
}

async fn audit_decision(
    state: &AppState,
    event_type: AuditEventType,
    params: &IdentityParams,
    request: &AccessRequest,
    decision: &Decision,
) {
    let entry = params
        .audit_entry(event_type, request)
        .with_owner(decision.owner_name())
        .with_outcome(decision.outcome.code(), decision.mode.as_str())
        .with_vlan(decision.vlan);
    state.audit.log(entry).await;
}

/// `GET /check`: authenticate and move the port to the client's VLAN
async fn check_handler(State(state): State<AppState>, Query(params): Query<IdentityParams>) -> Response {
    let deadline = tokio::time::Instant::now() + state.request_timeout;
    let request = params.request();
    let vlan = match state.nas_policy {
        Some(ref policy) => VlanAssignment::Fixed(policy.vlan_for_str(&params.switch_ip)),
        None => VlanAssignment::OwnerRoom,
    };

    let decision = decide(&state, &request, state.engine.authenticate(&request, vlan)).await;
    audit_decision(&state, AuditEventType::Authentication, &params, &request, &decision).await;

    if decision.is_authenticated() {
        if let Some(vlan) = decision.vlan {
            let task = VlanTask::create(&params.switch_ip, &params.switch_port, vlan);
            match state.task_queue.push(&task).await {
                Ok(()) => info!(nas = %params.switch_ip, port = %params.switch_port, vlan, "Redirected to VLAN"),
                Err(e) => error!(nas = %params.switch_ip, error = %e, "Failed to queue VLAN task"),
            }
        }
        if let Some(ref device) = decision.device
            && tokio::time::timeout_at(deadline, state.engine.record_seen(device, Utc::now()))
                .await
                .is_err()
        {
            warn!(mac = %request.mac, "Last seen update timed out");
        }
    }

    decision_response(&decision)
}

/// `POST /authorize`
async fn authorize_handler(State(state): State<AppState>, Form(params): Form<IdentityParams>) -> Response {
    let request = params.request();
    let decision = decide(&state, &request, state.engine.authorize(&request)).await;
    audit_decision(&state, AuditEventType::Authorization, &params, &request, &decision).await;
    decision_response(&decision)
}

/// `POST /post-auth`: last-seen update and device self-registration
async fn post_auth_handler(State(state): State<AppState>, Form(params): Form<IdentityParams>) -> StatusCode {
    let request = params.request();
    let decision = match tokio::time::timeout(state.request_timeout, state.engine.post_auth(&request)).await {
        Ok(decision) => decision,
        Err(_) => {
            error!(uid = %request.identity, mac = %request.mac, "Post-auth timed out");
            PostAuthDecision::new(request.mode(), PostAuthOutcome::DirectoryError)
        }
    };

    let entry = params
        .audit_entry(AuditEventType::PostAuth, &request)
        .with_owner(decision.owner_name())
        .with_outcome(decision.outcome.code(), decision.mode.as_str());
    state.audit.log(entry).await;

    match decision.outcome {
        PostAuthOutcome::Ok => StatusCode::NO_CONTENT,
        PostAuthOutcome::DirectoryError => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::FORBIDDEN,
    }
}

/// `POST /post-auth/reject`: the RADIUS server refused the credentials
async fn post_auth_reject_handler(
    State(state): State<AppState>,
    Form(params): Form<IdentityParams>,
) -> StatusCode {
    let request = params.request();
    warn!(uid = %request.identity, mac = %request.mac, "Wrong password");
    state
        .audit
        .log(params.audit_entry(AuditEventType::WrongPassword, &request))
        .await;
    StatusCode::NO_CONTENT
}

/// `POST /log`: accounting start, interim update and stop
async fn accounting_handler(State(state): State<AppState>, Form(params): Form<AccountingParams>) -> StatusCode {
    let (event_type, transition) = match params.status.as_str() {
        "start" => (
            AuditEventType::AccountingStart,
            state.tracker.start(&params.session, params.timestamp),
        ),
        "interim-update" => (
            AuditEventType::AccountingUpdate,
            state
                .tracker
                .update(&params.session, params.timestamp, params.counters()),
        ),
        "stop" => (
            AuditEventType::AccountingStop,
            state
                .tracker
                .stop(&params.session, params.timestamp, params.counters()),
        ),
        other => {
            warn!(status = %other, session = %params.session, "Unknown accounting status");
            return StatusCode::NO_CONTENT;
        }
    };

    if let Some(deltas) = transition.deltas() {
        let time = DateTime::from_timestamp(params.timestamp, 0).unwrap_or_else(Utc::now);
        let mut entry = AuditEntry::at(event_type, time)
            .with_client(normalize_mac(&params.mac), normalize_identity(&params.uid))
            .with_client_ip(&params.ip)
            .with_session(&params.session)
            .with_deltas(deltas);
        if let (Transition::Stopped(_), Some(reason)) = (transition, params.reason.as_ref()) {
            entry = entry.with_reason(reason);
        }
        state.accounting_log.log(entry).await;
    }

    StatusCode::NO_CONTENT
}
