//! Control API handlers.
//!
//! Registry reads and writes go through `StateStore`; anything that touches
//! a satellite goes through the `Orchestrator`. Errors share one JSON shape:
//! `{"success": false, "error": "...", "violations": [...]}` with
//! `violations` present only for rejected manifests.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use voidnet_orchestrator::OrchestratorError;
use voidnet_state::*;

use crate::ApiState;

/// Tail applied to log requests that do not specify one.
pub const DEFAULT_LOG_TAIL: u32 = 100;

/// History rows returned when no `limit` is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    violations: Vec<String>,
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ErrorBody {
            success: false,
            error: msg.to_string(),
            violations: Vec::new(),
        }),
    )
}

fn rejected_response(violations: Vec<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            success: false,
            error: "manifest failed security validation".to_string(),
            violations,
        }),
    )
        .into_response()
}

fn state_failure(e: StateError) -> Response {
    match e {
        StateError::NotFound(what) => {
            error_response(&format!("{what} not found"), StatusCode::NOT_FOUND).into_response()
        }
        StateError::Conflict(what) => error_response(&what, StatusCode::CONFLICT).into_response(),
        StateError::ValidationFailed(violations) => rejected_response(violations),
        other => {
            error!(error = %other, "state store failure");
            error_response(&other.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

fn dispatch_failure(e: OrchestratorError) -> Response {
    match e {
        OrchestratorError::NotFound(what) => {
            error_response(&format!("{what} not found"), StatusCode::NOT_FOUND).into_response()
        }
        OrchestratorError::Conflict(what) => {
            error_response(&what, StatusCode::CONFLICT).into_response()
        }
        OrchestratorError::ValidationFailed(violations) => rejected_response(violations),
        draining @ OrchestratorError::Draining => {
            error_response(&draining.to_string(), StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
        other => {
            error_response(&other.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

// ── Service ────────────────────────────────────────────────────

/// GET /
pub async fn banner() -> impl IntoResponse {
    Json(json!({
        "service": "overseer",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "satellites": "/satellites",
            "register": "/satellite/register",
            "capsules": "/capsules",
        },
    }))
}

/// GET /health
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.counts() {
        Ok(counts) => Json(json!({
            "status": "healthy",
            "satellite_count": counts.satellite_count,
            "capsule_count": counts.capsule_count,
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "health check could not read registry");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "unhealthy", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

// ── Satellites ─────────────────────────────────────────────────

/// POST /satellite/register
pub async fn register_satellite(
    State(state): State<ApiState>,
    Json(req): Json<NewSatellite>,
) -> impl IntoResponse {
    match state.store.register_satellite(&req) {
        Ok(registered) => (StatusCode::CREATED, Json(registered)).into_response(),
        Err(e) => state_failure(e),
    }
}

/// GET /satellites
pub async fn list_satellites(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_satellites() {
        Ok(satellites) => Json(json!({ "satellites": satellites })).into_response(),
        Err(e) => state_failure(e),
    }
}

/// GET /satellites/{id}
pub async fn get_satellite(
    State(state): State<ApiState>,
    Path(id): Path<SatelliteId>,
) -> impl IntoResponse {
    match state.store.get_satellite(id) {
        Ok(Some(satellite)) => Json(satellite).into_response(),
        Ok(None) => error_response("satellite not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => state_failure(e),
    }
}

/// DELETE /satellites/{id}
pub async fn delete_satellite(
    State(state): State<ApiState>,
    Path(id): Path<SatelliteId>,
) -> impl IntoResponse {
    match state.orchestrator.delete_satellite(id).await {
        Ok(removed) => Json(json!({
            "message": format!("satellite {id} deleted"),
            "removed_capsules": removed,
        }))
        .into_response(),
        Err(e) => dispatch_failure(e),
    }
}

/// Heartbeat request body.
#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default = "online")]
    pub status: String,
}

fn online() -> String {
    SATELLITE_ONLINE.to_string()
}

/// POST /satellites/{id}/heartbeat
pub async fn satellite_heartbeat(
    State(state): State<ApiState>,
    Path(id): Path<SatelliteId>,
    Json(req): Json<HeartbeatRequest>,
) -> impl IntoResponse {
    match state.store.record_heartbeat(id, &req.status) {
        Ok(satellite) => Json(satellite).into_response(),
        Err(e) => state_failure(e),
    }
}

/// GET /satellites/{id}/containers
pub async fn satellite_containers(
    State(state): State<ApiState>,
    Path(id): Path<SatelliteId>,
) -> impl IntoResponse {
    match state.orchestrator.satellite_containers(id).await {
        Ok(payload) => Json(payload).into_response(),
        Err(e) => dispatch_failure(e),
    }
}

/// GET /satellites/{id}/agent
pub async fn satellite_agent(
    State(state): State<ApiState>,
    Path(id): Path<SatelliteId>,
) -> impl IntoResponse {
    match state.orchestrator.satellite_agent_health(id).await {
        Ok(payload) => Json(payload).into_response(),
        Err(e) => dispatch_failure(e),
    }
}

// ── Capsules ───────────────────────────────────────────────────

/// POST /capsules
pub async fn create_capsule(
    State(state): State<ApiState>,
    Json(req): Json<NewCapsule>,
) -> impl IntoResponse {
    match state.store.create_capsule(&req) {
        Ok(id) => (StatusCode::CREATED, Json(json!({ "capsule_id": id }))).into_response(),
        Err(e) => state_failure(e),
    }
}

/// GET /capsules
pub async fn list_capsules(State(state): State<ApiState>) -> impl IntoResponse {
    match state.orchestrator.list_capsules() {
        Ok(capsules) => Json(json!({ "capsules": capsules })).into_response(),
        Err(e) => dispatch_failure(e),
    }
}

/// GET /capsules/{id}
pub async fn get_capsule(
    State(state): State<ApiState>,
    Path(id): Path<CapsuleId>,
) -> impl IntoResponse {
    match state.orchestrator.get_capsule(id) {
        Ok(Some(capsule)) => Json(capsule).into_response(),
        Ok(None) => error_response("capsule not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => dispatch_failure(e),
    }
}

/// DELETE /capsules/{id}
pub async fn delete_capsule(
    State(state): State<ApiState>,
    Path(id): Path<CapsuleId>,
) -> impl IntoResponse {
    match state.orchestrator.delete_capsule(id).await {
        Ok(()) => Json(json!({ "message": format!("capsule {id} deleted") })).into_response(),
        Err(e) => dispatch_failure(e),
    }
}

/// POST /capsules/{id}/deploy
pub async fn deploy_capsule(
    State(state): State<ApiState>,
    Path(id): Path<CapsuleId>,
) -> impl IntoResponse {
    match state.orchestrator.deploy(id).await {
        Ok(report) => Json(json!({
            "message": format!("capsule {id} deployed"),
            "deployment": report.deployment,
            "result": report.result,
        }))
        .into_response(),
        Err(e) => dispatch_failure(e),
    }
}

/// POST /capsules/{id}/stop
pub async fn stop_capsule(
    State(state): State<ApiState>,
    Path(id): Path<CapsuleId>,
) -> impl IntoResponse {
    match state.orchestrator.stop(id).await {
        Ok(report) => Json(json!({
            "message": format!("capsule {id} stopped"),
            "deployment": report.deployment,
            "result": report.result,
        }))
        .into_response(),
        Err(e) => dispatch_failure(e),
    }
}

/// `?tail=N` for log requests.
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<u32>,
}

/// GET|POST /capsules/{id}/logs
pub async fn capsule_logs(
    State(state): State<ApiState>,
    Path(id): Path<CapsuleId>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    let tail = query.tail.unwrap_or(DEFAULT_LOG_TAIL);
    match state.orchestrator.logs(id, tail).await {
        Ok(payload) => Json(payload).into_response(),
        Err(e) => dispatch_failure(e),
    }
}

/// `?limit=N` for history requests.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /capsules/{id}/deployments
pub async fn list_deployments(
    State(state): State<ApiState>,
    Path(id): Path<CapsuleId>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    match state.store.get_capsule(id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response("capsule not found", StatusCode::NOT_FOUND).into_response();
        }
        Err(e) => return state_failure(e),
    }
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    match state.store.list_deployments(id, limit) {
        Ok(deployments) => Json(json!({ "deployments": deployments })).into_response(),
        Err(e) => state_failure(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::body::to_bytes;
    use serde_json::Value;
    use voidnet_orchestrator::{DispatchSettings, GitManifestSource, Orchestrator};
    use voidnet_uplink::UplinkClient;

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        let orchestrator = Orchestrator::new(
            store,
            Arc::new(UplinkClient::default()),
            Arc::new(GitManifestSource::default()),
            DispatchSettings::default(),
        );
        ApiState::new(orchestrator)
    }

    fn satellite(name: &str) -> NewSatellite {
        NewSatellite {
            name: name.to_string(),
            ip_address: "10.0.0.5".to_string(),
            hostname: format!("{name}.lan"),
            capabilities: vec!["docker".to_string()],
        }
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn register_returns_created_with_key() {
        let state = test_state();
        let resp = register_satellite(State(state), Json(satellite("sat-a")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["satellite_id"], 1);
        assert_eq!(body["api_key"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn duplicate_register_is_conflict() {
        let state = test_state();
        state.store.register_satellite(&satellite("sat-a")).unwrap();
        let resp = register_satellite(State(state), Json(satellite("sat-a")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(body.get("violations").is_none());
    }

    #[tokio::test]
    async fn rejected_manifest_lists_violations() {
        let state = test_state();
        let sat = state.store.register_satellite(&satellite("sat-a")).unwrap();
        let req = NewCapsule {
            name: "app1".into(),
            satellite_id: sat.satellite_id,
            git_url: "https://git.example.com/app.git".into(),
            git_branch: "main".into(),
            compose_file: "services:\n  app:\n    volumes:\n      - /var/run/docker.sock:/var/run/docker.sock\n".into(),
        };
        let resp = create_capsule(State(state), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        let violations = body["violations"].as_array().unwrap();
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0], "forbidden directive: /var/run/docker.sock");
    }

    #[tokio::test]
    async fn unknown_capsule_is_not_found() {
        let state = test_state();
        let resp = get_capsule(State(state.clone()), Path(9)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = deploy_capsule(State(state.clone()), Path(9)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = list_deployments(State(state), Path(9), Query(HistoryQuery { limit: None }))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn heartbeat_defaults_to_online() {
        let state = test_state();
        let sat = state.store.register_satellite(&satellite("sat-a")).unwrap();
        state.store.record_heartbeat(sat.satellite_id, "offline").unwrap();

        let req: HeartbeatRequest = serde_json::from_str("{}").unwrap();
        let resp = satellite_heartbeat(State(state), Path(sat.satellite_id), Json(req))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "online");
        assert!(body["last_heartbeat"].is_u64());
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let state = test_state();
        state.store.register_satellite(&satellite("sat-a")).unwrap();
        let resp = health(State(state)).await.into_response();
        let body = body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["satellite_count"], 1);
        assert_eq!(body["capsule_count"], 0);
    }

    #[test]
    fn draining_maps_to_unavailable() {
        let resp = dispatch_failure(OrchestratorError::Draining);
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
