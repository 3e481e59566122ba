//! Status API handlers.
//!
//! Each handler reads from the `DecisionLog` and returns JSON in the
//! `{success, data, error}` envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::warn;

use crate::ApiState;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 500;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

// ── Decisions ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DecisionQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/decisions?limit=N
pub async fn list_decisions(
    State(state): State<ApiState>,
    Query(query): Query<DecisionQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    match state.log.list_recent(limit) {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to read decision log");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// GET /api/v1/decisions/latest
pub async fn latest_decision(State(state): State<ApiState>) -> impl IntoResponse {
    match state.log.latest() {
        Ok(Some(record)) => ApiResponse::ok(record).into_response(),
        Ok(None) => error_response("no decisions recorded yet", StatusCode::NOT_FOUND).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to read decision log");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// GET /api/v1/decisions/{seq}
pub async fn get_decision(State(state): State<ApiState>, Path(seq): Path<u64>) -> impl IntoResponse {
    match state.log.get(seq) {
        Ok(Some(record)) => ApiResponse::ok(record).into_response(),
        Ok(None) => error_response(&format!("no decision with seq {seq}"), StatusCode::NOT_FOUND).into_response(),
        Err(e) => {
            warn!(error = %e, seq, "failed to read decision log");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}
