//! Session listing and one-shot execution endpoints.

use super::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    response::Html,
    Json,
};
use serde_json::{json, Value};
use sideflow_core::ExecuteRequest;
use std::sync::Arc;

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let sessions = state.pool.list().await;
    Ok(Json(json!({"sessions": sessions})))
}

fn validate(request: &ExecuteRequest) -> Result<(), ApiError> {
    if request.suite.is_some() && request.test.is_some() {
        return Err(ApiError::bad_request(
            "at most one of 'suite' and 'test' may be set",
        ));
    }
    Ok(())
}

/// Execute on any idle session; the final page source comes back as HTML.
pub async fn execute_any(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Html<String>, ApiError> {
    validate(&request)?;
    let source = state.dispatcher.execute_any(&request).await?;
    Ok(Html(source))
}

/// Execute on a caller-chosen session.
pub async fn execute_on(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Html<String>, ApiError> {
    validate(&request)?;
    let source = state.dispatcher.execute_on(&session_id, &request).await?;
    Ok(Html(source))
}
