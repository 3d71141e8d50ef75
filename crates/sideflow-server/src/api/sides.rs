//! Script upload and management endpoints.

use super::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sideflow_core::load_project;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SidePayload {
    pub content: String,
}

pub async fn upload_side(
    State(state): State<Arc<AppState>>,
    Path(side_id): Path<String>,
    Json(payload): Json<SidePayload>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    // Validate the document shape before persisting.
    load_project(&payload.content)?;
    state.store.save(&side_id, &payload.content)?;
    tracing::info!(%side_id, "script uploaded");
    Ok((
        StatusCode::CREATED,
        Json(json!({"message": format!("side '{}' uploaded", side_id)})),
    ))
}

pub async fn list_sides(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let sides = state.store.list()?;
    Ok(Json(json!({"sides": sides})))
}

pub async fn get_side(
    State(state): State<Arc<AppState>>,
    Path(side_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let content = state.store.get(&side_id)?;
    Ok(Json(json!({"side_id": side_id, "content": content})))
}

pub async fn update_side(
    State(state): State<Arc<AppState>>,
    Path(side_id): Path<String>,
    Json(payload): Json<SidePayload>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.exists(&side_id)? {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("script '{}' not found", side_id),
        ));
    }
    load_project(&payload.content)?;
    state.store.save(&side_id, &payload.content)?;
    tracing::info!(%side_id, "script updated");
    Ok(Json(json!({"message": format!("side '{}' updated", side_id)})))
}

pub async fn delete_side(
    State(state): State<Arc<AppState>>,
    Path(side_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(&side_id)?;
    tracing::info!(%side_id, "script deleted");
    Ok(StatusCode::NO_CONTENT)
}
