//! Root and health endpoints

use axum::{Json, extract::State as AxumState, response::IntoResponse};
use serde_json::json;

use crate::SharedState;
use crate::db;

pub async fn root(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    Json(json!({
        "message": state.settings.app_name,
        "docs": "/docs",
    }))
}

/// Always answers 200; a failing database only degrades the status.
pub async fn health(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    let database = if db::ping(&state.db).await {
        "ok"
    } else {
        "error"
    };
    let status = if database == "ok" { "ok" } else { "degraded" };

    Json(json!({
        "status": status,
        "database": database,
    }))
}
