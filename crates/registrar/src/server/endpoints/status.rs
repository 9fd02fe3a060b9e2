use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::types::RegistrarState;

/// GET /health
pub async fn get_health(State(s): State<Arc<RegistrarState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "database": s.config.database_path.display().to_string(),
            "uptime_secs": s.started_at.elapsed().as_secs(),
        })),
    )
}
