use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::server::util::run_blocking;
use crate::types::RegistrarState;

#[derive(Debug, Deserialize)]
pub struct AdjustPointsRequest {
    pub delta: i64,
    pub reason: String,
}

/// GET /students/:student_id/points
pub async fn get_points(
    Path(student_id): Path<String>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!("GET /students/{}/points", student_id);

    run_blocking(s, move |r| {
        let student = r.get_student(&student_id)?;
        let history = r.points_history(&student_id)?;
        Ok(json!({
            "student_id": student.student_id,
            "course_points": student.course_points,
            "history": history,
        }))
    })
    .await
}

/// POST /students/:student_id/points/adjust
pub async fn post_adjust_points(
    Path(student_id): Path<String>,
    State(s): State<Arc<RegistrarState>>,
    Json(req): Json<AdjustPointsRequest>,
) -> Response {
    info!("POST /students/{}/points/adjust {}", student_id, req.delta);

    run_blocking(s, move |r| {
        let balance = r.adjust_points(&student_id, req.delta, &req.reason)?;
        Ok(json!({ "student_id": student_id, "course_points": balance }))
    })
    .await
}
