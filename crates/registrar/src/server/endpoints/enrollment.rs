use axum::{
    extract::{Path, Query, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::db::EnrollmentStatus;
use crate::server::util::run_blocking;
use crate::types::RegistrarState;

#[derive(Debug, Deserialize)]
pub struct EnrollmentRequest {
    pub student_id: String,
    pub offering_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct EnrollmentFilter {
    pub semester: Option<String>,
    pub status: Option<EnrollmentStatus>,
}

/// POST /enrollments
pub async fn post_enroll(
    State(s): State<Arc<RegistrarState>>,
    Json(req): Json<EnrollmentRequest>,
) -> Response {
    info!("POST /enrollments {} -> {}", req.student_id, req.offering_id);

    run_blocking(s, move |r| {
        let enrollment_id = r.enroll(&req.student_id, req.offering_id)?;
        Ok(json!({ "enrollment_id": enrollment_id }))
    })
    .await
}

/// POST /enrollments/drop
pub async fn post_drop(
    State(s): State<Arc<RegistrarState>>,
    Json(req): Json<EnrollmentRequest>,
) -> Response {
    info!("POST /enrollments/drop {} -> {}", req.student_id, req.offering_id);

    run_blocking(s, move |r| {
        r.drop(&req.student_id, req.offering_id)?;
        Ok(json!({ "message": "Enrollment dropped" }))
    })
    .await
}

/// GET /students/:student_id/enrollments
pub async fn get_student_enrollments(
    Path(student_id): Path<String>,
    Query(filter): Query<EnrollmentFilter>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!("GET /students/{}/enrollments", student_id);

    run_blocking(s, move |r| {
        r.student_enrollments(&student_id, filter.semester.as_deref(), filter.status)
    })
    .await
}

/// GET /offerings/:offering_id
pub async fn get_offering(
    Path(offering_id): Path<i64>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!("GET /offerings/{}", offering_id);
    run_blocking(s, move |r| r.get_offering(offering_id)).await
}

/// GET /offerings/:offering_id/roster
pub async fn get_roster(
    Path(offering_id): Path<i64>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!("GET /offerings/{}/roster", offering_id);
    run_blocking(s, move |r| r.offering_roster(offering_id)).await
}

/// GET /semesters/:semester/statistics
pub async fn get_semester_statistics(
    Path(semester): Path<String>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!("GET /semesters/{}/statistics", semester);
    run_blocking(s, move |r| r.semester_statistics(&semester)).await
}
