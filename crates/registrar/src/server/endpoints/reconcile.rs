use axum::{
    extract::{Path, State},
    response::Response,
};
use std::sync::Arc;
use tracing::info;

use crate::server::util::run_blocking;
use crate::types::RegistrarState;

/// POST /reconcile
pub async fn post_reconcile_all(State(s): State<Arc<RegistrarState>>) -> Response {
    info!("POST /reconcile");
    run_blocking(s, |r| Ok(r.reconcile_all())).await
}

/// POST /reconcile/offerings/:offering_id
pub async fn post_reconcile_offering(
    Path(offering_id): Path<i64>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!("POST /reconcile/offerings/{}", offering_id);
    run_blocking(s, move |r| r.reconcile(offering_id)).await
}

/// POST /reconcile/semesters/:semester
pub async fn post_reconcile_semester(
    Path(semester): Path<String>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!("POST /reconcile/semesters/{}", semester);
    run_blocking(s, move |r| Ok(r.reconcile_semester(&semester))).await
}
