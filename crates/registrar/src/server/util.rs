use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use crate::error::RegistrarError;
use crate::server::types::ApiErrorType;
use crate::types::RegistrarState;
use crate::Registrar;

/// Maps a registrar error onto an HTTP status.
pub fn status_for(err: &RegistrarError) -> StatusCode {
    match err {
        RegistrarError::NotFound { .. } => StatusCode::NOT_FOUND,
        RegistrarError::DuplicateCourse { .. }
        | RegistrarError::ScheduleConflict { .. }
        | RegistrarError::CapacityExceeded { .. }
        | RegistrarError::NotEnrolled { .. }
        | RegistrarError::EnrollmentCompleted { .. }
        | RegistrarError::InvalidBiddingTransition { .. } => StatusCode::CONFLICT,
        RegistrarError::OfferingClosed { .. }
        | RegistrarError::BiddingInProgress { .. }
        | RegistrarError::BiddingNotOpen { .. }
        | RegistrarError::BiddingDeadlinePassed { .. }
        | RegistrarError::StudentInactive { .. } => StatusCode::LOCKED,
        RegistrarError::InvalidBid { .. }
        | RegistrarError::InvalidPointsAdjustment { .. }
        | RegistrarError::InvalidSchedule { .. } => StatusCode::BAD_REQUEST,
        RegistrarError::TransientStoreFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RegistrarError::Store { .. } | RegistrarError::Config { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn error_response(err: RegistrarError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, "Request failed");
    }
    let message = if err.is_retryable() {
        "Catalog is busy, try again"
    } else if err.is_semantic() {
        "Request rejected"
    } else {
        "Internal error"
    };
    ApiErrorType::from((status, message, Some(err.to_string()))).into_response()
}

/// Runs blocking registrar work off the async runtime and renders the
/// result as JSON.
///
/// The transaction belongs to the blocking task, so a client that goes
/// away does not leave it half done: it either commits or rolls back.
pub async fn run_blocking<T, F>(state: Arc<RegistrarState>, work: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce(&Registrar) -> Result<T, RegistrarError> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || work(&state.registrar)).await {
        Ok(Ok(value)) => (StatusCode::OK, Json(value)).into_response(),
        Ok(Err(e)) => error_response(e),
        Err(e) => {
            error!(error = %e, "Blocking task failed");
            ApiErrorType::from((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error",
                Some(e.to_string()),
            ))
            .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&RegistrarError::not_found("offering", 3)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&RegistrarError::CapacityExceeded { offering_id: 3 }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&RegistrarError::BiddingInProgress { offering_id: 3 }),
            StatusCode::LOCKED
        );
        assert_eq!(
            status_for(&RegistrarError::BiddingDeadlinePassed {
                offering_id: 3,
                deadline: "2024-09-01T00:00:00.000000Z".to_string(),
            }),
            StatusCode::LOCKED
        );
        assert_eq!(
            status_for(&RegistrarError::InvalidPointsAdjustment {
                reason: "reason is required".to_string()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&RegistrarError::TransientStoreFailure {
                message: "database is locked".to_string(),
                attempts: 2,
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&RegistrarError::Store {
                message: "disk I/O error".to_string()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
