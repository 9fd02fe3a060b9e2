use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// JSON error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiErrorType {
    #[serde(skip)]
    status_code: StatusCode,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
}

impl<T, U> From<(StatusCode, T, Option<U>)> for ApiErrorType
where
    T: Into<String>,
    U: Into<String>,
{
    fn from((status_code, error, context): (StatusCode, T, Option<U>)) -> Self {
        Self {
            status_code,
            error: error.into(),
            context: context.map(Into::into),
        }
    }
}

impl IntoResponse for ApiErrorType {
    fn into_response(self) -> Response {
        (self.status_code, Json(self)).into_response()
    }
}
