use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use library::LibraryError;
use tracing::warn;

use crate::state::ErrorResponse;

pub fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn json_error_response(status: StatusCode, message: impl Into<String>) -> Response {
    json_error(status, message).into_response()
}

pub fn library_error(err: LibraryError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        LibraryError::InvalidUser(_) => json_error(StatusCode::UNAUTHORIZED, "unauthorized"),
        err => {
            warn!("Library request failed: {}", err);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

pub async fn run_blocking<T, F>(work: F) -> Result<T, (StatusCode, Json<ErrorResponse>)>
where
    F: FnOnce() -> Result<T, LibraryError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(library_error(err)),
        Err(err) => Err(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("task join error: {}", err),
        )),
    }
}
