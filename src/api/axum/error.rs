use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::SessionError;
use crate::api::ErrorResponse;

/// Every session failure that reaches the client is a server error.
impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let error_response = ErrorResponse::from(&self);
        (StatusCode::INTERNAL_SERVER_ERROR, Json(error_response)).into_response()
    }
}
