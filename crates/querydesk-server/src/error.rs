//! HTTP rendering of pipeline errors

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use querydesk_core::Error;
use tracing::error;

/// Wraps a core error so handlers can return it with `?`
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::AccessForbidden { .. } => StatusCode::FORBIDDEN,
            Error::ExecutionTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Error::QueryNotFound(_) | Error::TenantNotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        let body = serde_json::json!({ "errors": [self.0.to_sqllab_error()] });
        (status, Json(body)).into_response()
    }
}
