use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use faas_common::FaasError;
use faas_store::StoreError;
use thiserror::Error;
use tracing::{error, warn};

pub const INVALID_FUNCTION_ID: &str = "Invalid Function ID";

#[derive(Error, Debug)]
pub enum ApiError {
    /// Unknown id, malformed id, or a method the function does not accept.
    #[error("{INVALID_FUNCTION_ID}")]
    InvalidFunctionId,
    #[error(transparent)]
    Faas(#[from] FaasError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Faas(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidFunctionId => StatusCode::BAD_REQUEST,
            ApiError::Faas(err) => match err {
                FaasError::Validation(_) | FaasError::NotFound(_) => StatusCode::BAD_REQUEST,
                FaasError::Timeout => StatusCode::REQUEST_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::REQUEST_TIMEOUT {
            return status.into_response();
        }

        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(error = %self, "Request rejected");
        }
        (status, self.to_string()).into_response()
    }
}
