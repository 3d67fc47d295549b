use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::TrackerError;
use crate::runtime::HandleError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// The tracker refused the request in its current state.
    Conflict(TrackerError),
    InternalServerError(String),
}

impl From<HandleError> for ApiError {
    fn from(err: HandleError) -> Self {
        match err {
            HandleError::Tracker(e) => ApiError::Conflict(e),
            HandleError::Closed => ApiError::InternalServerError(HandleError::Closed.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    success: false,
                    message: msg,
                    error: None,
                },
            ),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    success: false,
                    message: msg,
                    error: None,
                },
            ),
            ApiError::Conflict(err) => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    success: false,
                    message: err.to_string(),
                    error: Some(err.kind().to_string()),
                },
            ),
            ApiError::InternalServerError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    success: false,
                    message: msg,
                    error: None,
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}
