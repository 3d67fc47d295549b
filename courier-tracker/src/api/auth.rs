use axum::{Json, extract::State, http::StatusCode};

use super::ApiState;
use super::error::ApiError;
use super::models::{ApiResponse, AuthResponse, TokenRequest};

pub async fn set_token(
    State(state): State<ApiState>,
    Json(request): Json<TokenRequest>,
) -> Result<Json<ApiResponse<AuthResponse>>, ApiError> {
    let token = request.token.trim();
    if token.is_empty() {
        return Err(ApiError::BadRequest("Token must not be empty".to_string()));
    }

    state.auth.set_token(token);
    Ok(Json(
        ApiResponse::ok(AuthResponse {
            authenticated: true,
        })
        .with_message("Token installed"),
    ))
}

pub async fn clear_token(State(state): State<ApiState>) -> Result<StatusCode, ApiError> {
    if state.auth.invalidate() {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("No token installed".to_string()))
    }
}
