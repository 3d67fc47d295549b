use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use courier_core::UpdateInterval;
use tracing::{debug, info};

use super::ApiState;
use super::error::ApiError;
use super::models::{
    ApiResponse, FixRequest, IntervalRequest, ParcelRequest, ParcelResponse, ResumeResponse,
    StartResponse, StopResponse,
};
use crate::agent::TrackerSnapshot;
use crate::notice::NoticeId;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub async fn snapshot(State(state): State<ApiState>) -> Json<ApiResponse<TrackerSnapshot>> {
    Json(ApiResponse::ok(state.tracker.snapshot()))
}

pub async fn start(State(state): State<ApiState>) -> ApiResult<StartResponse> {
    let outcome = state.tracker.start().await?;
    let response = StartResponse::from(outcome);
    let message = if response.already_running {
        "Tracking already running"
    } else {
        "Tracking started"
    };
    Ok(Json(ApiResponse::ok(response).with_message(message)))
}

pub async fn stop(State(state): State<ApiState>) -> ApiResult<StopResponse> {
    let outcome = state.tracker.stop().await?;
    Ok(Json(ApiResponse::ok(StopResponse::from(outcome))))
}

pub async fn resume(State(state): State<ApiState>) -> ApiResult<ResumeResponse> {
    let outcome = state.tracker.resume_if_online().await?;
    Ok(Json(ApiResponse::ok(ResumeResponse::from(outcome))))
}

pub async fn set_parcel(
    State(state): State<ApiState>,
    Json(request): Json<ParcelRequest>,
) -> ApiResult<ParcelResponse> {
    let previous = state.tracker.set_parcel(request.parcel_id).await?;
    Ok(Json(ApiResponse::ok(ParcelResponse {
        parcel_id: request.parcel_id,
        previous,
    })))
}

pub async fn set_interval(
    State(state): State<ApiState>,
    Json(request): Json<IntervalRequest>,
) -> ApiResult<UpdateInterval> {
    let interval = UpdateInterval::try_from(request.interval_secs)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state.tracker.set_interval(interval).await?;
    Ok(Json(ApiResponse::ok(interval)))
}

pub async fn dismiss_notice(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    if state.tracker.dismiss_notice(NoticeId(id)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Notice {id} not found")))
    }
}

/// Accept a fix or error callback from the platform bridge.
pub async fn push_fix(
    State(state): State<ApiState>,
    Json(request): Json<FixRequest>,
) -> Result<StatusCode, ApiError> {
    let Some(feed) = state.feed else {
        return Err(ApiError::NotFound(
            "Position source does not accept pushed fixes".to_string(),
        ));
    };

    match request.into_sample() {
        Ok(sample) => {
            sample
                .validate()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            debug!(lat = sample.latitude, lng = sample.longitude, "Fix received");
            feed.push(sample);
        }
        Err(error) => {
            info!(%error, "Platform reported a location error");
            feed.push_error(error);
        }
    }
    Ok(StatusCode::ACCEPTED)
}
