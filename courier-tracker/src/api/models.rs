use courier_core::{ParcelId, PositionSample, SessionId};
use serde::{Deserialize, Serialize};

use crate::agent::{ResumeOutcome, StartOutcome, StopOutcome};
use crate::error::PositionError;
use crate::session::TrackingStats;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub session_id: Option<SessionId>,
    pub already_running: bool,
}

impl From<StartOutcome> for StartResponse {
    fn from(outcome: StartOutcome) -> Self {
        match outcome {
            StartOutcome::Started(id) => Self {
                session_id: Some(id),
                already_running: false,
            },
            StartOutcome::AlreadyRunning => Self {
                session_id: None,
                already_running: true,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopResponse {
    Stopped { stats: Option<TrackingStats> },
    ClearedFault,
    AlreadyIdle,
}

impl From<StopOutcome> for StopResponse {
    fn from(outcome: StopOutcome) -> Self {
        match outcome {
            StopOutcome::Stopped(stats) => StopResponse::Stopped { stats },
            StopOutcome::ClearedFault => StopResponse::ClearedFault,
            StopOutcome::AlreadyIdle => StopResponse::AlreadyIdle,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResumeResponse {
    Disabled,
    AlreadyAttempted,
    NotIdle,
    ServerOffline,
    Resumed { session_id: SessionId },
}

impl From<ResumeOutcome> for ResumeResponse {
    fn from(outcome: ResumeOutcome) -> Self {
        match outcome {
            ResumeOutcome::Disabled => ResumeResponse::Disabled,
            ResumeOutcome::AlreadyAttempted => ResumeResponse::AlreadyAttempted,
            ResumeOutcome::NotIdle => ResumeResponse::NotIdle,
            ResumeOutcome::ServerOffline => ResumeResponse::ServerOffline,
            ResumeOutcome::Resumed(session_id) => ResumeResponse::Resumed { session_id },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ParcelRequest {
    pub parcel_id: Option<ParcelId>,
}

#[derive(Debug, Serialize)]
pub struct ParcelResponse {
    pub parcel_id: Option<ParcelId>,
    pub previous: Option<ParcelId>,
}

/// Bearer token from the login flow.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub authenticated: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IntervalRequest {
    pub interval_secs: u32,
}

/// What a platform bridge posts to `/fixes`: a fix, or an error callback.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixRequest {
    Fix {
        latitude: f64,
        longitude: f64,
        accuracy: Option<f64>,
        speed: Option<f64>,
        bearing: Option<f64>,
        altitude: Option<f64>,
        /// Defaults to the time of receipt.
        timestamp: Option<jiff::Timestamp>,
    },
    Error {
        error: PositionError,
    },
}

impl FixRequest {
    /// The fix as a sample, or the error the platform reported.
    pub fn into_sample(self) -> Result<PositionSample, PositionError> {
        match self {
            FixRequest::Fix {
                latitude,
                longitude,
                accuracy,
                speed,
                bearing,
                altitude,
                timestamp,
            } => {
                let captured_at = timestamp.unwrap_or_else(jiff::Timestamp::now);
                let mut sample = PositionSample::new(latitude, longitude, captured_at)
                    .with_motion(speed, bearing)
                    .with_altitude(altitude);
                sample.accuracy_m = accuracy;
                Ok(sample)
            }
            FixRequest::Error { error } => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_request_accepts_fix_or_error() {
        let fix: FixRequest =
            serde_json::from_str(r#"{"latitude": -1.29, "longitude": 36.82, "accuracy": 12.0}"#)
                .unwrap();
        let sample = fix.into_sample().unwrap();
        assert_eq!(sample.accuracy_m, Some(12.0));
        assert_eq!(sample.speed_mps, None);

        let err: FixRequest = serde_json::from_str(r#"{"error": "permission_denied"}"#).unwrap();
        assert_eq!(err.into_sample(), Err(PositionError::PermissionDenied));
    }

    #[test]
    fn stop_response_is_tagged() {
        let json = serde_json::to_value(StopResponse::from(StopOutcome::AlreadyIdle)).unwrap();
        assert_eq!(json["outcome"], "already_idle");
    }
}
