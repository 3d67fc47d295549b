use courier_core::InvalidSample;
use serde::{Deserialize, Serialize};

/// Failures reported by a position source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("timed out waiting for a position fix")]
    Timeout,
    #[error("location service is not supported on this platform")]
    Unsupported,
}

/// Failures reported by the sync client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("unauthorized, re-authentication required")]
    Unauthorized,
    #[error("network error: {0}")]
    Network(String),
    #[error("server rejected request ({status}): {details}")]
    ServerRejected { status: u16, details: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// How an error is presented to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Dismissible notice, tracking carries on.
    Transient,
    /// Ends the session or blocks it from starting.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackerError {
    #[error("location capability is not supported on this device")]
    CapabilityUnsupported,
    #[error("location permission denied")]
    PermissionDenied,
    #[error(transparent)]
    Position(PositionError),
    #[error(transparent)]
    Sync(SyncError),
    #[error("invalid position sample: {0}")]
    InvalidSample(#[from] InvalidSample),
    #[error("update interval can only change while tracking is inactive")]
    IntervalLocked,
}

impl From<PositionError> for TrackerError {
    fn from(err: PositionError) -> Self {
        match err {
            PositionError::Unsupported => TrackerError::CapabilityUnsupported,
            PositionError::PermissionDenied => TrackerError::PermissionDenied,
            other => TrackerError::Position(other),
        }
    }
}

impl From<SyncError> for TrackerError {
    fn from(err: SyncError) -> Self {
        TrackerError::Sync(err)
    }
}

impl TrackerError {
    pub fn severity(&self) -> Severity {
        match self {
            TrackerError::CapabilityUnsupported
            | TrackerError::PermissionDenied
            | TrackerError::Sync(SyncError::Unauthorized) => Severity::Fatal,
            TrackerError::Position(_)
            | TrackerError::Sync(_)
            | TrackerError::InvalidSample(_)
            | TrackerError::IntervalLocked => Severity::Transient,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TrackerError::Sync(SyncError::Unauthorized))
    }

    /// Stable machine-readable name used by the local API.
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerError::CapabilityUnsupported => "capability_unsupported",
            TrackerError::PermissionDenied => "permission_denied",
            TrackerError::Position(PositionError::Timeout) => "timeout",
            TrackerError::Position(_) => "position_unavailable",
            TrackerError::Sync(SyncError::Unauthorized) => "unauthorized",
            TrackerError::Sync(SyncError::Network(_)) => "network_error",
            TrackerError::Sync(SyncError::ServerRejected { .. }) => "server_rejected",
            TrackerError::Sync(SyncError::Malformed(_)) => "malformed_response",
            TrackerError::InvalidSample(_) => "invalid_sample",
            TrackerError::IntervalLocked => "interval_locked",
        }
    }
}
