use std::time::Duration;

use async_trait::async_trait;
use courier_core::wire::{
    OnlineStatusRequest, OnlineStatusResponse, ParcelStatusAck, ParcelStatusUpdate,
    ParcelSummary, StatusAck, TrackingAck, TrackingRequest,
};
use courier_core::{ParcelId, PositionSample, UpdateInterval};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::SyncClient;
use crate::auth::AuthContext;
use crate::error::SyncError;

const MAX_ERROR_DETAILS: usize = 512;

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(StatusCode::UNAUTHORIZED) {
            SyncError::Unauthorized
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

/// HTTP client for the courier backend.
///
/// Every request carries the bearer token from the injected [`AuthContext`].
/// A `401` invalidates that context; with no token installed, calls fail with
/// [`SyncError::Unauthorized`] without touching the network.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: Box<str>,
    auth: AuthContext,
}

impl BackendClient {
    pub fn new(base_url: &str, auth: AuthContext, timeout: Duration) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("courier-tracker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(http, base_url, auth))
    }

    pub fn with_client(http: reqwest::Client, base_url: &str, auth: AuthContext) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').into(),
            auth,
        }
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn call<B, R>(&self, method: Method, path: &str, body: Option<&B>) -> Result<R, SyncError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let Some(token) = self.auth.bearer() else {
            debug!(path, "No bearer token, skipping request");
            return Err(SyncError::Unauthorized);
        };

        let mut request = self
            .http
            .request(method, self.url(path))
            .bearer_auth(token.expose());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            self.auth.invalidate();
            return Err(SyncError::Unauthorized);
        }

        let bytes = response.bytes().await?;

        if !status.is_success() {
            let mut details = String::from_utf8_lossy(&bytes).into_owned();
            if details.len() > MAX_ERROR_DETAILS {
                let mut cut = MAX_ERROR_DETAILS;
                while !details.is_char_boundary(cut) {
                    cut -= 1;
                }
                details.truncate(cut);
            }
            warn!(path, status = status.as_u16(), "Backend rejected request");
            return Err(SyncError::ServerRejected {
                status: status.as_u16(),
                details,
            });
        }

        // Some endpoints answer 200/204 with no body at all.
        let body: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &bytes
        };
        serde_json::from_slice(body).map_err(|e| SyncError::Malformed(e.to_string()))
    }

    /// `GET /parcels/assigned/`
    #[instrument(skip(self))]
    pub async fn assigned_parcels(&self) -> Result<Vec<ParcelSummary>, SyncError> {
        self.call::<(), _>(Method::GET, "parcels/assigned/", None)
            .await
    }

    /// `POST /parcels/{id}/update-status/`
    #[instrument(skip(self, update), fields(status = %update.status))]
    pub async fn update_parcel_status(
        &self,
        parcel: ParcelId,
        update: &ParcelStatusUpdate,
    ) -> Result<ParcelStatusAck, SyncError> {
        self.call(
            Method::POST,
            &format!("parcels/{parcel}/update-status/"),
            Some(update),
        )
        .await
    }
}

#[async_trait]
impl SyncClient for BackendClient {
    #[instrument(name = "send_location", skip_all, fields(parcel = ?parcel))]
    async fn send_location(
        &self,
        sample: &PositionSample,
        parcel: Option<ParcelId>,
    ) -> Result<TrackingAck, SyncError> {
        let body = TrackingRequest::new(sample, parcel);
        self.call(Method::POST, "driver/gps/tracking/", Some(&body))
            .await
    }

    #[instrument(name = "set_online_status", skip(self))]
    async fn set_online_status(
        &self,
        online: bool,
        interval: Option<UpdateInterval>,
    ) -> Result<StatusAck, SyncError> {
        let body = OnlineStatusRequest {
            is_online: online,
            tracking_interval: interval.map(UpdateInterval::as_secs),
        };
        self.call(Method::POST, "driver/gps/status/", Some(&body))
            .await
    }

    #[instrument(name = "online_status", skip(self))]
    async fn online_status(&self) -> Result<bool, SyncError> {
        let status: OnlineStatusResponse =
            self.call::<(), _>(Method::GET, "driver/status/", None).await?;
        Ok(status.is_online)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_without_double_slashes() {
        let client = BackendClient::with_client(
            reqwest::Client::new(),
            "http://backend/api/",
            AuthContext::anonymous(),
        );
        assert_eq!(
            client.url("/driver/status/"),
            "http://backend/api/driver/status/"
        );
        assert_eq!(
            client.url("parcels/7/update-status/"),
            "http://backend/api/parcels/7/update-status/"
        );
    }

    #[tokio::test]
    async fn missing_token_fails_without_network() {
        // Nothing listens on this port; an attempted request would be a network error.
        let client = BackendClient::with_client(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            AuthContext::anonymous(),
        );
        assert_eq!(client.online_status().await, Err(SyncError::Unauthorized));
    }
}
