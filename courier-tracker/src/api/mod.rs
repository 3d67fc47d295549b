pub mod auth;
pub mod error;
pub mod models;
pub mod tracking;

use axum::{
    Router,
    routing::{delete, get, post, put},
};

use crate::auth::AuthContext;
use crate::runtime::TrackerHandle;
use crate::source::feed::FeedSource;

/// Shared state for the local API.
#[derive(Clone)]
pub struct ApiState {
    pub tracker: TrackerHandle,
    /// Credential shared with the backend client.
    pub auth: AuthContext,
    /// Present when fixes are pushed in over HTTP.
    pub feed: Option<FeedSource>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Login bridge
        .route(
            "/auth/token",
            put(auth::set_token).delete(auth::clear_token),
        )
        // Tracking routes
        .route("/tracking", get(tracking::snapshot))
        .route("/tracking/start", post(tracking::start))
        .route("/tracking/stop", post(tracking::stop))
        .route("/tracking/resume", post(tracking::resume))
        .route("/tracking/parcel", put(tracking::set_parcel))
        .route("/tracking/interval", put(tracking::set_interval))
        .route("/tracking/notices/{id}", delete(tracking::dismiss_notice))
        // Platform bridge
        .route("/fixes", post(tracking::push_fix))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "OK"
}
