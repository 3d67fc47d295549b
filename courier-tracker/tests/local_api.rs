use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use courier_core::{ParcelId, PositionSample};
use courier_tracker::api::{self, ApiState};
use courier_tracker::{
    AuthContext, FeedSource, MockSyncClient, Tracker, TrackerHandle, TrackingAgent, TrackingConfig,
};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

struct Harness {
    base: String,
    http: reqwest::Client,
    feed: FeedSource,
    client: MockSyncClient,
    auth: AuthContext,
    _tracker: TrackerHandle,
}

async fn harness(with_feed: bool) -> Harness {
    harness_with(
        with_feed,
        TrackingConfig::minimal(),
        MockSyncClient::new(),
        AuthContext::new(Some("token".into())),
    )
    .await
}

async fn harness_with(
    with_feed: bool,
    config: TrackingConfig,
    client: MockSyncClient,
    auth: AuthContext,
) -> Harness {
    let feed = FeedSource::new();
    let agent = TrackingAgent::new(feed.clone(), Arc::new(client.clone()), config);
    let (tracker, _task) = Tracker::spawn(agent, &auth, CancellationToken::new());

    let app = api::router(ApiState {
        tracker: tracker.clone(),
        auth: auth.clone(),
        feed: with_feed.then(|| feed.clone()),
    });
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        base: format!("http://{addr}"),
        http: reqwest::Client::new(),
        feed,
        client,
        auth,
        _tracker: tracker,
    }
}

impl Harness {
    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .http
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .http
            .request(method, format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn route_len(&self) -> usize {
        let (_, body) = self.get("/tracking").await;
        body["data"]["route"].as_array().map_or(0, Vec::len)
    }
}

fn fix(lat: f64, lng: f64) -> PositionSample {
    PositionSample::new(lat, lng, jiff::Timestamp::now()).with_accuracy(15.0)
}

#[tokio::test]
async fn health_answers_ok() {
    let h = harness(false).await;
    let body = h
        .http
        .get(format!("{}/health", h.base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn tracking_session_over_http() {
    let h = harness(true).await;

    let (status, body) = h.get("/tracking").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"]["state"], "idle");

    let (status, body) = h
        .send(reqwest::Method::PUT, "/tracking/interval", json!({ "interval_secs": 45 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = h
        .send(reqwest::Method::PUT, "/tracking/interval", json!({ "interval_secs": 10 }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h
        .send(reqwest::Method::PUT, "/tracking/parcel", json!({ "parcel_id": 7 }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["parcel_id"], 7);

    h.feed.queue_current(Ok(fix(-1.2921, 36.8219)));
    let (status, body) = h.send(reqwest::Method::POST, "/tracking/start", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["session_id"].is_string());
    assert_eq!(h.client.sent_locations()[0].parcel, Some(ParcelId(7)));

    let (status, body) = h
        .send(reqwest::Method::PUT, "/tracking/interval", json!({ "interval_secs": 60 }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "interval_locked");

    let (status, _) = h
        .send(
            reqwest::Method::POST,
            "/fixes",
            json!({ "latitude": -1.2925, "longitude": 36.8225, "accuracy": 8.0 }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let mut attempts = 0;
    while h.route_len().await < 2 {
        attempts += 1;
        assert!(attempts < 50, "fix never reached the route");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let (status, _) = h
        .send(reqwest::Method::POST, "/fixes", json!({ "latitude": 120.0, "longitude": 0.0 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = h.send(reqwest::Method::POST, "/tracking/stop", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "stopped");
    assert_eq!(body["data"]["stats"]["updates_sent"], 2);
    assert_eq!(h.client.offline_calls(), 1);
}

#[tokio::test]
async fn failed_start_surfaces_error_and_notice() {
    let h = harness(true).await;
    h.feed
        .queue_current(Err(courier_tracker::PositionError::Timeout));

    let (status, body) = h.send(reqwest::Method::POST, "/tracking/start", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "timeout");

    let mut notices = Value::Null;
    for _ in 0..50 {
        let (_, body) = h.get("/tracking").await;
        if body["data"]["status"]["state"] == "faulted" {
            notices = body["data"]["notices"].clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let id = notices[0]["id"].as_u64().expect("notice raised");

    let response = h
        .http
        .delete(format!("{}/tracking/notices/{id}", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = h
        .http
        .delete(format!("{}/tracking/notices/{id}", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn fixes_are_refused_without_a_feed() {
    let h = harness(false).await;
    let (status, _) = h
        .send(reqwest::Method::POST, "/fixes", json!({ "latitude": 1.0, "longitude": 1.0 }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn token_can_be_replaced_and_cleared() {
    let h = harness(false).await;

    let (status, _) = h
        .send(reqwest::Method::PUT, "/auth/token", json!({ "token": "  " }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.auth.is_authenticated());

    let response = h
        .http
        .delete(format!("{}/auth/token", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!h.auth.is_authenticated());

    let response = h
        .http
        .delete(format!("{}/auth/token", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let (status, body) = h
        .send(reqwest::Method::PUT, "/auth/token", json!({ "token": "renewed" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["authenticated"], true);
    assert_eq!(h.auth.bearer().unwrap().expose(), "renewed");
}

#[tokio::test]
async fn login_over_http_resumes_tracking() {
    let h = harness_with(
        true,
        TrackingConfig::default(),
        MockSyncClient::new(),
        AuthContext::anonymous(),
    )
    .await;

    // startup attempt finds the driver offline
    let mut attempts = 0;
    while h.client.status_queries() < 1 {
        attempts += 1;
        assert!(attempts < 50, "startup resume never ran");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    h.client.set_server_online(true);
    h.feed.queue_current(Ok(fix(-1.2921, 36.8219)));
    let (status, _) = h
        .send(reqwest::Method::PUT, "/auth/token", json!({ "token": "fresh" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let mut state = Value::Null;
    for _ in 0..50 {
        let (_, body) = h.get("/tracking").await;
        state = body["data"]["status"]["state"].clone();
        if state == "active" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state, "active");
    assert_eq!(h.client.status_queries(), 2);
    assert_eq!(h.client.location_count(), 1);
}
