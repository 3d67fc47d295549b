use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use courier_core::wire::{StatusAck, TrackingAck};
use courier_core::{ParcelId, PositionSample, UpdateInterval};

use super::SyncClient;
use crate::error::SyncError;

/// A `send_location` call as seen by the mock backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SentLocation {
    pub sample: PositionSample,
    pub parcel: Option<ParcelId>,
}

/// A `set_online_status` call as seen by the mock backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCall {
    pub online: bool,
    pub interval: Option<UpdateInterval>,
}

/// In-memory backend that records every call.
///
/// Failures can be scripted per endpoint; they are consumed in order, and
/// once the queue is empty calls succeed again. Clones share state.
#[derive(Clone, Default)]
pub struct MockSyncClient {
    inner: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    server_online: bool,
    locations: Vec<SentLocation>,
    statuses: Vec<StatusCall>,
    status_queries: usize,
    location_failures: VecDeque<SyncError>,
    status_failures: VecDeque<SyncError>,
    query_failures: VecDeque<SyncError>,
    location_delay: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

impl MockSyncClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pretend the backend already holds the given online flag.
    pub fn with_server_online(self, online: bool) -> Self {
        self.set_server_online(online);
        self
    }

    /// Change the backend's online flag behind the tracker's back.
    pub fn set_server_online(&self, online: bool) {
        self.lock().server_online = online;
    }

    /// Hold every `send_location` call for `delay` before answering.
    pub fn with_location_delay(self, delay: Duration) -> Self {
        self.lock().location_delay = Some(delay);
        self
    }

    pub fn fail_next_location(&self, err: SyncError) {
        self.lock().location_failures.push_back(err);
    }

    pub fn fail_next_status(&self, err: SyncError) {
        self.lock().status_failures.push_back(err);
    }

    pub fn fail_next_query(&self, err: SyncError) {
        self.lock().query_failures.push_back(err);
    }

    pub fn server_online(&self) -> bool {
        self.lock().server_online
    }

    pub fn sent_locations(&self) -> Vec<SentLocation> {
        self.lock().locations.clone()
    }

    pub fn location_count(&self) -> usize {
        self.lock().locations.len()
    }

    /// `send_location` calls that have not answered yet.
    pub fn in_flight_locations(&self) -> usize {
        self.lock().in_flight
    }

    /// Most `send_location` calls ever outstanding at once.
    pub fn max_in_flight_locations(&self) -> usize {
        self.lock().max_in_flight
    }

    pub fn status_calls(&self) -> Vec<StatusCall> {
        self.lock().statuses.clone()
    }

    /// Number of `set_online_status(false)` calls.
    pub fn offline_calls(&self) -> usize {
        self.lock().statuses.iter().filter(|c| !c.online).count()
    }

    pub fn status_queries(&self) -> usize {
        self.lock().status_queries
    }
}

#[async_trait]
impl SyncClient for MockSyncClient {
    async fn send_location(
        &self,
        sample: &PositionSample,
        parcel: Option<ParcelId>,
    ) -> Result<TrackingAck, SyncError> {
        let delay = {
            let mut state = self.lock();
            state.locations.push(SentLocation {
                sample: sample.clone(),
                parcel,
            });
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.location_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = {
            let mut state = self.lock();
            state.in_flight -= 1;
            state.location_failures.pop_front()
        };
        match failure {
            Some(err) => Err(err),
            None => Ok(TrackingAck::default()),
        }
    }

    async fn set_online_status(
        &self,
        online: bool,
        interval: Option<UpdateInterval>,
    ) -> Result<StatusAck, SyncError> {
        let mut state = self.lock();
        state.statuses.push(StatusCall { online, interval });

        if let Some(err) = state.status_failures.pop_front() {
            return Err(err);
        }

        state.server_online = online;
        Ok(StatusAck {
            is_online: Some(online),
            message: None,
        })
    }

    async fn online_status(&self) -> Result<bool, SyncError> {
        let mut state = self.lock();
        state.status_queries += 1;

        match state.query_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(state.server_online),
        }
    }
}
