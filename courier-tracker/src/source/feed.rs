use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use courier_core::PositionSample;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Permission, PositionOptions, PositionSource, WatchHandle, WatchId, WatchItem};
use crate::error::PositionError;

const WATCH_BUFFER: usize = 32;

/// Position source driven by a host bridge.
///
/// The embedding platform (a browser shell, a phone app, the local HTTP API)
/// pushes fixes and errors in; the tracker consumes them through the normal
/// [`PositionSource`] contract. Clones share the same feed.
#[derive(Clone)]
pub struct FeedSource {
    state: Arc<Mutex<FeedState>>,
    latest: Arc<watch::Sender<Option<PositionSample>>>,
}

struct FeedState {
    supported: bool,
    permission: Permission,
    /// Answers for `current_position`, served before any live fix.
    scripted: VecDeque<Result<PositionSample, PositionError>>,
    watchers: Vec<Watcher>,
    next_watch: u64,
    registrations: usize,
}

struct Watcher {
    id: WatchId,
    tx: mpsc::Sender<WatchItem>,
    cancel: CancellationToken,
}

impl Watcher {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

impl Default for FeedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedSource {
    pub fn new() -> Self {
        Self::with_capability(true, Permission::Granted)
    }

    /// A platform without any location service.
    pub fn unsupported() -> Self {
        Self::with_capability(false, Permission::Denied)
    }

    fn with_capability(supported: bool, permission: Permission) -> Self {
        let (latest, _rx) = watch::channel(None);
        Self {
            state: Arc::new(Mutex::new(FeedState {
                supported,
                permission,
                scripted: VecDeque::new(),
                watchers: Vec::new(),
                next_watch: 1,
                registrations: 0,
            })),
            latest: Arc::new(latest),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_permission(&self, permission: Permission) {
        self.lock().permission = permission;
    }

    /// Queue an answer for the next `current_position` call.
    pub fn queue_current(&self, result: Result<PositionSample, PositionError>) {
        self.lock().scripted.push_back(result);
    }

    /// Deliver a fix to every live watch. Watches that are full drop the fix.
    ///
    /// A fix means the platform grants access, so an earlier denial is lifted.
    pub fn push(&self, sample: PositionSample) {
        {
            let mut state = self.lock();
            if state.supported && state.permission != Permission::Granted {
                debug!("Fix received, location access granted");
                state.permission = Permission::Granted;
            }
        }
        self.latest.send_replace(Some(sample.clone()));
        self.broadcast(Ok(sample));
    }

    /// Deliver a platform error to every live watch.
    pub fn push_error(&self, error: PositionError) {
        if error == PositionError::PermissionDenied {
            self.set_permission(Permission::Denied);
        }
        self.broadcast(Err(error));
    }

    fn broadcast(&self, item: WatchItem) {
        let mut state = self.lock();
        state.watchers.retain(Watcher::is_live);
        for watcher in &state.watchers {
            if watcher.tx.try_send(item.clone()).is_err() {
                warn!(watch_id = watcher.id.0, "Watch buffer full, dropping fix");
            }
        }
    }

    /// Close every watch as if the platform stopped delivering.
    pub fn close_watches(&self) {
        self.lock().watchers.clear();
    }

    /// Number of watches that have not been cancelled.
    pub fn active_watches(&self) -> usize {
        self.lock().watchers.iter().filter(|w| w.is_live()).count()
    }

    /// Total number of successful `watch_position` calls.
    pub fn registrations(&self) -> usize {
        self.lock().registrations
    }

    fn check_access(&self) -> Result<(), PositionError> {
        let state = self.lock();
        if !state.supported {
            return Err(PositionError::Unsupported);
        }
        if state.permission == Permission::Denied {
            return Err(PositionError::PermissionDenied);
        }
        Ok(())
    }
}

#[async_trait]
impl PositionSource for FeedSource {
    fn is_supported(&self) -> bool {
        self.lock().supported
    }

    fn permission(&self) -> Permission {
        self.lock().permission
    }

    async fn current_position(
        &self,
        options: PositionOptions,
    ) -> Result<PositionSample, PositionError> {
        self.check_access()?;

        let scripted = self.lock().scripted.pop_front();
        if let Some(scripted) = scripted {
            return scripted;
        }

        let mut rx = self.latest.subscribe();
        let cached = rx.borrow_and_update().clone();
        if let Some(sample) = cached {
            let age = jiff::Timestamp::now()
                .duration_since(sample.captured_at)
                .unsigned_abs();
            if age <= options.maximum_age {
                return Ok(sample);
            }
        }

        debug!("No cached fix fresh enough, waiting for the next one");
        loop {
            if rx.changed().await.is_err() {
                return Err(PositionError::PositionUnavailable);
            }
            let next = rx.borrow_and_update().clone();
            if let Some(sample) = next {
                return Ok(sample);
            }
        }
    }

    fn watch_position(&self, _options: PositionOptions) -> Result<WatchHandle, PositionError> {
        self.check_access()?;

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let cancel = CancellationToken::new();

        let mut state = self.lock();
        let id = WatchId(state.next_watch);
        state.next_watch += 1;
        state.registrations += 1;
        state.watchers.push(Watcher {
            id,
            tx,
            cancel: cancel.clone(),
        });

        Ok(WatchHandle::new(id, rx, cancel))
    }
}
