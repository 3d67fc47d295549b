pub mod feed;
pub mod simulated;

use std::time::Duration;

use async_trait::async_trait;
use courier_core::PositionSample;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::PositionError;

/// What a watch yields: a fix, or the platform's error callback.
pub type WatchItem = Result<PositionSample, PositionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    /// Cached fixes older than this must not be returned.
    pub maximum_age: Duration,
    pub timeout: Duration,
}

impl PositionOptions {
    pub fn initial_fix(timeout: Duration, maximum_age: Duration) -> Self {
        Self {
            enable_high_accuracy: true,
            maximum_age,
            timeout,
        }
    }

    /// Continuous watch: never reuse a cached fix.
    pub fn watch(timeout: Duration) -> Self {
        Self {
            enable_high_accuracy: true,
            maximum_age: Duration::ZERO,
            timeout,
        }
    }

    /// Cheap fix taken while a session is winding down.
    pub fn final_fix() -> Self {
        Self {
            enable_high_accuracy: false,
            maximum_age: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Granted,
    /// Not decided yet; the platform will ask on first use.
    Prompt,
    Denied,
}

/// Platform location service.
///
/// Implementations deliver watch updates through the channel inside the
/// returned [`WatchHandle`] and stop producing once the handle is cancelled.
#[async_trait]
pub trait PositionSource: Send + Sync + 'static {
    /// Whether the platform has a location service at all.
    fn is_supported(&self) -> bool;

    fn permission(&self) -> Permission {
        Permission::Prompt
    }

    async fn current_position(
        &self,
        options: PositionOptions,
    ) -> Result<PositionSample, PositionError>;

    fn watch_position(&self, options: PositionOptions) -> Result<WatchHandle, PositionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Owned subscription to a stream of fixes. Dropping it cancels the watch.
#[derive(Debug)]
pub struct WatchHandle {
    id: WatchId,
    rx: mpsc::Receiver<WatchItem>,
    cancel: CancellationToken,
}

impl WatchHandle {
    pub fn new(id: WatchId, rx: mpsc::Receiver<WatchItem>, cancel: CancellationToken) -> Self {
        Self { id, rx, cancel }
    }

    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Next item from the platform, `None` once cancelled or the source is gone.
    pub async fn recv(&mut self) -> Option<WatchItem> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Cancel and clear a watch slot. Safe to call on an empty slot.
pub fn cancel_watch(slot: &mut Option<WatchHandle>) -> Option<WatchId> {
    let handle = slot.take()?;
    handle.cancel();
    Some(handle.id())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (mpsc::Sender<WatchItem>, CancellationToken, WatchHandle) {
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = WatchHandle::new(WatchId(1), rx, cancel.clone());
        (tx, cancel, handle)
    }

    #[test]
    fn cancel_watch_is_idempotent() {
        let (_tx, token, h) = handle();
        let mut slot = Some(h);

        assert_eq!(cancel_watch(&mut slot), Some(WatchId(1)));
        assert!(token.is_cancelled());
        assert_eq!(cancel_watch(&mut slot), None);
        assert_eq!(cancel_watch(&mut None), None);
    }

    #[tokio::test]
    async fn cancelled_handle_stops_yielding() {
        let (tx, _token, mut h) = handle();
        tx.send(Err(PositionError::Timeout)).await.unwrap();
        assert_eq!(h.recv().await, Some(Err(PositionError::Timeout)));

        h.cancel();
        tx.send(Err(PositionError::Timeout)).await.unwrap();
        assert_eq!(h.recv().await, None);
    }

    #[test]
    fn dropping_the_handle_cancels() {
        let (_tx, token, h) = handle();
        drop(h);
        assert!(token.is_cancelled());
    }
}
