pub mod http;
pub mod mock;

use async_trait::async_trait;
use courier_core::wire::{StatusAck, TrackingAck};
use courier_core::{ParcelId, PositionSample, UpdateInterval};

use crate::error::SyncError;

/// Transport between the tracker and the backend's driver endpoints.
///
/// A dropped `send_location` is never retried by the caller: the next fix
/// supersedes it.
#[async_trait]
pub trait SyncClient: Send + Sync + 'static {
    /// Deliver one sample, tagged with the active parcel if any.
    async fn send_location(
        &self,
        sample: &PositionSample,
        parcel: Option<ParcelId>,
    ) -> Result<TrackingAck, SyncError>;

    /// Update the driver's online flag and the cadence the backend expects.
    async fn set_online_status(
        &self,
        online: bool,
        interval: Option<UpdateInterval>,
    ) -> Result<StatusAck, SyncError>;

    /// What the backend currently believes about the driver.
    async fn online_status(&self) -> Result<bool, SyncError>;
}
