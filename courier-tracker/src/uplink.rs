use std::sync::Arc;

use courier_core::wire::TrackingAck;
use courier_core::{ParcelId, PositionSample, SessionId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, info_span, warn};

use crate::client::SyncClient;
use crate::error::SyncError;

/// A sample waiting to be sent.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub sample: PositionSample,
    pub parcel: Option<ParcelId>,
}

/// Result of one `send_location`, reported back to the agent.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub session: SessionId,
    pub captured_at: jiff::Timestamp,
    pub result: Result<TrackingAck, SyncError>,
}

/// Latest-wins sender for a session's samples.
///
/// Holds a single slot: publishing while a request is in flight replaces
/// whatever was queued, so at most one request is in flight and at most one
/// is waiting. The task exits after an `Unauthorized` answer, or when closed.
/// Dropping the uplink cancels it without waiting.
pub struct Uplink {
    slot: watch::Sender<Option<Outgoing>>,
    deliveries: mpsc::Receiver<Delivery>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    _guard: DropGuard,
}

impl Uplink {
    pub fn spawn<C: SyncClient>(client: Arc<C>, session: SessionId) -> Self {
        let (slot, rx) = watch::channel(None);
        let (tx, deliveries) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(
            run_uplink(client, session, rx, tx, cancel.clone())
                .instrument(info_span!("uplink", %session)),
        );

        Self {
            slot,
            deliveries,
            _guard: cancel.clone().drop_guard(),
            cancel,
            task,
        }
    }

    /// Queue a sample, superseding any sample not yet picked up.
    pub fn publish(&self, outgoing: Outgoing) {
        self.slot.send_replace(Some(outgoing));
    }

    /// Next delivery result. `None` once the uplink task has exited.
    pub async fn next_delivery(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }

    /// Stop sending and wait for the task to exit. A request already in
    /// flight completes first, but its result is discarded.
    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Uplink task failed");
        }
    }
}

async fn run_uplink<C: SyncClient>(
    client: Arc<C>,
    session: SessionId,
    mut rx: watch::Receiver<Option<Outgoing>>,
    tx: mpsc::Sender<Delivery>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let queued = rx.borrow_and_update().clone();
        let Some(outgoing) = queued else {
            continue;
        };

        let result = client
            .send_location(&outgoing.sample, outgoing.parcel)
            .await;

        if cancel.is_cancelled() {
            debug!("Session ended while a sample was in flight, discarding result");
            break;
        }

        let unauthorized = matches!(result, Err(SyncError::Unauthorized));
        let delivery = Delivery {
            session,
            captured_at: outgoing.sample.captured_at,
            result,
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(delivery) => {
                if sent.is_err() {
                    break;
                }
            }
        }
        if unauthorized {
            warn!("Backend refused credentials, uplink stopped");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::mock::MockSyncClient;

    fn outgoing(lat: f64) -> Outgoing {
        Outgoing {
            sample: PositionSample::new(lat, 36.8, jiff::Timestamp::now()),
            parcel: None,
        }
    }

    async fn next(uplink: &mut Uplink) -> Option<Delivery> {
        tokio::time::timeout(Duration::from_secs(2), uplink.next_delivery())
            .await
            .expect("delivery within timeout")
    }

    #[tokio::test]
    async fn newer_samples_supersede_queued_ones() {
        let client = MockSyncClient::new().with_location_delay(Duration::from_millis(100));
        let mut uplink = Uplink::spawn(Arc::new(client.clone()), SessionId::new());

        uplink.publish(outgoing(-1.0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        uplink.publish(outgoing(-2.0));
        uplink.publish(outgoing(-3.0));
        uplink.publish(outgoing(-4.0));

        assert!(next(&mut uplink).await.unwrap().result.is_ok());
        assert!(next(&mut uplink).await.unwrap().result.is_ok());

        let sent: Vec<f64> = client
            .sent_locations()
            .iter()
            .map(|s| s.sample.latitude)
            .collect();
        assert_eq!(sent, vec![-1.0, -4.0]);
    }

    #[tokio::test]
    async fn unauthorized_stops_the_uplink() {
        let client = MockSyncClient::new();
        client.fail_next_location(SyncError::Unauthorized);
        let mut uplink = Uplink::spawn(Arc::new(client.clone()), SessionId::new());

        uplink.publish(outgoing(-1.0));
        let delivery = next(&mut uplink).await.unwrap();
        assert_eq!(delivery.result, Err(SyncError::Unauthorized));

        uplink.publish(outgoing(-2.0));
        assert!(next(&mut uplink).await.is_none());
        assert_eq!(client.location_count(), 1);
    }

    #[tokio::test]
    async fn other_failures_are_reported_and_sending_continues() {
        let client = MockSyncClient::new();
        client.fail_next_location(SyncError::Network("connection reset".into()));
        let mut uplink = Uplink::spawn(Arc::new(client.clone()), SessionId::new());

        uplink.publish(outgoing(-1.0));
        assert!(matches!(
            next(&mut uplink).await.unwrap().result,
            Err(SyncError::Network(_))
        ));

        uplink.publish(outgoing(-2.0));
        assert!(next(&mut uplink).await.unwrap().result.is_ok());
        assert_eq!(client.location_count(), 2);
    }

    #[tokio::test]
    async fn closing_waits_for_in_flight_request() {
        let client = MockSyncClient::new().with_location_delay(Duration::from_millis(50));
        let uplink = Uplink::spawn(Arc::new(client.clone()), SessionId::new());

        uplink.publish(outgoing(-1.0));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.in_flight_locations(), 1);

        uplink.close().await;
        assert_eq!(client.in_flight_locations(), 0);
        assert_eq!(client.location_count(), 1);
    }
}
