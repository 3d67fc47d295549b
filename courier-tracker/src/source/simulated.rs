use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use courier_core::PositionSample;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Permission, PositionOptions, PositionSource, WatchHandle, WatchId};
use crate::error::PositionError;

const METERS_PER_DEGREE: f64 = 111_320.0;

/// Position source that drives a jittered path from an origin.
///
/// Used for demos and soak runs where no platform location service exists.
#[derive(Clone)]
pub struct SimulatedSource {
    vehicle: Arc<Mutex<Vehicle>>,
    /// Time between watch updates.
    interval: Duration,
    next_watch: Arc<AtomicU64>,
}

struct Vehicle {
    lat: f64,
    lng: f64,
    bearing: f64,
    speed_mps: f64,
    altitude: f64,
}

impl SimulatedSource {
    pub fn new(start_lat: f64, start_lng: f64, speed_mps: f64, interval: Duration) -> Self {
        let bearing = rand::rng().random_range(0.0..360.0);
        Self {
            vehicle: Arc::new(Mutex::new(Vehicle {
                lat: start_lat,
                lng: start_lng,
                bearing,
                speed_mps,
                altitude: 1660.0,
            })),
            interval,
            next_watch: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Advance the vehicle by `elapsed` and return the resulting fix.
    fn step(&self, elapsed: Duration) -> PositionSample {
        let mut rng = rand::rng();
        let mut v = self.vehicle.lock().unwrap_or_else(PoisonError::into_inner);

        v.bearing = (v.bearing + rng.random_range(-20.0..20.0)).rem_euclid(360.0);
        let speed = v.speed_mps * rng.random_range(0.6..1.2);
        let meters = speed * elapsed.as_secs_f64();

        let heading = v.bearing.to_radians();
        let dlat = meters * heading.cos() / METERS_PER_DEGREE;
        let dlng = meters * heading.sin() / (METERS_PER_DEGREE * v.lat.to_radians().cos().max(0.01));

        v.lat = (v.lat + dlat).clamp(-89.9, 89.9);
        v.lng = (v.lng + dlng + 180.0).rem_euclid(360.0) - 180.0;
        v.altitude += rng.random_range(-1.5..1.5);

        PositionSample::new(v.lat, v.lng, jiff::Timestamp::now())
            .with_accuracy(rng.random_range(4.0..18.0))
            .with_motion(Some(speed), Some(v.bearing))
            .with_altitude(Some(v.altitude))
    }

    fn here(&self, high_accuracy: bool) -> PositionSample {
        let mut rng = rand::rng();
        let v = self.vehicle.lock().unwrap_or_else(PoisonError::into_inner);
        let accuracy = if high_accuracy {
            rng.random_range(4.0..15.0)
        } else {
            rng.random_range(30.0..90.0)
        };

        PositionSample::new(v.lat, v.lng, jiff::Timestamp::now())
            .with_accuracy(accuracy)
            .with_altitude(Some(v.altitude))
    }
}

#[async_trait]
impl PositionSource for SimulatedSource {
    fn is_supported(&self) -> bool {
        true
    }

    fn permission(&self) -> Permission {
        Permission::Granted
    }

    async fn current_position(
        &self,
        options: PositionOptions,
    ) -> Result<PositionSample, PositionError> {
        // A real receiver needs a moment to resolve a fix.
        tokio::time::sleep(Duration::from_millis(50).min(options.timeout)).await;
        Ok(self.here(options.enable_high_accuracy))
    }

    fn watch_position(&self, _options: PositionOptions) -> Result<WatchHandle, PositionError> {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let id = WatchId(self.next_watch.fetch_add(1, Ordering::Relaxed));

        let source = self.clone();
        let cancel_task = cancel.clone();
        let interval = self.interval;

        info!(
            watch_id = id.0,
            interval_ms = interval.as_millis() as u64,
            "Starting simulated watch"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; the initial fix already covers it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel_task.cancelled() => {
                        info!(watch_id = id.0, "Simulated watch cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        let sample = source.step(interval);
                        if tx.send(Ok(sample)).await.is_err() {
                            info!(watch_id = id.0, "Watch receiver dropped, stopping");
                            break;
                        }
                    }
                }
            }
        });

        Ok(WatchHandle::new(id, rx, cancel))
    }
}
