use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use courier_core::Percentage;
use tokio::sync::watch;
use tracing::{debug, warn};

pub type BatteryLevel = watch::Receiver<Option<Percentage>>;

/// Optional battery capability.
///
/// `subscribe` samples the current level and keeps the receiver updated until
/// it is dropped. Platforms without a battery return `None`.
pub trait BatterySource: Send + Sync + 'static {
    fn subscribe(&self) -> Option<BatteryLevel>;
}

pub struct NoBattery;

impl BatterySource for NoBattery {
    fn subscribe(&self) -> Option<BatteryLevel> {
        None
    }
}

/// Battery level pushed in by the host.
#[derive(Clone)]
pub struct BatteryFeed {
    level: Arc<watch::Sender<Option<Percentage>>>,
}

impl BatteryFeed {
    pub fn new(initial: Option<Percentage>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            level: Arc::new(tx),
        }
    }

    pub fn set(&self, level: Percentage) {
        self.level.send_replace(Some(level));
    }
}

impl BatterySource for BatteryFeed {
    fn subscribe(&self) -> Option<BatteryLevel> {
        Some(self.level.subscribe())
    }
}

/// Reads `capacity` from a Linux power-supply directory.
pub struct SysfsBattery {
    capacity_file: PathBuf,
    poll: Duration,
}

impl SysfsBattery {
    pub fn new(supply_dir: impl AsRef<Path>, poll: Duration) -> Self {
        Self {
            capacity_file: supply_dir.as_ref().join("capacity"),
            poll,
        }
    }
}

fn parse_capacity(path: &Path, raw: std::io::Result<String>) -> Option<Percentage> {
    match raw {
        Ok(raw) => match raw.trim().parse::<i64>() {
            Ok(value) => Some(Percentage::clamped(value)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unparseable battery capacity");
                None
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read battery capacity");
            None
        }
    }
}

async fn read_capacity(path: &Path) -> Option<Percentage> {
    parse_capacity(path, tokio::fs::read_to_string(path).await)
}

impl BatterySource for SysfsBattery {
    fn subscribe(&self) -> Option<BatteryLevel> {
        if !self.capacity_file.exists() {
            debug!(path = %self.capacity_file.display(), "No battery capacity file");
            return None;
        }

        // The first sample of a session reads this value right away.
        let initial = parse_capacity(
            &self.capacity_file,
            std::fs::read_to_string(&self.capacity_file),
        );
        let (tx, rx) = watch::channel(initial);
        let path = self.capacity_file.clone();
        let poll = self.poll;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {
                        let level = read_capacity(&path).await;
                        tx.send_if_modified(|current| {
                            let changed = level.is_some() && *current != level;
                            if changed {
                                *current = level;
                            }
                            changed
                        });
                    }
                }
            }
            debug!("Battery poller stopped");
        });

        Some(rx)
    }
}
