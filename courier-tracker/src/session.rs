use courier_core::{PositionSample, SessionId, geo};
use serde::Serialize;

/// Counters for one stretch of active tracking.
///
/// Created when a session starts and dropped when it ends, so the counters
/// reset with every new session.
#[derive(Debug, Clone)]
pub struct TrackingSession {
    id: SessionId,
    started_at: jiff::Timestamp,
    updates_sent: u64,
    total_distance_km: f64,
    last_known: Option<PositionSample>,
}

/// Read-only view of a session for the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingStats {
    pub session_id: SessionId,
    pub started_at: jiff::Timestamp,
    pub elapsed_secs: i64,
    pub updates_sent: u64,
    pub total_distance_km: f64,
}

impl TrackingSession {
    pub fn new(id: SessionId, started_at: jiff::Timestamp) -> Self {
        Self {
            id,
            started_at,
            updates_sent: 0,
            total_distance_km: 0.0,
            last_known: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn updates_sent(&self) -> u64 {
        self.updates_sent
    }

    pub fn total_distance_km(&self) -> f64 {
        self.total_distance_km
    }

    pub fn last_known(&self) -> Option<&PositionSample> {
        self.last_known.as_ref()
    }

    /// Account for a sample about to be sent. Returns the distance credited.
    ///
    /// The anchor always moves to the newest sample; deltas at or below the
    /// noise floor are not credited.
    pub fn record(&mut self, sample: &PositionSample) -> f64 {
        let delta = self
            .last_known
            .as_ref()
            .map(|prev| prev.distance_km(sample))
            .unwrap_or(0.0);

        let credited = if geo::exceeds_noise_floor(delta) {
            self.total_distance_km += delta;
            delta
        } else {
            0.0
        };

        self.last_known = Some(sample.clone());
        self.updates_sent += 1;
        credited
    }

    pub fn stats(&self, now: jiff::Timestamp) -> TrackingStats {
        TrackingStats {
            session_id: self.id,
            started_at: self.started_at,
            elapsed_secs: now.duration_since(self.started_at).as_secs().max(0),
            updates_sent: self.updates_sent,
            total_distance_km: self.total_distance_km,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(lat: f64, lng: f64) -> PositionSample {
        PositionSample::new(lat, lng, jiff::Timestamp::now())
    }

    fn session() -> TrackingSession {
        TrackingSession::new(SessionId::new(), jiff::Timestamp::now())
    }

    #[test]
    fn first_sample_only_counts() {
        let mut s = session();
        assert_eq!(s.record(&at(-1.2921, 36.8219)), 0.0);
        assert_eq!(s.updates_sent(), 1);
        assert_eq!(s.total_distance_km(), 0.0);
        assert!(s.last_known().is_some());
    }

    #[test]
    fn jitter_below_noise_floor_is_ignored() {
        let mut s = session();
        s.record(&at(0.0, 0.0));
        // ~1 m east
        s.record(&at(0.0, 0.0000089));

        assert_eq!(s.total_distance_km(), 0.0);
        assert_eq!(s.updates_sent(), 2);
    }

    #[test]
    fn two_kilometers_are_credited() {
        let mut s = session();
        s.record(&at(0.0, 0.0));
        let expected = geo::haversine_km(0.0, 0.0, 0.018, 0.0);
        s.record(&at(0.018, 0.0));

        assert!((s.total_distance_km() - 2.0).abs() / 2.0 < 0.001);
        assert_eq!(s.total_distance_km(), expected);
    }

    #[test]
    fn stats_report_elapsed_time() {
        let started = jiff::Timestamp::from_second(1_000).unwrap();
        let mut s = TrackingSession::new(SessionId::new(), started);
        s.record(&at(1.0, 1.0));

        let stats = s.stats(jiff::Timestamp::from_second(1_090).unwrap());
        assert_eq!(stats.elapsed_secs, 90);
        assert_eq!(stats.updates_sent, 1);
    }
}
