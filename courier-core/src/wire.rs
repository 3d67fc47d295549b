//! Request and response records exchanged with the courier backend.
//!
//! Responses are decoded leniently: optional fields default when absent, and
//! coordinates that the backend serializes as decimal strings are narrowed to
//! `f64` here rather than deeper in the tracker.

use serde::{Deserialize, Deserializer, Serialize};

use crate::{ParcelId, PositionSample};

type BoxStr = Box<str>;

/// `GET /driver/status/`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineStatusResponse {
    pub is_online: bool,
}

/// `POST /driver/gps/status/`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineStatusRequest {
    pub is_online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_interval: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusAck {
    pub is_online: Option<bool>,
    pub message: Option<BoxStr>,
}

/// `POST /driver/gps/tracking/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    pub altitude: Option<f64>,
    pub timestamp: jiff::Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parcel_id: Option<ParcelId>,
}

impl TrackingRequest {
    pub fn new(sample: &PositionSample, parcel_id: Option<ParcelId>) -> Self {
        Self {
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy: sample.accuracy_m,
            speed: sample.speed_mps,
            bearing: sample.bearing_deg,
            altitude: sample.altitude_m,
            timestamp: sample.captured_at,
            battery_level: sample.battery.map(|b| b.0),
            parcel_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingAck {
    pub id: Option<u64>,
    pub message: Option<BoxStr>,
}

/// One entry of `GET /parcels/assigned/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelSummary {
    pub id: ParcelId,
    pub tracking_number: BoxStr,
    pub status: BoxStr,
    #[serde(default, deserialize_with = "lenient_coordinate")]
    pub pickup_location_lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_coordinate")]
    pub pickup_location_lng: Option<f64>,
    #[serde(default)]
    pub recipient_name: Option<BoxStr>,
}

/// `POST /parcels/{id}/update-status/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelStatusUpdate {
    pub status: BoxStr,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParcelStatusAck {
    pub status: Option<BoxStr>,
    pub message: Option<BoxStr>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

fn lenient_coordinate<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match Option::<NumberOrText>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(NumberOrText::Number(v)) => v,
        Some(NumberOrText::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            text.parse::<f64>().map_err(serde::de::Error::custom)?
        }
    };

    Ok(value.is_finite().then_some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Percentage;

    #[test]
    fn tracking_request_omits_absent_tags() {
        let sample = PositionSample::new(-1.2921, 36.8219, jiff::Timestamp::UNIX_EPOCH)
            .with_accuracy(15.0);
        let json = serde_json::to_value(TrackingRequest::new(&sample, None)).unwrap();

        assert_eq!(json["latitude"], -1.2921);
        assert_eq!(json["accuracy"], 15.0);
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00Z");
        assert!(json["speed"].is_null());
        assert!(json.get("battery_level").is_none());
        assert!(json.get("parcel_id").is_none());
    }

    #[test]
    fn tracking_request_carries_parcel_and_battery() {
        let sample = PositionSample::new(0.5, 0.5, jiff::Timestamp::UNIX_EPOCH)
            .with_battery(Some(Percentage(64)));
        let json = serde_json::to_value(TrackingRequest::new(&sample, Some(ParcelId(42)))).unwrap();

        assert_eq!(json["battery_level"], 64);
        assert_eq!(json["parcel_id"], 42);
    }

    #[test]
    fn status_request_skips_missing_interval() {
        let off = OnlineStatusRequest {
            is_online: false,
            tracking_interval: None,
        };
        assert_eq!(
            serde_json::to_string(&off).unwrap(),
            r#"{"is_online":false}"#
        );

        let on = OnlineStatusRequest {
            is_online: true,
            tracking_interval: Some(30),
        };
        assert_eq!(
            serde_json::to_string(&on).unwrap(),
            r#"{"is_online":true,"tracking_interval":30}"#
        );
    }

    #[test]
    fn parcel_coordinates_accept_numbers_strings_and_null() {
        let parcels: Vec<ParcelSummary> = serde_json::from_str(
            r#"[
                {"id": 1, "tracking_number": "CR-1", "status": "assigned",
                 "pickup_location_lat": "-1.292100", "pickup_location_lng": 36.8219,
                 "recipient_name": "Wanjiru"},
                {"id": 2, "tracking_number": "CR-2", "status": "in_transit",
                 "pickup_location_lat": null, "pickup_location_lng": ""}
            ]"#,
        )
        .unwrap();

        assert_eq!(parcels[0].pickup_location_lat, Some(-1.2921));
        assert_eq!(parcels[0].pickup_location_lng, Some(36.8219));
        assert_eq!(parcels[0].recipient_name.as_deref(), Some("Wanjiru"));
        assert_eq!(parcels[1].pickup_location_lat, None);
        assert_eq!(parcels[1].pickup_location_lng, None);
        assert_eq!(parcels[1].recipient_name, None);
    }

    #[test]
    fn parcel_coordinate_rejects_garbage() {
        let result = serde_json::from_str::<ParcelSummary>(
            r#"{"id": 3, "tracking_number": "CR-3", "status": "x", "pickup_location_lat": "north"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn acks_tolerate_empty_bodies() {
        assert_eq!(
            serde_json::from_str::<TrackingAck>("{}").unwrap(),
            TrackingAck::default()
        );
        let ack: StatusAck =
            serde_json::from_str(r#"{"is_online": true, "extra": [1, 2]}"#).unwrap();
        assert_eq!(ack.is_online, Some(true));
    }
}
