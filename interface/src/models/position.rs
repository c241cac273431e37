use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::GeolocatorResult;

/// A single location fix reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,
    /// Time of the fix as Unix epoch milliseconds.
    #[serde(deserialize_with = "epoch_millis")]
    pub timestamp: u64,
    /// Estimated horizontal accuracy in meters.
    #[serde(default)]
    pub accuracy: f64,
    /// Altitude in meters above the WGS84 ellipsoid, or sea level when the
    /// platform reports MSL altitude.
    #[serde(default)]
    pub altitude: f64,
    /// Estimated vertical accuracy in meters.
    #[serde(default)]
    pub altitude_accuracy: f64,
    /// Direction of travel in degrees clockwise from true north.
    #[serde(default)]
    pub heading: f64,
    /// Estimated heading accuracy in degrees.
    #[serde(default)]
    pub heading_accuracy: f64,
    /// Building floor, on platforms that report one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<i32>,
    /// Speed in meters per second.
    #[serde(default)]
    pub speed: f64,
    /// Estimated speed accuracy in meters per second.
    #[serde(default)]
    pub speed_accuracy: f64,
    /// Whether the fix came from a mock location provider.
    #[serde(default)]
    pub is_mocked: bool,
}

impl Position {
    /// Creates a position with the required fields and every measurement zeroed.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64, timestamp: u64) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            accuracy: 0.0,
            altitude: 0.0,
            altitude_accuracy: 0.0,
            heading: 0.0,
            heading_accuracy: 0.0,
            floor: None,
            speed: 0.0,
            speed_accuracy: 0.0,
            is_mocked: false,
        }
    }

    /// Decodes a position from its wire map.
    ///
    /// # Errors
    /// Returns [`GeolocatorError::InvalidPayload`](crate::GeolocatorError::InvalidPayload)
    /// when `latitude`, `longitude` or `timestamp` is missing or mistyped.
    pub fn from_value(value: Value) -> GeolocatorResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Encodes the position into its wire map.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Platforms send timestamps as either integers or doubles.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn epoch_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = f64::deserialize(deserializer)?;
    if millis.is_finite() && millis >= 0.0 {
        Ok(millis as u64)
    } else {
        Err(serde::de::Error::custom(format!(
            "timestamp {millis} is not a valid epoch time"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GeolocatorError;
    use serde_json::json;

    #[test]
    fn decodes_full_map() {
        let position = Position::from_value(json!({
            "latitude": 52.561_270,
            "longitude": 5.639_382,
            "timestamp": 1_500_000_000_000_i64,
            "accuracy": 3.0,
            "altitude": 12.5,
            "altitude_accuracy": 1.5,
            "heading": 90.0,
            "heading_accuracy": 2.0,
            "floor": 2,
            "speed": 1.25,
            "speed_accuracy": 0.5,
            "is_mocked": true,
        }))
        .unwrap();

        assert_eq!(position.timestamp, 1_500_000_000_000);
        assert_eq!(position.floor, Some(2));
        assert!(position.is_mocked);
        assert!((position.speed - 1.25).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_measurements_default_to_zero() {
        let position = Position::from_value(json!({
            "latitude": 1.0,
            "longitude": 2.0,
            "timestamp": 1_234.0,
        }))
        .unwrap();

        assert_eq!(position, Position::new(1.0, 2.0, 1_234));
    }

    #[test]
    fn required_fields_are_enforced() {
        for missing in ["latitude", "longitude", "timestamp"] {
            let mut map = json!({ "latitude": 1.0, "longitude": 2.0, "timestamp": 3 });
            map.as_object_mut().unwrap().remove(missing);
            let err = Position::from_value(map).unwrap_err();
            assert!(
                matches!(&err, GeolocatorError::InvalidPayload(text) if text.contains(missing)),
                "{missing}: {err:?}"
            );
        }
    }

    #[test]
    fn null_timestamp_is_rejected() {
        let err = Position::from_value(json!({
            "latitude": 1.0,
            "longitude": 2.0,
            "timestamp": null,
        }))
        .unwrap_err();
        assert!(matches!(err, GeolocatorError::InvalidPayload(_)));
    }

    #[test]
    fn wire_map_uses_snake_case_keys() {
        let mut position = Position::new(1.0, 2.0, 3);
        position.speed_accuracy = 0.75;
        let value = position.to_value();
        assert_eq!(value["speed_accuracy"], json!(0.75));
        assert_eq!(value["is_mocked"], json!(false));
        assert!(value.get("floor").is_none());
        assert_eq!(Position::from_value(value).unwrap(), position);
    }
}
