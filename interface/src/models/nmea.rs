use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GeolocatorResult;
use crate::models::position::epoch_millis;

/// A raw NMEA 0183 sentence as emitted by the GNSS chipset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NmeaMessage {
    /// The sentence, including the leading `$` and checksum.
    pub message: String,
    /// Time the sentence was received as Unix epoch milliseconds.
    #[serde(deserialize_with = "epoch_millis")]
    pub timestamp: u64,
}

impl NmeaMessage {
    /// Decodes a message from its `{message, timestamp}` wire map.
    ///
    /// # Errors
    /// Returns [`GeolocatorError::InvalidPayload`](crate::GeolocatorError::InvalidPayload)
    /// when either key is missing.
    pub fn from_value(value: Value) -> GeolocatorResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}
