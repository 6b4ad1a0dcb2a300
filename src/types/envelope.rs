//! Wire envelope sent per transmitted frame

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::{LocationFix, SensorFrame};
use crate::{Result, StreamError};

/// The complete message unit sent over the socket for one frame.
///
/// ```json
/// {"timestamp":"2024-01-01T12:00:00.000Z","lat":37.1234,"lon":-122.1234,"accuracy":5.2,"image":"..."}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEnvelope {
    /// UTC, millisecond precision
    #[serde(with = "millis_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub accuracy: f64,
    /// Base64 (standard alphabet, unwrapped) JPEG bytes
    pub image: String,
}

impl StreamEnvelope {
    /// Fuse a frame and a location fix into an envelope.
    ///
    /// The timestamp is the frame's acquisition time truncated to milliseconds so
    /// the value survives the wire format unchanged.
    pub fn compose(frame: &SensorFrame, fix: &LocationFix) -> Self {
        Self {
            timestamp: frame.captured_wall.trunc_subsecs(3),
            lat: fix.latitude,
            lon: fix.longitude,
            accuracy: fix.accuracy,
            image: BASE64.encode(&frame.image),
        }
    }

    /// Serialize to the wire text format
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from the wire text format
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode the image payload back into JPEG bytes
    pub fn decode_image(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.image)
            .map_err(|e| StreamError::decode_failed(format!("envelope image: {}", e)))
    }
}

mod millis_timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(D::Error::custom)
    }
}
