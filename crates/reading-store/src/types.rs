//! Reading type.

use serde::{Deserialize, Serialize};

use crate::Posture;

/// Sensor id used when a reading arrives without one.
pub const DEFAULT_SENSOR_ID: &str = "unknown";

/// One decoded posture sample.
///
/// Readings are never mutated. Local uniqueness is
/// `(owner_id, sensor_id, timestamp, payload)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reading {
    /// Hardware address of the device that produced the sample.
    pub source_address: String,
    /// Physical wearable the sample belongs to.
    pub sensor_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Raw posture code.
    pub payload: String,
    /// Identity whose data this is.
    pub owner_id: String,
}

impl Reading {
    pub fn new(
        source_address: impl Into<String>,
        sensor_id: impl Into<String>,
        timestamp: i64,
        payload: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        let sensor_id = sensor_id.into();
        Self {
            source_address: source_address.into(),
            sensor_id: if sensor_id.is_empty() {
                DEFAULT_SENSOR_ID.to_string()
            } else {
                sensor_id
            },
            timestamp,
            payload: payload.into(),
            owner_id: owner_id.into(),
        }
    }

    pub fn posture(&self) -> Posture {
        Posture::from_payload(&self.payload)
    }

    pub fn is_fall(&self) -> bool {
        self.posture().is_fall()
    }
}

/// Display name given to a physical sensor on this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorName {
    pub sensor_id: String,
    pub display_name: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub updated_at: i64,
}
