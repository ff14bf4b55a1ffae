use serde::{Deserialize, Serialize};

/// Remote sensor document, keyed by `sensor_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorRecord {
    pub sensor_id: String,
    #[serde(default)]
    pub device_address: Option<String>,
    /// Collector identity that registered the sensor.
    #[serde(default, rename = "ownerUid")]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl SensorRecord {
    pub fn new(
        sensor_id: impl Into<String>,
        device_address: Option<String>,
        owner_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            device_address,
            owner_id: Some(owner_id.into()),
            display_name: Some(display_name.into()),
        }
    }

    /// Name to show locally; an unnamed sensor shows its id.
    pub fn display_name_or_id(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.sensor_id,
        }
    }
}
