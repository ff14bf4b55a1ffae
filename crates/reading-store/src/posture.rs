//! Posture codes carried in reading payloads.

use serde::{Deserialize, Serialize};

/// Posture decoded from a payload code such as `0xAB3311`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    UnusedFootwear,
    Standing,
    Sitting,
    Walking,
    Falling,
    Unknown,
}

impl Posture {
    /// Classify a payload code. Comparison is case-insensitive; anything
    /// unrecognised is `Unknown`.
    pub fn from_payload(payload: &str) -> Self {
        match payload.trim().to_ascii_lowercase().as_str() {
            "0x793248" => Posture::UnusedFootwear,
            "0xab3311" => Posture::Standing,
            "0xac4312" => Posture::Sitting,
            "0xba3311" => Posture::Walking,
            "0xef0112" => Posture::Falling,
            _ => Posture::Unknown,
        }
    }

    pub fn is_fall(&self) -> bool {
        matches!(self, Posture::Falling)
    }

    /// Human-readable label used in notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Posture::UnusedFootwear => "footwear not in use",
            Posture::Standing => "standing",
            Posture::Sitting => "sitting",
            Posture::Walking => "walking",
            Posture::Falling => "fall",
            Posture::Unknown => "unknown",
        }
    }
}
