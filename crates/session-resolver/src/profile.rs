//! Roles and the versioned profile decode.
//!
//! Profiles come in two shapes. Current documents carry a `roles` array and
//! authorization lives in the assignment collection. Older documents carry a
//! single `role` string and authorized ids inline (`supervisedSensorIds`,
//! or before that `supervisedUserIds`). The decode tries the current field
//! first, falls back to the legacy one, and never guesses beyond that.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role an identity can act in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Owns the sensor connection and uploads readings.
    Collector,
    /// Mirrors readings of the remote identities it is authorized for.
    Viewer,
}

impl Role {
    /// Parse a role name, including the legacy aliases.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "collector" | "aggregator" | "supervised" => Some(Role::Collector),
            "viewer" | "supervisor" => Some(Role::Viewer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Collector => "collector",
            Role::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of decoding a profile document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedProfile {
    /// Known roles in document order, without duplicates.
    pub roles: Vec<Role>,
    /// Authorized ids still stored on a legacy profile.
    pub legacy_remote_ids: Vec<String>,
}

/// Decode roles and legacy authorization from a profile document.
pub fn decode_profile(doc: &Value) -> DecodedProfile {
    let names: Vec<&str> = match doc.get("roles").and_then(Value::as_array) {
        Some(array) => array.iter().filter_map(Value::as_str).collect(),
        None => doc
            .get("role")
            .and_then(Value::as_str)
            .into_iter()
            .collect(),
    };

    let mut roles = Vec::new();
    for role in names.into_iter().filter_map(Role::parse) {
        if !roles.contains(&role) {
            roles.push(role);
        }
    }

    let legacy_remote_ids = ["supervisedSensorIds", "supervisedUserIds"]
        .iter()
        .find_map(|field| doc.get(*field).and_then(Value::as_array))
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .filter(|id| !id.trim().is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    DecodedProfile {
        roles,
        legacy_remote_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_accepts_legacy_aliases() {
        assert_eq!(Role::parse("collector"), Some(Role::Collector));
        assert_eq!(Role::parse("Aggregator"), Some(Role::Collector));
        assert_eq!(Role::parse("supervised"), Some(Role::Collector));
        assert_eq!(Role::parse("VIEWER"), Some(Role::Viewer));
        assert_eq!(Role::parse("supervisor"), Some(Role::Viewer));
        assert_eq!(Role::parse("admin"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn roles_array_wins_over_legacy_role() {
        let doc = json!({ "roles": ["viewer", "collector"], "role": "collector" });
        assert_eq!(
            decode_profile(&doc).roles,
            vec![Role::Viewer, Role::Collector]
        );
    }

    #[test]
    fn legacy_role_used_when_array_absent() {
        let doc = json!({ "role": "supervisor" });
        assert_eq!(decode_profile(&doc).roles, vec![Role::Viewer]);
    }

    #[test]
    fn empty_roles_array_does_not_fall_back() {
        let doc = json!({ "roles": [], "role": "collector" });
        assert!(decode_profile(&doc).roles.is_empty());
    }

    #[test]
    fn unknown_and_duplicate_roles_dropped() {
        let doc = json!({ "roles": ["admin", "collector", "aggregator", 7] });
        assert_eq!(decode_profile(&doc).roles, vec![Role::Collector]);
    }

    #[test]
    fn legacy_ids_prefer_sensor_field() {
        let doc = json!({
            "supervisedSensorIds": ["s1", "", "s2"],
            "supervisedUserIds": ["u1"]
        });
        assert_eq!(decode_profile(&doc).legacy_remote_ids, vec!["s1", "s2"]);

        let doc = json!({ "supervisedUserIds": ["u1"] });
        assert_eq!(decode_profile(&doc).legacy_remote_ids, vec!["u1"]);

        assert!(decode_profile(&json!({})).legacy_remote_ids.is_empty());
    }
}
