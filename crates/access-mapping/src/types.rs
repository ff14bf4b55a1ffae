use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Grant allowing `viewer_id` to mirror readings of `remote_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub viewer_id: String,
    pub remote_id: String,
    /// Identity that created the grant.
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(
        viewer_id: impl Into<String>,
        remote_id: impl Into<String>,
        assigned_by: impl Into<String>,
    ) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            remote_id: remote_id.into(),
            assigned_by: assigned_by.into(),
            assigned_at: Utc::now(),
        }
    }

    /// Document key of an assignment: `{viewer}_{remote}`.
    pub fn key_for(viewer_id: &str, remote_id: &str) -> String {
        format!("{}_{}", viewer_id, remote_id)
    }

    pub fn key(&self) -> String {
        Self::key_for(&self.viewer_id, &self.remote_id)
    }
}

/// Directory entry for an identity holding the viewer role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerProfile {
    pub identity: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Result of [`crate::AccessMappingService::assign`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    Created,
    /// The pair was already assigned; nothing changed.
    AlreadyAssigned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_joins_viewer_and_remote() {
        let assignment = Assignment::new("viewer-1", "sensor001", "admin");
        assert_eq!(assignment.key(), "viewer-1_sensor001");
        assert_eq!(Assignment::key_for("v", "r"), "v_r");
    }

    #[test]
    fn assignment_serializes_camel_case() {
        let assignment = Assignment::new("viewer-1", "sensor001", "admin");
        let json = serde_json::to_value(&assignment).unwrap();
        assert_eq!(json["viewerId"], "viewer-1");
        assert_eq!(json["remoteId"], "sensor001");
        assert_eq!(json["assignedBy"], "admin");
    }
}
