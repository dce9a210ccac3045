//! Compute Engine resource shapes (only the fields the starter uses).

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// A persistent disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
    pub self_link: String,
    #[serde(default)]
    pub size_gb: Option<String>,
    /// `CREATING`, `READY`, `DELETING`, ...
    #[serde(default)]
    pub status: Option<String>,
}

impl Disk {
    pub fn is_deleting(&self) -> bool {
        self.status.as_deref() == Some("DELETING")
    }
}

/// A point-in-time snapshot of a disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub creation_timestamp: DateTime<FixedOffset>,
    /// Reference usable as `sourceSnapshot` when inserting a disk.
    pub self_link: String,
    #[serde(default)]
    pub source_disk: Option<String>,
}

/// One page of a snapshot listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPage {
    #[serde(default)]
    pub items: Vec<Snapshot>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Request body for creating a disk from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskInsert {
    pub name: String,
    pub source_snapshot: String,
    /// Disk type URL, e.g. `projects/p/zones/z/diskTypes/pd-ssd`.
    #[serde(rename = "type")]
    pub disk_type: String,
}

/// Status of a zone operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
}

/// A long-running zone operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    pub status: OperationStatus,
    #[serde(default)]
    pub target_link: Option<String>,
    #[serde(default)]
    pub error: Option<OperationError>,
}

/// Error payload embedded in a finished operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationErrorItem {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_page_from_api_json() {
        let body = r#"{
            "kind": "compute#snapshotList",
            "items": [{
                "id": "4242",
                "name": "postgres-daily-1",
                "creationTimestamp": "2024-03-01T04:00:12.345-08:00",
                "selfLink": "https://www.googleapis.com/compute/v1/projects/acme/global/snapshots/postgres-daily-1",
                "sourceDisk": "https://www.googleapis.com/compute/v1/projects/acme/zones/europe-west1-b/disks/pd-1"
            }],
            "nextPageToken": "abc"
        }"#;

        let page: SnapshotPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "postgres-daily-1");
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
    }

    #[test]
    fn empty_page_has_no_items() {
        let page: SnapshotPage = serde_json::from_str(r#"{"kind":"compute#snapshotList"}"#).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn disk_status_marks_deletion() {
        let disk: Disk = serde_json::from_str(
            r#"{"name": "db-starter--pv", "selfLink": "disks/db-starter--pv", "status": "DELETING"}"#,
        )
        .unwrap();
        assert!(disk.is_deleting());

        let disk: Disk =
            serde_json::from_str(r#"{"name": "pd-1", "selfLink": "disks/pd-1"}"#).unwrap();
        assert!(!disk.is_deleting());
    }

    #[test]
    fn disk_insert_uses_type_key() {
        let insert = DiskInsert {
            name: "db-starter--pv".to_string(),
            source_snapshot: "global/snapshots/s1".to_string(),
            disk_type: "projects/acme/zones/z/diskTypes/pd-ssd".to_string(),
        };
        let value = serde_json::to_value(&insert).unwrap();
        assert_eq!(value["type"], "projects/acme/zones/z/diskTypes/pd-ssd");
        assert_eq!(value["sourceSnapshot"], "global/snapshots/s1");
    }

    #[test]
    fn operation_with_error_payload() {
        let body = r#"{
            "name": "operation-1",
            "status": "DONE",
            "error": {"errors": [{"code": "QUOTA_EXCEEDED", "message": "SSD_TOTAL_GB"}]}
        }"#;
        let op: Operation = serde_json::from_str(body).unwrap();
        assert_eq!(op.status, OperationStatus::Done);
        assert_eq!(op.error.unwrap().to_string(), "QUOTA_EXCEEDED: SSD_TOTAL_GB");
    }
}
