//! Snapshot listing across pages.

use tracing::debug;

use crate::client::CloudDiskApi;
use crate::error::CloudResult;
use crate::types::Snapshot;

/// Listing filter selecting snapshots taken of `disk_link`.
pub fn source_disk_filter(disk_link: &str) -> String {
    format!("(sourceDisk = \"{disk_link}\")")
}

/// All snapshots of `disk_link`, newest first.
///
/// Follows `nextPageToken` until the provider stops returning one. The
/// sort is stable, so snapshots with equal timestamps keep the order the
/// provider returned them in.
pub async fn list_snapshots(api: &dyn CloudDiskApi, disk_link: &str) -> CloudResult<Vec<Snapshot>> {
    let filter = source_disk_filter(disk_link);
    let mut combined = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0u32;

    loop {
        let page = api
            .list_snapshots_page(&filter, page_token.as_deref())
            .await?;
        pages += 1;
        combined.extend(page.items);

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    debug!(pages, snapshots = combined.len(), "snapshot listing complete");

    combined.sort_by(|a, b| b.creation_timestamp.cmp(&a.creation_timestamp));
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::CloudError;
    use crate::types::{Disk, DiskInsert, Operation, SnapshotPage};

    /// Serves pre-baked pages keyed by page token ("" = first page).
    struct PagedSnapshots {
        pages: HashMap<String, SnapshotPage>,
        seen_filters: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CloudDiskApi for PagedSnapshots {
        async fn get_disk(&self, name: &str) -> CloudResult<Disk> {
            Err(CloudError::NotFound {
                resource: name.to_string(),
            })
        }

        async fn list_snapshots_page(
            &self,
            filter: &str,
            page_token: Option<&str>,
        ) -> CloudResult<SnapshotPage> {
            self.seen_filters.lock().unwrap().push(filter.to_string());
            Ok(self
                .pages
                .get(page_token.unwrap_or(""))
                .cloned()
                .unwrap_or_default())
        }

        async fn insert_disk(&self, disk: &DiskInsert) -> CloudResult<Operation> {
            Err(CloudError::NotFound {
                resource: disk.name.clone(),
            })
        }

        async fn delete_disk(&self, name: &str) -> CloudResult<Operation> {
            Err(CloudError::NotFound {
                resource: name.to_string(),
            })
        }

        async fn get_operation(&self, name: &str) -> CloudResult<Operation> {
            Err(CloudError::NotFound {
                resource: name.to_string(),
            })
        }
    }

    fn snapshot(name: &str, ts: &str) -> Snapshot {
        Snapshot {
            id: None,
            name: name.to_string(),
            creation_timestamp: chrono::DateTime::parse_from_rfc3339(ts).unwrap(),
            self_link: format!("global/snapshots/{name}"),
            source_disk: None,
        }
    }

    fn page(items: Vec<Snapshot>, next: Option<&str>) -> SnapshotPage {
        SnapshotPage {
            items,
            next_page_token: next.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn accumulates_pages_and_picks_newest() {
        let api = PagedSnapshots {
            pages: HashMap::from([
                (
                    String::new(),
                    page(vec![snapshot("t1", "2024-01-01T00:00:00Z")], Some("p2")),
                ),
                (
                    "p2".to_string(),
                    page(vec![snapshot("t2", "2024-03-01T00:00:00Z")], Some("p3")),
                ),
                (
                    "p3".to_string(),
                    page(vec![snapshot("t3", "2024-02-01T00:00:00Z")], None),
                ),
            ]),
            seen_filters: Mutex::new(Vec::new()),
        };

        let snapshots = list_snapshots(&api, "zones/z/disks/pd-1").await.unwrap();
        let names: Vec<&str> = snapshots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["t2", "t3", "t1"]);

        let filters = api.seen_filters.lock().unwrap();
        assert_eq!(filters.len(), 3);
        assert_eq!(filters[0], "(sourceDisk = \"zones/z/disks/pd-1\")");
    }

    #[tokio::test]
    async fn no_snapshots_yields_empty_list() {
        let api = PagedSnapshots {
            pages: HashMap::new(),
            seen_filters: Mutex::new(Vec::new()),
        };
        assert!(list_snapshots(&api, "pd").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn equal_timestamps_keep_provider_order() {
        let api = PagedSnapshots {
            pages: HashMap::from([(
                String::new(),
                page(
                    vec![
                        snapshot("first", "2024-01-01T00:00:00Z"),
                        snapshot("second", "2024-01-01T00:00:00Z"),
                    ],
                    Some(""),
                ),
            )]),
            seen_filters: Mutex::new(Vec::new()),
        };

        let snapshots = list_snapshots(&api, "pd").await.unwrap();
        assert_eq!(snapshots[0].name, "first");
        assert_eq!(snapshots[1].name, "second");
    }
}
