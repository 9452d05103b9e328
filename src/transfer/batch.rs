//! Upload log and the batch view derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One finished transfer, appended to the log by `complete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedUpload {
    pub batch_id: String,
    pub name: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    /// Advisory digest of the reassembled file
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    /// Latest member timestamp
    pub uploaded_at: DateTime<Utc>,
    /// Oldest upload first
    pub files: Vec<CompletedUpload>,
}

/// Process-wide, append-only record of completed uploads
#[derive(Clone, Default)]
pub struct UploadLog {
    entries: Arc<RwLock<Vec<CompletedUpload>>>,
}

impl UploadLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, upload: CompletedUpload) {
        self.entries.write().await.push(upload);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Copy of the log; readers never hold the lock while projecting.
    pub async fn snapshot(&self) -> Vec<CompletedUpload> {
        self.entries.read().await.clone()
    }

    /// Batches, most recently active first.
    pub async fn batches(&self) -> Vec<Batch> {
        group_batches(self.snapshot().await)
    }

    /// Members of one batch in upload order; empty if the batch is unknown.
    pub async fn files_for_batch(&self, batch_id: &str) -> Vec<CompletedUpload> {
        let mut members: Vec<CompletedUpload> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|u| u.batch_id == batch_id)
            .collect();
        members.sort_by_key(|u| u.uploaded_at);
        members
    }
}

/// Group uploads by batch id.
///
/// Members are ordered by `uploaded_at` ascending, log position breaking
/// ties. Batches are ordered by their latest member, newest first.
pub fn group_batches(log: Vec<CompletedUpload>) -> Vec<Batch> {
    let mut grouped: HashMap<String, Vec<(usize, CompletedUpload)>> = HashMap::new();
    for (position, upload) in log.into_iter().enumerate() {
        grouped
            .entry(upload.batch_id.clone())
            .or_default()
            .push((position, upload));
    }

    let mut keyed: Vec<((DateTime<Utc>, usize), Batch)> = grouped
        .into_iter()
        .filter_map(|(batch_id, mut members)| {
            members.sort_by(|(pa, a), (pb, b)| {
                a.uploaded_at.cmp(&b.uploaded_at).then(pa.cmp(pb))
            });
            let (position, last) = members.last()?;
            let uploaded_at = last.uploaded_at;
            let key = (uploaded_at, *position);
            let batch = Batch {
                batch_id,
                uploaded_at,
                files: members.into_iter().map(|(_, upload)| upload).collect(),
            };
            Some((key, batch))
        })
        .collect();

    keyed.sort_by(|(a, _), (b, _)| b.cmp(a));
    keyed.into_iter().map(|(_, batch)| batch).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn upload(batch: &str, name: &str, secs: i64) -> CompletedUpload {
        CompletedUpload {
            batch_id: batch.to_string(),
            name: name.to_string(),
            size: 1,
            uploaded_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            sha256: String::new(),
        }
    }

    fn names(batch: &Batch) -> Vec<&str> {
        batch.files.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn empty_log_has_no_batches() {
        assert!(group_batches(Vec::new()).is_empty());
    }

    #[test]
    fn groups_members_and_orders_newest_batch_first() {
        let log = vec![
            upload("b1", "one.txt", 10),
            upload("b2", "solo.txt", 15),
            upload("b1", "two.txt", 20),
            upload("b3", "late.txt", 5),
        ];

        let batches = group_batches(log);
        let ids: Vec<&str> = batches.iter().map(|b| b.batch_id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "b2", "b3"]);

        assert_eq!(names(&batches[0]), vec!["one.txt", "two.txt"]);
        assert_eq!(batches[0].uploaded_at, batches[0].files[1].uploaded_at);
    }

    #[test]
    fn members_sorted_by_time_even_if_logged_out_of_order() {
        let log = vec![upload("b1", "second.txt", 20), upload("b1", "first.txt", 10)];

        let batches = group_batches(log);
        assert_eq!(batches.len(), 1);
        assert_eq!(names(&batches[0]), vec!["first.txt", "second.txt"]);
        assert_eq!(
            batches[0].uploaded_at,
            Utc.timestamp_opt(1_700_000_020, 0).unwrap()
        );
    }

    #[test]
    fn equal_timestamps_fall_back_to_log_order() {
        let log = vec![
            upload("a", "a1", 10),
            upload("b", "b1", 10),
            upload("a", "a2", 10),
        ];

        let batches = group_batches(log);
        assert_eq!(batches[0].batch_id, "a");
        assert_eq!(names(&batches[0]), vec!["a1", "a2"]);
        assert_eq!(batches[1].batch_id, "b");
    }

    #[tokio::test]
    async fn log_lookup_by_batch() {
        let log = UploadLog::new();
        assert!(log.is_empty().await);

        log.record(upload("b1", "x.txt", 2)).await;
        log.record(upload("b2", "y.txt", 3)).await;
        log.record(upload("b1", "w.txt", 1)).await;

        assert_eq!(log.len().await, 3);
        let members = log.files_for_batch("b1").await;
        let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["w.txt", "x.txt"]);
        assert!(log.files_for_batch("missing").await.is_empty());
        assert_eq!(log.batches().await.len(), 2);
    }
}
