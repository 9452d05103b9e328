use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::batch::{Batch, CompletedUpload, UploadLog};
use super::hasher;
use super::record::{self, ChunkReceipt, TransferMetadata, TransferRecord, TransferStatus};
use super::store::{self, ChunkStore};
use crate::common::{Config, TransferError, TransferResult, TransferSettings};
use crate::utils::security;

/// Cap on indices reported back in an `Incomplete` error
pub const MAX_REPORTED_MISSING: usize = 64;

const TRANSFER_ID_PREFIX: &str = "trans_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitOutcome {
    pub transfer_id: String,
    pub total_chunks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReceived {
    pub received_count: u64,
    pub total_chunks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTransfer {
    pub transfer_id: String,
    pub filename: String,
    pub size: u64,
    pub sha256: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Regular file in the shared directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedFile {
    pub name: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Owns every in-flight transfer and the log of completed ones.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct TransferManager {
    transfers: Arc<DashMap<String, Arc<TransferRecord>>>,
    uploads: UploadLog,
    storage_dir: PathBuf,
    temp_dir: PathBuf,
    settings: TransferSettings,
}

impl TransferManager {
    pub fn new(
        storage_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
        settings: TransferSettings,
    ) -> Self {
        Self {
            transfers: Arc::new(DashMap::new()),
            uploads: UploadLog::new(),
            storage_dir: storage_dir.into(),
            temp_dir: temp_dir.into(),
            settings,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.storage_dir.clone(),
            config.temp_dir.clone(),
            config.transfer.clone(),
        )
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn active_count(&self) -> usize {
        self.transfers.len()
    }

    pub fn uploads(&self) -> &UploadLog {
        &self.uploads
    }

    // Clone the Arc out so no map guard is held across an await
    fn lookup(&self, transfer_id: &str) -> TransferResult<Arc<TransferRecord>> {
        self.transfers
            .get(transfer_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))
    }

    //----------------
    // LIFECYCLE
    //----------------

    /// Register a new transfer and allocate its scratch directory.
    pub async fn init(
        &self,
        filename: &str,
        total_size: u64,
        chunk_size: u64,
        batch_id: Option<String>,
    ) -> TransferResult<InitOutcome> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidInput(
                "chunk_size must be greater than 0".to_string(),
            ));
        }

        let filename = security::sanitize_filename(filename)?;

        if let Some(limit) = self.settings.max_file_size {
            if total_size > limit {
                return Err(TransferError::FileTooLarge {
                    size: total_size,
                    limit,
                });
            }
        }

        let batch_id = batch_id
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty());

        let transfer_id = new_transfer_id();
        let total_chunks = record::total_chunks(total_size, chunk_size);

        let store = ChunkStore::create(&self.temp_dir, &transfer_id)
            .await
            .map_err(|e| TransferError::storage("create chunk directory", e))?;

        let metadata = TransferMetadata {
            transfer_id: transfer_id.clone(),
            filename,
            total_size,
            chunk_size,
            total_chunks,
            batch_id,
            created_at: Utc::now(),
        };

        info!(
            transfer_id = %transfer_id,
            filename = %metadata.filename,
            total_size,
            total_chunks,
            "Initialized transfer"
        );

        self.transfers.insert(
            transfer_id.clone(),
            Arc::new(TransferRecord::new(metadata, store)),
        );

        Ok(InitOutcome {
            transfer_id,
            total_chunks,
        })
    }

    /// Store one chunk. Re-sending an index replaces the stored bytes and is
    /// counted once.
    pub async fn accept_chunk(
        &self,
        transfer_id: &str,
        chunk_index: u64,
        payload: &[u8],
    ) -> TransferResult<ChunkReceived> {
        self.write_chunk(transfer_id, chunk_index, payload, None)
            .await
    }

    /// Like [`accept_chunk`](Self::accept_chunk), but rejects the payload
    /// unless its SHA-256 equals `expected_sha256`.
    pub async fn accept_chunk_verified(
        &self,
        transfer_id: &str,
        chunk_index: u64,
        payload: &[u8],
        expected_sha256: &str,
    ) -> TransferResult<ChunkReceived> {
        self.write_chunk(transfer_id, chunk_index, payload, Some(expected_sha256))
            .await
    }

    async fn write_chunk(
        &self,
        transfer_id: &str,
        chunk_index: u64,
        payload: &[u8],
        expected_sha256: Option<&str>,
    ) -> TransferResult<ChunkReceived> {
        let record = self.lookup(transfer_id)?;

        // Shared: other chunk writes proceed, complete/cancel wait for us
        let retired = record.gate.read().await;
        if *retired {
            return Err(TransferError::NotFound(transfer_id.to_string()));
        }

        let total_chunks = record.metadata().total_chunks;
        if chunk_index >= total_chunks {
            return Err(TransferError::InvalidInput(format!(
                "chunk_index {} out of range (total_chunks {})",
                chunk_index, total_chunks
            )));
        }

        let sha256 = hasher::digest_hex(payload);
        if let Some(expected) = expected_sha256 {
            if !sha256.eq_ignore_ascii_case(expected.trim()) {
                return Err(TransferError::ChecksumMismatch { index: chunk_index });
            }
        }

        record
            .store()
            .write(chunk_index, payload)
            .await
            .map_err(|e| TransferError::storage(format!("write chunk {}", chunk_index), e))?;

        debug!(
            transfer_id = %transfer_id,
            chunk_index,
            bytes = payload.len(),
            sha256 = hasher::short(&sha256),
            "Received chunk"
        );

        let received_count = record.mark_received(
            chunk_index,
            ChunkReceipt {
                size: payload.len() as u64,
            },
        );
        drop(retired);

        Ok(ChunkReceived {
            received_count,
            total_chunks,
        })
    }

    /// Reassemble the file into the shared directory and retire the transfer.
    ///
    /// On `Incomplete` or a storage failure the transfer stays active so the
    /// caller can upload the rest and retry.
    pub async fn complete(&self, transfer_id: &str) -> TransferResult<CompletedTransfer> {
        let record = self.lookup(transfer_id)?;

        // Exclusive: waits out in-flight chunk writes and blocks new ones
        let mut retired = record.gate.write().await;
        if *retired {
            return Err(TransferError::NotFound(transfer_id.to_string()));
        }

        let metadata = record.metadata();
        let received = record.received_count();
        if received != metadata.total_chunks {
            return Err(TransferError::Incomplete {
                transfer_id: transfer_id.to_string(),
                received,
                expected: metadata.total_chunks,
                missing: record.missing(MAX_REPORTED_MISSING),
            });
        }

        let destination = self.storage_dir.join(&metadata.filename);
        let assembled = record
            .store()
            .assemble_into(metadata.total_chunks, &destination)
            .await
            .map_err(|e| TransferError::storage("reassemble file", e))?;

        if assembled.bytes_written != metadata.total_size {
            warn!(
                transfer_id = %transfer_id,
                declared = metadata.total_size,
                written = assembled.bytes_written,
                "Reassembled size differs from declared size"
            );
        }

        *retired = true;
        self.transfers.remove(transfer_id);
        drop(retired);

        if let Err(e) = record.store().remove().await {
            warn!(transfer_id = %transfer_id, error = %e, "Failed to remove chunk directory");
        }

        let uploaded_at = Utc::now();
        self.uploads
            .record(CompletedUpload {
                batch_id: metadata.batch_key(),
                name: metadata.filename.clone(),
                size: metadata.total_size,
                uploaded_at,
                sha256: assembled.sha256.clone(),
            })
            .await;

        info!(
            transfer_id = %transfer_id,
            filename = %metadata.filename,
            sha256 = hasher::short(&assembled.sha256),
            "Transfer completed"
        );

        Ok(CompletedTransfer {
            transfer_id: transfer_id.to_string(),
            filename: metadata.filename.clone(),
            size: metadata.total_size,
            sha256: assembled.sha256,
            uploaded_at,
        })
    }

    /// Progress of an active transfer. Completed transfers are gone from the
    /// registry, so polling after `complete` yields `NotFound`.
    pub fn status(&self, transfer_id: &str) -> TransferResult<TransferStatus> {
        Ok(self.lookup(transfer_id)?.status())
    }

    /// Drop an active transfer and its chunks without producing a file.
    pub async fn cancel(&self, transfer_id: &str) -> TransferResult<()> {
        let record = self.lookup(transfer_id)?;

        let mut retired = record.gate.write().await;
        if *retired {
            return Err(TransferError::NotFound(transfer_id.to_string()));
        }
        *retired = true;
        self.transfers.remove(transfer_id);
        drop(retired);

        if let Err(e) = record.store().remove().await {
            warn!(transfer_id = %transfer_id, error = %e, "Failed to remove chunk directory");
        }

        info!(transfer_id = %transfer_id, "Cancelled transfer");
        Ok(())
    }

    //----------------
    // IDLE SWEEP
    //----------------

    /// Evict transfers with no activity for at least `max_idle`.
    ///
    /// Transfers currently held by an operation are skipped; they are not
    /// idle. Returns the number evicted.
    pub async fn sweep_idle(&self, max_idle: Duration) -> usize {
        let stale: Vec<(String, Arc<TransferRecord>)> = self
            .transfers
            .iter()
            .filter(|entry| entry.value().idle_for() >= max_idle)
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut evicted = 0;
        for (transfer_id, record) in stale {
            let Ok(mut retired) = record.gate.try_write() else {
                continue;
            };
            if *retired || record.idle_for() < max_idle {
                continue;
            }
            *retired = true;
            self.transfers.remove(&transfer_id);
            drop(retired);

            if let Err(e) = record.store().remove().await {
                warn!(transfer_id = %transfer_id, error = %e, "Failed to remove chunk directory");
            }
            info!(
                transfer_id = %transfer_id,
                received = record.received_count(),
                total_chunks = record.metadata().total_chunks,
                "Evicted idle transfer"
            );
            evicted += 1;
        }
        evicted
    }

    /// Run [`sweep_idle`](Self::sweep_idle) every `interval` until `shutdown`.
    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        max_idle: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = manager.sweep_idle(max_idle).await;
                        if evicted > 0 {
                            info!(evicted, active = manager.active_count(), "Idle sweep finished");
                        }
                    }
                }
            }
            debug!("Idle sweeper stopped");
        })
    }

    /// Remove scratch directories a previous process left behind.
    ///
    /// Only `trans_*` directories not owned by a live transfer are touched,
    /// so a shared temp root is safe.
    pub async fn purge_stale_scratch(&self) -> io::Result<usize> {
        let mut entries = match fs::read_dir(&self.temp_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut purged = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(TRANSFER_ID_PREFIX) || self.transfers.contains_key(&name) {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(entry.path()).await?;
                purged += 1;
            }
        }

        if purged > 0 {
            info!(purged, temp_dir = %self.temp_dir.display(), "Purged stale chunk directories");
        }
        Ok(purged)
    }

    //----------------
    // LISTINGS
    //----------------

    pub async fn list_batches(&self) -> Vec<Batch> {
        self.uploads.batches().await
    }

    pub async fn files_for_batch(&self, batch_id: &str) -> Vec<CompletedUpload> {
        self.uploads.files_for_batch(batch_id).await
    }

    /// Regular files directly in the shared directory, newest first.
    pub async fn list_files(&self) -> TransferResult<Vec<SharedFile>> {
        let mut entries = match fs::read_dir(&self.storage_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TransferError::storage("read shared directory", e)),
        };

        let mut files = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(TransferError::storage("read shared directory", e)),
            };
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if store::is_staging_name(&name) {
                continue;
            }
            files.push(SharedFile {
                name,
                size: meta.len(),
                modified_at: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        files.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then(a.name.cmp(&b.name)));
        Ok(files)
    }
}

/// Millisecond timestamp plus a random suffix, unique for the process.
fn new_transfer_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}{}_{}",
        TRANSFER_ID_PREFIX,
        Utc::now().timestamp_millis(),
        &suffix[..12]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn transfer_ids_are_prefixed_and_distinct() {
        let ids: HashSet<String> = (0..1000).map(|_| new_transfer_id()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.starts_with("trans_")));
    }
}
