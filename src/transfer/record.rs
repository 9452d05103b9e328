use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::store::ChunkStore;

/// `ceil(total_size / chunk_size)`; callers guarantee `chunk_size > 0`.
pub fn total_chunks(total_size: u64, chunk_size: u64) -> u64 {
    total_size.div_ceil(chunk_size)
}

/// Immutable description of one transfer, fixed at init
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub transfer_id: String,
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransferMetadata {
    /// Caller's batch id, or a single-file batch derived from the transfer id.
    pub fn batch_key(&self) -> String {
        self.batch_id
            .clone()
            .unwrap_or_else(|| format!("single_{}", self.transfer_id))
    }
}

/// What was stored for one chunk index
#[derive(Debug, Clone, Copy)]
pub struct ChunkReceipt {
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    InProgress,
    Completed,
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferPhase::InProgress => f.write_str("in_progress"),
            TransferPhase::Completed => f.write_str("completed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferStatus {
    pub transfer_id: String,
    pub status: TransferPhase,
    pub progress_percent: u64,
    pub received_count: u64,
    pub total_chunks: u64,
    /// Payload bytes currently stored, counting each index once
    pub received_bytes: u64,
}

/// In-memory state of one in-flight transfer.
///
/// `received` is sharded so chunk writers for different indices do not
/// contend. `gate` orders writers against the operations that end the
/// transfer: chunk writes hold it shared, complete/cancel/evict hold it
/// exclusively and flip it to `true` once the transfer is retired.
pub struct TransferRecord {
    metadata: TransferMetadata,
    store: ChunkStore,
    received: DashMap<u64, ChunkReceipt>,
    started: Instant,
    last_touch_ms: AtomicU64,
    pub(crate) gate: RwLock<bool>,
}

impl TransferRecord {
    pub fn new(metadata: TransferMetadata, store: ChunkStore) -> Self {
        Self {
            metadata,
            store,
            received: DashMap::new(),
            started: Instant::now(),
            last_touch_ms: AtomicU64::new(0),
            gate: RwLock::new(false),
        }
    }

    pub fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Record `index` as received. Returns the distinct received count.
    pub fn mark_received(&self, index: u64, receipt: ChunkReceipt) -> u64 {
        self.received.insert(index, receipt);
        self.touch();
        self.received_count()
    }

    pub fn received_count(&self) -> u64 {
        self.received.len() as u64
    }

    pub fn received_bytes(&self) -> u64 {
        self.received.iter().map(|r| r.value().size).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.received_count() == self.metadata.total_chunks
    }

    /// Up to `limit` absent indices, ascending.
    pub fn missing(&self, limit: usize) -> Vec<u64> {
        (0..self.metadata.total_chunks)
            .filter(|i| !self.received.contains_key(i))
            .take(limit)
            .collect()
    }

    /// `floor(received * 100 / total)`, 0 when there are no chunks.
    pub fn progress_percent(&self) -> u64 {
        progress_percent(self.received_count(), self.metadata.total_chunks)
    }

    pub fn status(&self) -> TransferStatus {
        TransferStatus {
            transfer_id: self.metadata.transfer_id.clone(),
            status: if self.is_complete() {
                TransferPhase::Completed
            } else {
                TransferPhase::InProgress
            },
            progress_percent: self.progress_percent(),
            received_count: self.received_count(),
            total_chunks: self.metadata.total_chunks,
            received_bytes: self.received_bytes(),
        }
    }

    fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_touch_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Time since init or the last accepted chunk.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_touch_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }
}

fn progress_percent(received: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    (received as u128 * 100 / total as u128) as u64
}
