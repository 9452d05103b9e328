//! Chunked upload protocol: init -> chunk* -> complete.
//!
//! [`TransferManager`] owns the active transfers; each one keeps its chunk
//! payloads in a [`ChunkStore`] until reassembly. Completed uploads feed the
//! [`UploadLog`], from which batches are derived on demand.

pub mod batch;
pub mod hasher;
mod manager;
mod record;
mod store;

pub use batch::{group_batches, Batch, CompletedUpload, UploadLog};
pub use manager::{
    ChunkReceived, CompletedTransfer, InitOutcome, SharedFile, TransferManager,
    MAX_REPORTED_MISSING,
};
pub use record::{
    total_chunks, ChunkReceipt, TransferMetadata, TransferPhase, TransferRecord, TransferStatus,
};
pub use store::{AssembledFile, ChunkStore};
