//! HTTP client side of the chunk protocol.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use reqwest::{multipart, Response};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

use super::reader::ChunkReader;
use crate::transfer::{hasher, ChunkReceived, CompletedTransfer, InitOutcome, TransferStatus};

/// Per-file upload settings
#[derive(Clone, Debug)]
pub struct SendOptions {
    pub chunk_size: u64,
    /// Chunks in flight per file
    pub concurrency: usize,
    pub batch_id: Option<String>,
    /// Attach each chunk's SHA-256 so the server rejects corrupted chunks
    pub verify_chunks: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024, // 1 MB
            concurrency: 4,
            batch_id: None,
            verify_chunks: false,
        }
    }
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(serde::Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

pub struct UploadClient {
    http: reqwest::Client,
    base_url: String,
}

impl UploadClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Upload one file: init, every chunk, complete.
    pub async fn send_file(
        &self,
        path: &Path,
        options: &SendOptions,
        progress: &ProgressBar,
    ) -> Result<CompletedTransfer> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("no usable file name in {}", path.display()))?;

        let reader = ChunkReader::open(path, options.chunk_size)?;
        let init = self
            .init(filename, reader.size(), options.chunk_size, options.batch_id.clone())
            .await?;

        tracing::debug!(
            transfer_id = %init.transfer_id,
            total_chunks = init.total_chunks,
            "Transfer initialized"
        );

        let transfer_id = init.transfer_id.as_str();
        let mut uploads = stream::iter(0..init.total_chunks)
            .map(|index| {
                let reader = reader.clone();
                async move {
                    let data = tokio::task::spawn_blocking(move || reader.read_chunk(index))
                        .await
                        .context("chunk read task failed")??;
                    let len = data.len() as u64;
                    let checksum = options.verify_chunks.then(|| hasher::digest_hex(&data));
                    self.upload_chunk(transfer_id, index, data, checksum).await?;
                    Ok::<u64, anyhow::Error>(len)
                }
            })
            .buffer_unordered(options.concurrency.max(1));

        while let Some(sent) = uploads.next().await {
            progress.inc(sent?);
        }

        self.complete(transfer_id).await
    }

    pub async fn init(
        &self,
        filename: &str,
        total_size: u64,
        chunk_size: u64,
        batch_id: Option<String>,
    ) -> Result<InitOutcome> {
        let response = self
            .http
            .post(self.url("/transfer/init"))
            .json(&serde_json::json!({
                "filename": filename,
                "total_size": total_size,
                "chunk_size": chunk_size,
                "batch_id": batch_id,
            }))
            .send()
            .await
            .context("init request failed")?;
        decode(response).await
    }

    pub async fn upload_chunk(
        &self,
        transfer_id: &str,
        index: u64,
        data: Vec<u8>,
        sha256: Option<String>,
    ) -> Result<ChunkReceived> {
        let mut form = multipart::Form::new()
            .text("transfer_id", transfer_id.to_string())
            .text("chunk_index", index.to_string())
            .part("chunk", multipart::Part::bytes(data).file_name("chunk"));
        if let Some(sha256) = sha256 {
            form = form.text("sha256", sha256);
        }

        let response = self
            .http
            .post(self.url("/transfer/chunk"))
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("chunk {} request failed", index))?;
        decode(response).await
    }

    pub async fn complete(&self, transfer_id: &str) -> Result<CompletedTransfer> {
        let response = self
            .http
            .post(self.url("/transfer/complete"))
            .json(&serde_json::json!({ "transfer_id": transfer_id }))
            .send()
            .await
            .context("complete request failed")?;
        decode(response).await
    }

    pub async fn status(&self, transfer_id: &str) -> Result<TransferStatus> {
        let response = self
            .http
            .get(self.url(&format!("/transfer/{}/status", transfer_id)))
            .send()
            .await
            .context("status request failed")?;
        decode(response).await
    }
}

/// Parse a success body, or turn the server's error body into an error.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.context("malformed response body");
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody { error }) => {
            anyhow::bail!("{} ({}): {}", status, error.kind, error.message)
        }
        Err(_) => anyhow::bail!("{}: {}", status, body),
    }
}
