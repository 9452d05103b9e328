//! HTTP handlers: thin bindings from requests onto [`TransferManager`].

use anyhow::Context;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderValue, Response, StatusCode},
    Json,
};
use axum_typed_multipart::{TryFromMultipart, TypedMultipart, TypedMultipartError};
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashSet;

use super::archive;
use crate::common::AppError;
use crate::transfer::{
    Batch, ChunkReceived, CompletedTransfer, InitOutcome, SharedFile, TransferManager,
    TransferStatus,
};

/// Shared state handed to every handler via Axum's State extractor
#[derive(Clone)]
pub struct AppState {
    pub manager: TransferManager,
}

impl AppState {
    pub fn new(manager: TransferManager) -> Self {
        Self { manager }
    }
}

#[derive(Deserialize)]
pub struct InitTransferRequest {
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    #[serde(default)]
    pub batch_id: Option<String>,
}

#[derive(Deserialize)]
pub struct CompleteTransferRequest {
    pub transfer_id: String,
}

/// Multipart body of one chunk upload
#[derive(TryFromMultipart)]
pub struct ChunkUpload {
    pub transfer_id: String,
    pub chunk_index: u64,
    // Size is bounded by the router's DefaultBodyLimit instead
    #[form_data(limit = "unlimited")]
    pub chunk: Bytes,
    /// Hex SHA-256 of `chunk`; when present the chunk is verified
    pub sha256: Option<String>,
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

// Oversized bodies surface from the multipart reader; keep them distinct
// from malformed forms.
fn multipart_error(err: TypedMultipartError) -> AppError {
    if err.get_status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(err.to_string())
    } else {
        AppError::BadRequest(err.to_string())
    }
}

pub async fn init_transfer(
    State(state): State<AppState>,
    payload: Result<Json<InitTransferRequest>, JsonRejection>,
) -> Result<Json<InitOutcome>, AppError> {
    let req = json_body(payload)?;
    tracing::info!(
        filename = %req.filename,
        total_size = req.total_size,
        chunk_size = req.chunk_size,
        "Init transfer request"
    );

    let outcome = state
        .manager
        .init(&req.filename, req.total_size, req.chunk_size, req.batch_id)
        .await?;
    Ok(Json(outcome))
}

pub async fn receive_chunk(
    State(state): State<AppState>,
    upload: Result<TypedMultipart<ChunkUpload>, TypedMultipartError>,
) -> Result<Json<ChunkReceived>, AppError> {
    let TypedMultipart(upload) = upload.map_err(multipart_error)?;

    let received = match upload.sha256.as_deref() {
        Some(expected) => {
            state
                .manager
                .accept_chunk_verified(
                    &upload.transfer_id,
                    upload.chunk_index,
                    &upload.chunk,
                    expected,
                )
                .await?
        }
        None => {
            state
                .manager
                .accept_chunk(&upload.transfer_id, upload.chunk_index, &upload.chunk)
                .await?
        }
    };
    Ok(Json(received))
}

pub async fn complete_transfer(
    State(state): State<AppState>,
    payload: Result<Json<CompleteTransferRequest>, JsonRejection>,
) -> Result<Json<CompletedTransfer>, AppError> {
    let req = json_body(payload)?;
    let completed = state.manager.complete(&req.transfer_id).await?;
    Ok(Json(completed))
}

pub async fn transfer_status(
    Path(transfer_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<TransferStatus>, AppError> {
    Ok(Json(state.manager.status(&transfer_id)?))
}

pub async fn cancel_transfer(
    Path(transfer_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.manager.cancel(&transfer_id).await?;
    Ok(Json(serde_json::json!({
        "transfer_id": transfer_id,
        "status": "cancelled",
    })))
}

pub async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<SharedFile>>, AppError> {
    Ok(Json(state.manager.list_files().await?))
}

pub async fn list_uploads(State(state): State<AppState>) -> Json<Vec<Batch>> {
    Json(state.manager.list_batches().await)
}

/// Zip every file of a batch into one download.
pub async fn download_batch(
    Path(batch_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response<Body>, AppError> {
    let members = state.manager.files_for_batch(&batch_id).await;
    if members.is_empty() {
        return Err(AppError::NotFound(format!("batch {}", batch_id)));
    }

    // Same-name uploads overwrite each other on disk; archive each name once
    let mut seen = HashSet::new();
    let names: Vec<String> = members
        .into_iter()
        .map(|m| m.name)
        .filter(|name| seen.insert(name.clone()))
        .collect();

    let root = state.manager.storage_dir().to_path_buf();
    let archive = tokio::task::spawn_blocking(move || archive::zip_files(&root, &names))
        .await
        .context("archive task failed")??;

    tracing::info!(batch_id = %batch_id, bytes = archive.len(), "Serving batch archive");

    let mut response = Response::new(Body::from(archive));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zip"),
    );
    let disposition = format!("attachment; filename=\"upload-{}.zip\"", batch_id);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}
