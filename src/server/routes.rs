//! Router definition for the upload service

use super::handlers::{self, AppState};
use axum::{extract::DefaultBodyLimit, routing::*, Router};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// Create the router. `body_limit` caps a single request, i.e. one chunk
/// plus multipart framing.
pub fn create_router(state: &AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/transfer/init", post(handlers::init_transfer))
        .route("/transfer/chunk", post(handlers::receive_chunk))
        .route("/transfer/complete", post(handlers::complete_transfer))
        .route("/transfer/:transfer_id", delete(handlers::cancel_transfer))
        .route(
            "/transfer/:transfer_id/status",
            get(handlers::transfer_status),
        )
        .route("/files", get(handlers::list_files))
        .route("/uploads", get(handlers::list_uploads))
        .route("/download/batch/:batch_id", get(handlers::download_batch))
        .nest_service("/shared", ServeDir::new(state.manager.storage_dir()))
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
