//! API routes for the proposal server

pub mod documents;
pub mod jobs;
pub mod search;
pub mod stats;
pub mod upload;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Upload - multipart bodies get their own limit
        .route(
            "/upload",
            post(upload::upload_proposals).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        // Progress
        .route("/processing-status/:id", get(jobs::processing_status))
        .route("/active-processing-tasks", get(jobs::active_tasks))
        .route("/processing-task/:id", delete(jobs::delete_task))
        .route("/processing-tasks-summary", get(jobs::tasks_summary))
        .route("/ws/processing-status/:id", get(jobs::processing_status_ws))
        // Retrieval
        .route("/search", post(search::search))
        .route("/documents", get(documents::list_documents))
        .route("/documents/:id", get(documents::get_document))
        .route("/stats", get(stats::stats))
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "proposal-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "PDF proposal ingestion with semantic block extraction and live progress",
        "endpoints": {
            "POST /api/upload": "Upload proposal PDFs for background processing",
            "GET /api/processing-status/:id": "Snapshot of one processing job",
            "GET /api/active-processing-tasks": "Summaries of retained jobs, newest first",
            "DELETE /api/processing-task/:id": "Forget one processing job",
            "GET /api/processing-tasks-summary": "Total, completed and in-progress job counts",
            "GET /api/ws/processing-status/:id": "WebSocket stream of job snapshots",
            "POST /api/search": "Similarity search over documents or one block type",
            "GET /api/documents": "List processed documents",
            "GET /api/documents/:id": "Document record with its semantic blocks",
            "GET /api/stats": "Batch, cache, optimizer and vector statistics"
        },
        "features": {
            "deduplication": "SHA-256 content hash short-circuits repeat uploads",
            "ocr_fallback": "Image-only pages are sent through tesseract when available",
            "section_identification": "LLM classification of text chunks into proposal sections"
        }
    }))
}
