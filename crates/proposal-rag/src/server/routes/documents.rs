//! Processed document lookups

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{Document, SemanticBlock};

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<Document>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub document: Document,
    pub blocks: Vec<SemanticBlock>,
}

/// GET /api/documents
pub async fn list_documents(State(state): State<AppState>) -> Result<Json<DocumentListResponse>> {
    let documents = state.pipeline().documents().list_documents().await?;
    let total = documents.len();
    Ok(Json(DocumentListResponse { documents, total }))
}

/// GET /api/documents/:id
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>> {
    let id = Uuid::parse_str(&id).map_err(|_| Error::DocumentNotFound(id.clone()))?;
    let store = state.pipeline().documents();
    let document = store.get_document(&id).await?;
    let blocks = store.get_blocks(&id).await?;
    Ok(Json(DocumentResponse { document, blocks }))
}
