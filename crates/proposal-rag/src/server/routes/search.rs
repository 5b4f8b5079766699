//! Similarity search endpoint

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::providers::{IndexScope, Metadata, SearchHit};
use crate::server::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
    /// "document" or a block type name; the document index when absent
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub filters: Option<Metadata>,
}

fn default_k() -> usize {
    5
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub scope: String,
    pub hits: Vec<SearchHit>,
}

/// POST /api/search
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let scope = match request.scope.as_deref() {
        Some(name) => Some(
            IndexScope::parse(name)
                .ok_or_else(|| Error::Config(format!("Unknown search scope '{}'", name)))?,
        ),
        None => None,
    };

    let hits = state
        .pipeline()
        .vectors()
        .search(&request.query, request.k, scope, request.filters.as_ref())
        .await?;

    Ok(Json(SearchResponse {
        query: request.query,
        scope: scope.unwrap_or(IndexScope::Document).to_string(),
        hits,
    }))
}
