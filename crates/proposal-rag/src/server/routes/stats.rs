//! Pipeline statistics endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::Result;
use crate::processing::PipelineStats;
use crate::providers::VectorStats;
use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub pipeline: PipelineStats,
    pub vectors: VectorStats,
    pub jobs: usize,
}

/// GET /api/stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    Ok(Json(StatsResponse {
        pipeline: state.pipeline().stats(),
        vectors: state.pipeline().vectors().stats().await?,
        jobs: state.registry().len(),
    }))
}
