//! Application state for the proposal server

use std::sync::Arc;
use std::time::Duration;

use crate::config::RagConfig;
use crate::error::Result;
use crate::processing::{JobRegistry, PdfPipeline};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: RagConfig,
    pipeline: Arc<PdfPipeline>,
    /// Live processing jobs
    registry: Arc<JobRegistry>,
}

impl AppState {
    /// Build the default pipeline and an empty job registry
    pub fn new(config: RagConfig) -> Result<Self> {
        let pipeline = Arc::new(PdfPipeline::from_config(&config)?);
        tracing::info!(
            "Pipeline initialized (classifier: {}, vectors: {}, documents: {})",
            pipeline.classifier().name(),
            pipeline.vectors().name(),
            pipeline.documents().name()
        );
        Ok(Self::with_pipeline(config, pipeline))
    }

    pub fn with_pipeline(config: RagConfig, pipeline: Arc<PdfPipeline>) -> Self {
        let registry = Arc::new(JobRegistry::new(Duration::from_secs(
            config.tracker.retention_secs,
        )));
        Self {
            inner: Arc::new(AppStateInner {
                config,
                pipeline,
                registry,
            }),
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    pub fn pipeline(&self) -> &Arc<PdfPipeline> {
        &self.inner.pipeline
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    /// How long push channels stay open after the terminal event
    pub fn push_grace(&self) -> Duration {
        Duration::from_secs(self.inner.config.tracker.push_grace_secs)
    }
}
