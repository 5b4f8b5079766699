//! Job tracking and the processing machinery behind the pipeline

pub mod batch;
pub mod cache;
pub mod memory;
pub mod optimizer;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod tracker;

pub use batch::{BatchProcessor, BatchStats, ItemError, MAX_RETRIES_EXCEEDED};
pub use cache::{content_key, CacheManager, CacheStats};
pub use memory::{MemoryMonitor, MemoryUsage};
pub use optimizer::{ChunkStrategy, DatasetOptimizer, OptimizerStats};
pub use pipeline::{Collaborators, PdfPipeline, PipelineOutcome, PipelineStats, Upload};
pub use registry::{JobCounts, JobRegistry, JobSummary, PDF_STAGES};
pub use retry::RetryPolicy;
pub use tracker::{
    ChannelSink, JobSnapshot, ProgressSink, ProgressTracker, StageSnapshot, StageStatus,
    SubscriptionId,
};
