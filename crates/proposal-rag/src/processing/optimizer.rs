//! Dataset chunking and parallel chunk processing

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use crate::config::OptimizerConfig;
use crate::error::{Error, Result};

/// How `chunk_dataset` bounds each chunk
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Fixed number of items per chunk
    Size,
    /// Estimated cumulative bytes per chunk
    Memory,
}

/// Optimizer statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OptimizerStats {
    pub processed_items: u64,
    pub chunks_processed: u64,
    pub failed_chunks: u64,
    pub processing_time_ms: u64,
    /// Items per second, 0 until some processing time has accrued
    pub throughput: f64,
}

#[derive(Default)]
struct Counters {
    processed_items: u64,
    chunks_processed: u64,
    failed_chunks: u64,
    processing_secs: f64,
}

/// Splits datasets into bounded chunks and drives them concurrently
pub struct DatasetOptimizer {
    chunk_size: usize,
    max_concurrent: usize,
    counters: Mutex<Counters>,
}

impl DatasetOptimizer {
    pub fn new(config: &OptimizerConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            max_concurrent: config
                .max_concurrent
                .unwrap_or_else(|| num_cpus::get() * 2)
                .max(1),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `data` into contiguous chunks.
    ///
    /// The memory strategy sizes items shallowly with `size_of::<T>()`; use
    /// [`chunk_dataset_with`](Self::chunk_dataset_with) for heap-owning items.
    pub fn chunk_dataset<T>(
        &self,
        data: Vec<T>,
        strategy: ChunkStrategy,
        max_chunk_memory: Option<usize>,
    ) -> Result<Vec<Vec<T>>> {
        match strategy {
            ChunkStrategy::Size => {
                if self.chunk_size == 0 {
                    return Err(Error::Config("chunk_size must be greater than 0".to_string()));
                }
                Ok(split_fixed(data, self.chunk_size))
            }
            ChunkStrategy::Memory => {
                let max = require_memory_bound(max_chunk_memory)?;
                Ok(split_by_memory(data, max, |_| std::mem::size_of::<T>()))
            }
        }
    }

    /// Memory-bounded chunking with a caller-supplied size estimate
    pub fn chunk_dataset_with<T>(
        &self,
        data: Vec<T>,
        max_chunk_memory: Option<usize>,
        sizer: impl Fn(&T) -> usize,
    ) -> Result<Vec<Vec<T>>> {
        let max = require_memory_bound(max_chunk_memory)?;
        Ok(split_by_memory(data, max, sizer))
    }

    /// Run `f` over every chunk with at most `max_concurrent` in flight.
    ///
    /// Chunks start in submission order and their results are concatenated
    /// in that same order. A chunk that fails or panics is logged and
    /// contributes nothing.
    pub async fn process_chunks<T, R, F, Fut>(
        &self,
        chunks: Vec<Vec<T>>,
        f: F,
        max_concurrent: Option<usize>,
    ) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<R>>> + Send + 'static,
    {
        let start = Instant::now();
        let limit = max_concurrent.unwrap_or(self.max_concurrent).max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let f = Arc::new(f);

        let handles: Vec<_> = chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let semaphore = semaphore.clone();
                let f = f.clone();
                let len = chunk.len();
                let handle = tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| Error::Internal(format!("Semaphore closed: {}", e)))?;
                    f(chunk).await
                });
                (index, len, handle)
            })
            .collect();

        let mut results = Vec::new();
        let mut processed = 0u64;
        let mut succeeded = 0u64;
        let mut failed = 0u64;
        for (index, len, handle) in handles {
            match handle.await {
                Ok(Ok(chunk_results)) => {
                    processed += len as u64;
                    succeeded += 1;
                    results.extend(chunk_results);
                }
                Ok(Err(e)) => {
                    failed += 1;
                    tracing::error!("Chunk {} failed: {}", index, e);
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!("Chunk {} task join error: {}", index, e);
                }
            }
        }

        let mut counters = self.counters.lock();
        counters.processed_items += processed;
        counters.chunks_processed += succeeded;
        counters.failed_chunks += failed;
        counters.processing_secs += start.elapsed().as_secs_f64();

        results
    }

    /// [`process_chunks`](Self::process_chunks) for a blocking function,
    /// run on the blocking worker pool
    pub async fn process_chunks_blocking<T, R, F>(
        &self,
        chunks: Vec<Vec<T>>,
        f: F,
        max_concurrent: Option<usize>,
    ) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(Vec<T>) -> Result<Vec<R>> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.process_chunks(
            chunks,
            move |chunk| {
                let f = f.clone();
                async move {
                    tokio::task::spawn_blocking(move || f(chunk))
                        .await
                        .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
                }
            },
            max_concurrent,
        )
        .await
    }

    pub fn stats(&self) -> OptimizerStats {
        let counters = self.counters.lock();
        OptimizerStats {
            processed_items: counters.processed_items,
            chunks_processed: counters.chunks_processed,
            failed_chunks: counters.failed_chunks,
            processing_time_ms: (counters.processing_secs * 1000.0) as u64,
            throughput: if counters.processing_secs > 0.0 {
                counters.processed_items as f64 / counters.processing_secs
            } else {
                0.0
            },
        }
    }
}

fn require_memory_bound(max_chunk_memory: Option<usize>) -> Result<usize> {
    match max_chunk_memory {
        Some(max) if max > 0 => Ok(max),
        _ => Err(Error::Config(
            "memory chunking requires a positive max_chunk_memory".to_string(),
        )),
    }
}

fn split_fixed<T>(data: Vec<T>, chunk_size: usize) -> Vec<Vec<T>> {
    let mut chunks = Vec::with_capacity(data.len().div_ceil(chunk_size));
    let mut iter = data.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(chunk_size).collect());
    }
    chunks
}

/// Uniformly sized items get a fixed count per chunk; otherwise items are
/// accumulated greedily. An item larger than the bound gets its own chunk.
fn split_by_memory<T>(data: Vec<T>, max: usize, sizer: impl Fn(&T) -> usize) -> Vec<Vec<T>> {
    let sizes: Vec<usize> = data.iter().map(&sizer).collect();
    let Some(&first) = sizes.first() else {
        return Vec::new();
    };

    if sizes.iter().all(|&size| size == first) {
        let per_chunk = if first == 0 { data.len() } else { (max / first).max(1) };
        return split_fixed(data, per_chunk);
    }

    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0usize;
    for (item, size) in data.into_iter().zip(sizes) {
        if !current.is_empty() && current_size + size > max {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size += size;
        current.push(item);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
