//! Bounded-concurrency batch execution with per-item retry
//!
//! [`BatchProcessor`] runs a function over a list of items and returns one
//! slot per item, in input order. Item failures never escape the batch: they
//! become `None` slots plus a structured [`ItemError`] record in the stats.
//!
//! Each attempt holds a worker permit and is bounded by the item timeout.
//! Failed attempts are retried with exponential backoff when retries are
//! enabled. A timed-out blocking attempt keeps running on its worker thread;
//! only its result is discarded.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tokio::time::timeout;

use super::memory::MemoryMonitor;
use crate::config::BatchConfig;
use crate::error::{Error, Result};

/// Error type recorded when an item used up all its attempts
pub const MAX_RETRIES_EXCEEDED: &str = "max_retries_exceeded";

/// Structured record of a failed item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemError {
    /// Position of the item in its batch
    pub index: usize,
    /// Debug rendering of the item
    pub item: String,
    pub error_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Running batch statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_items: u64,
    pub processed_items: u64,
    pub successful_items: u64,
    pub failed_items: u64,
    /// Attempts beyond the first, across all items
    pub retries: u64,
    pub batches: u64,
    pub processing_time_ms: u64,
    /// Most recent failures, oldest first
    pub errors: Vec<ItemError>,
}

/// Bounded-concurrency executor with retry and a streaming queue
pub struct BatchProcessor<T> {
    batch_size: usize,
    max_retries: u32,
    retry_enabled: bool,
    item_timeout: Duration,
    backoff_base: Duration,
    max_error_records: usize,
    workers: Arc<Semaphore>,
    stats: Mutex<BatchStats>,
    queue: Mutex<VecDeque<T>>,
    queue_notify: Notify,
    memory: Option<Arc<MemoryMonitor>>,
}

impl<T> BatchProcessor<T>
where
    T: Clone + Debug + Send + 'static,
{
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries.max(1),
            retry_enabled: config.retry_enabled,
            item_timeout: config.item_timeout(),
            backoff_base: config.backoff_base(),
            max_error_records: config.max_error_records,
            workers: Arc::new(Semaphore::new(config.workers())),
            stats: Mutex::new(BatchStats::default()),
            queue: Mutex::new(VecDeque::new()),
            queue_notify: Notify::new(),
            memory: None,
        }
    }

    /// Check memory pressure after every batch
    pub fn with_memory_monitor(mut self, monitor: Arc<MemoryMonitor>) -> Self {
        self.memory = Some(monitor);
        self
    }

    pub fn with_item_timeout(mut self, item_timeout: Duration) -> Self {
        self.item_timeout = item_timeout;
        self
    }

    /// Run a blocking function over `items` on the blocking worker pool
    pub async fn process_batch<R, F>(&self, items: Vec<T>, f: F) -> Vec<Option<R>>
    where
        R: Send + 'static,
        F: Fn(T) -> Result<R> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.run_batch(items, move |item| {
            let f = f.clone();
            async move {
                tokio::task::spawn_blocking(move || f(item))
                    .await
                    .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
            }
        })
        .await
    }

    /// Run an async function over `items`
    pub async fn process_batch_async<R, F, Fut>(&self, items: Vec<T>, f: F) -> Vec<Option<R>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        self.run_batch(items, |item| {
            let attempt = AssertUnwindSafe(f(item)).catch_unwind();
            async move {
                attempt
                    .await
                    .unwrap_or_else(|_| Err(Error::internal("item task panicked")))
            }
        })
        .await
    }

    async fn run_batch<R, A, Fut>(&self, items: Vec<T>, attempt: A) -> Vec<Option<R>>
    where
        A: Fn(T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let start = Instant::now();
        let count = items.len();
        self.stats.lock().total_items += count as u64;

        let results = join_all(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| self.run_item(index, item, &attempt)),
        )
        .await;

        {
            let mut stats = self.stats.lock();
            stats.batches += 1;
            stats.processing_time_ms += start.elapsed().as_millis() as u64;
        }

        let failed = results.iter().filter(|r| r.is_none()).count();
        if failed > 0 {
            tracing::warn!("Batch finished: {}/{} items failed", failed, count);
        } else {
            tracing::debug!("Batch of {} items finished in {:?}", count, start.elapsed());
        }

        if let Some(monitor) = &self.memory {
            monitor.check();
        }

        results
    }

    async fn run_item<R, A, Fut>(&self, index: usize, item: T, attempt: &A) -> Option<R>
    where
        A: Fn(T) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let attempts = if self.retry_enabled { self.max_retries } else { 1 };
        let mut last_error = None;

        for n in 0..attempts {
            if n > 0 {
                let delay = self.backoff_base.saturating_mul(2u32.saturating_pow(n));
                tracing::warn!(
                    "Retrying item {} (attempt {}/{}) after {:?}",
                    index,
                    n + 1,
                    attempts,
                    delay
                );
                self.stats.lock().retries += 1;
                tokio::time::sleep(delay).await;
            }

            let result = match self.workers.acquire().await {
                Ok(_permit) => match timeout(self.item_timeout, attempt(item.clone())).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(format!(
                        "item {} exceeded {}s",
                        index,
                        self.item_timeout.as_secs_f64()
                    ))),
                },
                Err(e) => Err(Error::Internal(format!("Worker pool closed: {}", e))),
            };

            match result {
                Ok(value) => {
                    let mut stats = self.stats.lock();
                    stats.processed_items += 1;
                    stats.successful_items += 1;
                    return Some(value);
                }
                Err(e) => {
                    tracing::debug!("Item {} attempt {} failed: {}", index, n + 1, e);
                    last_error = Some(e);
                }
            }
        }

        let (error_type, message) = match last_error {
            Some(e) if self.retry_enabled => (
                MAX_RETRIES_EXCEEDED.to_string(),
                format!("max retries exceeded after {} attempts: {}", attempts, e),
            ),
            Some(e) => (e.kind().to_string(), e.to_string()),
            None => (MAX_RETRIES_EXCEEDED.to_string(), "no attempts made".to_string()),
        };
        tracing::error!("Item {} failed: {}", index, message);

        self.record_failure(ItemError {
            index,
            item: format!("{:?}", item),
            error_type,
            message,
            timestamp: Utc::now(),
        });
        None
    }

    fn record_failure(&self, error: ItemError) {
        let mut stats = self.stats.lock();
        stats.processed_items += 1;
        stats.failed_items += 1;
        if self.max_error_records == 0 {
            return;
        }
        if stats.errors.len() >= self.max_error_records {
            stats.errors.remove(0);
        }
        stats.errors.push(error);
    }

    /// Queue an item for a later `get_batch`
    pub fn add_to_queue(&self, item: T) {
        self.queue.lock().push_back(item);
        self.queue_notify.notify_one();
    }

    /// Take up to `batch_size` queued items, waiting up to `wait` for the
    /// first one to arrive. Returns an empty batch on timeout.
    pub async fn get_batch(&self, wait: Duration) -> Vec<T> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.queue_notify.notified();
            {
                let mut queue = self.queue.lock();
                if !queue.is_empty() {
                    let take = queue.len().min(self.batch_size);
                    return queue.drain(..take).collect();
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Vec::new();
            }
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn stats(&self) -> BatchStats {
        self.stats.lock().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock() = BatchStats::default();
    }
}
