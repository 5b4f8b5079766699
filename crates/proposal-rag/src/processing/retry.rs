//! Outer retry for fragile pipeline stages

use std::future::Future;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::Result;

/// Exponential backoff retry applied to transient errors only
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            min_backoff: Duration::from_millis(config.retry_min_backoff_ms),
            max_backoff: Duration::from_millis(config.retry_max_backoff_ms),
        }
    }

    /// Delay before retry `n` (1-based), clamped to the configured window
    pub fn backoff(&self, n: u32) -> Duration {
        let exponential = self
            .min_backoff
            .saturating_mul(2u32.saturating_pow(n.saturating_sub(1)));
        exponential.clamp(self.min_backoff, self.max_backoff.max(self.min_backoff))
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts are used up
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        label,
                        attempt,
                        self.attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(3),
        }
    }

    #[test]
    fn test_backoff_is_clamped() {
        let policy = RetryPolicy {
            attempts: 5,
            min_backoff: Duration::from_secs(4),
            max_backoff: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(2), Duration::from_secs(8));
        assert_eq!(policy.backoff(3), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy()
            .run("classify", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::llm("overloaded"))
                } else {
                    Ok("sections")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "sections");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = tokio_test::block_on(policy().run("parse", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::file_parse("a.pdf", "not a PDF"))
        }));

        assert!(matches!(result, Err(Error::FileParse { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = policy()
            .run("classify", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::llm("down"))
            })
            .await;

        assert!(matches!(result, Err(Error::Llm(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
