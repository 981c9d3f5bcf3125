//! Bounded pool for blocking work.
//!
//! External programs run as async child processes; this pool covers the
//! remaining synchronous work (directory walks for the disk quota).

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::Error;

/// Default number of concurrent blocking tasks.
pub const DEFAULT_BLOCKING_WORKERS: usize = 4;

/// Runs closures on the blocking thread pool, at most `max_workers` at once.
#[derive(Clone)]
pub struct BlockingPool {
    semaphore: Arc<Semaphore>,
    max_workers: usize,
}

impl BlockingPool {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `f` off the async runtime and return its result.
    pub async fn run<F, T>(&self, f: F) -> crate::Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| Error::Other("blocking pool closed".to_string()))?;
        debug!(available = self.semaphore.available_permits(), "Blocking task started");
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| Error::Other(format!("blocking task failed: {e}")))
    }
}

impl Default for BlockingPool {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCKING_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = BlockingPool::new(2);
        let value = pool.run(|| 21 * 2).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        assert_eq!(BlockingPool::new(0).max_workers(), 1);
    }
}
