//! Fixed-size worker pool for independent batch tasks.
//!
//! Tasks are `(index, payload)` pairs. Workers finish in whatever order they
//! like; every result travels back tagged with its index and lands in an
//! index-addressed buffer, so callers always get results in input order.

use std::sync::mpsc;
use std::thread;

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{Error, Result};

/// Number of workers used when none is configured.
pub fn default_pool_size() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

pub struct WorkerPool {
    pool: ThreadPool,
    size: usize,
}

impl WorkerPool {
    /// Start a pool with `size` workers; `0` means [`default_pool_size`].
    pub fn new(size: usize) -> Result<Self> {
        let size = if size == 0 { default_pool_size() } else { size };
        let pool = ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("commitgen-worker-{}", i))
            .build()
            .map_err(|e| Error::Pool(e.to_string()))?;
        Ok(Self { pool, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `work` over every task and return the results in task order.
    pub fn run<T, R, F>(&self, tasks: Vec<T>, work: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        let total = tasks.len();
        let (tx, rx) = mpsc::channel::<(usize, R)>();
        let work = &work;

        self.pool.scope(|scope| {
            for (index, payload) in tasks.into_iter().enumerate() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    // The receiver outlives the scope, so this cannot fail.
                    let _ = tx.send((index, work(payload)));
                });
            }
        });
        drop(tx);

        let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
        for (index, result) in rx {
            slots[index] = Some(result);
        }

        let collected: Option<Vec<R>> = slots.into_iter().collect();
        collected.ok_or_else(|| Error::Pool("a task finished without a result".to_string()))
    }

    /// Stop the workers. Nothing is awaited after this point.
    pub fn shutdown(self) {
        tracing::debug!(workers = self.size, "shutting down worker pool");
        drop(self.pool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_results_follow_task_order() {
        let pool = WorkerPool::new(4).unwrap();
        let tasks: Vec<u64> = (0..12).collect();
        // later tasks finish first
        let results = pool
            .run(tasks, |n| {
                thread::sleep(Duration::from_millis((12 - n) * 3));
                n * 10
            })
            .unwrap();
        assert_eq!(results, (0..12).map(|n| n * 10).collect::<Vec<u64>>());
        pool.shutdown();
    }

    #[test]
    fn test_empty_batch() {
        let pool = WorkerPool::new(2).unwrap();
        let results: Vec<usize> = pool.run(Vec::<String>::new(), |s| s.len()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_default_size() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.size(), default_pool_size());
        assert!(pool.size() >= 1);
    }
}
