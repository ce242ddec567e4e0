//! Bounded-concurrency execution of widget sub-requests
//!
//! A refresh that fans out to many remote sources runs each fetch through a
//! small worker pool instead of spawning one task per source. Results come
//! back in input order and one failing fetch never cancels its siblings.

use crate::errors::{DashboardError, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Worker count used when a job does not ask for a specific one.
pub const DEFAULT_NUM_WORKERS: usize = 10;

/// A batch of inputs plus the async task that processes each one.
pub struct Job<I, F> {
    data: Vec<I>,
    workers: usize,
    task: F,
}

/// Create a job over `data` with the default worker count.
pub fn job<I, F>(task: F, data: Vec<I>) -> Job<I, F> {
    Job {
        data,
        workers: DEFAULT_NUM_WORKERS,
        task,
    }
}

impl<I, F> Job<I, F> {
    /// Override the worker count. Zero restores the default, and the count
    /// is never allowed to exceed the number of inputs.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = if workers == 0 {
            DEFAULT_NUM_WORKERS
        } else {
            workers
        };
        self
    }

    /// Run every input through the task and collect the per-input outcomes.
    ///
    /// The returned vector is index-aligned with the input: `results[i]` is
    /// the outcome for `data[i]` regardless of completion order. A failing
    /// task occupies its own slot and never aborts the rest of the batch.
    /// The outer `Result` covers the pool itself and only turns into an
    /// error when a worker dies without delivering a result.
    pub async fn run<O, E, Fut>(self) -> Result<Vec<std::result::Result<O, E>>>
    where
        I: Send + 'static,
        O: Send + 'static,
        E: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<O, E>> + Send + 'static,
    {
        let Job {
            data,
            workers,
            task,
        } = self;
        let total = data.len();

        if total == 0 {
            return Ok(Vec::new());
        }

        // A single input runs inline; there is nothing to parallelize.
        if total == 1 {
            let mut results = Vec::with_capacity(1);
            for input in data {
                results.push(task(input).await);
            }
            return Ok(results);
        }

        let workers = workers.min(total);
        let queue: Arc<Mutex<VecDeque<(usize, I)>>> =
            Arc::new(Mutex::new(data.into_iter().enumerate().collect()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = Arc::new(task);

        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let task = Arc::clone(&task);
            let tx = tx.clone();

            tokio::spawn(async move {
                loop {
                    let next = queue.lock().unwrap().pop_front();
                    let Some((index, input)) = next else {
                        break;
                    };

                    let result = task(input).await;
                    if tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut slots: Vec<Option<std::result::Result<O, E>>> = (0..total).map(|_| None).collect();
        while let Some((index, result)) = rx.recv().await {
            slots[index] = Some(result);
        }

        let mut results = Vec::with_capacity(total);
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(result) => results.push(result),
                None => {
                    return Err(DashboardError::Pool(format!(
                        "no result delivered for task {}",
                        index
                    )));
                }
            }
        }

        Ok(results)
    }
}
