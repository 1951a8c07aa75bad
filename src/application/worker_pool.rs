// Fixed-size worker pool for independent detection tasks
use anyhow::Context;
use futures::StreamExt;
use std::future::Future;

const MAX_DEFAULT_WORKERS: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Available processors, capped at a small constant.
    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_DEFAULT_WORKERS)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn is_sequential(&self) -> bool {
        self.workers == 1
    }

    /// Runs one future per task with at most `workers` in flight.
    ///
    /// A single worker awaits each task in turn on the caller; otherwise each
    /// task is spawned and its result collected through the join handle.
    /// Results come back in completion order.
    pub async fn run<T, F, Fut>(
        &self,
        tasks: Vec<T>,
        task_fn: F,
    ) -> anyhow::Result<Vec<Fut::Output>>
    where
        F: Fn(T) -> Fut,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        if self.is_sequential() {
            let mut results = Vec::with_capacity(tasks.len());
            for task in tasks {
                results.push(task_fn(task).await);
            }
            return Ok(results);
        }

        let handles = tasks.into_iter().map(|task| tokio::spawn(task_fn(task)));
        let joined: Vec<_> = futures::stream::iter(handles)
            .buffer_unordered(self.workers)
            .collect()
            .await;

        joined
            .into_iter()
            .map(|result| result.context("worker task panicked"))
            .collect()
    }
}
