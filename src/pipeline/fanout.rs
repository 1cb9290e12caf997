//! Scatter-gather fan-out with per-task error isolation.
//!
//! Build a task list, run everything concurrently under a semaphore cap,
//! and reduce over per-task results. One task's failure never cancels its
//! siblings; it surfaces as an `Err` contribution for its key. Results are
//! identified by their key, not by task order.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::error::Result;

/// Run all tasks concurrently, at most `max_parallel` in flight.
pub async fn scatter<K, T, F>(tasks: Vec<(K, F)>, max_parallel: usize) -> Vec<(K, Result<T>)>
where
    F: Future<Output = Result<T>>,
{
    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));

    let futures = tasks.into_iter().map(|(key, task)| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            let _permit = semaphore
                .acquire()
                .await
                .expect("semaphore closed unexpectedly");
            (key, task.await)
        }
    });

    join_all(futures).await
}
