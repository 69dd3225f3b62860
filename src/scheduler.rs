use crate::error::PlanError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Fixed-size worker pool. Tasks are taken from a shared queue in input order
/// and at most `limit` of them run at once.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    limit: usize,
}

#[derive(Debug)]
pub enum TaskFailure<E> {
    Failed(E),
    Panicked(String),
}

impl Scheduler {
    pub fn new(limit: usize) -> Result<Self, PlanError> {
        if limit < 1 {
            return Err(PlanError::InvalidConcurrency(limit));
        }
        Ok(Self { limit })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Runs every task and returns one outcome per task, indexed like the
    /// input. A failing or panicking task never affects its siblings.
    pub async fn run<T, E, F, Fut>(&self, tasks: Vec<F>) -> Vec<Result<T, TaskFailure<E>>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let total = tasks.len();
        let queue = Arc::new(Mutex::new(tasks.into_iter().enumerate()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut workers = JoinSet::new();
        for worker in 0..self.limit.min(total) {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            workers.spawn(async move {
                loop {
                    let next = queue.lock().await.next();
                    let Some((index, task)) = next else {
                        break;
                    };

                    debug!(worker, index, "task started");
                    let outcome = match tokio::spawn(task()).await {
                        Ok(result) => result.map_err(TaskFailure::Failed),
                        Err(err) => {
                            warn!(worker, index, error = %err, "task aborted");
                            Err(TaskFailure::Panicked(err.to_string()))
                        }
                    };

                    if tx.send((index, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut outcomes: Vec<Option<Result<T, TaskFailure<E>>>> =
            (0..total).map(|_| None).collect();
        while let Some((index, outcome)) = rx.recv().await {
            outcomes[index] = Some(outcome);
        }
        while workers.join_next().await.is_some() {}

        outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| {
                    Err(TaskFailure::Panicked("task produced no outcome".to_string()))
                })
            })
            .collect()
    }
}
