// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

use crate::error::Error;
use std::{future::Future, sync::Arc};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

/// A fixed set of workers draining a bounded task queue into a result channel.
///
/// Cancelling the token stops every worker at its next suspension point;
/// a task that is cancelled mid-flight produces no result.
pub struct WorkerPool<T, R> {
    pub tasks: mpsc::Sender<T>,
    pub results: mpsc::Receiver<R>,
    workers: WorkerSet,
}

/// Handles of the spawned workers.
pub struct WorkerSet {
    join_set: JoinSet<()>,
    cancel: CancellationToken,
}

impl<T, R> WorkerPool<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Spawns `workers` tasks running `handler` on each queued task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F, Fut>(
        workers: usize,
        queue_depth: usize,
        cancel: CancellationToken,
        handler: F,
    ) -> Self
    where
        F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let workers = workers.max(1);
        let (tasks, queue) = mpsc::channel::<T>(queue_depth.max(1));
        let (results_tx, results) = mpsc::channel::<R>(workers);
        let queue = Arc::new(Mutex::new(queue));

        let mut join_set = JoinSet::new();
        for _ in 0..workers {
            let queue = queue.clone();
            let results_tx = results_tx.clone();
            let cancel = cancel.clone();
            let handler = handler.clone();

            join_set.spawn(async move {
                loop {
                    let task = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        task = async { queue.lock().await.recv().await } => task,
                    };

                    let Some(task) = task else {
                        break;
                    };

                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        result = handler(task) => result,
                    };

                    if results_tx.send(result).await.is_err() {
                        break;
                    }
                }
            });
        }

        Self {
            tasks,
            results,
            workers: WorkerSet { join_set, cancel },
        }
    }

    pub fn into_parts(self) -> (mpsc::Sender<T>, mpsc::Receiver<R>, WorkerSet) {
        (self.tasks, self.results, self.workers)
    }
}

impl WorkerSet {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for every worker to exit, reporting the first panic.
    pub async fn join(mut self) -> Result<(), Error> {
        let mut first_error = None;

        while let Some(joined) = self.join_set.join_next().await {
            if let Err(err) = joined {
                if first_error.is_none() {
                    first_error = Some(Error::Join(err));
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_processes_every_task() {
        let pool = WorkerPool::spawn(3, 1, CancellationToken::new(), |n: u32| async move {
            tokio::time::sleep(Duration::from_millis(u64::from(10 - n))).await;
            n * 2
        });
        let (tasks, mut results, workers) = pool.into_parts();

        let producer = tokio::spawn(async move {
            for n in 0..10 {
                tasks.send(n).await.unwrap();
            }
        });

        let mut seen = vec![];
        while let Some(result) = results.recv().await {
            seen.push(result);
        }
        producer.await.unwrap();
        workers.join().await.unwrap();

        seen.sort();
        assert_eq!(seen, (0..10).map(|n| n * 2).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn test_cancel_stops_in_flight_tasks() {
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(2, 1, cancel.clone(), |_: ()| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let (tasks, mut results, workers) = pool.into_parts();

        tasks.send(()).await.unwrap();
        tasks.send(()).await.unwrap();
        workers.cancel();

        assert!(results.recv().await.is_none());
        workers.join().await.unwrap();
        assert!(cancel.is_cancelled());
    }
}
