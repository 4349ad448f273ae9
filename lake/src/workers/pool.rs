use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::bail;
use crate::error::{ErrorKind, LakeResult};
use crate::lake_error;
use crate::types::ChunkId;

/// Pool whose units are chunks; used by every per-chunk phase.
pub type ChunkWorkerPool<T> = WorkerPool<ChunkId, T>;

/// Runs one task per unit key with at most `max_workers` running at once.
///
/// A key can have a single in-flight task: spawning a second task for a key whose task has not
/// been joined yet is rejected. This is what serializes all work on one chunk. Panics inside a
/// task are caught and reported as [`ErrorKind::WorkerPanic`] for that key.
pub struct WorkerPool<K, T> {
    active: HashSet<K>,
    join_set: JoinSet<(K, LakeResult<T>)>,
    permits: Arc<Semaphore>,
}

impl<K, T> WorkerPool<K, T>
where
    K: Copy + Eq + Hash + Ord + fmt::Display + Send + 'static,
    T: Send + 'static,
{
    pub fn new(max_workers: usize) -> Self {
        Self {
            active: HashSet::new(),
            join_set: JoinSet::new(),
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Spawns `future` as the task for `key`.
    ///
    /// The future starts running once a worker slot is free.
    pub fn spawn<F>(&mut self, key: K, future: F) -> LakeResult<()>
    where
        F: Future<Output = LakeResult<T>> + Send + 'static,
    {
        if !self.active.insert(key) {
            bail!(
                ErrorKind::InvalidState,
                "Unit already has an active worker",
                format!("unit {key}")
            );
        }

        let permits = self.permits.clone();
        self.join_set.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return (
                    key,
                    Err(lake_error!(ErrorKind::InvalidState, "Worker pool was closed")),
                );
            };

            let result = AssertUnwindSafe(future)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(lake_error!(
                        ErrorKind::WorkerPanic,
                        "Worker panicked",
                        format!("unit {key}: {}", panic_message(panic.as_ref()))
                    ))
                });

            (key, result)
        });

        debug!(%key, "spawned worker in pool");

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Waits for the next task to finish and returns its key and result.
    ///
    /// Returns `None` once no task is left.
    pub async fn join_next(&mut self) -> Option<(K, LakeResult<T>)> {
        loop {
            match self.join_set.join_next().await {
                None => {
                    self.active.clear();
                    return None;
                }
                Some(Ok((key, result))) => {
                    self.active.remove(&key);
                    if let Err(err) = &result {
                        error!(%key, error = %err, "worker completed with error");
                    }
                    return Some((key, result));
                }
                Some(Err(join_err)) => {
                    // Task bodies catch their own panics, so only aborted tasks end up here.
                    debug!(error = %join_err, "worker task did not complete");
                }
            }
        }
    }

    /// Waits for every task and returns the results keyed by unit.
    pub async fn join_all(&mut self) -> BTreeMap<K, LakeResult<T>> {
        let mut results = BTreeMap::new();
        while let Some((key, result)) = self.join_next().await {
            results.insert(key, result);
        }
        results
    }

    /// Waits for every task, failing with all collected errors if any task failed.
    pub async fn wait_all(&mut self) -> LakeResult<Vec<(K, T)>> {
        let mut values = Vec::new();
        let mut errors = Vec::new();

        for (key, result) in self.join_all().await {
            match result {
                Ok(value) => values.push((key, value)),
                Err(err) => errors.push(err),
            }
        }

        if errors.is_empty() {
            Ok(values)
        } else {
            Err(errors.into())
        }
    }

    /// Aborts every task that has not finished and waits for them to stop.
    pub async fn abort_all(&mut self) {
        self.join_set.abort_all();
        while self.join_set.join_next().await.is_some() {}
        self.active.clear();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
