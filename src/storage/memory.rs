//! In-process storage and worker pool
//!
//! Backs both capability traits with a blob map and spawned tokio tasks,
//! so the whole training pipeline can run without remote infrastructure.
//! Used by the tests and the demo program.

use super::{BlobStore, JobCompletion, JobOutcome, JobQueue, TreeJob, COMPLETION_BATCH};
use crate::error::{Error, Result};
use crate::worker;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

struct Inner {
    blobs: Mutex<HashMap<String, Value>>,
    completions_tx: mpsc::UnboundedSender<JobCompletion>,
    completions_rx: Mutex<mpsc::UnboundedReceiver<JobCompletion>>,
    fail_counts: Mutex<HashMap<(usize, usize), u32>>,
}

/// In-memory blob store that also executes submitted tree jobs on the
/// tokio runtime, feeding completions back through a channel
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                blobs: Mutex::new(HashMap::new()),
                completions_tx,
                completions_rx: Mutex::new(completions_rx),
                fail_counts: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Make the next `times` submissions of (fold, number) fail, for
    /// retry-policy tests
    pub async fn fail_next(&self, fold: usize, number: usize, times: u32) {
        *self
            .inner
            .fail_counts
            .lock()
            .await
            .entry((fold, number))
            .or_insert(0) += times;
    }

    /// Number of blobs currently stored
    pub async fn len(&self) -> usize {
        self.inner.blobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.blobs.lock().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBackend {
    async fn upload(&self, key: &str, payload: Value) -> Result<()> {
        self.inner.blobs.lock().await.insert(key.to_string(), payload);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.inner.blobs.lock().await.get(key).cloned())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .inner
            .blobs
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl JobQueue for MemoryBackend {
    async fn submit(&self, job: TreeJob) -> Result<()> {
        let inject = {
            let mut counts = self.inner.fail_counts.lock().await;
            match counts.get_mut(&(job.fold, job.number)) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if inject {
            debug!(fold = job.fold, number = job.number, "injecting job failure");
            self.inner
                .completions_tx
                .send(JobCompletion {
                    fold: job.fold,
                    number: job.number,
                    outcome: JobOutcome::Failed {
                        reason: "injected failure".to_string(),
                    },
                })
                .map_err(|e| Error::Queue(e.to_string()))?;
            return Ok(());
        }

        let backend = self.clone();
        let tx = self.inner.completions_tx.clone();
        tokio::spawn(async move {
            let outcome = match worker::run_tree_job(&backend, &job).await {
                Ok(key) => JobOutcome::Trained { key },
                Err(err) => JobOutcome::Failed {
                    reason: err.to_string(),
                },
            };
            let _ = tx.send(JobCompletion {
                fold: job.fold,
                number: job.number,
                outcome,
            });
        });
        Ok(())
    }

    async fn next_completions(&self) -> Result<Vec<JobCompletion>> {
        let mut rx = self.inner.completions_rx.lock().await;
        let first = rx
            .recv()
            .await
            .ok_or_else(|| Error::Queue("completion channel closed".to_string()))?;

        let mut batch = vec![first];
        while batch.len() < COMPLETION_BATCH {
            match rx.try_recv() {
                Ok(completion) => batch.push(completion),
                Err(_) => break,
            }
        }
        Ok(batch)
    }
}
