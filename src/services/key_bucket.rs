//! Key-bucket executor.
//!
//! Preserves per-partition-key ordering while allowing parallelism across
//! keys: events sharing a key hash to the same bucket, and each bucket is
//! a single worker draining a channel sequentially.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct KeyBucketExecutor {
    senders: Vec<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl KeyBucketExecutor {
    /// Create `buckets` workers, each with a bounded queue of `depth`.
    pub fn new(buckets: usize, depth: usize) -> Self {
        let buckets = buckets.max(1);
        let mut senders = Vec::with_capacity(buckets);
        let mut workers = Vec::with_capacity(buckets);

        for i in 0..buckets {
            let (tx, mut rx) = mpsc::channel::<Job>(depth.max(1));
            senders.push(tx);
            workers.push(tokio::spawn(async move {
                while let Some(job) = rx.recv().await {
                    job.await;
                }
                tracing::debug!(bucket = i, "Key bucket drained");
            }));
        }

        Self { senders, workers }
    }

    fn bucket_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.senders.len()
    }

    /// Run `fut` on the bucket owning `key` and wait for its result.
    /// Jobs submitted for the same key execute in submission order.
    pub async fn run<T, F>(&self, key: &str, fut: F) -> T
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(fut.await);
        });

        let bucket = self.bucket_for(key);
        if let Err(rejected) = self.senders[bucket].send(job).await {
            // Shutdown race: run the job inline rather than lose it.
            rejected.0.await;
        }

        rx.await.expect("bucket job always sends its result")
    }

    /// Close all queues and wait for the workers to drain.
    pub async fn shutdown(mut self) {
        self.senders.clear();
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn same_key_preserves_order() {
        let executor = Arc::new(KeyBucketExecutor::new(4, 16));
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let seen = Arc::clone(&seen);
            executor
                .run("tenant-1", async move {
                    seen.lock().await.push(i);
                })
                .await;
        }

        assert_eq!(*seen.lock().await, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn results_are_returned() {
        let executor = KeyBucketExecutor::new(2, 4);
        let out = executor.run("k", async { 21 * 2 }).await;
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn different_keys_use_stable_buckets() {
        let executor = KeyBucketExecutor::new(8, 4);
        assert_eq!(executor.bucket_for("a"), executor.bucket_for("a"));
    }

    #[tokio::test]
    async fn shutdown_drains() {
        let executor = KeyBucketExecutor::new(2, 4);
        executor.run("k", async {}).await;
        executor.shutdown().await;
    }
}
