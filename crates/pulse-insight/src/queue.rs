//! Clustering work queue.
//!
//! Ingestion pushes publication ids into a bounded channel and a worker pool
//! drains it, running at most `workers` `cluster` calls at once. A full
//! queue makes producers wait. Failed ids are dropped from the queue and
//! picked up again by the reconciliation sweep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cluster::ClusteringEngine;
use crate::error::InsightError;

/// Producer side of the clustering queue.
#[derive(Debug, Clone)]
pub struct ClusterQueue {
    tx: mpsc::Sender<i64>,
}

impl ClusterQueue {
    /// Create a queue holding at most `capacity` pending ids.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<i64>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue a publication id, waiting while the queue is full.
    pub async fn enqueue(&self, publication_id: i64) -> Result<(), InsightError> {
        self.tx
            .send(publication_id)
            .await
            .map_err(|_| InsightError::QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Counters for a running worker pool.
#[derive(Debug, Default)]
pub struct PoolStats {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl PoolStats {
    /// Ids whose `cluster` call succeeded.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Consumer side: runs clustering for queued ids.
pub struct ClusterWorkerPool {
    engine: Arc<ClusteringEngine>,
    workers: usize,
    shutdown: Arc<Notify>,
    stats: Arc<PoolStats>,
}

impl ClusterWorkerPool {
    pub fn new(engine: Arc<ClusteringEngine>, workers: usize) -> Self {
        Self {
            engine,
            workers: workers.max(1),
            shutdown: Arc::new(Notify::new()),
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    /// Drain the queue until every producer is dropped or shutdown is
    /// signalled, then wait for in-flight calls to finish.
    pub async fn run(&self, mut rx: mpsc::Receiver<i64>) {
        info!(workers = self.workers, "Clustering workers started");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                Some(joined) = tasks.join_next() => log_join(joined),
                received = rx.recv(), if tasks.len() < self.workers => {
                    let Some(publication_id) = received else {
                        debug!("Clustering queue closed");
                        break;
                    };
                    let engine = Arc::clone(&self.engine);
                    let stats = Arc::clone(&self.stats);
                    tasks.spawn(async move {
                        process(&engine, &stats, publication_id).await;
                    });
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
        info!(
            processed = self.stats.processed(),
            failed = self.stats.failed(),
            "Clustering workers stopped"
        );
    }

    /// Signal the pool to stop taking new ids.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

async fn process(engine: &ClusteringEngine, stats: &PoolStats, publication_id: i64) {
    match engine.cluster(publication_id).await {
        Ok(outcome) => {
            stats.processed.fetch_add(1, Ordering::Relaxed);
            debug!(publication_id, story_id = outcome.story_id(), "Publication clustered");
        }
        Err(InsightError::EmptyContent(_)) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            debug!(publication_id, "Publication has no text, skipped");
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                publication_id,
                error = %e,
                retryable = e.is_retryable(),
                "Clustering failed"
            );
        }
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Clustering task panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_core::config::ClusteringConfig;
    use pulse_core::types::{NewChannel, NewPublication};
    use pulse_storage::{ChannelRepository, Database, SqliteStoryStore, StoryStore};
    use pulse_vector::embedding::MockEmbedding;

    use crate::metadata::PlaceholderMetadata;

    async fn setup(texts: &[&str]) -> (Arc<ClusteringEngine>, Arc<SqliteStoryStore>, Vec<i64>) {
        let db = Arc::new(Database::in_memory().unwrap());
        let channel_id = ChannelRepository::new(Arc::clone(&db))
            .upsert(&NewChannel {
                platform_id: 1,
                title: "Wire".to_string(),
                handle: None,
                category: None,
            })
            .unwrap()
            .id;
        let store = Arc::new(SqliteStoryStore::new(db));

        let mut ids = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let id = store
                .insert_publication(NewPublication {
                    channel_id,
                    message_id: i as i64 + 1,
                    content: text.to_string(),
                    url: None,
                    published_at: Utc::now(),
                    views: 0,
                })
                .await
                .unwrap();
            ids.push(id);
        }

        let engine = Arc::new(ClusteringEngine::new(
            store.clone(),
            Arc::new(MockEmbedding::with_dimensions(16)),
            Arc::new(PlaceholderMetadata),
            ClusteringConfig::default(),
        ));
        (engine, store, ids)
    }

    #[tokio::test]
    async fn test_pool_drains_queue_until_closed() {
        let (engine, store, ids) = setup(&["one", "two", "three", "four", "   "]).await;
        let (queue, rx) = ClusterQueue::bounded(8);
        for id in &ids {
            queue.enqueue(*id).await.unwrap();
        }
        drop(queue);

        let pool = ClusterWorkerPool::new(engine, 2);
        let stats = pool.stats();
        pool.run(rx).await;

        assert_eq!(stats.processed(), 4);
        assert_eq!(stats.failed(), 1);
        for id in &ids[..4] {
            assert!(store.get_publication(*id).await.unwrap().story_id.is_some());
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_pool() {
        let (engine, _store, _ids) = setup(&[]).await;
        let (queue, rx) = ClusterQueue::bounded(4);

        let pool = Arc::new(ClusterWorkerPool::new(engine, 1));
        let runner = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.run(rx).await })
        };
        pool.shutdown();
        runner.await.unwrap();

        // The receiver is gone once the pool returns.
        assert!(queue.is_closed());
        assert!(matches!(queue.enqueue(1).await, Err(InsightError::QueueClosed)));
    }
}
