//! Reconciliation of stuck publications.
//!
//! A publication stays unclustered when its `cluster` call failed (provider
//! outage, storage error) or the process stopped before the queue drained.
//! The [`Reconciler`] periodically re-enqueues recent unclustered
//! publications; [`recluster_pending`] does the same inline for one-shot
//! maintenance runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pulse_core::config::ClusteringConfig;
use pulse_core::types::hours_before;
use pulse_storage::StoryStore;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::cluster::ClusteringEngine;
use crate::error::InsightError;
use crate::queue::ClusterQueue;

/// Result of an inline reclustering run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub clustered: usize,
    pub failed: usize,
}

/// Background task re-enqueueing unclustered publications.
pub struct Reconciler {
    store: Arc<dyn StoryStore>,
    queue: ClusterQueue,
    window_hours: u32,
    interval: Duration,
    batch_limit: usize,
    shutdown: Arc<Notify>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn StoryStore>, queue: ClusterQueue, config: &ClusteringConfig) -> Self {
        Self {
            store,
            queue,
            window_hours: config.reconcile_window_hours,
            interval: Duration::from_secs(config.reconcile_interval_minutes.max(1) * 60),
            batch_limit: config.reconcile_batch_limit.max(1),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Re-enqueue unclustered publications from the window. Returns how
    /// many ids were queued.
    pub async fn sweep_once(&self) -> Result<usize, InsightError> {
        self.sweep_at(Utc::now()).await
    }

    async fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize, InsightError> {
        let ids = self
            .store
            .unclustered_publication_ids(hours_before(now, self.window_hours), self.batch_limit)
            .await?;
        let mut queued = 0;
        for id in ids {
            self.queue.enqueue(id).await?;
            queued += 1;
        }
        if queued > 0 {
            info!(queued, "Re-enqueued unclustered publications");
        } else {
            debug!("No unclustered publications to reconcile");
        }
        Ok(queued)
    }

    /// Sweep on every interval tick until shutdown or until the queue closes.
    pub async fn run(&self) {
        loop {
            match self.sweep_once().await {
                Ok(_) => {}
                Err(InsightError::QueueClosed) => {
                    debug!("Clustering queue closed, reconciler stopping");
                    return;
                }
                Err(e) => warn!(error = %e, "Reconciliation sweep failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.notified() => return,
            }
        }
    }

    /// Signal the reconciler to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// Cluster every unclustered publication published since `since`, inline.
pub async fn recluster_pending(
    engine: &ClusteringEngine,
    store: &dyn StoryStore,
    since: DateTime<Utc>,
    limit: usize,
) -> Result<ReconcileReport, InsightError> {
    let ids = store.unclustered_publication_ids(since, limit).await?;
    let mut report = ReconcileReport {
        scanned: ids.len(),
        ..ReconcileReport::default()
    };

    for id in ids {
        match engine.cluster(id).await {
            Ok(_) => report.clustered += 1,
            Err(e) => {
                report.failed += 1;
                warn!(
                    publication_id = id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Reclustering failed"
                );
            }
        }
    }

    info!(
        scanned = report.scanned,
        clustered = report.clustered,
        failed = report.failed,
        "Reclustering finished"
    );
    Ok(report)
}
