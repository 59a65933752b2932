//! Best-effort usage auditing.
//!
//! Engines hand [`UsageRecord`]s to an [`AuditDispatcher`], which queues them on a bounded
//! channel drained by a detached task. Submitting never waits and never fails: a full queue
//! drops the record, and a sink error is logged. Both are counted in [`AuditMetrics`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::AuditResult;
use crate::orchestrator::ProcessingMethod;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: Uuid,
    pub feature: String,
    pub provider: String,
    #[serde(rename = "responseTimeMs", serialize_with = "serialize_millis")]
    pub response_time: Duration,
    pub outcome_method: ProcessingMethod,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(
        feature: impl Into<String>,
        provider: impl Into<String>,
        response_time: Duration,
        outcome_method: ProcessingMethod,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            feature: feature.into(),
            provider: provider.into(),
            response_time,
            outcome_method,
            recorded_at: Utc::now(),
        }
    }
}

fn serialize_millis<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(value.as_millis() as u64)
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_usage(&self, record: UsageRecord) -> AuditResult<()>;
}

/// Sink that writes each record to the `tracing` pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record_usage(&self, record: UsageRecord) -> AuditResult<()> {
        tracing::info!(
            target: "cds::audit",
            id = %record.id,
            feature = %record.feature,
            provider = %record.provider,
            response_time_ms = record.response_time.as_millis() as u64,
            method = %record.outcome_method,
            "usage recorded"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct AuditMetrics {
    submitted: AtomicU64,
    recorded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMetricsSnapshot {
    pub submitted: u64,
    pub recorded: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl AuditMetrics {
    pub fn snapshot(&self) -> AuditMetricsSnapshot {
        AuditMetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            recorded: self.recorded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Handle for submitting usage records. Cheap to clone; the background task stops once every
/// clone has been dropped and the queue is drained.
#[derive(Debug, Clone)]
pub struct AuditDispatcher {
    tx: mpsc::Sender<UsageRecord>,
    metrics: Arc<AuditMetrics>,
}

impl AuditDispatcher {
    /// Start the background task draining into `sink`. Must be called inside a Tokio runtime.
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<UsageRecord>(capacity.max(1));
        let metrics = Arc::new(AuditMetrics::default());

        let worker_metrics = metrics.clone();
        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let id = record.id;
                match sink.record_usage(record).await {
                    Ok(()) => {
                        worker_metrics.recorded.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        worker_metrics.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(record_id = %id, error = %e, "audit sink failed");
                    }
                }
            }
            tracing::debug!("audit dispatcher stopped");
        });

        (Self { tx, metrics }, handle)
    }

    /// Queue `record` without waiting.
    pub fn submit(&self, record: UsageRecord) {
        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.tx.try_send(record) {
            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "dispatcher stopped",
            };
            tracing::warn!(reason, "audit record dropped");
        }
    }

    pub fn metrics(&self) -> AuditMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Counters that outlive this handle, for reading after shutdown.
    pub fn shared_metrics(&self) -> Arc<AuditMetrics> {
        self.metrics.clone()
    }
}
