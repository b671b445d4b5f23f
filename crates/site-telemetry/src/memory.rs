use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::events::{ErrorEvent, PerformanceMetric};
use crate::storage::{SinkError, SinkResult, TelemetrySink};

/// In-process sink. Keeps everything it is given, and can be switched into
/// a failing mode to simulate an unreachable store.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    errors: Arc<RwLock<Vec<ErrorEvent>>>,
    metrics: Arc<RwLock<Vec<PerformanceMetric>>>,
    failing: Arc<AtomicBool>,
    error_batches: Arc<AtomicUsize>,
    metric_batches: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn errors(&self) -> Vec<ErrorEvent> {
        self.errors.read().await.clone()
    }

    pub async fn metrics(&self) -> Vec<PerformanceMetric> {
        self.metrics.read().await.clone()
    }

    /// Number of `insert_errors` calls that were accepted.
    pub fn error_batches(&self) -> usize {
        self.error_batches.load(Ordering::SeqCst)
    }

    pub fn metric_batches(&self) -> usize {
        self.metric_batches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> SinkResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("memory sink set to fail".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn insert_errors(&self, batch: &[ErrorEvent]) -> SinkResult<()> {
        self.check_available()?;
        self.errors.write().await.extend_from_slice(batch);
        self.error_batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn insert_metrics(&self, batch: &[PerformanceMetric]) -> SinkResult<()> {
        self.check_available()?;
        self.metrics.write().await.extend_from_slice(batch);
        self.metric_batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query_errors(&self, since: DateTime<Utc>) -> SinkResult<Vec<ErrorEvent>> {
        self.check_available()?;
        let errors = self.errors.read().await;
        Ok(errors
            .iter()
            .filter(|event| event.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn query_metrics(&self, since: DateTime<Utc>) -> SinkResult<Vec<PerformanceMetric>> {
        self.check_available()?;
        let metrics = self.metrics.read().await;
        Ok(metrics
            .iter()
            .filter(|metric| metric.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> SinkResult<()> {
        self.check_available()
    }
}
