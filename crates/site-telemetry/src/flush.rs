use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::events::{ErrorEvent, PerformanceMetric};
use crate::instrument::observe;
use crate::queue::EventQueue;
use crate::storage::{SinkResult, TelemetrySink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Errors,
    Metrics,
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Errors => f.write_str("errors"),
            Self::Metrics => f.write_str("metrics"),
        }
    }
}

/// Delivered to the failure hook each time the sink rejects a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFailure {
    pub kind: BatchKind,
    pub batch_size: usize,
    pub requeued: usize,
    pub dropped: usize,
    pub error: String,
}

pub type SinkFailureHook = Arc<dyn Fn(&SinkFailure) + Send + Sync>;

/// Outcome of one `flush` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub errors_sent: usize,
    pub metrics_sent: usize,
    pub requeued: usize,
    pub dropped: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushDiagnostics {
    pub delivered_events: u64,
    pub failed_flushes: u64,
    pub dropped_events: u64,
    pub pending_errors: usize,
    pub pending_metrics: usize,
}

/// Owns the error and metric queues and ships them to the sink.
pub struct FlushManager {
    sink: Arc<dyn TelemetrySink>,
    errors: EventQueue<ErrorEvent>,
    metrics: EventQueue<PerformanceMetric>,
    retry_cap: usize,
    urgent: Notify,
    on_sink_failure: Option<SinkFailureHook>,
    delivered_events: AtomicU64,
    failed_flushes: AtomicU64,
    dropped_events: AtomicU64,
}

impl FlushManager {
    pub fn new(sink: Arc<dyn TelemetrySink>, retry_cap: usize) -> Self {
        Self {
            sink,
            errors: EventQueue::new(),
            metrics: EventQueue::new(),
            retry_cap,
            urgent: Notify::new(),
            on_sink_failure: None,
            delivered_events: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
        }
    }

    pub fn with_failure_hook(mut self, hook: SinkFailureHook) -> Self {
        self.on_sink_failure = Some(hook);
        self
    }

    pub fn sink(&self) -> &Arc<dyn TelemetrySink> {
        &self.sink
    }

    /// Queues an error; critical errors also wake the flush loop right away.
    pub fn enqueue_error(&self, event: ErrorEvent) {
        let urgent = event.severity.flushes_immediately();
        self.errors.push(event);
        if urgent {
            self.urgent.notify_one();
        }
    }

    pub fn enqueue_metric(&self, metric: PerformanceMetric) {
        self.metrics.push(metric);
    }

    /// Drains both queues into the sink.
    ///
    /// Both queues are swapped out before the first sink call. When the sink
    /// rejects a batch only its first `retry_cap` items are put back; the
    /// rest are dropped so a dead sink cannot grow memory without bound.
    pub async fn flush(&self) -> FlushReport {
        let mut report = FlushReport::default();

        let errors = self.errors.take();
        let metrics = self.metrics.take();

        if !errors.is_empty() {
            let result = self.sink.insert_errors(&errors).await;
            let sent = self.settle(BatchKind::Errors, &self.errors, errors, result, &mut report);
            report.errors_sent = sent;
        }

        if !metrics.is_empty() {
            let result = self.sink.insert_metrics(&metrics).await;
            let sent = self.settle(BatchKind::Metrics, &self.metrics, metrics, result, &mut report);
            report.metrics_sent = sent;
        }

        if !report.is_empty() {
            debug!("telemetry flush: {:?}", report);
        }
        report
    }

    /// Returns the number of items delivered.
    fn settle<T>(
        &self,
        kind: BatchKind,
        queue: &EventQueue<T>,
        mut batch: Vec<T>,
        result: SinkResult<()>,
        report: &mut FlushReport,
    ) -> usize {
        let batch_size = batch.len();
        let error = match result {
            Ok(()) => {
                self.delivered_events
                    .fetch_add(batch_size as u64, Ordering::Relaxed);
                return batch_size;
            }
            Err(error) => error,
        };

        batch.truncate(self.retry_cap);
        let requeued = batch.len();
        let dropped = batch_size - requeued;
        queue.requeue_front(batch);

        self.failed_flushes.fetch_add(1, Ordering::Relaxed);
        self.dropped_events
            .fetch_add(dropped as u64, Ordering::Relaxed);
        report.requeued += requeued;
        report.dropped += dropped;

        warn!(
            "failed to flush {} {}: {} ({} requeued, {} dropped)",
            batch_size, kind, error, requeued, dropped
        );

        if let Some(hook) = &self.on_sink_failure {
            let failure = SinkFailure {
                kind,
                batch_size,
                requeued,
                dropped,
                error: error.to_string(),
            };
            observe("sink failure hook", || hook(&failure));
        }
        0
    }

    pub fn diagnostics(&self) -> FlushDiagnostics {
        FlushDiagnostics {
            delivered_events: self.delivered_events.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            pending_errors: self.errors.len(),
            pending_metrics: self.metrics.len(),
        }
    }

    /// Runs the periodic flush loop until `cancel` fires.
    ///
    /// The first tick is one full `period` after the call. A critical error
    /// wakes the loop early; a flush already in progress when `cancel` fires
    /// is allowed to finish.
    pub fn spawn(self: &Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("telemetry flush loop started ({:?} interval)", period);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = manager.urgent.notified() => {
                        manager.flush().await;
                    }
                    _ = ticker.tick() => {
                        manager.flush().await;
                    }
                }
            }

            info!("telemetry flush loop stopped");
        })
    }
}
