use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use log::{debug, error, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{summarize_errors, summarize_metrics};
use crate::config::TelemetryConfig;
use crate::events::{ErrorEvent, EventContext, EventFactory, Fault, MetricSample, PerformanceMetric};
use crate::flush::{FlushDiagnostics, FlushManager, FlushReport, SinkFailureHook};
use crate::session::SessionCorrelator;
use crate::storage::{SinkResult, TelemetrySink};
use crate::types::{ErrorClassification, ErrorStats, PerformanceStats, Severity, TimeWindow};

/// Severity used when a caller reports an error without choosing one.
pub const DEFAULT_SEVERITY: Severity = Severity::High;

/// Entry point for everything the rest of the application reports.
///
/// Cheap to clone; all clones share the same queues and flush loop.
/// Reporting never fails and never blocks on the sink.
#[derive(Clone)]
pub struct TelemetryService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: TelemetryConfig,
    factory: EventFactory,
    flush: Arc<FlushManager>,
    cancel: CancellationToken,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

// The flush loop only holds the manager, so the last handle going away
// has to stop it.
impl Drop for ServiceInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct TelemetryServiceBuilder {
    sink: Arc<dyn TelemetrySink>,
    config: TelemetryConfig,
    session: Option<Arc<SessionCorrelator>>,
    on_sink_failure: Option<SinkFailureHook>,
}

impl TelemetryServiceBuilder {
    pub fn config(mut self, config: TelemetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses a private correlator instead of the process-wide one.
    pub fn session(mut self, session: Arc<SessionCorrelator>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn on_sink_failure(mut self, hook: SinkFailureHook) -> Self {
        self.on_sink_failure = Some(hook);
        self
    }

    /// Builds the service and starts its flush loop on the current tokio
    /// runtime.
    pub fn spawn(self) -> TelemetryService {
        let user_agent = self.config.user_agent.clone();
        let factory = match &self.session {
            Some(session) => EventFactory::new(session, user_agent),
            None => EventFactory::new(SessionCorrelator::process(), user_agent),
        };

        let mut manager = FlushManager::new(self.sink, self.config.retry_cap);
        if let Some(hook) = self.on_sink_failure {
            manager = manager.with_failure_hook(hook);
        }
        let flush = Arc::new(manager);

        let cancel = CancellationToken::new();
        let flush_task = flush.spawn(self.config.flush_interval(), cancel.clone());

        TelemetryService {
            inner: Arc::new(ServiceInner {
                config: self.config,
                factory,
                flush,
                cancel,
                flush_task: Mutex::new(Some(flush_task)),
            }),
        }
    }
}

impl TelemetryService {
    pub fn builder(sink: Arc<dyn TelemetrySink>) -> TelemetryServiceBuilder {
        TelemetryServiceBuilder {
            sink,
            config: TelemetryConfig::default(),
            session: None,
            on_sink_failure: None,
        }
    }

    pub fn spawn(sink: Arc<dyn TelemetrySink>, config: TelemetryConfig) -> Self {
        Self::builder(sink).config(config).spawn()
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.inner.config
    }

    pub fn session_id(&self) -> &str {
        self.inner.factory.session_id()
    }

    /// Page location recorded on events from now on.
    pub fn set_location(&self, location: Option<String>) {
        self.inner.factory.set_location(location);
    }

    pub fn sink(&self) -> &Arc<dyn TelemetrySink> {
        self.inner.flush.sink()
    }

    /// Reports a fault. Without a severity the error is treated as
    /// [`DEFAULT_SEVERITY`]; the classification is inferred from the
    /// context, then from the fault's kind.
    pub fn log_error(
        &self,
        fault: impl Into<Fault>,
        severity: Option<Severity>,
        context: Option<EventContext>,
    ) {
        let fault = fault.into();
        let context = context.unwrap_or_default();
        let classification = context
            .implied_classification()
            .or_else(|| fault.kind().map(|kind| ErrorClassification::Other(kind.to_string())))
            .unwrap_or_default();

        self.record_error(
            fault,
            severity.unwrap_or(DEFAULT_SEVERITY),
            classification,
            context,
        );
    }

    /// Reports a fault whose classification is already known.
    pub fn record_error(
        &self,
        fault: Fault,
        severity: Severity,
        classification: ErrorClassification,
        context: EventContext,
    ) {
        let event = self
            .inner
            .factory
            .error_event(fault, severity, classification, context);
        self.enqueue_error(event);
    }

    pub fn log_performance(&self, sample: MetricSample) {
        let metric = self.inner.factory.metric_from_sample(sample);
        self.enqueue_metric(metric);
    }

    fn enqueue_error(&self, event: ErrorEvent) {
        if self.inner.config.dev_console {
            debug!("error logged: {:?}", event);
        }
        self.inner.flush.enqueue_error(event);
    }

    fn enqueue_metric(&self, metric: PerformanceMetric) {
        if self.inner.config.dev_console {
            debug!("performance metric: {:?}", metric);
        }
        self.inner.flush.enqueue_metric(metric);
    }

    /// Flushes both queues now, independent of the timer.
    pub async fn flush(&self) -> FlushReport {
        self.inner.flush.flush().await
    }

    pub fn diagnostics(&self) -> FlushDiagnostics {
        self.inner.flush.diagnostics()
    }

    /// Error counts over `window`, or `None` when the sink could not be
    /// read.
    pub async fn error_stats(&self, window: TimeWindow) -> Option<ErrorStats> {
        match self.try_error_stats(window).await {
            Ok(stats) => Some(stats),
            Err(error) => {
                error!("failed to get error stats for {}: {}", window.as_str(), error);
                None
            }
        }
    }

    pub async fn try_error_stats(&self, window: TimeWindow) -> SinkResult<ErrorStats> {
        let since = window.since(Utc::now());
        let events = self.sink().query_errors(since).await?;
        Ok(summarize_errors(&events))
    }

    /// Performance summary over `window`, or `None` when the sink could not
    /// be read.
    pub async fn performance_stats(&self, window: TimeWindow) -> Option<PerformanceStats> {
        match self.try_performance_stats(window).await {
            Ok(stats) => Some(stats),
            Err(error) => {
                error!(
                    "failed to get performance stats for {}: {}",
                    window.as_str(),
                    error
                );
                None
            }
        }
    }

    pub async fn try_performance_stats(&self, window: TimeWindow) -> SinkResult<PerformanceStats> {
        let since = window.since(Utc::now());
        let metrics = self.sink().query_metrics(since).await?;
        Ok(summarize_metrics(&metrics))
    }

    /// Stops the flush timer and drains whatever is still queued.
    ///
    /// Best effort: if the final flush fails, the bounded prefix stays
    /// queued and nothing flushes it again automatically.
    pub async fn destroy(&self) -> FlushReport {
        self.inner.cancel.cancel();
        let flush_task = self
            .inner
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(flush_task) = flush_task {
            if let Err(join_error) = flush_task.await {
                warn!("telemetry flush loop ended abnormally: {}", join_error);
            }
        }
        self.inner.flush.flush().await
    }
}
