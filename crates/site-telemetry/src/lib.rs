pub mod aggregator;
pub mod config;
pub mod events;
pub mod flush;
pub mod health;
pub mod instrument;
pub mod memory;
pub mod queue;
pub mod service;
pub mod session;
pub mod storage;
pub mod types;

pub use aggregator::{summarize_errors, summarize_metrics, SLOWEST_ENDPOINTS_LIMIT};
pub use config::TelemetryConfig;
pub use events::{
    clamp_non_negative, ErrorEvent, EventContext, EventFactory, Fault, MetricSample, Origin,
    PerformanceMetric,
};
pub use flush::{
    BatchKind, FlushDiagnostics, FlushManager, FlushReport, SinkFailure, SinkFailureHook,
};
pub use health::{HealthMonitor, HealthMonitorHandle};
pub use instrument::{
    install_panic_observer, measure, observe_largest_contentful_paint, observe_page_load,
    report_rejection, spawn_observed, InstrumentedClient, NavigationTiming, NetworkInterceptor,
    ResponseStatus,
};
pub use memory::MemorySink;
pub use queue::EventQueue;
pub use service::{TelemetryService, TelemetryServiceBuilder, DEFAULT_SEVERITY};
pub use session::SessionCorrelator;
pub use storage::{SinkError, SinkResult, SqliteTelemetryStorage, TelemetrySink};
pub use types::{
    DatabaseStatus, EndpointTiming, ErrorClassification, ErrorStats, LegacyLevel, MetricType,
    MetricUnit, PerformanceStats, Severity, SystemHealth, TimeWindow, DEFAULT_CLASSIFICATION,
};
