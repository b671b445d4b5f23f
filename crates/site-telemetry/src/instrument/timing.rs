use std::future::Future;
use std::time::Instant;

use crate::events::MetricSample;
use crate::service::TelemetryService;
use crate::types::{MetricType, MetricUnit};

/// Times `operation` and records the elapsed milliseconds under `name`.
pub async fn measure<F>(
    service: &TelemetryService,
    metric_type: MetricType,
    name: impl Into<String>,
    operation: F,
) -> F::Output
where
    F: Future,
{
    let start = Instant::now();
    let output = operation.await;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    service.log_performance(MetricSample::new(
        metric_type,
        name,
        elapsed_ms,
        MetricUnit::Ms,
    ));
    output
}
