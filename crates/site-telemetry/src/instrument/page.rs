use serde::{Deserialize, Serialize};

use crate::events::{clamp_non_negative, EventContext, Fault, MetricSample};
use crate::service::TelemetryService;
use crate::types::{LegacyLevel, MetricType, MetricUnit};

/// Navigation timestamps, in milliseconds on the host's clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationTiming {
    pub navigation_start: f64,
    pub dom_content_loaded_event_end: f64,
    pub load_event_end: f64,
}

impl NavigationTiming {
    pub fn dom_content_loaded(&self) -> f64 {
        clamp_non_negative(self.dom_content_loaded_event_end - self.navigation_start)
    }

    pub fn full_page_load(&self) -> f64 {
        clamp_non_negative(self.load_event_end - self.navigation_start)
    }
}

/// Records the two page-load milestones and raises an alert when the full
/// load took longer than the configured threshold.
pub fn observe_page_load(service: &TelemetryService, timing: NavigationTiming) {
    let full_page_load = timing.full_page_load();
    for (name, value) in [
        ("dom_content_loaded", timing.dom_content_loaded()),
        ("full_page_load", full_page_load),
    ] {
        service.log_performance(MetricSample::new(
            MetricType::PageLoad,
            name,
            value,
            MetricUnit::Ms,
        ));
    }

    if full_page_load > service.config().slow_page_load_ms {
        service.log_error(
            Fault::new(format!("Slow page load detected: {:.0}ms", full_page_load)),
            Some(LegacyLevel::Warn.into()),
            Some(EventContext::alert("slow_page_load", Some(full_page_load))),
        );
    }
}

pub fn observe_largest_contentful_paint(service: &TelemetryService, start_time_ms: f64) {
    service.log_performance(MetricSample::new(
        MetricType::PageLoad,
        "largest_contentful_paint",
        start_time_ms,
        MetricUnit::Ms,
    ));
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::memory::MemorySink;
    use crate::session::SessionCorrelator;
    use crate::types::{ErrorClassification, Severity};

    fn service(sink: &MemorySink) -> TelemetryService {
        TelemetryService::builder(Arc::new(sink.clone()))
            .session(Arc::new(SessionCorrelator::new()))
            .spawn()
    }

    #[tokio::test]
    async fn page_load_records_both_milestones() {
        let sink = MemorySink::new();
        let service = service(&sink);

        observe_page_load(
            &service,
            NavigationTiming {
                navigation_start: 1000.0,
                dom_content_loaded_event_end: 1450.0,
                load_event_end: 2200.0,
            },
        );
        service.flush().await;

        let metrics: Vec<(String, f64)> = sink
            .metrics()
            .await
            .into_iter()
            .map(|metric| (metric.metric_name, metric.value))
            .collect();
        assert_eq!(
            metrics,
            vec![
                ("dom_content_loaded".to_string(), 450.0),
                ("full_page_load".to_string(), 1200.0),
            ]
        );
        assert!(sink.errors().await.is_empty());

        service.destroy().await;
    }

    #[tokio::test]
    async fn slow_loads_raise_an_alert() {
        let sink = MemorySink::new();
        let service = service(&sink);

        observe_page_load(
            &service,
            NavigationTiming {
                navigation_start: 0.0,
                dom_content_loaded_event_end: 1800.0,
                load_event_end: 4250.0,
            },
        );
        service.flush().await;

        let errors = sink.errors().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Slow page load detected: 4250ms");
        assert_eq!(errors[0].severity, Severity::Medium);
        assert_eq!(errors[0].classification, ErrorClassification::default());
        assert_eq!(
            errors[0].context,
            EventContext::alert("slow_page_load", Some(4250.0))
        );

        service.destroy().await;
    }

    #[tokio::test]
    async fn inconsistent_clocks_clamp_to_zero() {
        let sink = MemorySink::new();
        let service = service(&sink);

        observe_page_load(
            &service,
            NavigationTiming {
                navigation_start: 500.0,
                dom_content_loaded_event_end: 0.0,
                load_event_end: 0.0,
            },
        );
        observe_largest_contentful_paint(&service, 812.5);
        service.flush().await;

        let values: Vec<f64> = sink
            .metrics()
            .await
            .into_iter()
            .map(|metric| metric.value)
            .collect();
        assert_eq!(values, vec![0.0, 0.0, 812.5]);

        service.destroy().await;
    }
}
