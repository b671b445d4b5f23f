use std::collections::HashMap;

use crate::events::{ErrorEvent, PerformanceMetric};
use crate::types::{EndpointTiming, ErrorStats, MetricType, PerformanceStats};

pub const SLOWEST_ENDPOINTS_LIMIT: usize = 10;

pub fn summarize_errors(events: &[ErrorEvent]) -> ErrorStats {
    let mut stats = ErrorStats::default();

    for event in events {
        stats.total += 1;
        *stats
            .by_type
            .entry(event.classification.as_str().to_string())
            .or_insert(0) += 1;
        *stats.by_severity.entry(event.severity).or_insert(0) += 1;
        if event.resolved {
            stats.resolved += 1;
        } else {
            stats.unresolved += 1;
        }
    }

    stats
}

/// Averages page loads and API responses, and ranks API endpoints by their
/// mean response time. Endpoints with equal means keep the order in which
/// they first appeared.
pub fn summarize_metrics(metrics: &[PerformanceMetric]) -> PerformanceStats {
    let mut page_loads = Mean::default();
    let mut api_responses = Mean::default();
    let mut endpoints: Vec<(&str, Mean)> = Vec::new();
    let mut endpoint_index: HashMap<&str, usize> = HashMap::new();

    for metric in metrics {
        match metric.metric_type {
            MetricType::PageLoad => page_loads.add(metric.value),
            MetricType::ApiResponse => {
                api_responses.add(metric.value);
                let index = *endpoint_index
                    .entry(metric.metric_name.as_str())
                    .or_insert_with(|| {
                        endpoints.push((metric.metric_name.as_str(), Mean::default()));
                        endpoints.len() - 1
                    });
                endpoints[index].1.add(metric.value);
            }
            MetricType::DatabaseQuery | MetricType::ComponentRender => {}
        }
    }

    let mut slowest_endpoints: Vec<EndpointTiming> = endpoints
        .into_iter()
        .map(|(name, mean)| EndpointTiming {
            name: name.to_string(),
            avg_time: mean.value(),
        })
        .collect();
    slowest_endpoints.sort_by(|a, b| b.avg_time.total_cmp(&a.avg_time));
    slowest_endpoints.truncate(SLOWEST_ENDPOINTS_LIMIT);

    PerformanceStats {
        total_metrics: metrics.len() as u64,
        avg_page_load: page_loads.value(),
        avg_api_response: api_responses.value(),
        slowest_endpoints,
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Mean {
    total: f64,
    count: u64,
}

impl Mean {
    fn add(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
    }

    fn value(self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventContext, EventFactory};
    use crate::session::SessionCorrelator;
    use crate::types::{ErrorClassification, MetricUnit, Severity};

    fn factory() -> EventFactory {
        EventFactory::new(&SessionCorrelator::new(), "test")
    }

    fn api(factory: &EventFactory, name: &str, value: f64) -> PerformanceMetric {
        factory.metric(
            MetricType::ApiResponse,
            name,
            value,
            MetricUnit::Ms,
            EventContext::None,
        )
    }

    #[test]
    fn error_summary_counts_by_severity_and_type() {
        let factory = factory();
        let mut events = Vec::new();
        for i in 0..10 {
            let severity = if i < 6 { Severity::High } else { Severity::Critical };
            let classification = if i < 7 {
                ErrorClassification::Runtime
            } else {
                ErrorClassification::Api
            };
            events.push(factory.error_event(
                format!("error {i}").into(),
                severity,
                classification,
                EventContext::None,
            ));
        }
        events[0].resolved = true;

        let stats = summarize_errors(&events);

        assert_eq!(stats.total, 10);
        assert_eq!(
            stats.by_severity,
            HashMap::from([(Severity::High, 6), (Severity::Critical, 4)])
        );
        assert_eq!(
            stats.by_type,
            HashMap::from([("javascript".to_string(), 7), ("api".to_string(), 3)])
        );
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.unresolved, 9);
    }

    #[test]
    fn metric_summary_averages_api_responses_per_endpoint() {
        let factory = factory();
        let metrics = vec![
            api(&factory, "a", 100.0),
            api(&factory, "a", 200.0),
            api(&factory, "b", 50.0),
        ];

        let stats = summarize_metrics(&metrics);

        assert_eq!(stats.total_metrics, 3);
        assert!((stats.avg_api_response - 116.67).abs() < 0.01);
        assert_eq!(stats.avg_page_load, 0.0);
        assert_eq!(
            stats.slowest_endpoints[0],
            EndpointTiming {
                name: "a".to_string(),
                avg_time: 150.0
            }
        );
        assert_eq!(stats.slowest_endpoints[1].name, "b");
    }

    #[test]
    fn slowest_endpoints_ignore_other_metric_types_and_keep_tie_order() {
        let factory = factory();
        let metrics = vec![
            api(&factory, "/api/quotes", 80.0),
            factory.metric(
                MetricType::DatabaseQuery,
                "health_check",
                900.0,
                MetricUnit::Ms,
                EventContext::None,
            ),
            api(&factory, "/api/customers", 80.0),
            factory.metric(
                MetricType::PageLoad,
                "full_page_load",
                1200.0,
                MetricUnit::Ms,
                EventContext::None,
            ),
            factory.metric(
                MetricType::PageLoad,
                "dom_content_loaded",
                300.0,
                MetricUnit::Ms,
                EventContext::None,
            ),
        ];

        let stats = summarize_metrics(&metrics);

        assert_eq!(stats.total_metrics, 5);
        assert_eq!(stats.avg_page_load, 750.0);
        let names: Vec<&str> = stats
            .slowest_endpoints
            .iter()
            .map(|endpoint| endpoint.name.as_str())
            .collect();
        assert_eq!(names, vec!["/api/quotes", "/api/customers"]);
    }

    #[test]
    fn slowest_endpoints_are_capped_at_ten() {
        let factory = factory();
        let metrics: Vec<PerformanceMetric> = (0..15)
            .map(|i| api(&factory, &format!("/api/e{i}"), f64::from(i)))
            .collect();

        let stats = summarize_metrics(&metrics);

        assert_eq!(stats.slowest_endpoints.len(), SLOWEST_ENDPOINTS_LIMIT);
        assert_eq!(stats.slowest_endpoints[0].name, "/api/e14");
        assert_eq!(stats.slowest_endpoints[9].name, "/api/e5");
    }

    #[test]
    fn empty_inputs_summarize_to_zero() {
        assert_eq!(summarize_errors(&[]), ErrorStats::default());
        assert_eq!(summarize_metrics(&[]), PerformanceStats::default());
    }
}
