use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use reqwest::{IntoUrl, Method, Request, RequestBuilder, Response};

use super::observe;
use crate::events::{EventContext, Fault, MetricSample};
use crate::service::TelemetryService;
use crate::types::{ErrorClassification, MetricType, MetricUnit, Severity};

pub const DEFAULT_METHOD: &str = "GET";
const NETWORK_ERROR: &str = "Network Error";

/// What the interceptor needs to know about a response.
pub trait ResponseStatus {
    fn status_code(&self) -> u16;

    fn status_text(&self) -> String;

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code())
    }
}

impl ResponseStatus for Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }

    fn status_text(&self) -> String {
        self.status()
            .canonical_reason()
            .unwrap_or_default()
            .to_string()
    }

    fn is_success(&self) -> bool {
        self.status().is_success()
    }
}

/// Times outbound calls and reports their outcome. The call's result is
/// handed back untouched.
#[derive(Clone)]
pub struct NetworkInterceptor {
    service: TelemetryService,
}

impl NetworkInterceptor {
    pub fn new(service: TelemetryService) -> Self {
        Self { service }
    }

    pub async fn observe<F, R, E>(&self, target: &str, method: Option<&str>, call: F) -> Result<R, E>
    where
        F: Future<Output = Result<R, E>>,
        R: ResponseStatus,
        E: Display,
    {
        let method = method.unwrap_or(DEFAULT_METHOD).to_ascii_uppercase();
        let start = Instant::now();
        let result = call.await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        observe("network", || match &result {
            Ok(response) => self.record_response(target, &method, response, duration_ms),
            Err(error) => self.record_failure(target, &method, error, duration_ms),
        });
        result
    }

    fn record_response<R: ResponseStatus>(
        &self,
        target: &str,
        method: &str,
        response: &R,
        duration_ms: f64,
    ) {
        let status = response.status_code();
        self.service.log_performance(
            MetricSample::new(MetricType::ApiResponse, target, duration_ms, MetricUnit::Ms)
                .with_context(EventContext::Request {
                    status,
                    method: method.to_string(),
                }),
        );

        if response.is_success() {
            return;
        }
        let status_text = response.status_text();
        let severity = if status >= 500 {
            Severity::Critical
        } else {
            Severity::Medium
        };
        self.service.record_error(
            Fault::new(format!("API Error: {} {}", status, status_text)),
            severity,
            ErrorClassification::Api,
            EventContext::ApiResponse {
                endpoint: target.to_string(),
                method: method.to_string(),
                status,
                status_text,
            },
        );
    }

    fn record_failure<E: Display>(&self, target: &str, method: &str, error: &E, duration_ms: f64) {
        let message = error.to_string();
        let message = if message.trim().is_empty() {
            NETWORK_ERROR.to_string()
        } else {
            message
        };
        self.service.record_error(
            Fault::new(message),
            Severity::Critical,
            ErrorClassification::Network,
            EventContext::NetworkFailure {
                endpoint: target.to_string(),
                method: method.to_string(),
                duration_ms,
            },
        );
    }
}

/// A `reqwest::Client` whose requests are all reported through a
/// [`NetworkInterceptor`]. Endpoints are recorded by URL path.
#[derive(Clone)]
pub struct InstrumentedClient {
    client: reqwest::Client,
    interceptor: NetworkInterceptor,
}

impl InstrumentedClient {
    pub fn new(client: reqwest::Client, service: TelemetryService) -> Self {
        Self {
            client,
            interceptor: NetworkInterceptor::new(service),
        }
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.client.request(method, url)
    }

    pub async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        let target = request.url().path().to_string();
        let method = request.method().as_str().to_string();
        self.interceptor
            .observe(&target, Some(method.as_str()), self.client.execute(request))
            .await
    }

    /// Builds and executes `builder`. A request that cannot be built was
    /// never sent, so nothing is recorded for it.
    pub async fn send(&self, builder: RequestBuilder) -> reqwest::Result<Response> {
        let request = builder.build()?;
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use wiremock::matchers::{method as http_method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::memory::MemorySink;
    use crate::session::SessionCorrelator;

    struct Reply(u16, &'static str);

    impl ResponseStatus for Reply {
        fn status_code(&self) -> u16 {
            self.0
        }

        fn status_text(&self) -> String {
            self.1.to_string()
        }
    }

    fn service(sink: &MemorySink) -> TelemetryService {
        TelemetryService::builder(Arc::new(sink.clone()))
            .session(Arc::new(SessionCorrelator::new()))
            .spawn()
    }

    #[tokio::test]
    async fn successful_responses_record_only_a_metric() {
        let sink = MemorySink::new();
        let service = service(&sink);
        let interceptor = NetworkInterceptor::new(service.clone());

        let result = interceptor
            .observe("/api/quotes", None, async { Ok::<_, String>(Reply(200, "OK")) })
            .await;
        assert_eq!(result.map(|reply| reply.0), Ok(200));

        service.flush().await;
        assert!(sink.errors().await.is_empty());
        let metrics = sink.metrics().await;
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].metric_type, MetricType::ApiResponse);
        assert_eq!(metrics[0].metric_name, "/api/quotes");
        assert_eq!(
            metrics[0].context,
            EventContext::Request {
                status: 200,
                method: "GET".to_string()
            }
        );

        service.destroy().await;
    }

    #[tokio::test]
    async fn client_errors_are_medium_and_server_errors_critical() {
        let sink = MemorySink::new();
        let service = service(&sink);
        let interceptor = NetworkInterceptor::new(service.clone());

        let _ = interceptor
            .observe("/api/customers/7", Some("delete"), async {
                Ok::<_, String>(Reply(404, "Not Found"))
            })
            .await;
        let _ = interceptor
            .observe("/api/invoices", Some("POST"), async {
                Ok::<_, String>(Reply(502, "Bad Gateway"))
            })
            .await;
        service.flush().await;

        let errors = sink.errors().await;
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "API Error: 404 Not Found");
        assert_eq!(errors[0].severity, Severity::Medium);
        assert_eq!(errors[0].classification, ErrorClassification::Api);
        assert_eq!(
            errors[0].context,
            EventContext::ApiResponse {
                endpoint: "/api/customers/7".to_string(),
                method: "DELETE".to_string(),
                status: 404,
                status_text: "Not Found".to_string(),
            }
        );
        assert_eq!(errors[1].severity, Severity::Critical);
        assert_eq!(sink.metrics().await.len(), 2);

        service.destroy().await;
    }

    #[tokio::test]
    async fn transport_failures_are_critical_network_errors() {
        let sink = MemorySink::new();
        let service = service(&sink);
        let interceptor = NetworkInterceptor::new(service.clone());

        let result = interceptor
            .observe("/api/quotes", None, async { Err::<Reply, _>(String::new()) })
            .await;
        assert!(result.is_err());
        service.flush().await;

        let errors = sink.errors().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, NETWORK_ERROR);
        assert_eq!(errors[0].severity, Severity::Critical);
        assert_eq!(errors[0].classification, ErrorClassification::Network);
        assert!(matches!(
            &errors[0].context,
            EventContext::NetworkFailure { endpoint, method, .. }
                if endpoint == "/api/quotes" && method == "GET"
        ));
        assert!(sink.metrics().await.is_empty());

        service.destroy().await;
    }

    #[tokio::test]
    async fn instrumented_client_reports_real_responses() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(http_method("POST"))
            .and(path("/api/orders"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sink = MemorySink::new();
        let service = service(&sink);
        let client = InstrumentedClient::new(reqwest::Client::new(), service.clone());

        let ok = client
            .send(client.request(Method::GET, format!("{}/api/health", server.uri())))
            .await
            .expect("health request");
        assert_eq!(ok.status().as_u16(), 200);

        let unavailable = client
            .send(client.request(Method::POST, format!("{}/api/orders", server.uri())))
            .await
            .expect("orders request");
        assert_eq!(unavailable.status().as_u16(), 503);

        service.flush().await;
        let names: Vec<String> = sink
            .metrics()
            .await
            .into_iter()
            .map(|metric| metric.metric_name)
            .collect();
        assert_eq!(names, vec!["/api/health", "/api/orders"]);

        let errors = sink.errors().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "API Error: 503 Service Unavailable");
        assert_eq!(errors[0].severity, Severity::Critical);

        service.destroy().await;
    }
}
