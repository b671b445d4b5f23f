use std::fmt::Display;
use std::future::Future;

use tokio::task::JoinHandle;

use crate::events::{EventContext, Fault};
use crate::service::TelemetryService;
use crate::types::{ErrorClassification, Severity};

pub const UNHANDLED_REJECTION: &str = "Unhandled task rejection";

/// Spawns a detached task and reports its `Err` output, which nobody would
/// otherwise see. Panics are left to the panic observer.
pub fn spawn_observed<F, E>(service: &TelemetryService, future: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let service = service.clone();
    tokio::spawn(async move {
        if let Err(error) = future.await {
            report_rejection(&service, error.to_string());
        }
    })
}

pub fn report_rejection(service: &TelemetryService, reason: impl Into<String>) {
    let reason = reason.into();
    let message = if reason.trim().is_empty() {
        UNHANDLED_REJECTION.to_string()
    } else {
        reason.clone()
    };

    service.record_error(
        Fault::new(message),
        Severity::High,
        ErrorClassification::Runtime,
        EventContext::Rejection { reason },
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::memory::MemorySink;
    use crate::session::SessionCorrelator;

    fn service(sink: &MemorySink) -> TelemetryService {
        TelemetryService::builder(Arc::new(sink.clone()))
            .session(Arc::new(SessionCorrelator::new()))
            .spawn()
    }

    #[tokio::test]
    async fn failed_tasks_are_reported_as_rejections() {
        let sink = MemorySink::new();
        let service = service(&sink);

        spawn_observed(&service, async { Err::<(), _>("quote sync failed") })
            .await
            .expect("task");
        spawn_observed(&service, async { Ok::<(), String>(()) })
            .await
            .expect("task");
        service.flush().await;

        let errors = sink.errors().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "quote sync failed");
        assert_eq!(errors[0].severity, Severity::High);
        assert_eq!(errors[0].classification, ErrorClassification::Runtime);
        assert_eq!(
            errors[0].context,
            EventContext::Rejection {
                reason: "quote sync failed".to_string()
            }
        );

        service.destroy().await;
    }

    #[tokio::test]
    async fn empty_reasons_get_a_generic_message() {
        let sink = MemorySink::new();
        let service = service(&sink);

        report_rejection(&service, "");
        service.flush().await;

        let errors = sink.errors().await;
        assert_eq!(errors[0].message, UNHANDLED_REJECTION);

        service.destroy().await;
    }
}
