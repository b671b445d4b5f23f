use std::time::Instant;

use chrono::Utc;
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::events::{EventContext, Fault, MetricSample};
use crate::service::TelemetryService;
use crate::types::{DatabaseStatus, LegacyLevel, MetricType, MetricUnit, SystemHealth, TimeWindow};

/// Periodic self-check of the telemetry pipeline: sink reachability and the
/// recent error rate.
#[derive(Clone)]
pub struct HealthMonitor {
    service: TelemetryService,
}

pub struct HealthMonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HealthMonitorHandle {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(join_error) = self.task.await {
            warn!("health monitor ended abnormally: {}", join_error);
        }
    }
}

impl HealthMonitor {
    pub fn new(service: TelemetryService) -> Self {
        Self { service }
    }

    pub async fn check(&self) -> SystemHealth {
        let sink = self.service.sink();
        let since = TimeWindow::OneHour.since(Utc::now());

        let (probe, recent_errors) = futures::join!(
            async {
                let start = Instant::now();
                let result = sink.ping().await;
                (result, start.elapsed().as_secs_f64() * 1000.0)
            },
            sink.query_errors(since),
        );

        let recent_errors = match recent_errors {
            Ok(recent_errors) => recent_errors,
            Err(error) => {
                self.service.log_error(
                    Fault::new(format!("Health check failed: {}", error)),
                    Some(LegacyLevel::Error.into()),
                    Some(EventContext::alert("health_check_failed", None)),
                );
                return SystemHealth {
                    database_status: DatabaseStatus::Down,
                    api_response_time: -1.0,
                    error_rate: -1,
                    active_users: 0,
                    last_check: Utc::now(),
                };
            }
        };

        let (probe, probe_ms) = probe;
        let database_status = match probe {
            Ok(()) => DatabaseStatus::Healthy,
            Err(error) => {
                self.service.log_error(
                    Fault::new(format!("Database health check failed: {}", error)),
                    Some(LegacyLevel::Warn.into()),
                    Some(EventContext::alert("health_check_database", None)),
                );
                DatabaseStatus::Degraded
            }
        };

        self.service.log_performance(
            MetricSample::new(
                MetricType::DatabaseQuery,
                "health_check",
                probe_ms,
                MetricUnit::Ms,
            )
            .with_context(EventContext::Health {
                status: database_status,
            }),
        );

        let error_rate = i64::try_from(recent_errors.len()).unwrap_or(i64::MAX);
        if error_rate > self.service.config().error_rate_alert_threshold {
            self.service.log_error(
                Fault::new(format!(
                    "High error rate detected: {} errors in the last hour",
                    error_rate
                )),
                Some(LegacyLevel::Warn.into()),
                Some(EventContext::alert("high_error_rate", Some(error_rate as f64))),
            );
        }

        SystemHealth {
            database_status,
            api_response_time: probe_ms,
            error_rate,
            active_users: 0,
            last_check: Utc::now(),
        }
    }

    /// Runs `check` every configured health check interval, first after one
    /// full interval, until the handle is shut down.
    pub fn spawn(self) -> HealthMonitorHandle {
        let period = self.service.config().health_check_interval();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("health monitor started ({:?} interval)", period);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let health = self.check().await;
                        if health.database_status != DatabaseStatus::Healthy {
                            warn!(
                                "telemetry sink is {} (error rate {})",
                                health.database_status.as_str(),
                                health.error_rate
                            );
                        }
                    }
                }
            }

            info!("health monitor stopped");
        });

        HealthMonitorHandle { cancel, task }
    }
}
