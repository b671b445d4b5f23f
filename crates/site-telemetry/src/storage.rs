use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use thiserror::Error;

use crate::events::{ErrorEvent, EventContext, Origin, PerformanceMetric};
use crate::types::{ErrorClassification, MetricType, MetricUnit, Severity};

pub type SinkResult<T> = Result<T, SinkError>;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("time parse error: {0}")]
    Chrono(#[from] chrono::ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage task join error: {0}")]
    Task(String),

    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("invalid telemetry data: {0}")]
    InvalidData(String),
}

/// Append-only store that receives flushed batches and serves the
/// aggregation read path.
///
/// The collector only distinguishes success from failure; every `Err` is
/// handled the same way regardless of its cause.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn insert_errors(&self, batch: &[ErrorEvent]) -> SinkResult<()>;

    async fn insert_metrics(&self, batch: &[PerformanceMetric]) -> SinkResult<()>;

    async fn query_errors(&self, since: DateTime<Utc>) -> SinkResult<Vec<ErrorEvent>>;

    async fn query_metrics(&self, since: DateTime<Utc>) -> SinkResult<Vec<PerformanceMetric>>;

    /// Cheap connectivity probe used by the health monitor.
    async fn ping(&self) -> SinkResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SqliteTelemetryStorage {
    db_path: PathBuf,
}

impl SqliteTelemetryStorage {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    async fn with_connection<T, F>(&self, func: F) -> SinkResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> SinkResult<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let connection = open_connection(&db_path)?;
            func(&connection)
        })
        .await
        .map_err(|error| SinkError::Task(error.to_string()))?
    }

    pub async fn init(&self) -> SinkResult<()> {
        self.with_connection(|connection| {
            connection.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS error_logs (
                    id TEXT PRIMARY KEY,
                    timestamp TEXT NOT NULL,
                    severity TEXT NOT NULL,
                    error_type TEXT NOT NULL,
                    error_message TEXT NOT NULL,
                    error_stack TEXT,
                    url TEXT,
                    user_agent TEXT NOT NULL,
                    session_id TEXT NOT NULL,
                    context TEXT NOT NULL,
                    resolved INTEGER NOT NULL DEFAULT 0,
                    resolution_notes TEXT
                );

                CREATE TABLE IF NOT EXISTS performance_metrics (
                    id TEXT PRIMARY KEY,
                    timestamp TEXT NOT NULL,
                    metric_type TEXT NOT NULL,
                    metric_name TEXT NOT NULL,
                    value REAL NOT NULL,
                    unit TEXT NOT NULL,
                    url TEXT,
                    user_agent TEXT NOT NULL,
                    session_id TEXT NOT NULL,
                    context TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_error_logs_timestamp ON error_logs(timestamp);
                CREATE INDEX IF NOT EXISTS idx_error_logs_session ON error_logs(session_id);
                CREATE INDEX IF NOT EXISTS idx_metrics_timestamp ON performance_metrics(timestamp);
                CREATE INDEX IF NOT EXISTS idx_metrics_type ON performance_metrics(metric_type);
                "#,
            )?;
            Ok(())
        })
        .await
    }

    /// Marks an error as triaged. Returns `false` when no row has that id.
    pub async fn resolve_error(&self, id: &str, notes: Option<String>) -> SinkResult<bool> {
        let id = id.to_string();
        self.with_connection(move |connection| {
            let updated = connection.execute(
                "UPDATE error_logs SET resolved = 1, resolution_notes = ?1 WHERE id = ?2",
                params![notes, id],
            )?;
            Ok(updated > 0)
        })
        .await
    }
}

#[async_trait]
impl TelemetrySink for SqliteTelemetryStorage {
    async fn insert_errors(&self, batch: &[ErrorEvent]) -> SinkResult<()> {
        let batch = batch.to_vec();
        self.with_connection(move |connection| {
            let transaction = connection.unchecked_transaction()?;
            {
                let mut statement = transaction.prepare(
                    r#"
                    INSERT INTO error_logs (
                        id, timestamp, severity, error_type, error_message, error_stack,
                        url, user_agent, session_id, context, resolved, resolution_notes
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                    "#,
                )?;
                for event in &batch {
                    statement.execute(params![
                        event.id,
                        format_timestamp(event.timestamp),
                        event.severity.as_str(),
                        event.classification.as_str(),
                        event.message,
                        event.stack_trace,
                        event.origin.url,
                        event.origin.user_agent,
                        event.session_id,
                        serde_json::to_string(&event.context)?,
                        event.resolved,
                        event.resolution_notes,
                    ])?;
                }
            }
            transaction.commit()?;
            Ok(())
        })
        .await
    }

    async fn insert_metrics(&self, batch: &[PerformanceMetric]) -> SinkResult<()> {
        let batch = batch.to_vec();
        self.with_connection(move |connection| {
            let transaction = connection.unchecked_transaction()?;
            {
                let mut statement = transaction.prepare(
                    r#"
                    INSERT INTO performance_metrics (
                        id, timestamp, metric_type, metric_name, value, unit,
                        url, user_agent, session_id, context
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    "#,
                )?;
                for metric in &batch {
                    statement.execute(params![
                        metric.id,
                        format_timestamp(metric.timestamp),
                        metric.metric_type.as_str(),
                        metric.metric_name,
                        metric.value,
                        metric.unit.as_str(),
                        metric.origin.url,
                        metric.origin.user_agent,
                        metric.session_id,
                        serde_json::to_string(&metric.context)?,
                    ])?;
                }
            }
            transaction.commit()?;
            Ok(())
        })
        .await
    }

    async fn query_errors(&self, since: DateTime<Utc>) -> SinkResult<Vec<ErrorEvent>> {
        let since = format_timestamp(since);
        self.with_connection(move |connection| {
            let mut statement = connection.prepare(
                r#"
                SELECT id, timestamp, severity, error_type, error_message, error_stack,
                       url, user_agent, session_id, context, resolved, resolution_notes
                FROM error_logs
                WHERE timestamp >= ?1
                ORDER BY timestamp ASC, rowid ASC
                "#,
            )?;
            let rows = statement
                .query_map(params![since], ErrorRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(ErrorRow::into_event).collect()
        })
        .await
    }

    async fn query_metrics(&self, since: DateTime<Utc>) -> SinkResult<Vec<PerformanceMetric>> {
        let since = format_timestamp(since);
        self.with_connection(move |connection| {
            let mut statement = connection.prepare(
                r#"
                SELECT id, timestamp, metric_type, metric_name, value, unit,
                       url, user_agent, session_id, context
                FROM performance_metrics
                WHERE timestamp >= ?1
                ORDER BY timestamp ASC, rowid ASC
                "#,
            )?;
            let rows = statement
                .query_map(params![since], MetricRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(MetricRow::into_metric).collect()
        })
        .await
    }

    async fn ping(&self) -> SinkResult<()> {
        self.with_connection(|connection| {
            connection.query_row("SELECT COUNT(*) FROM error_logs LIMIT 1", [], |row| {
                row.get::<_, i64>(0)
            })?;
            Ok(())
        })
        .await
    }
}

struct ErrorRow {
    id: String,
    timestamp: String,
    severity: String,
    error_type: String,
    message: String,
    stack: Option<String>,
    url: Option<String>,
    user_agent: String,
    session_id: String,
    context: String,
    resolved: bool,
    resolution_notes: Option<String>,
}

impl ErrorRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            severity: row.get(2)?,
            error_type: row.get(3)?,
            message: row.get(4)?,
            stack: row.get(5)?,
            url: row.get(6)?,
            user_agent: row.get(7)?,
            session_id: row.get(8)?,
            context: row.get(9)?,
            resolved: row.get(10)?,
            resolution_notes: row.get(11)?,
        })
    }

    fn into_event(self) -> SinkResult<ErrorEvent> {
        let severity = Severity::from_db(&self.severity).ok_or_else(|| {
            SinkError::InvalidData(format!("unknown severity: {}", self.severity))
        })?;

        Ok(ErrorEvent {
            id: self.id,
            timestamp: parse_timestamp(&self.timestamp)?,
            severity,
            message: self.message,
            stack_trace: self.stack,
            classification: ErrorClassification::from_db(&self.error_type),
            origin: Origin {
                url: self.url,
                user_agent: self.user_agent,
            },
            session_id: self.session_id,
            context: parse_context(&self.context)?,
            resolved: self.resolved,
            resolution_notes: self.resolution_notes,
        })
    }
}

struct MetricRow {
    id: String,
    timestamp: String,
    metric_type: String,
    metric_name: String,
    value: f64,
    unit: String,
    url: Option<String>,
    user_agent: String,
    session_id: String,
    context: String,
}

impl MetricRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            metric_type: row.get(2)?,
            metric_name: row.get(3)?,
            value: row.get(4)?,
            unit: row.get(5)?,
            url: row.get(6)?,
            user_agent: row.get(7)?,
            session_id: row.get(8)?,
            context: row.get(9)?,
        })
    }

    fn into_metric(self) -> SinkResult<PerformanceMetric> {
        let metric_type = MetricType::from_db(&self.metric_type).ok_or_else(|| {
            SinkError::InvalidData(format!("unknown metric type: {}", self.metric_type))
        })?;
        let unit = MetricUnit::from_db(&self.unit)
            .ok_or_else(|| SinkError::InvalidData(format!("unknown unit: {}", self.unit)))?;

        Ok(PerformanceMetric {
            id: self.id,
            timestamp: parse_timestamp(&self.timestamp)?,
            metric_type,
            metric_name: self.metric_name,
            value: self.value,
            unit,
            origin: Origin {
                url: self.url,
                user_agent: self.user_agent,
            },
            session_id: self.session_id,
            context: parse_context(&self.context)?,
        })
    }
}

fn open_connection(path: &Path) -> SinkResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let connection = Connection::open(path)?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(connection)
}

/// Fixed-width UTC so lexical comparison in SQL matches time order.
fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> SinkResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn parse_context(raw: &str) -> SinkResult<EventContext> {
    if raw.is_empty() {
        return Ok(EventContext::None);
    }
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tempfile::tempdir;

    use super::*;
    use crate::events::EventFactory;
    use crate::session::SessionCorrelator;

    fn factory() -> EventFactory {
        EventFactory::new(&SessionCorrelator::new(), "site-telemetry/test")
    }

    #[tokio::test]
    async fn storage_round_trips_errors_with_context() {
        let dir = tempdir().expect("temp dir");
        let storage = SqliteTelemetryStorage::new(dir.path().join("telemetry.db"));
        storage.init().await.expect("init storage");

        let factory = factory();
        factory.set_location(Some("https://example.test/admin/invoices".to_string()));
        let event = factory.error_event(
            "API Error: 502 Bad Gateway".into(),
            Severity::Critical,
            ErrorClassification::Api,
            EventContext::ApiResponse {
                endpoint: "/api/invoices".to_string(),
                method: "POST".to_string(),
                status: 502,
                status_text: "Bad Gateway".to_string(),
            },
        );

        storage
            .insert_errors(std::slice::from_ref(&event))
            .await
            .expect("insert errors");

        let stored = storage
            .query_errors(Utc::now() - Duration::hours(1))
            .await
            .expect("query errors");

        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, event.id);
        assert_eq!(stored[0].severity, Severity::Critical);
        assert_eq!(stored[0].classification, ErrorClassification::Api);
        assert_eq!(stored[0].context, event.context);
        assert_eq!(stored[0].origin, event.origin);
        assert_eq!(stored[0].timestamp, event.timestamp);
    }

    #[tokio::test]
    async fn storage_filters_by_window_and_keeps_insertion_order() {
        let dir = tempdir().expect("temp dir");
        let storage = SqliteTelemetryStorage::new(dir.path().join("telemetry.db"));
        storage.init().await.expect("init storage");

        let factory = factory();
        let mut old = factory.metric(
            MetricType::ApiResponse,
            "/api/quotes",
            80.0,
            MetricUnit::Ms,
            EventContext::None,
        );
        old.timestamp = Utc::now() - Duration::days(3);
        let first = factory.metric(
            MetricType::ApiResponse,
            "/api/customers",
            120.0,
            MetricUnit::Ms,
            EventContext::Request {
                status: 200,
                method: "GET".to_string(),
            },
        );
        let second = factory.metric(
            MetricType::PageLoad,
            "full_page_load",
            900.0,
            MetricUnit::Ms,
            EventContext::None,
        );

        storage
            .insert_metrics(&[old, first.clone(), second.clone()])
            .await
            .expect("insert metrics");

        let stored = storage
            .query_metrics(Utc::now() - Duration::hours(24))
            .await
            .expect("query metrics");

        let names: Vec<&str> = stored.iter().map(|m| m.metric_name.as_str()).collect();
        assert_eq!(names, vec!["/api/customers", "full_page_load"]);
        assert_eq!(stored[0].context, first.context);
        assert_eq!(stored[1].value, second.value);
    }

    #[tokio::test]
    async fn resolve_error_sets_notes() {
        let dir = tempdir().expect("temp dir");
        let storage = SqliteTelemetryStorage::new(dir.path().join("telemetry.db"));
        storage.init().await.expect("init storage");

        let event = factory().error_event(
            "stale session".into(),
            Severity::Medium,
            ErrorClassification::Auth,
            EventContext::None,
        );
        storage
            .insert_errors(std::slice::from_ref(&event))
            .await
            .expect("insert errors");

        assert!(storage
            .resolve_error(&event.id, Some("expired token, user re-logged".to_string()))
            .await
            .expect("resolve"));
        assert!(!storage.resolve_error("missing", None).await.expect("resolve"));

        let stored = storage
            .query_errors(Utc::now() - Duration::hours(1))
            .await
            .expect("query errors");
        assert!(stored[0].resolved);
        assert_eq!(
            stored[0].resolution_notes.as_deref(),
            Some("expired token, user re-logged")
        );
    }

    #[tokio::test]
    async fn duplicate_ids_fail_the_whole_batch() {
        let dir = tempdir().expect("temp dir");
        let storage = SqliteTelemetryStorage::new(dir.path().join("telemetry.db"));
        storage.init().await.expect("init storage");

        let event = factory().error_event(
            "duplicate".into(),
            Severity::Low,
            ErrorClassification::default(),
            EventContext::None,
        );
        let fresh = factory().error_event(
            "fresh".into(),
            Severity::Low,
            ErrorClassification::default(),
            EventContext::None,
        );
        storage
            .insert_errors(std::slice::from_ref(&event))
            .await
            .expect("first insert");

        let result = storage.insert_errors(&[fresh, event]).await;
        assert!(matches!(result, Err(SinkError::Sqlite(_))));

        let stored = storage
            .query_errors(Utc::now() - Duration::hours(1))
            .await
            .expect("query errors");
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn timestamps_keep_full_precision_at_fixed_width() {
        let precise = DateTime::from_timestamp(1_700_000_000, 123_456_789).expect("timestamp");
        let whole = DateTime::from_timestamp(1_700_000_001, 0).expect("timestamp");

        let precise_text = format_timestamp(precise);
        let whole_text = format_timestamp(whole);

        assert_eq!(precise_text, "2023-11-14T22:13:20.123456789Z");
        assert_eq!(precise_text.len(), whole_text.len());
        assert!(precise_text < whole_text);
        assert_eq!(parse_timestamp(&precise_text).expect("parse"), precise);
    }

    #[tokio::test]
    async fn ping_fails_before_schema_exists() {
        let dir = tempdir().expect("temp dir");
        let storage = SqliteTelemetryStorage::new(dir.path().join("telemetry.db"));
        assert!(storage.ping().await.is_err());

        storage.init().await.expect("init storage");
        storage.ping().await.expect("ping");
    }
}
