use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Critical errors skip the flush interval and are shipped immediately.
    pub fn flushes_immediately(self) -> bool {
        matches!(self, Self::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The coarser level scale used by log-style producers.
///
/// Every level maps onto [`Severity`]: `debug` and `info` become `low`,
/// `warn` becomes `medium` and `error` becomes `critical`, so an `error`
/// keeps its immediate-flush behaviour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LegacyLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LegacyLevel> for Severity {
    fn from(level: LegacyLevel) -> Self {
        match level {
            LegacyLevel::Debug | LegacyLevel::Info => Severity::Low,
            LegacyLevel::Warn => Severity::Medium,
            LegacyLevel::Error => Severity::Critical,
        }
    }
}

pub const DEFAULT_CLASSIFICATION: &str = "ApplicationError";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorClassification {
    /// Faults raised by application code itself: panics and failed
    /// detached tasks. Stored as `javascript` to keep the dashboard's
    /// vocabulary.
    Runtime,
    Api,
    Database,
    Network,
    Validation,
    Auth,
    Other(String),
}

impl ErrorClassification {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Runtime => "javascript",
            Self::Api => "api",
            Self::Database => "database",
            Self::Network => "network",
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::Other(name) => name,
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "javascript" => Self::Runtime,
            "api" => Self::Api,
            "database" => Self::Database,
            "network" => Self::Network,
            "validation" => Self::Validation,
            "auth" => Self::Auth,
            "" => Self::default(),
            other => Self::Other(other.to_string()),
        }
    }
}

impl Default for ErrorClassification {
    fn default() -> Self {
        Self::Other(DEFAULT_CLASSIFICATION.to_string())
    }
}

impl From<String> for ErrorClassification {
    fn from(value: String) -> Self {
        Self::from_db(&value)
    }
}

impl From<ErrorClassification> for String {
    fn from(value: ErrorClassification) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    PageLoad,
    ApiResponse,
    DatabaseQuery,
    ComponentRender,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PageLoad => "page_load",
            Self::ApiResponse => "api_response",
            Self::DatabaseQuery => "database_query",
            Self::ComponentRender => "component_render",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "page_load" => Some(Self::PageLoad),
            "api_response" => Some(Self::ApiResponse),
            "database_query" => Some(Self::DatabaseQuery),
            "component_render" => Some(Self::ComponentRender),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    Ms,
    Bytes,
    Count,
}

impl MetricUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ms => "ms",
            Self::Bytes => "bytes",
            Self::Count => "count",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "ms" => Some(Self::Ms),
            "bytes" => Some(Self::Bytes),
            "count" => Some(Self::Count),
            _ => None,
        }
    }
}

/// Trailing window used to scope aggregation queries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeWindow {
    #[serde(rename = "1h")]
    OneHour,
    #[default]
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl TimeWindow {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::OneDay => "24h",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            Self::OneHour => Duration::hours(1),
            Self::OneDay => Duration::hours(24),
            Self::SevenDays => Duration::hours(24 * 7),
            Self::ThirtyDays => Duration::hours(24 * 30),
        }
    }

    /// Start of the window when it ends at `now`.
    pub fn since(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "1h" => Ok(Self::OneHour),
            "24h" => Ok(Self::OneDay),
            "7d" => Ok(Self::SevenDays),
            "30d" => Ok(Self::ThirtyDays),
            other => Err(format!("unknown time window: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorStats {
    pub total: u64,
    pub by_type: HashMap<String, u64>,
    pub by_severity: HashMap<Severity, u64>,
    pub resolved: u64,
    pub unresolved: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointTiming {
    pub name: String,
    pub avg_time: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceStats {
    pub total_metrics: u64,
    pub avg_page_load: f64,
    pub avg_api_response: f64,
    pub slowest_endpoints: Vec<EndpointTiming>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseStatus {
    Healthy,
    Degraded,
    Down,
}

impl DatabaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemHealth {
    pub database_status: DatabaseStatus,
    /// Probe round trip in ms, `-1.0` when the check itself failed.
    pub api_response_time: f64,
    /// Errors recorded in the last hour, `-1` when unknown.
    pub error_rate: i64,
    pub active_users: u64,
    pub last_check: DateTime<Utc>,
}
