use std::any::Any;
use std::error::Error as StdError;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::session::SessionCorrelator;
use crate::types::{DatabaseStatus, ErrorClassification, MetricType, MetricUnit, Severity};

const UNKNOWN_ERROR: &str = "Unknown error";

/// A raw fault as observed by a producer, before it becomes an [`ErrorEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    message: String,
    stack: Option<String>,
    kind: Option<String>,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
            kind: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Names the fault's type. Used as the classification when nothing more
    /// specific is known.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Message from `Display`, stack from the error's source chain.
    pub fn from_error<E: StdError + ?Sized>(error: &E) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(format!("caused by: {cause}"));
            source = cause.source();
        }

        Self {
            message: error.to_string(),
            stack: (!causes.is_empty()).then(|| causes.join("\n")),
            kind: None,
        }
    }

    /// Extracts the message from a panic payload (`&str` or `String`).
    pub fn from_panic_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        Self::new(message).with_kind("panic")
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }
}

impl From<&str> for Fault {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<Box<dyn StdError + Send + Sync>> for Fault {
    fn from(error: Box<dyn StdError + Send + Sync>) -> Self {
        Self::from_error(error.as_ref())
    }
}

impl From<std::io::Error> for Fault {
    fn from(error: std::io::Error) -> Self {
        Self::from_error(&error)
    }
}

/// Structured context attached to an event.
///
/// Each producer has its own variant so consumers can match on it; `Fields`
/// is the escape hatch for ad-hoc data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventContext {
    #[default]
    None,
    SourceLocation {
        file: String,
        line: u32,
        column: u32,
    },
    Rejection {
        reason: String,
    },
    Request {
        status: u16,
        method: String,
    },
    ApiResponse {
        endpoint: String,
        method: String,
        status: u16,
        status_text: String,
    },
    NetworkFailure {
        endpoint: String,
        method: String,
        duration_ms: f64,
    },
    Health {
        status: DatabaseStatus,
    },
    Alert {
        action: String,
        value: Option<f64>,
    },
    Fields {
        fields: Map<String, Value>,
    },
}

impl EventContext {
    pub fn fields<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Fields {
            fields: entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn alert(action: impl Into<String>, value: Option<f64>) -> Self {
        Self::Alert {
            action: action.into(),
            value,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The classification implied by the producer that built this context.
    pub fn implied_classification(&self) -> Option<ErrorClassification> {
        match self {
            Self::SourceLocation { .. } | Self::Rejection { .. } => {
                Some(ErrorClassification::Runtime)
            }
            Self::ApiResponse { .. } => Some(ErrorClassification::Api),
            Self::NetworkFailure { .. } => Some(ErrorClassification::Network),
            _ => None,
        }
    }
}

/// Where an event was captured: the current page, when there is one, and the
/// identity of the host environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub url: Option<String>,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub stack_trace: Option<String>,
    pub classification: ErrorClassification,
    #[serde(flatten)]
    pub origin: Origin,
    pub session_id: String,
    pub context: EventContext,
    pub resolved: bool,
    pub resolution_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub metric_type: MetricType,
    pub metric_name: String,
    pub value: f64,
    pub unit: MetricUnit,
    #[serde(flatten)]
    pub origin: Origin,
    pub session_id: String,
    pub context: EventContext,
}

/// A measurement handed in by a producer; the service stamps it with id,
/// time, session and origin.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub metric_type: MetricType,
    pub metric_name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub context: EventContext,
}

impl MetricSample {
    pub fn new(
        metric_type: MetricType,
        metric_name: impl Into<String>,
        value: f64,
        unit: MetricUnit,
    ) -> Self {
        Self {
            metric_type,
            metric_name: metric_name.into(),
            value,
            unit,
            context: EventContext::None,
        }
    }

    pub fn with_context(mut self, context: EventContext) -> Self {
        self.context = context;
        self
    }
}

/// Builds events stamped with the session id and the current origin.
#[derive(Debug)]
pub struct EventFactory {
    session_id: Arc<str>,
    user_agent: String,
    location: RwLock<Option<String>>,
}

impl EventFactory {
    pub fn new(session: &SessionCorrelator, user_agent: impl Into<String>) -> Self {
        Self {
            session_id: Arc::from(session.session_id()),
            user_agent: user_agent.into(),
            location: RwLock::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Updates the page location recorded on subsequent events.
    pub fn set_location(&self, location: Option<String>) {
        *self
            .location
            .write()
            .unwrap_or_else(PoisonError::into_inner) = location;
    }

    pub fn origin(&self) -> Origin {
        Origin {
            url: self
                .location
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn error_event(
        &self,
        fault: Fault,
        severity: Severity,
        classification: ErrorClassification,
        context: EventContext,
    ) -> ErrorEvent {
        let Fault { message, stack, .. } = fault;
        let message = if message.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            message
        };

        ErrorEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            severity,
            message,
            stack_trace: stack.filter(|stack| !stack.trim().is_empty()),
            classification,
            origin: self.origin(),
            session_id: self.session_id.to_string(),
            context,
            resolved: false,
            resolution_notes: None,
        }
    }

    pub fn metric(
        &self,
        metric_type: MetricType,
        metric_name: impl Into<String>,
        value: f64,
        unit: MetricUnit,
        context: EventContext,
    ) -> PerformanceMetric {
        PerformanceMetric {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            metric_type,
            metric_name: metric_name.into(),
            value: clamp_non_negative(value),
            unit,
            origin: self.origin(),
            session_id: self.session_id.to_string(),
            context,
        }
    }

    pub fn metric_from_sample(&self, sample: MetricSample) -> PerformanceMetric {
        self.metric(
            sample.metric_type,
            sample.metric_name,
            sample.value,
            sample.unit,
            sample.context,
        )
    }
}

/// Negative deltas (inconsistent host clocks) and non-finite values become 0.
pub fn clamp_non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
