use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "TELEMETRY_";

/// Tuning knobs for the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Seconds between periodic flushes.
    pub flush_interval_secs: u64,
    /// How many items of a failed batch are put back for the next attempt.
    pub retry_cap: usize,
    pub health_check_interval_secs: u64,
    /// Total page load time above which a slow-load warning is recorded.
    pub slow_page_load_ms: f64,
    /// Errors per hour above which the health check raises an alert.
    pub error_rate_alert_threshold: i64,
    /// Echo every captured event to the local log at debug level.
    pub dev_console: bool,
    /// Host identity stamped on every event.
    pub user_agent: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 10,
            retry_cap: 5,
            health_check_interval_secs: 5 * 60,
            slow_page_load_ms: 3000.0,
            error_rate_alert_threshold: 10,
            dev_console: false,
            user_agent: default_user_agent(),
        }
    }
}

impl TelemetryConfig {
    /// Defaults overridden by `TELEMETRY_*` environment variables.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        override_from_env("FLUSH_INTERVAL_SECS", &mut config.flush_interval_secs);
        override_from_env("RETRY_CAP", &mut config.retry_cap);
        override_from_env(
            "HEALTH_CHECK_INTERVAL_SECS",
            &mut config.health_check_interval_secs,
        );
        override_from_env("SLOW_PAGE_LOAD_MS", &mut config.slow_page_load_ms);
        override_from_env(
            "ERROR_RATE_ALERT_THRESHOLD",
            &mut config.error_rate_alert_threshold,
        );
        override_from_env("DEV_CONSOLE", &mut config.dev_console);
        if let Ok(user_agent) = env::var(format!("{ENV_PREFIX}USER_AGENT")) {
            if !user_agent.trim().is_empty() {
                config.user_agent = user_agent;
            }
        }
        config
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }
}

fn override_from_env<T: FromStr>(name: &str, target: &mut T) {
    let key = format!("{ENV_PREFIX}{name}");
    let Ok(raw) = env::var(&key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => log::warn!("ignoring unparsable {}={:?}", key, raw),
    }
}

fn default_user_agent() -> String {
    format!(
        "{}/{} ({}; {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env::consts::OS,
        env::consts::ARCH
    )
}
