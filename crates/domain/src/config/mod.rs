mod context;
mod events;
mod server;
mod sessions;
mod store;

pub use context::*;
pub use events::*;
pub use server::*;
pub use sessions::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut error = |field: &str, message: &str| {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message: message.into(),
            })
        };

        if self.server.port == 0 {
            error("server.port", "port must be greater than 0");
        }
        if self.server.host.is_empty() {
            error("server.host", "host must not be empty");
        }
        if self.store.timeout_ms == 0 {
            error("store.timeout_ms", "must be greater than 0");
        }
        if self.store.channel.is_empty() {
            error("store.channel", "pub/sub channel must not be empty");
        }
        if self.sessions.heartbeat_timeout_secs == 0 {
            error("sessions.heartbeat_timeout_secs", "must be greater than 0");
        }
        if self.sessions.sweep_interval_secs == 0 {
            error("sessions.sweep_interval_secs", "must be greater than 0");
        }
        if self.sessions.session_ttl_secs == 0 {
            error("sessions.session_ttl_secs", "must be greater than 0");
        }
        if self.events.recent_capacity == 0 {
            error("events.recent_capacity", "must be greater than 0");
        }
        if self.events.activity_capacity == 0 {
            error("events.activity_capacity", "must be greater than 0");
        }
        if self.events.connection_buffer == 0 {
            error("events.connection_buffer", "must be greater than 0");
        }
        if self.context.max_concurrent_fetches == 0 {
            error("context.max_concurrent_fetches", "must be greater than 0");
        }
        if self.context.max_results_cap == 0 {
            error("context.max_results_cap", "must be greater than 0");
        }

        // Independent knobs, but a sweep slower than the timeout delays
        // expiry by up to one extra interval.
        if self.sessions.sweep_interval_secs > self.sessions.heartbeat_timeout_secs {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "sessions.sweep_interval_secs".into(),
                message: "sweep interval is longer than the heartbeat timeout".into(),
            });
        }
        if self.sessions.session_ttl_secs < self.sessions.heartbeat_timeout_secs {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "sessions.session_ttl_secs".into(),
                message: "session TTL is shorter than the heartbeat timeout; records may vanish before the sweeper sees them".into(),
            });
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }

        errors
    }

    /// `true` if [`validate`](Self::validate) reports any hard error.
    pub fn has_errors(&self) -> bool {
        self.validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
    }

    #[test]
    fn zero_timeout_is_an_error() {
        let mut cfg = Config::default();
        cfg.sessions.heartbeat_timeout_secs = 0;
        assert!(cfg.has_errors());
    }

    #[test]
    fn slow_sweep_is_only_a_warning() {
        let mut cfg = Config::default();
        cfg.sessions.sweep_interval_secs = 120;
        let issues = cfg.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ConfigSeverity::Warning);
        assert!(!cfg.has_errors());
    }

    #[test]
    fn issue_display_format() {
        let issue = ConfigError {
            severity: ConfigSeverity::Error,
            field: "store.channel".into(),
            message: "empty".into(),
        };
        assert_eq!(issue.to_string(), "[ERROR] store.channel: empty");
    }
}
