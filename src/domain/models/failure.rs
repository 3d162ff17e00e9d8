//! Delivery failure taxonomy.
//!
//! Every failed delivery carries a category and a stable code. The category
//! drives the retry decision; the code is what operators filter on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of a delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Timeout, connection reset, DNS failure, 408/5xx. Retried with backoff.
    Transient,
    /// 429 or local rate-limit exceedance. Retried honouring Retry-After.
    RateLimited,
    /// 4xx (non-429). Not retried.
    Permanent,
    /// Missing auth, invalid transformation output, invalid scheduling
    /// script result. Not retried until config changes.
    Config,
    /// Sandbox violation or runtime error in a user script. Not retried.
    Script,
    /// Request blocked by security policy (private network, non-HTTPS).
    Policy,
    /// Delivery skipped because the rule's circuit is open.
    CircuitOpen,
    /// Scheduled delivery cancelled because its due time passed the grace window.
    ScheduledTimePassed,
    /// In-flight work abandoned during stop().
    Shutdown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "TRANSIENT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Permanent => "PERMANENT",
            Self::Config => "CONFIG",
            Self::Script => "SCRIPT",
            Self::Policy => "POLICY",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::ScheduledTimePassed => "SCHEDULED_TIME_PASSED",
            Self::Shutdown => "SHUTDOWN",
        }
    }

    /// Whether failures in this category are eligible for automatic retry.
    pub const fn should_retry(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRANSIENT" => Ok(Self::Transient),
            "RATE_LIMITED" => Ok(Self::RateLimited),
            "PERMANENT" => Ok(Self::Permanent),
            "CONFIG" => Ok(Self::Config),
            "SCRIPT" => Ok(Self::Script),
            "POLICY" => Ok(Self::Policy),
            "CIRCUIT_OPEN" => Ok(Self::CircuitOpen),
            "SCHEDULED_TIME_PASSED" => Ok(Self::ScheduledTimePassed),
            "SHUTDOWN" => Ok(Self::Shutdown),
            _ => Err(format!("Unknown error category: {s}")),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified delivery failure.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct DeliveryError {
    pub category: ErrorCategory,
    /// Stable machine-readable code, e.g. `HTTP_503`, `TIMEOUT`, `DNS`.
    pub code: String,
    pub message: String,
    /// HTTP status of the response, when one was received.
    pub status: Option<u16>,
    /// Retry-After from the response, in seconds.
    pub retry_after_secs: Option<u64>,
}

impl DeliveryError {
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            status: None,
            retry_after_secs: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            ErrorCategory::Transient,
            "TIMEOUT",
            format!("Request timed out after {timeout_ms} ms"),
        )
    }

    pub fn dns(host: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Transient,
            "DNS",
            format!("DNS resolution failed for {}", host.into()),
        )
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transient, "NETWORK", message)
    }

    pub fn circuit_open() -> Self {
        Self::new(
            ErrorCategory::CircuitOpen,
            "CIRCUIT_OPEN",
            "Delivery short-circuited: rule circuit is open",
        )
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Policy, "POLICY_BLOCKED", message)
    }

    pub fn script(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Script, "SCRIPT_ERROR", message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, "CONFIG_INVALID", message)
    }

    pub fn shutdown() -> Self {
        Self::new(ErrorCategory::Shutdown, "SHUTDOWN", "In-flight work abandoned during stop")
    }

    /// Classify an HTTP response status.
    ///
    /// 2xx never reaches here. 429 is rate-limited; 408 and 5xx are
    /// transient server trouble; every other 4xx is permanent.
    pub fn from_status(status: u16) -> Self {
        let code = format!("HTTP_{status}");
        let err = match status {
            429 => Self::new(
                ErrorCategory::RateLimited,
                code,
                "Endpoint responded 429 Too Many Requests",
            ),
            408 => Self::new(ErrorCategory::Transient, code, "Endpoint responded 408 Request Timeout"),
            s if s >= 500 => Self::new(
                ErrorCategory::Transient,
                format!("SERVER_ERROR_{s}"),
                format!("Endpoint responded {s}"),
            ),
            s => Self::new(ErrorCategory::Permanent, code, format!("Endpoint responded {s}")),
        };
        err.with_status(status)
    }

    pub const fn should_retry(&self) -> bool {
        self.category.should_retry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn category_round_trips_through_str() {
        for cat in [
            ErrorCategory::Transient,
            ErrorCategory::RateLimited,
            ErrorCategory::Permanent,
            ErrorCategory::Config,
            ErrorCategory::Script,
            ErrorCategory::Policy,
            ErrorCategory::CircuitOpen,
            ErrorCategory::ScheduledTimePassed,
            ErrorCategory::Shutdown,
        ] {
            assert_eq!(ErrorCategory::from_str(cat.as_str()).unwrap(), cat);
        }
    }

    #[test]
    fn status_classification() {
        assert_eq!(DeliveryError::from_status(503).category, ErrorCategory::Transient);
        assert_eq!(DeliveryError::from_status(500).category, ErrorCategory::Transient);
        assert_eq!(DeliveryError::from_status(408).category, ErrorCategory::Transient);
        assert_eq!(DeliveryError::from_status(429).category, ErrorCategory::RateLimited);
        assert_eq!(DeliveryError::from_status(400).category, ErrorCategory::Permanent);
        assert_eq!(DeliveryError::from_status(404).category, ErrorCategory::Permanent);
        assert_eq!(DeliveryError::from_status(401).category, ErrorCategory::Permanent);
    }

    #[test]
    fn retry_eligibility_follows_category() {
        assert!(DeliveryError::from_status(503).should_retry());
        assert!(DeliveryError::from_status(429).should_retry());
        assert!(DeliveryError::timeout(5000).should_retry());
        assert!(!DeliveryError::from_status(400).should_retry());
        assert!(!DeliveryError::script("boom").should_retry());
        assert!(!DeliveryError::policy("private network").should_retry());
        assert!(!DeliveryError::config("missing auth").should_retry());
    }

    #[test]
    fn status_code_is_recorded() {
        let err = DeliveryError::from_status(503);
        assert_eq!(err.status, Some(503));
        assert_eq!(err.code, "SERVER_ERROR_503");
    }
}
