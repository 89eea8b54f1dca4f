//! Error taxonomy for the presence client
//!
//! Every variant is handled inside the coordinator; callers only ever observe
//! these as connection state changes and log lines.

use crate::coordinator::ConnectionState;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for presence and connection handling
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PresenceError {
    #[error("Network unavailable")]
    NetworkUnavailable,

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Publish skipped - current state: {state}")]
    PublishSkipped { state: ConnectionState },

    #[error("Protocol disconnect: {0}")]
    ProtocolDisconnect(String),

    #[error("Coordinator is no longer running")]
    CoordinatorStopped,
}

impl PresenceError {
    /// Create connect failure with a sanitized reason
    pub fn connect_failed<S: AsRef<str>>(reason: S) -> Self {
        Self::ConnectFailed(sanitize_reason(reason.as_ref()))
    }

    /// Create protocol disconnect with a sanitized reason
    pub fn protocol_disconnect<S: AsRef<str>>(reason: S) -> Self {
        Self::ProtocolDisconnect(sanitize_reason(reason.as_ref()))
    }
}

static URL_CREDENTIALS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([a-z][a-z0-9+.-]*://)[^/@\s:]+:[^/@\s]+@").expect("valid credential regex")
});

static SECRET_PAIRS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|secret|key)[=:]\s*\S+").expect("valid secret regex")
});

const MAX_REASON_LEN: usize = 200;

/// Redact credentials and cap the length of a failure reason
///
/// Transport errors can embed the broker URL, which may carry credentials.
pub fn sanitize_reason(reason: &str) -> String {
    let sanitized = URL_CREDENTIALS.replace_all(reason, "${1}***@");
    let sanitized = SECRET_PAIRS.replace_all(&sanitized, "${1}=***");

    if sanitized.chars().count() > MAX_REASON_LEN {
        let truncate_suffix = "...[truncated]";
        let keep = MAX_REASON_LEN - truncate_suffix.len();
        let mut truncated: String = sanitized.chars().take(keep).collect();
        truncated.push_str(truncate_suffix);
        truncated
    } else {
        sanitized.into_owned()
    }
}

/// Result type for presence operations
pub type PresenceResult<T> = Result<T, PresenceError>;
