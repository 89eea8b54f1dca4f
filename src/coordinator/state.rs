//! Connection state and pure transition helpers
//!
//! The coordinator is the only writer of [`ConnectionState`]; every other
//! component reads it through a `watch` receiver.

use std::fmt;
use tracing::{error, info, warn};

/// Connection state for the presence client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connectivity reading received yet
    Uninitialized,
    /// Host reports no usable network
    NoNetwork,
    /// A connect attempt is in flight
    Connecting,
    /// Session established and ready for publish/subscribe
    Connected,
    /// Session lost or deliberately closed
    Disconnected,
    /// Connect attempt rejected or timed out
    Failed(String),
}

impl ConnectionState {
    /// Check if the state allows publishing (pure function)
    pub fn can_publish(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Uninitialized => f.write_str("uninitialized"),
            ConnectionState::NoNetwork => f.write_str("no network"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Host app lifecycle as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Foreground,
    Background,
}

/// Log connection state transition (pure logging function)
pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
    match (from, to) {
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!("Connection established");
        }
        (ConnectionState::Connected, ConnectionState::Disconnected) => {
            warn!("Connection lost");
        }
        (ConnectionState::Connected, ConnectionState::NoNetwork) => {
            warn!("Network lost while connected, closing session");
        }
        (_, ConnectionState::Failed(reason)) => {
            error!("Connect attempt failed: {}", reason);
        }
        _ => {
            info!("Connection state: {} -> {}", from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connected_can_publish() {
        assert!(ConnectionState::Connected.can_publish());
        for state in [
            ConnectionState::Uninitialized,
            ConnectionState::NoNetwork,
            ConnectionState::Connecting,
            ConnectionState::Disconnected,
            ConnectionState::Failed("refused".to_string()),
        ] {
            assert!(!state.can_publish(), "{state} should not allow publishing");
        }
    }

    #[test]
    fn test_connection_state_equality() {
        assert_eq!(ConnectionState::Connected, ConnectionState::Connected);
        assert_eq!(
            ConnectionState::Failed("test".to_string()),
            ConnectionState::Failed("test".to_string())
        );
        assert_ne!(
            ConnectionState::Failed("a".to_string()),
            ConnectionState::Failed("b".to_string())
        );
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::NoNetwork.to_string(), "no network");
        assert_eq!(
            ConnectionState::Failed("timeout".to_string()).to_string(),
            "failed: timeout"
        );
    }
}
