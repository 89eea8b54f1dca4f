//! Presence and command message types
//!
//! This module defines the outbound presence envelope published on the status
//! topic, the last-will registered with every connect attempt, and the inbound
//! command envelope handed to the command sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Presence status announced on the status topic
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
    Paused,
}

/// Optional location attached to presence messages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Structured presence envelope
///
/// Published as JSON on the status topic and used as the last-will payload.
///
/// # Examples
/// ```
/// use mqtt_presence::protocol::{PresenceMessage, PresenceStatus};
/// use chrono::Utc;
///
/// let message = PresenceMessage {
///     status: PresenceStatus::Online,
///     qualifier: "heartbeat".to_string(),
///     timestamp: Utc::now(),
///     geo: None,
/// };
/// let json = String::from_utf8(message.to_payload().unwrap()).unwrap();
/// assert!(json.contains("\"online\""));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceMessage {
    pub status: PresenceStatus,
    /// Free-text reason, e.g. "heartbeat", "no internet", "clean"
    pub qualifier: String,
    /// RFC 3339 format with Z suffix
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoPoint>,
}

impl PresenceMessage {
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn is_online(&self) -> bool {
        self.status == PresenceStatus::Online
    }
}

/// Reasons the client announces its presence
///
/// Each intent maps to a fixed status and qualifier so that every publish
/// path produces the same wire representation for the same situation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceIntent {
    /// Session just established
    Connected,
    /// Periodic re-assertion while connected
    Heartbeat,
    /// App returned to the foreground
    Resumed,
    /// App moved to the background
    Paused,
    /// Connectivity lost while connected (advisory)
    NoInternet,
    /// Deliberate teardown
    CleanShutdown,
    /// Last-will payload, published by the broker on ungraceful disconnect
    ConnectionLost,
}

impl PresenceIntent {
    pub fn status(&self) -> PresenceStatus {
        match self {
            PresenceIntent::Connected | PresenceIntent::Heartbeat | PresenceIntent::Resumed => {
                PresenceStatus::Online
            }
            PresenceIntent::Paused => PresenceStatus::Paused,
            PresenceIntent::NoInternet
            | PresenceIntent::CleanShutdown
            | PresenceIntent::ConnectionLost => PresenceStatus::Offline,
        }
    }

    pub fn qualifier(&self) -> &'static str {
        match self {
            PresenceIntent::Connected => "connected",
            PresenceIntent::Heartbeat => "heartbeat",
            PresenceIntent::Resumed => "resumed",
            PresenceIntent::Paused => "paused",
            PresenceIntent::NoInternet => "no internet",
            PresenceIntent::CleanShutdown => "clean",
            PresenceIntent::ConnectionLost => "connection lost",
        }
    }

    pub fn message(&self, timestamp: DateTime<Utc>, geo: Option<GeoPoint>) -> PresenceMessage {
        PresenceMessage {
            status: self.status(),
            qualifier: self.qualifier().to_string(),
            timestamp,
            geo,
        }
    }
}

/// Last-will registered atomically with a connect call
///
/// Owned by exactly one transport session; a new one is built for every
/// connect attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub message: PresenceMessage,
}

impl LastWill {
    pub fn payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        self.message.to_payload()
    }
}

/// Decoded form of an inbound command payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Command {
    /// JSON object carrying a string `command` field
    Named(String),
    /// Any other valid JSON
    Structured(Value),
    /// Payload that is not JSON, decoded as lossy UTF-8
    Raw(String),
}

impl Command {
    pub fn decode(payload: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(map)) => match map.get("command") {
                Some(Value::String(name)) => Command::Named(name.clone()),
                _ => Command::Structured(Value::Object(map)),
            },
            Ok(other) => Command::Structured(other),
            Err(_) => Command::Raw(String::from_utf8_lossy(payload).into_owned()),
        }
    }

    /// Command name, if the payload carried one
    pub fn name(&self) -> Option<&str> {
        match self {
            Command::Named(name) => Some(name),
            _ => None,
        }
    }
}

/// Inbound command handed to the command sink
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub topic: String,
    pub raw_payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
    pub command: Command,
}

impl CommandEnvelope {
    pub fn new(topic: impl Into<String>, raw_payload: Vec<u8>, received_at: DateTime<Utc>) -> Self {
        let command = Command::decode(&raw_payload);
        Self {
            topic: topic.into(),
            raw_payload,
            received_at,
            command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixed_time() -> DateTime<Utc> {
        DateTime::from_timestamp(1609459200, 0).unwrap()
    }

    #[test]
    fn test_presence_message_serialization() {
        let message = PresenceIntent::Heartbeat.message(fixed_time(), None);
        let json = String::from_utf8(message.to_payload().unwrap()).unwrap();

        assert!(json.contains("\"status\":\"online\""));
        assert!(json.contains("\"qualifier\":\"heartbeat\""));
        assert!(json.contains("2021-01-01T00:00:00Z"));
        assert!(!json.contains("geo"), "geo should be omitted when absent");

        let parsed = PresenceMessage::from_payload(json.as_bytes()).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_presence_message_with_geo() {
        let geo = GeoPoint {
            lat: 52.52,
            lon: 13.405,
        };
        let message = PresenceIntent::Connected.message(fixed_time(), Some(geo));
        let value: Value = serde_json::from_slice(&message.to_payload().unwrap()).unwrap();

        assert_eq!(value["geo"]["lat"], json!(52.52));
        assert_eq!(value["geo"]["lon"], json!(13.405));
    }

    #[test]
    fn test_intent_status_mapping() {
        assert_eq!(PresenceIntent::Connected.status(), PresenceStatus::Online);
        assert_eq!(PresenceIntent::Heartbeat.status(), PresenceStatus::Online);
        assert_eq!(PresenceIntent::Resumed.status(), PresenceStatus::Online);
        assert_eq!(PresenceIntent::Paused.status(), PresenceStatus::Paused);
        assert_eq!(PresenceIntent::NoInternet.status(), PresenceStatus::Offline);
        assert_eq!(PresenceIntent::CleanShutdown.status(), PresenceStatus::Offline);
        assert_eq!(PresenceIntent::ConnectionLost.status(), PresenceStatus::Offline);
    }

    #[test]
    fn test_last_will_differs_from_every_online_payload() {
        let will = LastWill {
            topic: "clients/status/device-1".to_string(),
            message: PresenceIntent::ConnectionLost.message(fixed_time(), None),
        };
        let will_payload = will.payload().unwrap();

        for intent in [
            PresenceIntent::Connected,
            PresenceIntent::Heartbeat,
            PresenceIntent::Resumed,
        ] {
            let online = intent.message(fixed_time(), None).to_payload().unwrap();
            assert_ne!(will_payload, online, "last-will must not look like {intent:?}");
        }
        assert!(!will.message.is_online());
    }

    #[test]
    fn test_decode_named_command() {
        let command = Command::decode(br#"{"command":"stop"}"#);
        assert_eq!(command, Command::Named("stop".to_string()));
        assert_eq!(command.name(), Some("stop"));
    }

    #[test]
    fn test_decode_object_without_string_command() {
        let command = Command::decode(br#"{"command":42,"speed":3}"#);
        assert_eq!(
            command,
            Command::Structured(json!({"command": 42, "speed": 3}))
        );
        assert_eq!(command.name(), None);
    }

    #[test]
    fn test_decode_non_object_json() {
        assert_eq!(
            Command::decode(b"[1,2,3]"),
            Command::Structured(json!([1, 2, 3]))
        );
        assert_eq!(
            Command::decode(br#""stop""#),
            Command::Structured(json!("stop"))
        );
    }

    #[test]
    fn test_decode_raw_text() {
        assert_eq!(
            Command::decode(b"reboot now"),
            Command::Raw("reboot now".to_string())
        );
        // Invalid UTF-8 is decoded lossily rather than rejected
        assert_eq!(
            Command::decode(&[0x66, 0xff, 0x6f]),
            Command::Raw("f\u{fffd}o".to_string())
        );
    }

    #[test]
    fn test_command_envelope_keeps_raw_payload() {
        let payload = br#"{"command":"stop"}"#.to_vec();
        let envelope = CommandEnvelope::new("clients/commands", payload.clone(), fixed_time());

        assert_eq!(envelope.topic, "clients/commands");
        assert_eq!(envelope.raw_payload, payload);
        assert_eq!(envelope.received_at, fixed_time());
        assert_eq!(envelope.command.name(), Some("stop"));
    }
}
