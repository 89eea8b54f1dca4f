//! Transport layer for presence and command messaging
//!
//! This module provides the transport abstraction the coordinator drives and
//! the rumqttc-backed MQTT implementation.

use crate::coordinator::EventFeed;
use crate::protocol::{ClientIdentity, LastWill};

pub mod mqtt;

pub use rumqttc::v5::mqttbytes::QoS;

/// Terminal outcome of a connect call that did not error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectResult {
    /// Broker accepted the session
    Connected,
    /// Broker answered but refused the session (reason is the return code)
    NotConnected(String),
}

/// Events pushed by a transport session onto the coordinator's signal channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Inbound publish on a subscribed topic
    Message {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// Established session ended without a local disconnect call
    Disconnected { reason: String },
}

/// Transport trait for presence and command messaging
///
/// This trait provides an abstraction over the broker connection so the
/// coordinator can be driven by a mock in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new session with the last-will registered atomically
    ///
    /// Returns only once the broker has answered or the attempt has failed.
    /// Any previous session owned by this transport is closed first.
    async fn connect(
        &self,
        identity: &ClientIdentity,
        last_will: &LastWill,
    ) -> Result<ConnectResult, Self::Error>;

    /// Close the current session, if any
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Subscribe the current session to a topic
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error>;

    /// Publish a payload on the current session
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Error>;

    /// Set the feed that receives inbound messages and disconnect notifications
    fn set_event_sender(&self, feed: EventFeed);
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
