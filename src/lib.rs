//! MQTT Presence - connection-resilient presence client
//!
//! Keeps an MQTT session alive across network flaps and app lifecycle changes,
//! announces the client's presence on a status topic and forwards commands
//! received on a command topic.
//!
//! # Overview
//!
//! - Coordinator state machine driven by one ordered signal channel
//! - Debounced reconnect scheduling and presence publishing
//! - Last-will registered with every connect attempt
//! - Heartbeat while connected
//! - rumqttc-backed MQTT v5 transport behind the [`Transport`] trait
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_presence::protocol::{PresenceIntent, PresenceStatus};
//! use chrono::Utc;
//!
//! let message = PresenceIntent::NoInternet.message(Utc::now(), None);
//! assert_eq!(message.status, PresenceStatus::Offline);
//! assert_eq!(message.qualifier, "no internet");
//!
//! let json = String::from_utf8(message.to_payload().unwrap()).unwrap();
//! assert!(json.contains("\"offline\""));
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod observability;
pub mod presence;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, PresenceConfig};
pub use coordinator::{ConnectionState, Coordinator, CoordinatorHandle, CoordinatorSettings, Lifecycle};
pub use error::{PresenceError, PresenceResult};
pub use protocol::*;
pub use transport::mqtt::MqttClient;
pub use transport::{ConnectResult, Transport, TransportEvent};
