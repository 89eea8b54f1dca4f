//! MQTT v5 transport over rumqttc
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure option building, URL parsing and the error type
//! - [`message_handler`] - Pure event routing and message filtering
//! - [`client`] - Impure session ownership and event loop polling
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_presence::config::MqttSection;
//! use mqtt_presence::protocol::{ClientIdentity, LastWill, PresenceIntent};
//! use mqtt_presence::transport::{MqttTransport, Transport};
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     broker_url: "mqtt://localhost:1883".to_string(),
//!     username_env: None,
//!     password_env: None,
//!     keep_alive_secs: 30,
//!     connect_timeout_secs: 10,
//! };
//!
//! let identity = ClientIdentity::generate("device")?;
//! let last_will = LastWill {
//!     topic: format!("clients/status/{identity}"),
//!     message: PresenceIntent::ConnectionLost.message(chrono::Utc::now(), None),
//! };
//!
//! let transport = MqttTransport::new(config);
//! transport.connect(&identity, &last_will).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

// Re-export public types for convenience
pub use client::MqttClient;
pub use connection::{configure_mqtt_options, MqttError};
pub use message_handler::{EventRoute, MessageHandler};
