//! Pure connection configuration for the MQTT transport
//!
//! This module contains the transport error type and the pure functions that
//! turn configuration plus a [`LastWill`] into rumqttc options.

use crate::config::MqttSection;
use crate::protocol::LastWill;
use rumqttc::v5::mqttbytes::v5::LastWill as MqttLastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Max packet size accepted from and sent to the broker
pub const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed: {0}")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Serialization error")]
    SerializationError(#[source] serde_json::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - no active session")]
    NotConnected,
    #[error("ConnAck timeout after {0:?}")]
    ConnectTimeout(Duration),
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

/// Pure function to configure MQTT options for one connect attempt
///
/// The last-will is registered here so that it travels in the CONNECT packet
/// of exactly this session.
pub fn configure_mqtt_options(
    client_id: &str,
    config: &MqttSection,
    last_will: &LastWill,
) -> Result<MqttOptions, MqttError> {
    let (host, port, tls) = parse_broker_url(&config.broker_url)?;
    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    // Credentials are resolved from the environment at connect time
    if let Some(username_env) = &config.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = config
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            mqtt_options.set_credentials(username, password);
        }
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    let payload = last_will.payload().map_err(MqttError::SerializationError)?;
    let lwt = MqttLastWill::new(
        last_will.topic.clone(),
        payload,
        QoS::AtLeastOnce,
        false,
        None,
    );
    mqtt_options.set_last_will(lwt);

    Ok(mqtt_options)
}

/// Parse `mqtt://host[:port]` or `mqtts://host[:port]` (pure function)
pub fn parse_broker_url(broker_url: &str) -> Result<(String, u16, bool), MqttError> {
    let url = Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" => false,
        "mqtts" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok((host.to_string(), port, tls))
}

/// Time allowed between starting an attempt and receiving ConnAck
pub fn connect_timeout(config: &MqttSection) -> Duration {
    Duration::from_secs(config.connect_timeout_secs.max(1))
}
