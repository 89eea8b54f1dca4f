//! Impure I/O operations for the MQTT transport
//!
//! This module owns the rumqttc client and event loop of the current session.
//! Every connect attempt builds a fresh client/event-loop pair so the
//! last-will of that attempt travels in its CONNECT packet. Reconnection is
//! driven by the coordinator, so the poller stops at the first connection
//! error instead of letting rumqttc reconnect on its own.

use super::connection::{configure_mqtt_options, connect_timeout, MqttError};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::coordinator::EventFeed;
use crate::protocol::{ClientIdentity, LastWill};
use crate::transport::{ConnectResult, Transport, TransportEvent};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Upper bound for a single publish/subscribe hand-off to the event loop
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for the poller to flush DISCONNECT before it is aborted
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

type AckSender = oneshot::Sender<Result<ConnectResult, String>>;
type SharedFeed = Arc<std::sync::Mutex<Option<EventFeed>>>;

/// One broker session: the client handle and the task polling its event loop
struct Session {
    client: AsyncClient,
    poller: JoinHandle<()>,
    closing: Arc<AtomicBool>,
}

/// rumqttc-backed transport
pub struct MqttClient {
    config: MqttSection,
    session: Mutex<Option<Session>>,
    event_feed: SharedFeed,
}

impl MqttClient {
    pub fn new(config: MqttSection) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            event_feed: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Wait for the poller to report the broker's answer to CONNECT
    async fn wait_for_connack(
        ack_rx: oneshot::Receiver<Result<ConnectResult, String>>,
        timeout: Duration,
    ) -> Result<ConnectResult, MqttError> {
        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(reason))) => Err(MqttError::ConnectionFailedStr(reason)),
            Ok(Err(_)) => Err(MqttError::ConnectionFailedStr(
                "Event loop stopped before ConnAck".to_string(),
            )),
            Err(_) => Err(MqttError::ConnectTimeout(timeout)),
        }
    }

    /// Forward an event to the coordinator, if a feed is installed
    fn emit(feed: &SharedFeed, event: TransportEvent) {
        let feed = feed.lock().ok().and_then(|guard| guard.clone());
        match feed {
            Some(feed) => {
                if !feed.emit(event) {
                    debug!(target: "mqtt_transport", "Coordinator gone, dropping transport event");
                }
            }
            None => warn!("Transport event received but no event feed configured - dropped"),
        }
    }

    /// Poll one session's event loop until the session ends
    async fn run_event_loop(
        mut event_loop: EventLoop,
        ack_tx: AckSender,
        feed: SharedFeed,
        closing: Arc<AtomicBool>,
    ) {
        let mut ack_tx = Some(ack_tx);

        loop {
            match event_loop.poll().await {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged { accepted, code } => {
                        if let Some(tx) = ack_tx.take() {
                            let result = if accepted {
                                ConnectResult::Connected
                            } else {
                                ConnectResult::NotConnected(code)
                            };
                            let _ = tx.send(Ok(result));
                        }
                        if !accepted {
                            break;
                        }
                    }
                    EventRoute::MessageReceived {
                        topic,
                        payload,
                        retain,
                    } => {
                        debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                        Self::emit(
                            &feed,
                            TransportEvent::Message {
                                topic,
                                payload,
                                retain,
                            },
                        );
                    }
                    EventRoute::Disconnected { reason } => {
                        Self::end_session(&mut ack_tx, &feed, &closing, reason);
                        break;
                    }
                    EventRoute::SubscriptionConfirmed { return_codes, .. } => {
                        if let Err(e) = MessageHandler::validate_subscription_success(&return_codes)
                        {
                            error!("{}", e);
                        } else {
                            debug!(target: "mqtt_transport", "Subscription confirmed: {:?}", return_codes);
                        }
                    }
                    EventRoute::InfrastructureEvent(event_str) => {
                        debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                    }
                    EventRoute::OutgoingEvent => {}
                },
                Err(e) => {
                    Self::end_session(&mut ack_tx, &feed, &closing, e.to_string());
                    break;
                }
            }
        }

        debug!(target: "mqtt_transport", "MQTT event loop stopped");
    }

    /// Report the end of a session either as a connect failure or a disconnect
    fn end_session(
        ack_tx: &mut Option<AckSender>,
        feed: &SharedFeed,
        closing: &AtomicBool,
        reason: String,
    ) {
        if let Some(tx) = ack_tx.take() {
            let _ = tx.send(Err(reason));
        } else if closing.load(Ordering::SeqCst) {
            debug!(target: "mqtt_transport", "Session closed locally: {}", reason);
        } else {
            warn!("MQTT session lost: {}", reason);
            Self::emit(feed, TransportEvent::Disconnected { reason });
        }
    }

    /// Close the stored session, waiting briefly for DISCONNECT to flush
    async fn close_session(&self) -> Result<(), MqttError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };

        session.closing.store(true, Ordering::SeqCst);

        let result = if session.poller.is_finished() {
            Ok(())
        } else {
            session
                .client
                .disconnect()
                .await
                .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))
        };

        let mut poller = session.poller;
        if tokio::time::timeout(DISCONNECT_GRACE, &mut poller)
            .await
            .is_err()
        {
            warn!("Event loop task didn't shut down gracefully, forcing abort");
            poller.abort();
        }

        result
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(
        &self,
        identity: &ClientIdentity,
        last_will: &LastWill,
    ) -> Result<ConnectResult, Self::Error> {
        if let Err(e) = self.close_session().await {
            debug!(target: "mqtt_transport", "Previous session close failed: {}", e);
        }

        let mqtt_options = configure_mqtt_options(identity.as_str(), &self.config, last_will)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let (ack_tx, ack_rx) = oneshot::channel();
        let closing = Arc::new(AtomicBool::new(false));
        let poller = tokio::spawn(Self::run_event_loop(
            event_loop,
            ack_tx,
            self.event_feed.clone(),
            closing.clone(),
        ));

        info!(
            client_id = %identity,
            broker = %self.config.broker_url,
            "Connecting to MQTT broker"
        );

        // Stored before the handshake so an abandoned attempt can still be closed
        *self.session.lock().await = Some(Session {
            client,
            poller,
            closing,
        });

        let outcome = Self::wait_for_connack(ack_rx, connect_timeout(&self.config)).await;
        if !matches!(outcome, Ok(ConnectResult::Connected)) {
            if let Some(session) = self.session.lock().await.take() {
                session.poller.abort();
            }
        }
        outcome
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.close_session().await?;
        info!("MQTT client disconnected");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(MqttError::NotConnected)?;

        tokio::time::timeout(REQUEST_TIMEOUT, session.client.subscribe(topic, qos))
            .await
            .map_err(|_| MqttError::SubscriptionFailed("request timed out".into()))?
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        debug!(target: "mqtt_transport", "Subscribed to: {}", topic);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Error> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(MqttError::NotConnected)?;

        tokio::time::timeout(
            REQUEST_TIMEOUT,
            session.client.publish(topic, qos, retain, payload),
        )
        .await
        .map_err(|_| MqttError::PublishFailed("request timed out".into()))?
        .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(target: "mqtt_transport", "Published to {} (retain={})", topic, retain);
        Ok(())
    }

    fn set_event_sender(&self, feed: EventFeed) {
        if let Ok(mut guard) = self.event_feed.lock() {
            *guard = Some(feed);
        }
    }
}
