//! Connection resilience coordinator
//!
//! The coordinator owns the [`ConnectionState`] machine and is its only
//! writer. Connectivity readings, lifecycle changes, transport events, timer
//! fires and connect outcomes all arrive as [`Signal`]s on one channel and are
//! handled one at a time. Connect calls run in a spawned task whose outcome is
//! posted back onto the same channel, so the loop never blocks on a handshake.
//!
//! # Usage
//!
//! ```rust
//! use mqtt_presence::coordinator::{ConnectionState, Coordinator, CoordinatorSettings};
//! use mqtt_presence::protocol::ClientIdentity;
//! use mqtt_presence::testing::MockTransport;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # tokio_test::block_on(async {
//! let identity = ClientIdentity::generate("device")?;
//! let settings = CoordinatorSettings::default();
//! let transport = Arc::new(MockTransport::new());
//! let (command_tx, _command_rx) = mpsc::channel(16);
//!
//! let (coordinator, handle) = Coordinator::new(identity, settings, transport, command_tx);
//! let task = tokio::spawn(coordinator.run());
//!
//! let mut state = handle.subscribe_state();
//! handle.connectivity_changed(true)?;
//! state.wait_for(|s| *s == ConnectionState::Connected).await?;
//!
//! handle.shutdown().await?;
//! task.await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod signal;
pub mod state;

pub use signal::{CoordinatorHandle, EventFeed, Signal};
pub use state::{log_state_transition, ConnectionState, Lifecycle};

use crate::config::PresenceConfig;
use crate::error::{sanitize_reason, PresenceError};
use crate::observability::MetricsCollector;
use crate::presence::{HeartbeatDriver, PresencePublisher, ReconnectScheduler};
use crate::protocol::{ClientIdentity, CommandEnvelope, GeoPoint, PresenceIntent, TopicBuilder};
use crate::transport::mqtt::MessageHandler;
use crate::transport::{ConnectResult, QoS, Transport, TransportEvent};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Topics and timer settings for one coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    /// Fully built status topic, also used as last-will topic
    pub status_topic: String,
    /// Command topic subscribed after every successful connect
    pub command_topic: String,
    pub reconnect_delay: Duration,
    pub presence_debounce: Duration,
    pub heartbeat_interval: Duration,
    pub geo: Option<GeoPoint>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            status_topic: "clients/status".to_string(),
            command_topic: "clients/commands".to_string(),
            reconnect_delay: Duration::from_millis(3000),
            presence_debounce: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(15),
            geo: None,
        }
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &PresenceConfig, identity: &ClientIdentity) -> Self {
        Self {
            status_topic: TopicBuilder::build_status_topic(
                &config.topics.status,
                identity,
                config.topics.per_instance_status,
            ),
            command_topic: TopicBuilder::build_command_topic(&config.topics.command),
            reconnect_delay: config.timing.reconnect_delay(),
            presence_debounce: config.timing.presence_debounce(),
            heartbeat_interval: config.timing.heartbeat_interval(),
            geo: config.geo,
        }
    }
}

/// Owner of the connection state machine
pub struct Coordinator<T: Transport + 'static> {
    identity: ClientIdentity,
    command_topic: String,
    transport: Arc<T>,
    state_tx: watch::Sender<ConnectionState>,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: mpsc::UnboundedReceiver<Signal>,
    publisher: PresencePublisher<T>,
    heartbeat: HeartbeatDriver<T>,
    reconnect: ReconnectScheduler,
    command_sink: mpsc::Sender<CommandEnvelope>,
    metrics: Arc<MetricsCollector>,
    /// Latest connectivity reading; `None` until the first one arrives
    network_available: Option<bool>,
    /// Latest host lifecycle; the app starts in the foreground
    lifecycle: Lifecycle,
    connect_in_flight: bool,
    connect_attempt: u64,
    connect_task: Option<JoinHandle<()>>,
    /// Set before the deliberate disconnect; suppresses reconnects
    teardown: bool,
}

impl<T: Transport + 'static> Coordinator<T> {
    pub fn new(
        identity: ClientIdentity,
        settings: CoordinatorSettings,
        transport: Arc<T>,
        command_sink: mpsc::Sender<CommandEnvelope>,
    ) -> (Self, CoordinatorHandle) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Uninitialized);
        let metrics = Arc::new(MetricsCollector::new());

        transport.set_event_sender(EventFeed::new(signal_tx.clone()));

        let publisher = PresencePublisher::new(
            Arc::clone(&transport),
            settings.status_topic.clone(),
            state_rx.clone(),
            settings.presence_debounce,
            settings.geo,
            Arc::clone(&metrics),
        );
        let heartbeat = HeartbeatDriver::new(
            settings.heartbeat_interval,
            publisher.clone(),
            state_rx.clone(),
            Arc::clone(&metrics),
        );
        let reconnect = ReconnectScheduler::new(
            settings.reconnect_delay,
            signal_tx.clone(),
            Arc::clone(&metrics),
        );

        let handle = CoordinatorHandle::new(signal_tx.clone(), state_rx, Arc::clone(&metrics));

        let coordinator = Self {
            identity,
            command_topic: settings.command_topic,
            transport,
            state_tx,
            signal_tx,
            signal_rx,
            publisher,
            heartbeat,
            reconnect,
            command_sink,
            metrics,
            network_available: None,
            lifecycle: Lifecycle::Foreground,
            connect_in_flight: false,
            connect_attempt: 0,
            connect_task: None,
            teardown: false,
        };

        (coordinator, handle)
    }

    /// Process signals until a shutdown signal completes teardown
    pub async fn run(mut self) {
        let span = crate::coordinator_span!(op = "run", client_id = %self.identity);
        async {
            info!("Coordinator started");
            while let Some(signal) = self.signal_rx.recv().await {
                if !self.handle(signal).await {
                    break;
                }
            }
            info!("Coordinator stopped");
        }
        .instrument(span)
        .await
    }

    /// Handle one signal; returns `false` once the loop should exit
    async fn handle(&mut self, signal: Signal) -> bool {
        match signal {
            Signal::Connectivity(has_network) => self.on_connectivity(has_network).await,
            Signal::Lifecycle(lifecycle) => self.on_lifecycle(lifecycle),
            Signal::Transport(event) => self.on_transport_event(event).await,
            Signal::ConnectOutcome { attempt, result } => {
                self.on_connect_outcome(attempt, result).await
            }
            Signal::ReconnectDue { generation } => {
                if self.reconnect.take_due(generation) {
                    match self.state() {
                        ConnectionState::Connected | ConnectionState::Connecting => {
                            debug!("Reconnect fired while {}, nothing to do", self.state());
                        }
                        _ => self.begin_connect(),
                    }
                }
            }
            Signal::RetryNow => {
                info!("Manual retry requested");
                self.begin_connect();
            }
            Signal::Location(geo) => {
                debug!("Location updated");
                self.publisher.set_geo(Some(geo));
            }
            Signal::Shutdown { done } => {
                self.shutdown(done).await;
                return false;
            }
        }
        true
    }

    fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&self, new_state: ConnectionState) {
        let previous = self.state_tx.send_replace(new_state.clone());
        if previous != new_state {
            log_state_transition(&previous, &new_state);
            self.metrics.state_changed(&new_state.to_string());
        }
    }

    async fn on_connectivity(&mut self, has_network: bool) {
        self.network_available = Some(has_network);

        if has_network {
            match self.state() {
                ConnectionState::Uninitialized => self.begin_connect(),
                ConnectionState::NoNetwork
                | ConnectionState::Disconnected
                | ConnectionState::Failed(_) => {
                    if self.connect_in_flight {
                        debug!("Connectivity restored, attempt already in flight");
                    } else {
                        info!("Connectivity restored, scheduling reconnect");
                        self.request_reconnect();
                    }
                }
                ConnectionState::Connecting | ConnectionState::Connected => {}
            }
            return;
        }

        let unavailable = PresenceError::NetworkUnavailable;
        self.reconnect.cancel();

        match self.state() {
            ConnectionState::NoNetwork => {
                debug!("{}: already offline", unavailable);
            }
            ConnectionState::Connected => {
                warn!("{} while connected", unavailable);
                self.heartbeat.stop();
                self.publisher.cancel_pending();
                self.publisher.publish_now(PresenceIntent::NoInternet).await;
                self.close_session().await;
                self.metrics.connection_lost();
                self.set_state(ConnectionState::NoNetwork);
            }
            _ => {
                self.heartbeat.stop();
                self.publisher.cancel_pending();
                self.set_state(ConnectionState::NoNetwork);
            }
        }
    }

    fn on_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
        let connected = self.state().is_connected();
        match (lifecycle, connected) {
            (Lifecycle::Background, true) => {
                info!("App backgrounded, pausing presence");
                self.heartbeat.stop();
                self.publisher.publish(PresenceIntent::Paused);
            }
            (Lifecycle::Background, false) => {
                debug!("App backgrounded while {}", self.state());
            }
            (Lifecycle::Foreground, true) => {
                info!("App foregrounded, resuming presence");
                self.heartbeat.start();
                self.publisher.publish(PresenceIntent::Resumed);
            }
            (Lifecycle::Foreground, false) => {
                info!("App foregrounded while {}, trying to connect", self.state());
                self.begin_connect();
            }
        }
    }

    /// Start a connect attempt if every guard allows it
    fn begin_connect(&mut self) {
        if self.teardown {
            debug!("Teardown in progress, not connecting");
            return;
        }
        if self.connect_in_flight {
            debug!("Connect attempt already in flight");
            return;
        }
        if self.network_available != Some(true) {
            debug!("No network, not connecting");
            return;
        }
        if self.state().is_connected() {
            return;
        }

        self.reconnect.cancel();
        self.connect_in_flight = true;
        self.connect_attempt += 1;
        let attempt = self.connect_attempt;
        self.metrics.connect_attempt_started();

        let last_will = self.publisher.last_will();
        self.set_state(ConnectionState::Connecting);

        let transport = Arc::clone(&self.transport);
        let identity = self.identity.clone();
        let signals = self.signal_tx.clone();
        let span = crate::mqtt_span!(op = "connect", attempt = attempt);

        self.connect_task = Some(tokio::spawn(
            async move {
                let result = transport
                    .connect(&identity, &last_will)
                    .await
                    .map_err(|e| e.to_string());
                let _ = signals.send(Signal::ConnectOutcome { attempt, result });
            }
            .instrument(span),
        ));
    }

    async fn on_connect_outcome(&mut self, attempt: u64, result: Result<ConnectResult, String>) {
        if !self.connect_in_flight || attempt != self.connect_attempt {
            debug!("Ignoring outcome of stale connect attempt {}", attempt);
            return;
        }

        self.connect_in_flight = false;
        self.connect_task = None;
        self.metrics.connect_attempt_finished();

        let still_wanted = !self.teardown && self.state() == ConnectionState::Connecting;

        match result {
            Ok(ConnectResult::Connected) if still_wanted => self.on_connected().await,
            Ok(ConnectResult::Connected) => {
                info!(
                    "Connect attempt {} succeeded after state became {}, closing session",
                    attempt,
                    self.state()
                );
                self.close_session().await;
                self.reconnect_if_network_returned();
            }
            Ok(ConnectResult::NotConnected(reason)) | Err(reason) => {
                let failure = PresenceError::connect_failed(&reason);
                self.metrics.connection_failed();

                if still_wanted {
                    let reason = match failure {
                        PresenceError::ConnectFailed(reason) => reason,
                        other => other.to_string(),
                    };
                    self.set_state(ConnectionState::Failed(reason));
                    self.request_reconnect();
                } else {
                    debug!("{} (attempt {} no longer wanted)", failure, attempt);
                    self.reconnect_if_network_returned();
                }
            }
        }
    }

    /// Side effects of `Connecting -> Connected`, in order; failures are logged
    ///
    /// A backgrounded app announces "paused" and runs no heartbeat.
    async fn on_connected(&mut self) {
        self.metrics.connection_established();
        self.reconnect.cancel();
        self.set_state(ConnectionState::Connected);

        if let Err(e) = self
            .transport
            .subscribe(&self.command_topic, QoS::AtLeastOnce)
            .await
        {
            error!(
                "Failed to subscribe to {}: {}",
                self.command_topic,
                sanitize_reason(&e.to_string())
            );
        }

        match self.lifecycle {
            Lifecycle::Foreground => {
                self.heartbeat.start();
                self.publisher.publish_now(PresenceIntent::Connected).await;
            }
            Lifecycle::Background => {
                self.publisher.publish_now(PresenceIntent::Paused).await;
            }
        }
    }

    /// A discarded attempt may leave the network available with nothing scheduled
    fn reconnect_if_network_returned(&mut self) {
        if self.network_available == Some(true) && !self.state().is_connected() {
            self.request_reconnect();
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message {
                topic,
                payload,
                retain,
            } => {
                if !MessageHandler::should_process_message(&topic, retain, &self.command_topic) {
                    self.metrics.command_ignored();
                    return;
                }

                let envelope = CommandEnvelope::new(topic, payload, Utc::now());
                info!(
                    topic = %envelope.topic,
                    command = ?envelope.command.name(),
                    "Command received"
                );
                self.metrics.command_received();

                // Never wait on the consumer; the loop must keep handling signals
                match self.command_sink.try_send(envelope) {
                    Ok(()) => {}
                    Err(TrySendError::Full(dropped)) => {
                        warn!(topic = %dropped.topic, "Command sink full - command dropped");
                        self.metrics.command_dropped();
                    }
                    Err(TrySendError::Closed(dropped)) => {
                        warn!(topic = %dropped.topic, "Command sink closed - command dropped");
                        self.metrics.command_dropped();
                    }
                }
            }
            TransportEvent::Disconnected { reason } => {
                if !self.state().is_connected() {
                    debug!("Ignoring disconnect notification while {}", self.state());
                    return;
                }

                let error = PresenceError::protocol_disconnect(&reason);
                warn!("{}", error);

                self.heartbeat.stop();
                self.publisher.cancel_pending();
                self.metrics.connection_lost();
                self.set_state(ConnectionState::Disconnected);
                self.request_reconnect();
            }
        }
    }

    fn request_reconnect(&mut self) {
        if self.teardown {
            debug!("Teardown in progress, not scheduling reconnect");
            return;
        }
        self.reconnect.request();
    }

    async fn close_session(&self) {
        if let Err(e) = self.transport.disconnect().await {
            warn!(
                "Failed to close session cleanly: {}",
                sanitize_reason(&e.to_string())
            );
        }
    }

    /// Deliberate teardown: offline "clean" presence, then close
    async fn shutdown(&mut self, done: Option<oneshot::Sender<()>>) {
        info!("Shutting down coordinator");
        self.teardown = true;

        self.reconnect.cancel();
        self.heartbeat.stop();
        self.publisher.cancel_pending();

        let attempt_in_flight = self.connect_in_flight;
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if attempt_in_flight {
            self.connect_in_flight = false;
            self.metrics.connect_attempt_finished();
        }

        if self.state().is_connected() {
            self.publisher.publish_now(PresenceIntent::CleanShutdown).await;
            self.close_session().await;
        } else if attempt_in_flight {
            self.close_session().await;
        }

        self.set_state(ConnectionState::Disconnected);

        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    /// Drain signals posted by spawned tasks until a round yields nothing
    #[cfg(test)]
    async fn pump(&mut self) {
        loop {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let mut handled = 0;
            while let Ok(signal) = self.signal_rx.try_recv() {
                handled += 1;
                if !self.handle(signal).await {
                    return;
                }
            }
            if handled == 0 {
                return;
            }
        }
    }
}

impl<T: Transport + 'static> Drop for Coordinator<T> {
    fn drop(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
    }
}
