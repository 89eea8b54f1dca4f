//! Mock implementations for testing
//!
//! Provides a scriptable mock [`Transport`] that records every call together
//! with the conditions it was made under, so tests can check ordering and
//! connection guards without a broker.

use crate::coordinator::{ConnectionState, EventFeed};
use crate::protocol::{ClientIdentity, LastWill, PresenceMessage};
use crate::transport::mqtt::MqttError;
use crate::transport::{ConnectResult, QoS, Transport, TransportEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// One recorded transport call
#[derive(Debug, Clone, PartialEq)]
pub enum TransportOp {
    Connect {
        client_id: String,
        last_will: LastWill,
        /// Network reading observed when the call was made, if observed
        network_available: Option<bool>,
    },
    Disconnect,
    Subscribe {
        topic: String,
        qos: QoS,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        /// Connection state observed when the call was made, if observed
        state: Option<ConnectionState>,
    },
}

/// Scripted outcome of one connect call
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectScript {
    Connected,
    NotConnected(String),
    Error(String),
}

/// Mock transport for testing
#[derive(Debug)]
pub struct MockTransport {
    ops: Mutex<Vec<TransportOp>>,
    script: Mutex<VecDeque<ConnectScript>>,
    connect_delay: Mutex<Duration>,
    publish_delay: Mutex<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: AtomicUsize,
    fail_publish: AtomicBool,
    emit_on_disconnect: AtomicBool,
    feed: Mutex<Option<EventFeed>>,
    network: Mutex<Option<Arc<AtomicBool>>>,
    state: Mutex<Option<watch::Receiver<ConnectionState>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            connect_delay: Mutex::new(Duration::ZERO),
            publish_delay: Mutex::new(Duration::ZERO),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: AtomicUsize::new(0),
            fail_publish: AtomicBool::new(false),
            emit_on_disconnect: AtomicBool::new(false),
            feed: Mutex::new(None),
            network: Mutex::new(None),
            state: Mutex::new(None),
        }
    }
}

/// Decrements the in-flight counter even when the connect task is aborted
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next connect call
    pub fn push_outcome(&self, outcome: ConnectScript) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
    }

    /// Simulated handshake duration
    pub fn set_connect_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.connect_delay.lock() {
            *current = delay;
        }
    }

    /// Simulated stall before a publish is accepted
    pub fn set_publish_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.publish_delay.lock() {
            *current = delay;
        }
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Emit `Disconnected` on the feed whenever `disconnect` is called
    ///
    /// Mirrors a transport that reports its own close; the coordinator must
    /// not treat that as an unexpected loss.
    pub fn set_emit_on_disconnect(&self, emit: bool) {
        self.emit_on_disconnect.store(emit, Ordering::SeqCst);
    }

    /// Record the host's network reading alongside each connect call
    pub fn observe_network(&self, network: Arc<AtomicBool>) {
        if let Ok(mut current) = self.network.lock() {
            *current = Some(network);
        }
    }

    /// Record the coordinator state alongside each publish call
    pub fn observe_state(&self, state: watch::Receiver<ConnectionState>) {
        if let Ok(mut current) = self.state.lock() {
            *current = Some(state);
        }
    }

    /// Push an event as if it came from the broker session
    pub fn emit(&self, event: TransportEvent) -> bool {
        let feed = self.feed.lock().ok().and_then(|feed| feed.clone());
        match feed {
            Some(feed) => feed.emit(event),
            None => false,
        }
    }

    pub fn ops(&self) -> Vec<TransportOp> {
        self.ops.lock().map(|ops| ops.clone()).unwrap_or_default()
    }

    pub fn connect_count(&self) -> usize {
        self.count(|op| matches!(op, TransportOp::Connect { .. }))
    }

    pub fn publish_count(&self) -> usize {
        self.count(|op| matches!(op, TransportOp::Publish { .. }))
    }

    pub fn disconnect_count(&self) -> usize {
        self.count(|op| matches!(op, TransportOp::Disconnect))
    }

    /// Presence messages published so far, in order
    pub fn published_presence(&self) -> Vec<PresenceMessage> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                TransportOp::Publish { payload, .. } => PresenceMessage::from_payload(&payload).ok(),
                _ => None,
            })
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                TransportOp::Subscribe { topic, .. } => Some(topic),
                _ => None,
            })
            .collect()
    }

    /// Highest number of connect calls observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn count(&self, predicate: impl Fn(&TransportOp) -> bool) -> usize {
        self.ops
            .lock()
            .map(|ops| ops.iter().filter(|op| predicate(op)).count())
            .unwrap_or(0)
    }

    fn record(&self, op: TransportOp) {
        if let Ok(mut ops) = self.ops.lock() {
            ops.push(op);
        }
    }

    /// Next scripted outcome; connects succeed once the script is exhausted
    fn next_outcome(&self) -> ConnectScript {
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(ConnectScript::Connected)
    }

    fn delay_of(delay: &Mutex<Duration>) -> Duration {
        delay.lock().map(|delay| *delay).unwrap_or(Duration::ZERO)
    }

    fn observed_network(&self) -> Option<bool> {
        self.network
            .lock()
            .ok()
            .and_then(|network| network.as_ref().map(|n| n.load(Ordering::SeqCst)))
    }

    fn observed_state(&self) -> Option<ConnectionState> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.as_ref().map(|rx| rx.borrow().clone()))
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(
        &self,
        identity: &ClientIdentity,
        last_will: &LastWill,
    ) -> Result<ConnectResult, Self::Error> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let _guard = InFlightGuard(Arc::clone(&self.in_flight));

        self.record(TransportOp::Connect {
            client_id: identity.as_str().to_string(),
            last_will: last_will.clone(),
            network_available: self.observed_network(),
        });

        let delay = Self::delay_of(&self.connect_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.next_outcome() {
            ConnectScript::Connected => Ok(ConnectResult::Connected),
            ConnectScript::NotConnected(code) => Ok(ConnectResult::NotConnected(code)),
            ConnectScript::Error(message) => Err(MqttError::ConnectionFailedStr(message)),
        }
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.record(TransportOp::Disconnect);
        if self.emit_on_disconnect.load(Ordering::SeqCst) {
            self.emit(TransportEvent::Disconnected {
                reason: "closed by client".to_string(),
            });
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        self.record(TransportOp::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Error> {
        let delay = Self::delay_of(&self.publish_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MqttError::ConnectionFailedStr(
                "Mock publish failure".to_string(),
            ));
        }

        self.record(TransportOp::Publish {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
            state: self.observed_state(),
        });
        Ok(())
    }

    fn set_event_sender(&self, feed: EventFeed) {
        if let Ok(mut current) = self.feed.lock() {
            *current = Some(feed);
        }
    }
}
