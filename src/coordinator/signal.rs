//! Signals delivered to the coordinator and the handles that produce them
//!
//! Every input the coordinator reacts to arrives on one unbounded channel and
//! is handled in arrival order.

use super::state::{ConnectionState, Lifecycle};
use crate::error::{PresenceError, PresenceResult};
use crate::observability::{MetricsCollector, MetricsSnapshot};
use crate::protocol::GeoPoint;
use crate::transport::{ConnectResult, TransportEvent};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Input to the coordinator loop
#[derive(Debug)]
pub enum Signal {
    /// Host connectivity reading: `true` means a usable network
    Connectivity(bool),
    /// Host app moved to the foreground or background
    Lifecycle(Lifecycle),
    /// Pushed by the transport session
    Transport(TransportEvent),
    /// Terminal outcome of connect attempt `attempt`
    ConnectOutcome {
        attempt: u64,
        result: Result<ConnectResult, String>,
    },
    /// Reconnect timer of `generation` fired
    ReconnectDue { generation: u64 },
    /// Manual retry requested by the host
    RetryNow,
    /// Location attached to subsequent presence messages
    Location(GeoPoint),
    /// Deliberate teardown; `done` is answered once the session is closed
    Shutdown { done: Option<oneshot::Sender<()>> },
}

/// Sender side handed to a transport for its push feed
#[derive(Debug, Clone)]
pub struct EventFeed {
    tx: mpsc::UnboundedSender<Signal>,
}

impl EventFeed {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the coordinator has gone away
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(Signal::Transport(event)).is_ok()
    }
}

/// Cloneable handle used by the host to drive and observe a coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    signals: mpsc::UnboundedSender<Signal>,
    state_rx: watch::Receiver<ConnectionState>,
    metrics: Arc<MetricsCollector>,
}

impl CoordinatorHandle {
    pub(crate) fn new(
        signals: mpsc::UnboundedSender<Signal>,
        state_rx: watch::Receiver<ConnectionState>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            signals,
            state_rx,
            metrics,
        }
    }

    fn send(&self, signal: Signal) -> PresenceResult<()> {
        self.signals
            .send(signal)
            .map_err(|_| PresenceError::CoordinatorStopped)
    }

    pub fn connectivity_changed(&self, has_network: bool) -> PresenceResult<()> {
        self.send(Signal::Connectivity(has_network))
    }

    pub fn lifecycle_changed(&self, lifecycle: Lifecycle) -> PresenceResult<()> {
        self.send(Signal::Lifecycle(lifecycle))
    }

    pub fn retry_now(&self) -> PresenceResult<()> {
        self.send(Signal::RetryNow)
    }

    pub fn update_location(&self, geo: GeoPoint) -> PresenceResult<()> {
        self.send(Signal::Location(geo))
    }

    /// Request a clean teardown and wait until the session is closed
    pub async fn shutdown(&self) -> PresenceResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(Signal::Shutdown {
            done: Some(done_tx),
        })?;
        done_rx.await.map_err(|_| PresenceError::CoordinatorStopped)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
