//! Presence publishing with debounce
//!
//! Two paths lead to the transport. [`PresencePublisher::publish`] is
//! debounced: only the last call inside the window is sent.
//! [`PresencePublisher::publish_now`] is immediate and best-effort. Both check
//! the connection state at send time and skip (never queue) when the session
//! is not connected.

use crate::coordinator::ConnectionState;
use crate::error::{sanitize_reason, PresenceError};
use crate::observability::MetricsCollector;
use crate::protocol::{GeoPoint, LastWill, PresenceIntent};
use crate::transport::{QoS, Transport};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Upper bound on handing one presence message to the transport
///
/// Immediate publishes run inside the coordinator loop, so a stalled
/// transport may hold it for at most this long.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

/// Debounced presence publisher shared by the coordinator and heartbeat
pub struct PresencePublisher<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for PresencePublisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T: Transport> {
    transport: Arc<T>,
    topic: String,
    state_rx: watch::Receiver<ConnectionState>,
    debounce: Duration,
    geo: Mutex<Option<GeoPoint>>,
    last_stamp: Mutex<Option<DateTime<Utc>>>,
    pending: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<MetricsCollector>,
}

impl<T: Transport + 'static> PresencePublisher<T> {
    pub fn new(
        transport: Arc<T>,
        topic: String,
        state_rx: watch::Receiver<ConnectionState>,
        debounce: Duration,
        geo: Option<GeoPoint>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                topic,
                state_rx,
                debounce,
                geo: Mutex::new(geo),
                last_stamp: Mutex::new(None),
                pending: Mutex::new(None),
                metrics,
            }),
        }
    }

    /// Debounced publish; a later call inside the window replaces this one
    pub fn publish(&self, intent: PresenceIntent) {
        let inner = Arc::clone(&self.inner);
        let span = crate::presence_span!(op = "debounced", qualifier = intent.qualifier());
        let handle = tokio::spawn(
            async move {
                tokio::time::sleep(inner.debounce).await;
                inner.send(intent).await;
            }
            .instrument(span),
        );

        if let Ok(mut pending) = self.inner.pending.lock() {
            if let Some(previous) = pending.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Immediate best-effort publish; cancels any pending debounced publish
    ///
    /// Returns `true` if the transport accepted the message.
    pub async fn publish_now(&self, intent: PresenceIntent) -> bool {
        self.cancel_pending();
        self.inner.send(intent).await
    }

    /// Drop the pending debounced publish, if any
    pub fn cancel_pending(&self) -> bool {
        let previous = self
            .inner
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.take());

        match previous {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.inner
            .pending
            .lock()
            .map(|pending| pending.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Build the last-will for the next connect attempt
    pub fn last_will(&self) -> LastWill {
        LastWill {
            topic: self.inner.topic.clone(),
            message: PresenceIntent::ConnectionLost.message(Utc::now(), self.inner.geo()),
        }
    }

    pub fn set_geo(&self, geo: Option<GeoPoint>) {
        if let Ok(mut current) = self.inner.geo.lock() {
            *current = geo;
        }
    }
}

impl<T: Transport> Inner<T> {
    fn geo(&self) -> Option<GeoPoint> {
        self.geo.lock().ok().and_then(|geo| *geo)
    }

    /// Wall-clock timestamp that never goes backwards across publishes
    fn stamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.last_stamp.lock() {
            Ok(mut last) => {
                let stamp = match *last {
                    Some(previous) if previous > now => previous,
                    _ => now,
                };
                *last = Some(stamp);
                stamp
            }
            Err(_) => now,
        }
    }

    async fn send(&self, intent: PresenceIntent) -> bool {
        let state = self.state_rx.borrow().clone();
        if !state.can_publish() {
            let skipped = PresenceError::PublishSkipped { state };
            info!(qualifier = intent.qualifier(), "{}", skipped);
            self.metrics.presence_skipped();
            return false;
        }

        let message = intent.message(self.stamp(), self.geo());
        let payload = match message.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize presence message: {}", e);
                self.metrics.publish_failed();
                return false;
            }
        };

        let publish = self
            .transport
            .publish(&self.topic, payload, QoS::AtLeastOnce, false);

        match tokio::time::timeout(PUBLISH_TIMEOUT, publish).await {
            Ok(Ok(())) => {
                info!(
                    status = ?message.status,
                    qualifier = %message.qualifier,
                    topic = %self.topic,
                    "Published presence"
                );
                self.metrics.presence_published();
                true
            }
            Ok(Err(e)) => {
                warn!(
                    qualifier = %message.qualifier,
                    "Presence publish failed: {}",
                    sanitize_reason(&e.to_string())
                );
                self.metrics.publish_failed();
                false
            }
            Err(_) => {
                warn!(
                    qualifier = %message.qualifier,
                    "Presence publish timed out after {:?}",
                    PUBLISH_TIMEOUT
                );
                self.metrics.publish_failed();
                false
            }
        }
    }
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(handle) = pending.take() {
                handle.abort();
            }
        }
        debug!("Presence publisher dropped");
    }
}
