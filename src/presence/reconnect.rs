//! Debounced reconnect scheduling
//!
//! At most one reconnect timer is armed at a time. Requests made while a
//! timer is pending coalesce into it. Firing does not connect directly; it
//! posts [`Signal::ReconnectDue`] so the coordinator applies its own guards
//! in order with every other signal.

use crate::coordinator::Signal;
use crate::observability::MetricsCollector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct ReconnectScheduler {
    delay: Duration,
    signals: mpsc::UnboundedSender<Signal>,
    pending: Option<(u64, JoinHandle<()>)>,
    generation: u64,
    metrics: Arc<MetricsCollector>,
}

impl ReconnectScheduler {
    pub fn new(
        delay: Duration,
        signals: mpsc::UnboundedSender<Signal>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            delay,
            signals,
            pending: None,
            generation: 0,
            metrics,
        }
    }

    /// Arm the timer unless one is already pending
    ///
    /// Returns `true` when a new timer was armed.
    pub fn request(&mut self) -> bool {
        if self.is_pending() {
            debug!("Reconnect already scheduled, coalescing request");
            self.metrics.reconnect_coalesced();
            return false;
        }

        self.generation += 1;
        let generation = self.generation;
        let delay = self.delay;
        let signals = self.signals.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signals.send(Signal::ReconnectDue { generation });
        });

        debug!("Reconnect scheduled in {:?} (generation {})", delay, generation);
        self.metrics.reconnect_scheduled();
        self.pending = Some((generation, handle));
        true
    }

    /// Disarm the pending timer; returns `true` if one was pending
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some((generation, handle)) => {
                handle.abort();
                debug!("Reconnect timer canceled (generation {})", generation);
                true
            }
            None => false,
        }
    }

    /// Consume a fire notification
    ///
    /// Returns `true` only for the timer that is currently pending; fires
    /// from canceled timers already in the channel are stale.
    pub fn take_due(&mut self, generation: u64) -> bool {
        match &self.pending {
            Some((pending, _)) if *pending == generation => {
                self.pending = None;
                true
            }
            _ => {
                debug!("Ignoring stale reconnect fire (generation {})", generation);
                false
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
