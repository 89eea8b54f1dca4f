//! Periodic "online (heartbeat)" re-assertion while connected

use super::publisher::PresencePublisher;
use crate::coordinator::ConnectionState;
use crate::observability::MetricsCollector;
use crate::protocol::PresenceIntent;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

pub struct HeartbeatDriver<T: Transport> {
    period: Duration,
    publisher: PresencePublisher<T>,
    state_rx: watch::Receiver<ConnectionState>,
    metrics: Arc<MetricsCollector>,
    task: Option<JoinHandle<()>>,
}

impl<T: Transport + 'static> HeartbeatDriver<T> {
    pub fn new(
        period: Duration,
        publisher: PresencePublisher<T>,
        state_rx: watch::Receiver<ConnectionState>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            period,
            publisher,
            state_rx,
            metrics,
            task: None,
        }
    }

    /// Arm the periodic timer; the first tick lands one period from now
    pub fn start(&mut self) {
        self.stop();

        let period = self.period;
        let publisher = self.publisher.clone();
        let state_rx = self.state_rx.clone();
        let metrics = Arc::clone(&self.metrics);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if !state_rx.borrow().is_connected() {
                    debug!("Heartbeat stopping: no longer connected");
                    break;
                }

                publisher.publish(PresenceIntent::Heartbeat);
                metrics.heartbeat();
            }
        }));

        debug!("Heartbeat started ({:?})", period);
    }

    /// Disarm the timer; returns `true` if one was running
    pub fn stop(&mut self) -> bool {
        match self.task.take() {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                if was_running {
                    debug!("Heartbeat stopped");
                }
                was_running
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl<T: Transport> Drop for HeartbeatDriver<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockTransport;

    fn driver(
        state: ConnectionState,
    ) -> (
        HeartbeatDriver<MockTransport>,
        Arc<MockTransport>,
        watch::Sender<ConnectionState>,
    ) {
        let transport = Arc::new(MockTransport::new());
        let (state_tx, state_rx) = watch::channel(state);
        let metrics = Arc::new(MetricsCollector::new());
        let publisher = PresencePublisher::new(
            Arc::clone(&transport),
            "clients/status/device-1".to_string(),
            state_rx.clone(),
            Duration::from_millis(500),
            None,
            Arc::clone(&metrics),
        );
        let driver = HeartbeatDriver::new(Duration::from_secs(15), publisher, state_rx, metrics);
        (driver, transport, state_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let (mut driver, transport, _state_tx) = driver(ConnectionState::Connected);
        driver.start();

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert_eq!(transport.publish_count(), 0);

        // Tick at 15s plus the debounce window
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.publish_count(), 1);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(transport.publish_count(), 2);
        assert!(driver.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_terminates_when_disconnected() {
        let (mut driver, transport, state_tx) = driver(ConnectionState::Connected);
        driver.start();

        state_tx.send_replace(ConnectionState::Disconnected);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(transport.publish_count(), 0);
        assert!(!driver.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (mut driver, transport, _state_tx) = driver(ConnectionState::Connected);

        assert!(!driver.stop());
        driver.start();
        assert!(driver.stop());
        assert!(!driver.stop());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.publish_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_timer() {
        let (mut driver, transport, _state_tx) = driver(ConnectionState::Connected);

        driver.start();
        tokio::time::sleep(Duration::from_secs(10)).await;
        driver.start();

        // Old timer would have ticked at 15s; the new one ticks at 25s
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.publish_count(), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(transport.publish_count(), 1);
    }
}
