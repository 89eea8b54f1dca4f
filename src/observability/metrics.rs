//! Thread-safe metrics collection
//!
//! Atomic counters for connection attempts, presence publishing and command
//! delivery. A collector is owned by one coordinator and shared by `Arc` with
//! the components it drives.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Thread-safe metrics collector using atomics and a mutex for the state label
pub struct MetricsCollector {
    // Connection metrics
    connected: AtomicBool,
    connect_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    attempts_in_flight: AtomicU64,
    max_attempts_in_flight: AtomicU64,
    connection_start_time: AtomicU64,

    // Reconnect scheduling
    reconnects_scheduled: AtomicU64,
    reconnects_coalesced: AtomicU64,

    // Presence metrics
    presence_published: AtomicU64,
    presence_skipped: AtomicU64,
    publish_failures: AtomicU64,
    heartbeats: AtomicU64,
    last_heartbeat: AtomicU64,

    // Command metrics
    commands_received: AtomicU64,
    commands_ignored: AtomicU64,
    commands_dropped: AtomicU64,

    // Lifecycle metrics
    current_state: Mutex<String>,
    state_transitions: AtomicU64,
    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connect_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            attempts_in_flight: AtomicU64::new(0),
            max_attempts_in_flight: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            reconnects_scheduled: AtomicU64::new(0),
            reconnects_coalesced: AtomicU64::new(0),
            presence_published: AtomicU64::new(0),
            presence_skipped: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            last_heartbeat: AtomicU64::new(0),
            commands_received: AtomicU64::new(0),
            commands_ignored: AtomicU64::new(0),
            commands_dropped: AtomicU64::new(0),
            current_state: Mutex::new("uninitialized".to_string()),
            state_transitions: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Connection metrics
    pub fn connect_attempt_started(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        let in_flight = self.attempts_in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_attempts_in_flight
            .fetch_max(in_flight, Ordering::Relaxed);
    }

    pub fn connect_attempt_finished(&self) {
        // Saturating decrement
        let _ = self
            .attempts_in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    // Reconnect scheduling
    pub fn reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_coalesced(&self) {
        self.reconnects_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    // Presence metrics
    pub fn presence_published(&self) {
        self.presence_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn presence_skipped(&self) {
        self.presence_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
        self.last_heartbeat
            .store(current_timestamp(), Ordering::Relaxed);
    }

    // Command metrics
    pub fn command_received(&self) {
        self.commands_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Message filtered out (retained or unexpected topic)
    pub fn command_ignored(&self) {
        self.commands_ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Command sink closed or full
    pub fn command_dropped(&self) {
        self.commands_dropped.fetch_add(1, Ordering::Relaxed);
    }

    // Lifecycle metrics
    pub fn state_changed(&self, state: &str) {
        if let Ok(mut current) = self.current_state.lock() {
            *current = state.to_string();
        }
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current state label (pure function)
    fn get_current_state(&self) -> String {
        self.current_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    /// Calculate connection duration (pure function)
    fn calculate_connection_duration(&self, now: u64) -> u64 {
        if self.connected.load(Ordering::Relaxed) {
            let start_time = self.connection_start_time.load(Ordering::Relaxed);
            now.saturating_sub(start_time)
        } else {
            0
        }
    }

    /// Get complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();

        MetricsSnapshot {
            connection: ConnectionMetrics {
                connected: self.connected.load(Ordering::Relaxed),
                connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                attempts_in_flight: self.attempts_in_flight.load(Ordering::Relaxed),
                max_attempts_in_flight: self.max_attempts_in_flight.load(Ordering::Relaxed),
                reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
                reconnects_coalesced: self.reconnects_coalesced.load(Ordering::Relaxed),
                connection_duration_seconds: self.calculate_connection_duration(now),
            },
            presence: PresenceMetrics {
                published: self.presence_published.load(Ordering::Relaxed),
                skipped: self.presence_skipped.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                heartbeats: self.heartbeats.load(Ordering::Relaxed),
                last_heartbeat: self.last_heartbeat.load(Ordering::Relaxed),
            },
            commands: CommandMetrics {
                received: self.commands_received.load(Ordering::Relaxed),
                ignored: self.commands_ignored.load(Ordering::Relaxed),
                dropped: self.commands_dropped.load(Ordering::Relaxed),
            },
            lifecycle: LifecycleMetrics {
                current_state: self.get_current_state(),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub connection: ConnectionMetrics,
    pub presence: PresenceMetrics,
    pub commands: CommandMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub connect_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub attempts_in_flight: u64,
    pub max_attempts_in_flight: u64,
    pub reconnects_scheduled: u64,
    pub reconnects_coalesced: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenceMetrics {
    pub published: u64,
    pub skipped: u64,
    pub publish_failures: u64,
    pub heartbeats: u64,
    pub last_heartbeat: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandMetrics {
    pub received: u64,
    pub ignored: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleMetrics {
    pub current_state: String,
    pub state_transitions: u64,
    pub uptime_seconds: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
