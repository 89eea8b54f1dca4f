//! End-to-end coordinator scenarios against the mock transport
//!
//! Every test runs on a paused clock so reconnect, debounce and heartbeat
//! timers are deterministic.


use mqtt_presence::coordinator::{ConnectionState, Lifecycle};
use mqtt_presence::protocol::{Command, GeoPoint, PresenceStatus};
use mqtt_presence::testing::{ConnectScript, MockTransport, TransportOp};
use mqtt_presence::transport::TransportEvent;
use std::time::Duration;
use test_helpers::{
    settle, spawn_coordinator, spawn_with, spawn_with_capacity, Harness, COMMAND_TOPIC,
    STATUS_TOPIC,
};
use tokio::time::sleep;

async fn connected_harness() -> Harness {
    let harness = spawn_coordinator();
    harness.handle.connectivity_changed(true).unwrap();
    settle().await;
    assert_eq!(harness.handle.state(), ConnectionState::Connected);
    harness
}

fn qualifiers(harness: &Harness) -> Vec<String> {
    harness
        .transport
        .published_presence()
        .into_iter()
        .map(|m| m.qualifier)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_network_flap_schedules_single_reconnect() {
    let harness = spawn_coordinator();

    harness.handle.connectivity_changed(false).unwrap();
    settle().await;
    harness.handle.connectivity_changed(true).unwrap();
    sleep(Duration::from_millis(400)).await;
    harness.handle.connectivity_changed(false).unwrap();

    sleep(Duration::from_secs(10)).await;

    assert_eq!(harness.handle.state(), ConnectionState::NoNetwork);
    assert_eq!(harness.transport.connect_count(), 0);
    let metrics = harness.handle.metrics();
    assert_eq!(metrics.connection.reconnects_scheduled, 1);
    assert_eq!(metrics.connection.connect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_first_connect_announces_presence() {
    let harness = connected_harness().await;

    assert_eq!(harness.transport.connect_count(), 1);
    assert_eq!(harness.transport.subscriptions(), vec![COMMAND_TOPIC.to_string()]);

    let ops = harness.transport.ops();
    match &ops[0] {
        TransportOp::Connect {
            client_id,
            last_will,
            ..
        } => {
            assert_eq!(client_id, "test-device-1");
            assert_eq!(last_will.topic, STATUS_TOPIC);
            assert_eq!(last_will.message.status, PresenceStatus::Offline);
            assert_eq!(last_will.message.qualifier, "connection lost");
        }
        other => panic!("Expected connect first, got {other:?}"),
    }

    let presence = harness.transport.published_presence();
    assert_eq!(presence.len(), 1);
    assert_eq!(presence[0].status, PresenceStatus::Online);
    assert_eq!(presence[0].qualifier, "connected");
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_while_connected() {
    let harness = connected_harness().await;

    // 15s period plus the debounce window, twice
    sleep(Duration::from_secs(31)).await;

    assert_eq!(qualifiers(&harness), vec!["connected", "heartbeat", "heartbeat"]);
    assert_eq!(harness.handle.metrics().presence.heartbeats, 2);
}

#[tokio::test(start_paused = true)]
async fn test_background_pauses_presence() {
    let harness = connected_harness().await;

    harness.handle.lifecycle_changed(Lifecycle::Background).unwrap();
    sleep(Duration::from_secs(60)).await;

    let presence = harness.transport.published_presence();
    assert_eq!(qualifiers(&harness), vec!["connected", "paused"]);
    assert_eq!(presence[1].status, PresenceStatus::Paused);
    assert_eq!(harness.handle.state(), ConnectionState::Connected);
    assert_eq!(harness.transport.connect_count(), 1);
    assert_eq!(harness.handle.metrics().connection.reconnects_scheduled, 0);
}

#[tokio::test(start_paused = true)]
async fn test_foreground_resumes_presence_and_heartbeat() {
    let harness = connected_harness().await;

    harness.handle.lifecycle_changed(Lifecycle::Background).unwrap();
    sleep(Duration::from_secs(5)).await;
    harness.handle.lifecycle_changed(Lifecycle::Foreground).unwrap();
    sleep(Duration::from_secs(16)).await;

    assert_eq!(
        qualifiers(&harness),
        vec!["connected", "paused", "resumed", "heartbeat"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rapid_lifecycle_changes_debounce_to_latest() {
    let harness = connected_harness().await;

    harness.handle.lifecycle_changed(Lifecycle::Background).unwrap();
    harness.handle.lifecycle_changed(Lifecycle::Foreground).unwrap();
    harness.handle.lifecycle_changed(Lifecycle::Background).unwrap();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(qualifiers(&harness), vec!["connected", "paused"]);
}

#[tokio::test(start_paused = true)]
async fn test_protocol_disconnect_reconnects_after_delay() {
    let harness = connected_harness().await;

    harness.transport.emit(TransportEvent::Disconnected {
        reason: "keep alive timeout".to_string(),
    });
    settle().await;

    assert_eq!(harness.handle.state(), ConnectionState::Disconnected);
    assert_eq!(harness.handle.metrics().connection.connections_lost, 1);

    // Heartbeat is stopped and nothing is published while disconnected
    sleep(Duration::from_millis(2900)).await;
    assert_eq!(harness.transport.connect_count(), 1);
    assert_eq!(qualifiers(&harness), vec!["connected"]);

    sleep(Duration::from_millis(200)).await;
    settle().await;

    assert_eq!(harness.transport.connect_count(), 2);
    assert_eq!(harness.handle.state(), ConnectionState::Connected);
    assert_eq!(qualifiers(&harness), vec!["connected", "connected"]);
    assert_eq!(harness.transport.subscriptions().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_network_loss_while_connected() {
    let harness = connected_harness().await;

    harness.handle.connectivity_changed(false).unwrap();
    settle().await;

    assert_eq!(harness.handle.state(), ConnectionState::NoNetwork);
    assert_eq!(qualifiers(&harness), vec!["connected", "no internet"]);

    let ops = harness.transport.ops();
    let no_internet = ops
        .iter()
        .rposition(|op| matches!(op, TransportOp::Publish { .. }))
        .unwrap();
    let disconnect = ops
        .iter()
        .position(|op| matches!(op, TransportOp::Disconnect))
        .unwrap();
    assert!(no_internet < disconnect);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.transport.connect_count(), 1);

    harness.handle.connectivity_changed(true).unwrap();
    sleep(Duration::from_millis(3100)).await;
    settle().await;

    assert_eq!(harness.handle.state(), ConnectionState::Connected);
    assert_eq!(harness.transport.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_command_delivered_to_sink() {
    let mut harness = connected_harness().await;

    harness.transport.emit(TransportEvent::Message {
        topic: COMMAND_TOPIC.to_string(),
        payload: br#"{"command":"stop"}"#.to_vec(),
        retain: false,
    });
    settle().await;

    let envelope = harness.commands.try_recv().unwrap();
    assert_eq!(envelope.command, Command::Named("stop".to_string()));
    assert_eq!(envelope.topic, COMMAND_TOPIC);
    assert_eq!(envelope.raw_payload, br#"{"command":"stop"}"#.to_vec());
    assert_eq!(harness.handle.metrics().commands.received, 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_json_command_delivered_raw() {
    let mut harness = connected_harness().await;

    harness.transport.emit(TransportEvent::Message {
        topic: COMMAND_TOPIC.to_string(),
        payload: b"reboot".to_vec(),
        retain: false,
    });
    settle().await;

    let envelope = harness.commands.try_recv().unwrap();
    assert_eq!(envelope.command, Command::Raw("reboot".to_string()));
}

fn stop_command() -> TransportEvent {
    TransportEvent::Message {
        topic: COMMAND_TOPIC.to_string(),
        payload: br#"{"command":"stop"}"#.to_vec(),
        retain: false,
    }
}

#[tokio::test(start_paused = true)]
async fn test_unread_command_sink_never_stalls_coordinator() {
    let harness = spawn_with_capacity(MockTransport::new(), 1);
    harness.handle.connectivity_changed(true).unwrap();
    settle().await;

    // Nobody reads the sink, so the second command finds it full
    harness.transport.emit(stop_command());
    harness.transport.emit(stop_command());
    settle().await;
    harness.handle.connectivity_changed(false).unwrap();
    sleep(Duration::from_secs(60)).await;

    assert_eq!(harness.handle.state(), ConnectionState::NoNetwork);
    assert_eq!(qualifiers(&harness), vec!["connected", "no internet"]);
    assert_eq!(harness.transport.disconnect_count(), 1);
    let metrics = harness.handle.metrics();
    assert_eq!(metrics.commands.received, 2);
    assert_eq!(metrics.commands.dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_closed_command_sink_drops_and_keeps_running() {
    let Harness {
        handle,
        transport,
        commands,
        ..
    } = connected_harness().await;
    drop(commands);

    transport.emit(stop_command());
    settle().await;
    assert_eq!(handle.metrics().commands.dropped, 1);

    handle.connectivity_changed(false).unwrap();
    settle().await;
    assert_eq!(handle.state(), ConnectionState::NoNetwork);
}

#[tokio::test(start_paused = true)]
async fn test_background_survives_reconnect() {
    let harness = connected_harness().await;

    harness.handle.lifecycle_changed(Lifecycle::Background).unwrap();
    sleep(Duration::from_secs(1)).await;
    harness.transport.emit(TransportEvent::Disconnected {
        reason: "keep alive timeout".to_string(),
    });
    sleep(Duration::from_secs(40)).await;

    assert_eq!(harness.handle.state(), ConnectionState::Connected);
    assert_eq!(harness.transport.connect_count(), 2);
    assert_eq!(qualifiers(&harness), vec!["connected", "paused", "paused"]);
    assert_eq!(harness.handle.metrics().presence.heartbeats, 0);
}

#[tokio::test(start_paused = true)]
async fn test_clean_teardown() {
    let transport = MockTransport::new();
    transport.set_emit_on_disconnect(true);
    let harness = spawn_with(transport);
    harness.handle.connectivity_changed(true).unwrap();
    settle().await;

    harness.handle.shutdown().await.unwrap();
    harness.task.await.unwrap();

    let presence = harness.transport.published_presence();
    let last = presence.last().unwrap();
    assert_eq!(last.status, PresenceStatus::Offline);
    assert_eq!(last.qualifier, "clean");
    assert!(matches!(
        harness.transport.ops().last(),
        Some(TransportOp::Disconnect)
    ));
    assert_eq!(harness.handle.state(), ConnectionState::Disconnected);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.transport.connect_count(), 1);
    assert!(harness.handle.retry_now().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_retries_until_success() {
    let transport = MockTransport::new();
    transport.push_outcome(ConnectScript::Error("connection refused".to_string()));
    transport.push_outcome(ConnectScript::NotConnected("ServerUnavailable".to_string()));
    let harness = spawn_with(transport);

    harness.handle.connectivity_changed(true).unwrap();
    settle().await;
    assert!(matches!(harness.handle.state(), ConnectionState::Failed(_)));

    sleep(Duration::from_millis(3100)).await;
    settle().await;
    assert_eq!(
        harness.handle.state(),
        ConnectionState::Failed("ServerUnavailable".to_string())
    );

    sleep(Duration::from_millis(3100)).await;
    settle().await;
    assert_eq!(harness.handle.state(), ConnectionState::Connected);

    let metrics = harness.handle.metrics();
    assert_eq!(metrics.connection.connect_attempts, 3);
    assert_eq!(metrics.connection.connection_failures, 2);
    assert_eq!(metrics.connection.max_attempts_in_flight, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_now_skips_the_delay() {
    let transport = MockTransport::new();
    transport.push_outcome(ConnectScript::Error("connection refused".to_string()));
    let harness = spawn_with(transport);

    harness.handle.connectivity_changed(true).unwrap();
    settle().await;
    harness.handle.retry_now().unwrap();
    settle().await;

    assert_eq!(harness.handle.state(), ConnectionState::Connected);
    assert_eq!(harness.transport.connect_count(), 2);

    // The canceled reconnect timer never produces a third attempt
    sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.transport.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_every_connect_registers_fresh_last_will() {
    let harness = connected_harness().await;
    let geo = GeoPoint {
        lat: 40.71,
        lon: -74.0,
    };
    harness.handle.update_location(geo).unwrap();
    settle().await;

    harness.transport.emit(TransportEvent::Disconnected {
        reason: "broker restart".to_string(),
    });
    sleep(Duration::from_millis(3100)).await;
    settle().await;

    let wills: Vec<_> = harness
        .transport
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            TransportOp::Connect { last_will, .. } => Some(last_will),
            _ => None,
        })
        .collect();
    assert_eq!(wills.len(), 2);
    assert_eq!(wills[0].message.geo, None);
    assert_eq!(wills[1].message.geo, Some(geo));
    assert!(wills.iter().all(|w| !w.message.is_online()));
}
