//! Admission, removal, timers and shutdown.

use std::time::Duration;

use futures::future::join_all;
use pretty_assertions::assert_eq;

use realtime_gateway::config::GatewayLimits;
use realtime_gateway::domain::Role;
use realtime_gateway::presentation::websocket::{DisconnectReason, GatewayStats, ServerEvent};
use realtime_gateway::shared::{CapacityScope, GatewayError};

use crate::common::{FakeStore, TestGateway};

#[tokio::test]
async fn test_admission_sends_connected_and_notifies_operators() {
    let app = TestGateway::start();
    let mut dispatcher = app.connect("d-1", Role::Dispatcher, None).await;
    assert_eq!(dispatcher.event_names(), vec!["connected"]);

    let mut crew = app.connect("u-1", Role::Crew, Some("crew-1")).await;

    match crew.events().as_slice() {
        [ServerEvent::Connected(payload)] => {
            assert_eq!(payload.connection_id, crew.id);
            assert_eq!(payload.user_id, "u-1");
            assert_eq!(payload.crew_id.as_deref(), Some("crew-1"));
        }
        other => panic!("unexpected events: {:?}", other),
    }
    match dispatcher.events().as_slice() {
        [ServerEvent::UserOnline(payload)] => {
            assert_eq!(payload.user_id, "u-1");
            assert_eq!(payload.connections, 1);
        }
        other => panic!("unexpected events: {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_admissions_never_overshoot_user_cap() {
    let app = TestGateway::start();

    let attempts = (0..6).map(|_| app.connect_from("u-1", Role::Crew, None, "10.0.0.1"));
    let results = join_all(attempts).await;

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(admitted, 2);
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|err| matches!(
        err,
        GatewayError::CapacityExceeded(CapacityScope::User)
    )));

    let stats = app.settle().await;
    assert_eq!(stats.connections, 2);
    assert_eq!(stats.online_users, 1);
}

#[tokio::test]
async fn test_address_cap_is_twice_user_cap() {
    let app = TestGateway::start();

    for user in ["a", "b", "c", "d"] {
        app.connect_from(user, Role::Customer, None, "198.51.100.4")
            .await
            .unwrap();
    }
    let err = app
        .connect_from("e", Role::Customer, None, "198.51.100.4")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, GatewayError::CapacityExceeded(CapacityScope::Address)));
    assert!(err.is_fatal());

    // Another address is unaffected
    assert!(app
        .connect_from("e", Role::Customer, None, "198.51.100.5")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_offline_fires_once_when_last_connection_closes() {
    let app = TestGateway::start();
    let mut admin = app.connect("admin", Role::Admin, None).await;
    let first = app.connect("u-1", Role::Crew, None).await;
    let second = app.connect("u-1", Role::Crew, None).await;
    admin.events();

    app.gateway.disconnect(first.id, DisconnectReason::ClientClosed);
    app.settle().await;
    assert!(admin.event_names().is_empty());

    app.gateway.disconnect(second.id, DisconnectReason::ClientClosed);
    app.gateway.disconnect(second.id, DisconnectReason::ClientClosed);
    app.settle().await;

    match admin.events().as_slice() {
        [ServerEvent::UserOffline(payload)] => {
            assert_eq!(payload.user_id, "u-1");
            assert_eq!(payload.connections, 0);
        }
        other => panic!("unexpected events: {:?}", other),
    }
}

#[tokio::test]
async fn test_remove_clears_every_registry_and_is_idempotent() {
    let store = FakeStore::default().with_participant("u-1", "t-1");
    let app = TestGateway::with_store(store);
    let mut client = app.connect("u-1", Role::Crew, Some("crew-1")).await;

    app.send(&mut client, r#"{"event":"subscribeToJob","data":{"jobId":"j-1"}}"#)
        .await
        .unwrap();
    app.send(&mut client, r#"{"event":"thread.subscribe","data":{"threadId":"t-1"}}"#)
        .await
        .unwrap();
    app.send(&mut client, r#"{"event":"typing.start","data":{"threadId":"t-1"}}"#)
        .await
        .unwrap();

    let busy = app.settle().await;
    assert_eq!(busy.typing_timers, 1);
    assert_eq!(busy.rate_windows, 1);
    assert_eq!(busy.room_memberships, 5);

    app.gateway.disconnect(client.id, DisconnectReason::TransportLost);
    let once = app.settle().await;
    app.gateway.disconnect(client.id, DisconnectReason::TransportLost);
    let twice = app.settle().await;

    assert_eq!(once, GatewayStats::default());
    assert_eq!(once, twice);
    assert!(client.cancel.is_cancelled());
}

#[tokio::test]
async fn test_shutdown_empties_registries_and_closes_clients() {
    let store = FakeStore::default().with_participant("u-1", "t-1");
    let app = TestGateway::with_store(store);
    let mut crew = app.connect("u-1", Role::Crew, Some("crew-1")).await;
    let mut admin = app.connect("admin", Role::Admin, None).await;
    app.send(&mut crew, r#"{"event":"thread.subscribe","data":{"threadId":"t-1"}}"#)
        .await
        .unwrap();
    app.send(&mut crew, r#"{"event":"typing.start","data":{"threadId":"t-1"}}"#)
        .await
        .unwrap();
    crew.events();
    admin.events();

    let stats = app.gateway.shutdown().await.unwrap();
    assert!(stats.is_empty());
    assert!(app.gateway.is_shutting_down());

    assert_eq!(admin.event_names(), vec!["serverShutdown"]);
    assert_eq!(crew.event_names(), vec!["serverShutdown"]);
    assert!(crew.cancel.is_cancelled());

    let err = app.connect_from("late", Role::Crew, None, "10.0.0.9").await.err();
    assert!(matches!(err, Some(GatewayError::Unavailable)));

    app.hub.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_idle_deadline_disconnects_with_close_code() {
    let limits = GatewayLimits {
        idle_timeout: Duration::from_secs(60),
        ..crate::common::test_limits()
    };
    let app = TestGateway::with_limits(limits, FakeStore::default());
    let mut client = app.connect("u-1", Role::Customer, None).await;
    client.events();

    tokio::time::sleep(Duration::from_secs(30)).await;
    let mut admin = app.connect("admin", Role::Admin, None).await;
    admin.events();

    // Activity does not extend the deadline
    app.send(&mut client, r#"{"event":"subscribeToJob","data":{"jobId":"j-1"}}"#)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;
    let stats = app.settle().await;

    assert_eq!(client.close_code(), Some(4009));
    assert!(client.cancel.is_cancelled());
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.idle_timers, 1);
    assert_eq!(admin.event_names(), vec!["userOffline"]);
}

#[tokio::test]
async fn test_sweep_removes_dead_transports() {
    let app = TestGateway::start();
    let alive = app.connect("u-1", Role::Crew, None).await;
    let dead = app.connect("u-2", Role::Crew, None).await;
    let dead_id = dead.id;
    drop(dead);
    assert_ne!(alive.id, dead_id);

    let report = app.gateway.sweep().await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.stats.connections, 1);
    assert!(report.warnings.is_empty());

    let users = app.gateway.connected_users().await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].user_id, "u-1");
    drop(alive);
}
