//! Inbound event gates and fan-out.

use pretty_assertions::assert_eq;

use realtime_gateway::domain::Role;
use realtime_gateway::presentation::websocket::{process_frame, EventContext, ServerEvent};
use realtime_gateway::shared::GatewayError;

use crate::common::{channel_client, FakeStore, TestGateway};

#[tokio::test]
async fn test_status_update_reaches_operators_and_crew() {
    let app = TestGateway::start();
    let mut admin = app.connect("admin", Role::Admin, None).await;
    let mut dispatcher = app.connect("disp", Role::Dispatcher, None).await;
    let mut teammate = app.connect("u-2", Role::Crew, Some("crew-1")).await;
    let mut sender = app.connect("u-1", Role::Crew, Some("crew-1")).await;
    for client in [&mut admin, &mut dispatcher, &mut teammate, &mut sender] {
        client.events();
    }

    app.send(&mut sender, r#"{"event":"statusUpdate","data":{"status":"busy"}}"#)
        .await
        .unwrap();
    app.settle().await;

    for operator in [&mut admin, &mut dispatcher] {
        match operator.events().as_slice() {
            [ServerEvent::CrewStatusUpdate(payload)] => {
                assert_eq!(payload.status, "busy");
                assert_eq!(payload.user_id, "u-1");
                assert_eq!(payload.crew_id.as_deref(), Some("crew-1"));
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }
    match teammate.events().as_slice() {
        [ServerEvent::TeamStatusUpdate(payload)] => assert_eq!(payload.status, "busy"),
        other => panic!("unexpected events: {:?}", other),
    }
    assert!(sender.events().is_empty());
}

#[tokio::test]
async fn test_non_admin_broadcast_is_rejected_without_fan_out() {
    let app = TestGateway::start();
    let mut dispatcher = app.connect("disp", Role::Dispatcher, None).await;
    let mut crew = app.connect("u-1", Role::Crew, Some("crew-1")).await;
    dispatcher.events();
    crew.events();

    let frame = r#"{"event":"sendMessage","data":{"to":"broadcast","message":"all hands"}}"#;
    let err = app.send(&mut crew, frame).await.unwrap_err();
    assert!(matches!(err, GatewayError::Forbidden(_)));
    assert!(!err.is_fatal());

    match ServerEvent::error(&err) {
        ServerEvent::Error(payload) => {
            assert!(payload.message.starts_with("Unauthorized"));
            assert_eq!(payload.code, "FORBIDDEN");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    app.settle().await;
    assert!(dispatcher.events().is_empty());
    assert!(crew.events().is_empty());

    // The connection is still usable
    app.send(&mut crew, r#"{"event":"subscribeToJob","data":{"jobId":"j-1"}}"#)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_admin_broadcast_reaches_every_connection() {
    let app = TestGateway::start();
    let mut admin = app.connect("admin", Role::Admin, None).await;
    let mut customer = app.connect("c-1", Role::Customer, None).await;
    let mut crew = app.connect("u-1", Role::Crew, None).await;
    for client in [&mut admin, &mut customer, &mut crew] {
        client.events();
    }

    app.send(
        &mut admin,
        r#"{"event":"sendMessage","data":{"to":"broadcast","message":"storm warning","priority":"urgent"}}"#,
    )
    .await
    .unwrap();
    app.settle().await;

    for client in [&mut admin, &mut customer, &mut crew] {
        assert_eq!(client.event_names(), vec!["broadcast"]);
    }
}

#[tokio::test]
async fn test_direct_message_requires_target() {
    let app = TestGateway::start();
    let mut recipient = app.connect("u-2", Role::Crew, None).await;
    let mut sender = app.connect("u-1", Role::Dispatcher, None).await;
    recipient.events();

    let err = app
        .send(&mut sender, r#"{"event":"sendMessage","data":{"to":"user","message":"hi"}}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidPayload(_)));

    app.send(
        &mut sender,
        r#"{"event":"sendMessage","data":{"to":"user","targetId":"u-2","message":"hi"}}"#,
    )
    .await
    .unwrap();
    app.settle().await;

    match recipient.events().as_slice() {
        [ServerEvent::NewMessage(payload)] => {
            assert_eq!(payload.from_user_id, "u-1");
            assert_eq!(payload.message, "hi");
        }
        other => panic!("unexpected events: {:?}", other),
    }
}

#[tokio::test]
async fn test_location_update_is_crew_only() {
    let app = TestGateway::start();
    let mut dispatcher = app.connect("disp", Role::Dispatcher, None).await;
    let mut watcher = app.connect("c-1", Role::Customer, None).await;
    let mut crew = app.connect("u-1", Role::Crew, Some("crew-1")).await;

    app.send(&mut watcher, r#"{"event":"subscribeToJob","data":{"jobId":"j-9"}}"#)
        .await
        .unwrap();
    let err = app
        .send(&mut watcher, r#"{"event":"locationUpdate","data":{"lat":1.0,"lng":2.0}}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Forbidden(_)));

    dispatcher.events();
    watcher.events();
    app.send(
        &mut crew,
        r#"{"event":"locationUpdate","data":{"lat":45.5,"lng":-122.6,"jobId":"j-9"}}"#,
    )
    .await
    .unwrap();
    app.settle().await;

    assert_eq!(dispatcher.event_names(), vec!["crewLocationUpdate"]);
    assert_eq!(watcher.event_names(), vec!["jobLocationUpdate"]);
    assert!(crew.event_names().iter().all(|name| name == "connected"));
}

#[tokio::test]
async fn test_out_of_range_coordinates_are_invalid() {
    let app = TestGateway::start();
    let mut crew = app.connect("u-1", Role::Crew, None).await;

    let err = app
        .send(&mut crew, r#"{"event":"locationUpdate","data":{"lat":91.0,"lng":0.0}}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidPayload(_)));
}

#[tokio::test]
async fn test_emergency_alert_fans_out_to_job_crew_and_operators() {
    let app = TestGateway::start();
    let mut admin = app.connect("admin", Role::Admin, None).await;
    let mut customer = app.connect("c-1", Role::Customer, None).await;
    let mut teammate = app.connect("u-2", Role::Crew, Some("crew-1")).await;
    let mut sender = app.connect("u-1", Role::Crew, Some("crew-1")).await;
    app.send(&mut customer, r#"{"event":"subscribeToJob","data":{"jobId":"j-1"}}"#)
        .await
        .unwrap();
    for client in [&mut admin, &mut customer, &mut teammate, &mut sender] {
        client.events();
    }

    app.send(
        &mut sender,
        r#"{"event":"emergencyAlert","data":{"type":"injury","message":"need help","jobId":"j-1","location":{"lat":1.0,"lng":2.0}}}"#,
    )
    .await
    .unwrap();
    app.settle().await;

    assert_eq!(admin.event_names(), vec!["emergencyAlert"]);
    assert_eq!(customer.event_names(), vec!["jobEmergency"]);
    assert_eq!(teammate.event_names(), vec!["teamEmergency"]);
    // The crew fan-out skips the sender, like teamStatusUpdate
    assert!(sender.events().is_empty());
}

#[tokio::test]
async fn test_analytics_subscription_defaults_to_overview() {
    let app = TestGateway::start();
    let mut dispatcher = app.connect("disp", Role::Dispatcher, None).await;
    let mut crew = app.connect("u-1", Role::Crew, None).await;

    let err = app
        .send(&mut crew, r#"{"event":"subscribeToAnalytics"}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Forbidden(_)));

    app.send(&mut dispatcher, r#"{"event":"subscribeToAnalytics"}"#)
        .await
        .unwrap();
    dispatcher.events();
    crew.events();

    app.gateway
        .metrics_updated(serde_json::json!({"activeJobs": 12}));
    app.settle().await;

    assert_eq!(dispatcher.event_names(), vec!["metricsUpdate"]);
    assert!(crew.events().is_empty());
}

#[tokio::test]
async fn test_rate_limit_rejects_the_101st_event() {
    let app = TestGateway::start();
    let mut client = app.connect("u-1", Role::Customer, None).await;
    let frame = r#"{"event":"typing.stop","data":{"threadId":"t-1"}}"#;

    for _ in 0..100 {
        app.send(&mut client, frame).await.unwrap();
    }
    let err = app.send(&mut client, frame).await.unwrap_err();
    assert!(matches!(err, GatewayError::RateLimited));
    assert!(!err.is_fatal());

    // Malformed frames count against the window too
    let err = app.send(&mut client, "not json").await.unwrap_err();
    assert!(matches!(err, GatewayError::RateLimited));

    let stats = app.settle().await;
    assert_eq!(stats.connections, 1);
}

#[tokio::test]
async fn test_malformed_and_unknown_events_are_invalid() {
    let app = TestGateway::start();
    let mut client = app.connect("u-1", Role::Customer, None).await;

    for frame in [
        "not json",
        r#"{"event":"teleport","data":{}}"#,
        r#"{"event":"subscribeToJob","data":{}}"#,
    ] {
        let err = app.send(&mut client, frame).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidPayload(_)), "{}", frame);
    }
}

#[tokio::test]
async fn test_unauthenticated_session_is_rejected() {
    let app = TestGateway::with_store(FakeStore::default());
    let (_handle, mut client) = channel_client("u-1", Role::Crew, None, "10.0.0.1");

    let ctx = EventContext {
        connection_id: client.id,
        gateway: &app.gateway,
        store: app.store.as_ref(),
    };
    let err = process_frame(&ctx, &mut client.session, r#"{"event":"subscribeToJob","data":{"jobId":"j-1"}}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::MissingToken));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_events_from_unregistered_connection_are_refused() {
    let app = TestGateway::start();
    let (_handle, mut client) = channel_client("u-1", Role::Crew, None, "10.0.0.1");
    client.session.authenticate(client.identity.clone());

    let err = app
        .send(&mut client, r#"{"event":"subscribeToJob","data":{"jobId":"j-1"}}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Unavailable));
}
