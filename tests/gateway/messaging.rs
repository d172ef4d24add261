//! Thread messaging: the store is called first, fan-out only on success.

use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;

use realtime_gateway::domain::Role;
use realtime_gateway::presentation::websocket::messages::TypingPayload;
use realtime_gateway::presentation::websocket::ServerEvent;
use realtime_gateway::shared::{AppError, GatewayError};

use crate::common::{FakeStore, TestClient, TestGateway};

fn thread_store() -> FakeStore {
    FakeStore::default()
        .with_participant("u-1", "t-1")
        .with_participant("u-2", "t-1")
}

async fn subscribed(app: &TestGateway, user: &str) -> TestClient {
    let mut client = app.connect(user, Role::Crew, Some("crew-1")).await;
    app.send(&mut client, r#"{"event":"thread.subscribe","data":{"threadId":"t-1"}}"#)
        .await
        .unwrap();
    client
}

#[tokio::test]
async fn test_thread_subscribe_requires_participation() {
    let app = TestGateway::with_store(thread_store());
    let mut outsider = app.connect("u-9", Role::Customer, None).await;

    let err = app
        .send(&mut outsider, r#"{"event":"thread.subscribe","data":{"threadId":"t-1"}}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Forbidden(_)));

    let stats = app.settle().await;
    // role + user rooms only
    assert_eq!(stats.room_memberships, 2);
}

#[tokio::test]
async fn test_message_send_fans_out_to_thread_after_store_success() {
    let app = TestGateway::with_store(thread_store());
    let mut author = subscribed(&app, "u-1").await;
    let mut reader = subscribed(&app, "u-2").await;
    author.events();
    reader.events();

    app.send(
        &mut author,
        r#"{"event":"message.send","data":{"threadId":"t-1","content":"arriving in 10"}}"#,
    )
    .await
    .unwrap();
    app.settle().await;

    assert_eq!(app.store.message_count(), 1);
    for client in [&mut author, &mut reader] {
        match client.events().as_slice() {
            [ServerEvent::MessageCreated(payload)] => {
                assert_eq!(payload.message.content, "arriving in 10");
                assert_eq!(payload.message.sender_id, "u-1");
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_store_failure_produces_no_fan_out() {
    let app = TestGateway::with_store(thread_store());
    let mut author = subscribed(&app, "u-1").await;
    let mut reader = subscribed(&app, "u-2").await;
    author.events();
    reader.events();

    app.store.fail_writes(true);
    let err = app
        .send(
            &mut author,
            r#"{"event":"message.send","data":{"threadId":"t-1","content":"lost"}}"#,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Collaborator(AppError::Unavailable(_))));
    assert!(!err.is_fatal());

    app.settle().await;
    assert_eq!(app.store.message_count(), 0);
    assert!(author.events().is_empty());
    assert!(reader.events().is_empty());
}

#[tokio::test]
async fn test_only_author_can_edit_or_delete() {
    let app = TestGateway::with_store(thread_store());
    let mut author = subscribed(&app, "u-1").await;
    let mut other = subscribed(&app, "u-2").await;

    app.send(
        &mut author,
        r#"{"event":"message.send","data":{"threadId":"t-1","content":"draft"}}"#,
    )
    .await
    .unwrap();
    app.settle().await;
    author.events();
    other.events();

    let err = app
        .send(
            &mut other,
            r#"{"event":"message.edit","data":{"messageId":"m-1","content":"hijack"}}"#,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Collaborator(AppError::Forbidden(_))));

    app.send(
        &mut author,
        r#"{"event":"message.edit","data":{"messageId":"m-1","content":"final"}}"#,
    )
    .await
    .unwrap();
    app.send(&mut author, r#"{"event":"message.delete","data":{"messageId":"m-1"}}"#)
        .await
        .unwrap();
    app.settle().await;

    let events = other.events();
    assert_eq!(events.len(), 2);
    match &events[0] {
        ServerEvent::MessageEdited(payload) => {
            assert_eq!(payload.message.content, "final");
            assert!(payload.message.is_edited());
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match &events[1] {
        ServerEvent::MessageDeleted(payload) => {
            assert_eq!(payload.message_id, "m-1");
            assert_eq!(payload.deleted_by, "u-1");
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_read_receipt_goes_to_thread() {
    let app = TestGateway::with_store(thread_store());
    let mut reader = subscribed(&app, "u-2").await;
    let mut author = subscribed(&app, "u-1").await;
    author.events();
    reader.events();

    app.send(
        &mut reader,
        r#"{"event":"message.read","data":{"threadId":"t-1","messageId":"m-7"}}"#,
    )
    .await
    .unwrap();
    app.settle().await;

    match author.events().as_slice() {
        [ServerEvent::MessageReadReceipt(payload)] => {
            assert_eq!(payload.user_id, "u-2");
            assert_eq!(payload.message_id, "m-7");
        }
        other => panic!("unexpected events: {:?}", other),
    }
}

#[tokio::test]
async fn test_typing_requires_subscription_and_skips_typist() {
    let app = TestGateway::with_store(thread_store());
    let mut stranger = app.connect("u-3", Role::Crew, None).await;
    let err = app
        .send(&mut stranger, r#"{"event":"typing.start","data":{"threadId":"t-1"}}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotSubscribed(_)));

    let mut typist = subscribed(&app, "u-1").await;
    let mut reader = subscribed(&app, "u-2").await;
    typist.events();
    reader.events();

    app.send(&mut typist, r#"{"event":"typing.start","data":{"threadId":"t-1"}}"#)
        .await
        .unwrap();
    app.send(&mut typist, r#"{"event":"typing.stop","data":{"threadId":"t-1"}}"#)
        .await
        .unwrap();
    // Stopping twice is a no-op
    app.send(&mut typist, r#"{"event":"typing.stop","data":{"threadId":"t-1"}}"#)
        .await
        .unwrap();
    let stats = app.settle().await;

    assert_eq!(reader.event_names(), vec!["user.typing", "user.stopped_typing"]);
    assert!(typist.events().is_empty());
    assert_eq!(stats.typing_timers, 0);
}

#[tokio::test]
async fn test_sending_a_message_stops_typing() {
    let app = TestGateway::with_store(thread_store());
    let mut typist = subscribed(&app, "u-1").await;
    let mut reader = subscribed(&app, "u-2").await;

    app.send(&mut typist, r#"{"event":"typing.start","data":{"threadId":"t-1"}}"#)
        .await
        .unwrap();
    reader.events();

    app.send(
        &mut typist,
        r#"{"event":"message.send","data":{"threadId":"t-1","content":"done"}}"#,
    )
    .await
    .unwrap();
    let stats = app.settle().await;

    assert_eq!(reader.event_names(), vec!["user.stopped_typing", "message.created"]);
    assert_eq!(stats.typing_timers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_typing_restart_extends_expiry() {
    let app = TestGateway::with_store(thread_store());
    let mut typist = subscribed(&app, "u-1").await;
    let mut reader = subscribed(&app, "u-2").await;
    let start = r#"{"event":"typing.start","data":{"threadId":"t-1"}}"#;

    app.send(&mut typist, start).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    app.send(&mut typist, start).await.unwrap();
    reader.events();

    // 4s after the second start: still typing, one timer
    tokio::time::sleep(Duration::from_secs(4)).await;
    let stats = app.settle().await;
    assert_eq!(stats.typing_timers, 1);
    assert!(reader.events().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let stats = app.settle().await;
    assert_eq!(stats.typing_timers, 0);
    assert_eq!(reader.event_names(), vec!["user.stopped_typing"]);
}

#[tokio::test]
async fn test_thread_unsubscribe_leaves_and_stops_typing() {
    let app = TestGateway::with_store(thread_store());
    let mut typist = subscribed(&app, "u-1").await;
    let mut reader = subscribed(&app, "u-2").await;
    app.send(&mut typist, r#"{"event":"typing.start","data":{"threadId":"t-1"}}"#)
        .await
        .unwrap();
    reader.events();

    app.send(&mut typist, r#"{"event":"thread.unsubscribe","data":{"threadId":"t-1"}}"#)
        .await
        .unwrap();
    let stats = app.settle().await;
    assert_eq!(stats.typing_timers, 0);
    assert_eq!(reader.event_names(), vec!["user.stopped_typing"]);

    app.gateway.emit_to_thread(
        "t-1",
        ServerEvent::UserTyping(TypingPayload {
            thread_id: "t-1".into(),
            user_id: "u-5".into(),
            timestamp: Utc::now(),
        }),
    );
    app.settle().await;
    assert!(typist.events().is_empty());
    assert_eq!(reader.event_names(), vec!["user.typing"]);
}
