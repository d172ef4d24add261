//! Handshake authentication followed by admission.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use realtime_gateway::application::Authenticator;
use realtime_gateway::domain::Role;
use realtime_gateway::shared::{CapacityScope, GatewayError};

use crate::common::{channel_client, FakeDirectory, FakeVerifier, TestGateway};

fn directory() -> FakeDirectory {
    FakeDirectory::default()
        .with_user("u-1", Role::Crew, Some("crew-1"), true)
        .with_user("u-2", Role::Customer, None, false)
}

#[tokio::test]
async fn test_rejections_happen_before_any_bookkeeping() {
    let app = TestGateway::start();
    let directory = Arc::new(directory());
    let auth = Authenticator::new(Arc::new(FakeVerifier), directory.clone());

    assert!(matches!(auth.authenticate(None).await, Err(GatewayError::MissingToken)));
    assert!(matches!(
        auth.authenticate(Some("garbage")).await,
        Err(GatewayError::InvalidToken(_))
    ));
    assert_eq!(directory.lookups.load(Ordering::SeqCst), 0);

    assert!(matches!(
        auth.authenticate(Some("token:ghost")).await,
        Err(GatewayError::UserNotFound)
    ));
    assert!(matches!(
        auth.authenticate(Some("token:u-2")).await,
        Err(GatewayError::UserInactive)
    ));

    let stats = app.settle().await;
    assert!(stats.is_empty());
}

#[tokio::test]
async fn test_authenticated_identity_is_admitted_until_cap() {
    let app = TestGateway::start();
    let auth = Authenticator::new(Arc::new(FakeVerifier), Arc::new(directory()));

    let mut admitted = Vec::new();
    for _ in 0..3 {
        let identity = auth.authenticate(Some("token:u-1")).await.unwrap();
        assert_eq!(identity.crew_id.as_deref(), Some("crew-1"));

        let (handle, client) = channel_client(&identity.user_id, identity.role, identity.crew_id.as_deref(), "10.1.1.1");
        match app.gateway.admit(handle).await {
            Ok(()) => admitted.push(client),
            Err(err) => {
                assert!(matches!(err, GatewayError::CapacityExceeded(CapacityScope::User)));
                assert_eq!(err.code(), "CAPACITY_EXCEEDED");
            }
        }
    }

    assert_eq!(admitted.len(), 2);
    assert_eq!(app.settle().await.connections, 2);
}
