//! Controller limits, identity failures, room reaping and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use rc_test_utils::{
    join_room, test_config, upload_chunk, upload_start, StoreOp, TestClient, TestHarness,
};
use room_controller::config::Config;
use room_controller::errors::RcError;
use room_controller::protocol::Reply;
use room_controller::services::{Credentials, FinalizeReason};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const POLL_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll `check` until it holds, panicking after `POLL_TIMEOUT`.
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[tokio::test]
async fn test_session_limit_rejects_extra_connections() {
    let harness = TestHarness::with_config(Config {
        max_sessions: 2,
        ..test_config()
    });

    let first = harness.connect_guest().await;
    let _second = harness.connect_guest().await;
    let err = TestClient::try_connect(&harness.controller, None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RcError::CapacityExceeded(_)));
    assert_eq!(
        err.client_message(),
        "Server is at capacity, please try again"
    );

    // A slot frees up once a session is gone.
    first.close().await;
    let controller = harness.controller.clone();
    eventually("session slot", || {
        let controller = controller.clone();
        async move { controller.get_status().await.unwrap().session_count < 2 }
    })
    .await;
    TestClient::try_connect(&harness.controller, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_identity_failure_refuses_connection() {
    let harness = TestHarness::new();
    harness.add_user("alice");
    harness.identity.set_failing(true);

    let err = TestClient::try_connect(&harness.controller, Some(Credentials::bearer("alice")))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RcError::Identity(_)));
    assert_eq!(err.client_message(), "Internal error");
    assert_eq!(harness.controller.get_status().await.unwrap().session_count, 0);
}

#[tokio::test]
async fn test_unknown_token_opens_guest_session() {
    let harness = TestHarness::new();
    let client = TestClient::connect(&harness.controller, Some(Credentials::bearer("stranger")))
        .await;
    assert!(client.session().user().is_none());
    assert_eq!(harness.identity.calls(), 1);
}

#[tokio::test]
async fn test_empty_room_is_reaped() {
    let harness = TestHarness::new();
    let room = harness.store.add_room("standup");
    let alice = harness.connect_user("alice").await;
    alice.request(join_room(room)).await.unwrap();
    assert!(harness.controller.room(room).await.unwrap().is_some());
    assert_eq!(harness.metrics.room_count(), 1);

    alice.close().await;

    let controller = harness.controller.clone();
    eventually("room removal", || {
        let controller = controller.clone();
        async move { controller.room(room).await.unwrap().is_none() }
    })
    .await;
    assert_eq!(harness.metrics.room_count(), 0);

    // Joining again brings up a fresh room actor.
    let bob = harness.connect_user("bob").await;
    bob.request(join_room(room)).await.unwrap();
    assert!(harness.controller.room(room).await.unwrap().is_some());
}

#[tokio::test]
async fn test_session_closed_during_slow_join_leaves_no_member() {
    let harness = TestHarness::new();
    let room = harness.store.add_room("standup");
    harness
        .store
        .delay(StoreOp::AddRoomMember, Duration::from_millis(100));
    let alice = harness.connect_user("alice").await;

    // Close while the room is still persisting the membership.
    alice.send(join_room(room)).await;
    let store = harness.store.clone();
    eventually("membership write", || {
        let store = store.clone();
        async move { store.calls(StoreOp::AddRoomMember) == 1 }
    })
    .await;
    alice.session().cancel();

    let controller = harness.controller.clone();
    eventually("abandoned room removal", || {
        let controller = controller.clone();
        async move { controller.room(room).await.unwrap().is_none() }
    })
    .await;
    assert!(harness.store.room_members(room).is_empty());
    assert_eq!(harness.store.calls(StoreOp::RemoveRoomMember), 1);
    assert_eq!(harness.metrics.room_count(), 0);
}

#[tokio::test]
async fn test_status_counts_rooms_and_sessions() {
    let harness = TestHarness::new();
    let room = harness.store.add_room("standup");
    let alice = harness.connect_user("alice").await;
    let _guest = harness.connect_guest().await;
    alice.request(join_room(room)).await.unwrap();

    let status = harness.controller.get_status().await.unwrap();
    assert_eq!(status.instance_id, "rc-test");
    assert_eq!(status.session_count, 2);
    assert_eq!(status.room_count, 1);
    assert!(!status.is_draining);
}

#[tokio::test]
async fn test_shutdown_finalizes_open_recordings_and_drains() {
    let harness = TestHarness::new();
    let room = harness.store.add_room("studio");
    let alice = harness.connect_user("alice").await;
    alice.request(join_room(room)).await.unwrap();
    let recording = match alice.request(upload_start("audio/ogg")).await.unwrap() {
        Reply::UploadStarted { id } => id,
        other => panic!("expected upload_started, got {other:?}"),
    };
    alice
        .request(upload_chunk(recording, 0, b"hi"))
        .await
        .unwrap();

    harness
        .controller
        .shutdown(Duration::from_secs(2))
        .await
        .unwrap();

    let archived = harness.archive.wait_for(1).await;
    let finished = archived.first().unwrap();
    assert_eq!(finished.info.id, recording);
    assert_eq!(finished.bytes().as_ref(), b"hi");
    // Sessions are drained before rooms, so the owner usually leaves first.
    assert!(matches!(
        finished.reason,
        FinalizeReason::OwnerLeft | FinalizeReason::RoomClosed
    ));

    let status = harness.controller.get_status().await.unwrap();
    assert!(status.is_draining);
    assert_eq!(status.session_count, 0);

    let err = TestClient::try_connect(&harness.controller, None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RcError::Draining));
}
