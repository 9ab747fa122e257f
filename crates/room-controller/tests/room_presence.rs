//! Room channel flows across several sessions.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use rc_test_utils::{join_room, signal_to, TestHarness};
use room_controller::errors::RcError;
use room_controller::protocol::{
    RecordingAction, RoomNotice, RoomRequest, ServerEvent, SessionDescription,
};

const QUIET: Duration = Duration::from_millis(100);

#[tokio::test]
async fn test_join_broadcasts_membership_and_persists_user() {
    let harness = TestHarness::new();
    let room = harness.store.add_room("standup");

    let mut alice = harness.connect_user("alice").await;
    alice.request(join_room(room)).await.unwrap();
    let users = alice.expect_room_users().await;
    assert_eq!(users.len(), 1);
    assert_eq!(users.first().unwrap().id, alice.id());

    let mut bob = harness.connect_user("bob").await;
    bob.request(join_room(room)).await.unwrap();

    let users = alice.expect_room_users().await;
    let ids: Vec<_> = users.iter().map(|member| member.id).collect();
    assert_eq!(ids, vec![alice.id(), bob.id()]);
    assert_eq!(bob.expect_room_users().await.len(), 2);

    let alice_user = alice.session().user().unwrap().id;
    let bob_user = bob.session().user().unwrap().id;
    assert_eq!(harness.store.room_members(room), vec![alice_user, bob_user]);
}

#[tokio::test]
async fn test_unknown_room_reports_error_to_sender() {
    let harness = TestHarness::new();
    let mut alice = harness.connect_user("alice").await;

    alice
        .send(RoomRequest::JoinRoom {
            id: "no-such-room".to_string(),
        })
        .await;
    let (message, cause) = alice.expect_room_error().await;
    assert_eq!(message, "Room not found");
    assert_eq!(cause.as_deref(), Some("join_room"));
}

#[tokio::test]
async fn test_connect_to_pairs_peers_with_opposite_politeness() {
    let harness = TestHarness::new();
    let room = harness.store.add_room("call");

    let mut alice = harness.connect_user("alice").await;
    let mut bob = harness.connect_user("bob").await;
    alice.request(join_room(room)).await.unwrap();
    bob.request(join_room(room)).await.unwrap();

    alice.request(RoomRequest::ConnectTo).await.unwrap();
    bob.request(RoomRequest::ConnectTo).await.unwrap();

    let (bob_peer, bob_polite) = bob.expect_connect_to().await;
    let (alice_peer, alice_polite) = alice.expect_connect_to().await;
    assert_eq!(bob_peer, alice.id());
    assert_eq!(alice_peer, bob.id());
    assert_ne!(alice_polite, bob_polite);

    // A second connect_to does not pair again.
    bob.request(RoomRequest::ConnectTo).await.unwrap();
    let repeated = alice
        .events_within(QUIET)
        .await
        .into_iter()
        .filter(|event| matches!(event, ServerEvent::Room(RoomNotice::ConnectTo { .. })))
        .count();
    assert_eq!(repeated, 0);

    bob.request(RoomRequest::DisconnectFrom).await.unwrap();
    assert_eq!(alice.expect_disconnect_from().await, bob.id());
}

#[tokio::test]
async fn test_leaving_connected_member_disconnects_peers() {
    let harness = TestHarness::new();
    let room = harness.store.add_room("call");

    let mut alice = harness.connect_user("alice").await;
    let bob = harness.connect_user("bob").await;
    alice.request(join_room(room)).await.unwrap();
    bob.request(join_room(room)).await.unwrap();
    alice.request(RoomRequest::ConnectTo).await.unwrap();
    bob.request(RoomRequest::ConnectTo).await.unwrap();
    alice.expect_connect_to().await;

    bob.close().await;

    assert_eq!(alice.expect_disconnect_from().await, bob.id());
    let users = alice.expect_room_users().await;
    assert_eq!(users.len(), 1);
}

#[tokio::test]
async fn test_screen_share_is_not_echoed_to_sender() {
    let harness = TestHarness::new();
    let room = harness.store.add_room("demo");

    let mut alice = harness.connect_user("alice").await;
    let mut bob = harness.connect_user("bob").await;
    alice.request(join_room(room)).await.unwrap();
    bob.request(join_room(room)).await.unwrap();

    alice
        .request(RoomRequest::ScreenShare {
            stream_id: Some("screen-1".to_string()),
        })
        .await
        .unwrap();

    let (user, stream) = bob
        .expect_room("screen_share", |notice| match notice {
            RoomNotice::ScreenShare { user, stream_id } => Some((*user, stream_id.clone())),
            _ => None,
        })
        .await;
    assert_eq!(user, alice.id());
    assert_eq!(stream.as_deref(), Some("screen-1"));

    let echoed = alice
        .events_within(QUIET)
        .await
        .into_iter()
        .filter(|event| matches!(event, ServerEvent::Room(RoomNotice::ScreenShare { .. })))
        .count();
    assert_eq!(echoed, 0);
}

#[tokio::test]
async fn test_recording_toggle_is_tagged_with_origin() {
    let harness = TestHarness::new();
    let room = harness.store.add_room("demo");

    let mut alice = harness.connect_user("alice").await;
    let mut bob = harness.connect_user("bob").await;
    alice.request(join_room(room)).await.unwrap();
    bob.request(join_room(room)).await.unwrap();

    alice
        .request(RoomRequest::Recording {
            action: RecordingAction::Start,
        })
        .await
        .unwrap();

    let (action, from) = bob
        .expect_room("recording toggle", |notice| match notice {
            RoomNotice::Recording { action, from } => Some((*action, *from)),
            _ => None,
        })
        .await;
    assert_eq!(action, RecordingAction::Start);
    assert_eq!(from, alice.id());

    let echoed = alice
        .events_within(QUIET)
        .await
        .into_iter()
        .filter(|event| matches!(event, ServerEvent::Room(RoomNotice::Recording { .. })))
        .count();
    assert_eq!(echoed, 0);
}

#[tokio::test]
async fn test_malformed_signal_target_is_reported() {
    let harness = TestHarness::new();
    let room = harness.store.add_room("call");
    let mut alice = harness.connect_user("alice").await;
    alice.request(join_room(room)).await.unwrap();

    let err = alice
        .request(RoomRequest::Signal {
            to: "not-a-signal-id".to_string(),
            desc: Some(SessionDescription::offer("v=0")),
            candidate: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RcError::UnknownTarget(_)));

    // Reported without closing the session.
    alice
        .send(RoomRequest::Signal {
            to: "still-not-an-id".to_string(),
            desc: Some(SessionDescription::offer("v=0")),
            candidate: None,
        })
        .await;
    let (message, cause) = alice.expect_room_error().await;
    assert_eq!(message, "Unknown signal target");
    assert_eq!(cause.as_deref(), Some("signal"));
    alice.request(RoomRequest::ConnectTo).await.unwrap();
}

#[tokio::test]
async fn test_signal_is_relayed_to_target_only() {
    let harness = TestHarness::new();
    let room = harness.store.add_room("call");

    let alice = harness.connect_user("alice").await;
    let mut bob = harness.connect_user("bob").await;
    let mut carol = harness.connect_user("carol").await;
    for client in [&alice, &bob, &carol] {
        client.request(join_room(room)).await.unwrap();
    }

    alice
        .request(signal_to(bob.id(), SessionDescription::offer("v=0")))
        .await
        .unwrap();

    let (from, sdp) = bob
        .expect_room("signal", |notice| match notice {
            RoomNotice::Signal { from, desc, .. } => {
                Some((*from, desc.as_ref().map(|d| d.sdp.clone())))
            }
            _ => None,
        })
        .await;
    assert_eq!(from, alice.id());
    assert_eq!(sdp.as_deref(), Some("v=0"));

    let relayed = carol
        .events_within(QUIET)
        .await
        .into_iter()
        .filter(|event| matches!(event, ServerEvent::Room(RoomNotice::Signal { .. })))
        .count();
    assert_eq!(relayed, 0);
}

#[tokio::test]
async fn test_room_events_before_join_are_rejected() {
    let harness = TestHarness::new();
    let alice = harness.connect_user("alice").await;

    let err = alice.request(RoomRequest::ConnectTo).await.unwrap_err();
    assert!(matches!(err, RcError::NotInRoom));

    let err = alice.request(RoomRequest::LeaveRoom).await.unwrap_err();
    assert!(matches!(err, RcError::NotInRoom));
}

#[tokio::test]
async fn test_joining_another_room_leaves_the_first() {
    let harness = TestHarness::new();
    let first = harness.store.add_room("first");
    let second = harness.store.add_room("second");

    let mut alice = harness.connect_user("alice").await;
    let bob = harness.connect_user("bob").await;
    alice.request(join_room(first)).await.unwrap();
    bob.request(join_room(first)).await.unwrap();
    // Wait for bob's arrival before moving him on.
    alice
        .expect_room("two members", |notice| match notice {
            RoomNotice::Users { users } if users.len() == 2 => Some(()),
            _ => None,
        })
        .await;
    bob.request(join_room(second)).await.unwrap();

    let users = alice.expect_room_users().await;
    assert_eq!(users.len(), 1);
    assert_eq!(users.first().unwrap().id, alice.id());
    let state = bob.session().get_state().await.unwrap();
    assert_eq!(state.room_id, Some(second));
}

#[tokio::test]
async fn test_guest_can_join_and_connect() {
    let harness = TestHarness::new();
    let room = harness.store.add_room("open");

    let mut guest = harness.connect_guest().await;
    assert!(guest.session().user().is_none());

    guest.request(join_room(room)).await.unwrap();
    let users = guest.expect_room_users().await;
    assert!(users.first().unwrap().user.is_none());
    guest.request(RoomRequest::ConnectTo).await.unwrap();

    // Nothing is persisted for a guest.
    assert!(harness.store.room_members(room).is_empty());
}
