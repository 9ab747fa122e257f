//! Two clients negotiate a peer connection through the room relay, with
//! colliding offers on both sides.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use rc_test_utils::{join_room, FakeMediaFactory, TestClient, TestHarness};
use room_controller::peer_client::PeerClient;
use room_controller::protocol::{ClientEvent, RoomRequest};
use tokio::sync::mpsc;

const PUMP_ROUNDS: usize = 50;
const PUMP_WINDOW: Duration = Duration::from_millis(20);

struct Peer {
    client: TestClient,
    driver: PeerClient<FakeMediaFactory>,
    outbound: mpsc::UnboundedReceiver<ClientEvent>,
}

impl Peer {
    fn new(client: TestClient) -> Self {
        let (tx, outbound) = mpsc::unbounded_channel();
        Self {
            client,
            driver: PeerClient::new(FakeMediaFactory, tx),
            outbound,
        }
    }

    /// Feed server events to the driver and forward what it wants to send.
    /// Returns whether anything moved.
    async fn pump(&mut self) -> bool {
        let mut moved = false;
        for event in self.client.events_within(PUMP_WINDOW).await {
            moved = true;
            self.driver.handle_event(event).await.unwrap();
        }
        while let Ok(event) = self.outbound.try_recv() {
            moved = true;
            self.client.request(event).await.unwrap();
        }
        moved
    }

    fn connected_to(&self, other: &Peer) -> bool {
        self.driver
            .link(other.client.id())
            .is_some_and(|link| link.media().is_connected())
    }
}

async fn pump_until_quiet(a: &mut Peer, b: &mut Peer) {
    for _ in 0..PUMP_ROUNDS {
        let moved_a = a.pump().await;
        let moved_b = b.pump().await;
        if !moved_a && !moved_b {
            return;
        }
    }
    panic!("negotiation did not settle");
}

#[tokio::test]
async fn test_colliding_offers_settle_into_one_session() {
    let harness = TestHarness::new();
    let room = harness.store.add_room("call");

    let mut alice = Peer::new(harness.connect_user("alice").await);
    let mut bob = Peer::new(harness.connect_user("bob").await);
    alice.client.request(join_room(room)).await.unwrap();
    bob.client.request(join_room(room)).await.unwrap();

    // Both sides learn of each other and offer at once.
    alice.client.request(RoomRequest::ConnectTo).await.unwrap();
    bob.client.request(RoomRequest::ConnectTo).await.unwrap();

    pump_until_quiet(&mut alice, &mut bob).await;

    assert_eq!(alice.driver.peers(), vec![bob.client.id()]);
    assert_eq!(bob.driver.peers(), vec![alice.client.id()]);
    assert!(alice.connected_to(&bob));
    assert!(bob.connected_to(&alice));

    let alice_link = alice.driver.link(bob.client.id()).unwrap();
    let bob_link = bob.driver.link(alice.client.id()).unwrap();
    assert_ne!(alice_link.link().polite, bob_link.link().polite);

    // Only the polite side rolled back; only it answered.
    let (polite, impolite) = if alice_link.link().polite {
        (alice_link, bob_link)
    } else {
        (bob_link, alice_link)
    };
    assert_eq!(polite.media().rollbacks(), 1);
    assert_eq!(polite.media().answers_created(), 1);
    assert_eq!(impolite.media().rollbacks(), 0);
    assert_eq!(impolite.media().answers_created(), 0);
}

#[tokio::test]
async fn test_disconnect_tears_down_remote_link() {
    let harness = TestHarness::new();
    let room = harness.store.add_room("call");

    let mut alice = Peer::new(harness.connect_user("alice").await);
    let mut bob = Peer::new(harness.connect_user("bob").await);
    alice.client.request(join_room(room)).await.unwrap();
    bob.client.request(join_room(room)).await.unwrap();
    alice.client.request(RoomRequest::ConnectTo).await.unwrap();
    bob.client.request(RoomRequest::ConnectTo).await.unwrap();
    pump_until_quiet(&mut alice, &mut bob).await;
    assert!(alice.connected_to(&bob));

    bob.client
        .request(RoomRequest::DisconnectFrom)
        .await
        .unwrap();
    bob.driver.clear();
    pump_until_quiet(&mut alice, &mut bob).await;

    assert!(alice.driver.peers().is_empty());
}
