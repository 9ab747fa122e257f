//! Client-side negotiation driver.
//!
//! [`PeerClient`] consumes the room channel's presence and signal notices
//! and keeps one [`Negotiator`] per remote peer. It is what a browser client
//! does with `connect_to`, `disconnect_from` and `signal`, and it lets the
//! server's relay be exercised end to end without a real media stack.

use std::collections::HashMap;

use common::types::SignalId;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::negotiation::{MediaNegotiator, NegotiationError, Negotiator, SignalOutcome};
use crate::protocol::{ClientEvent, RoomNotice, RoomRequest, ServerEvent, SessionDescription};

/// Creates the media stack for a new peer link.
pub trait MediaFactory: Send + Sync {
    type Media: MediaNegotiator;

    fn create(&self, remote: SignalId) -> Self::Media;
}

/// Drives negotiation for every peer of one client session.
pub struct PeerClient<F: MediaFactory> {
    factory: F,
    links: HashMap<SignalId, Negotiator<F::Media>>,
    outbound: mpsc::UnboundedSender<ClientEvent>,
}

impl<F: MediaFactory> PeerClient<F> {
    /// `outbound` receives the `signal` events to send to the server.
    #[must_use]
    pub fn new(factory: F, outbound: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            factory,
            links: HashMap::new(),
            outbound,
        }
    }

    #[must_use]
    pub fn peers(&self) -> Vec<SignalId> {
        let mut peers: Vec<SignalId> = self.links.keys().copied().collect();
        peers.sort();
        peers
    }

    #[must_use]
    pub fn link(&self, remote: SignalId) -> Option<&Negotiator<F::Media>> {
        self.links.get(&remote)
    }

    /// Drop every link, as on leaving the room.
    pub fn clear(&mut self) {
        self.links.clear();
    }

    /// React to one server event. Events other than presence and signals
    /// are ignored.
    pub async fn handle_event(&mut self, event: ServerEvent) -> Result<(), NegotiationError> {
        match event {
            ServerEvent::Room(notice) => self.handle_notice(notice).await,
            ServerEvent::Group(_) => Ok(()),
        }
    }

    pub async fn handle_notice(&mut self, notice: RoomNotice) -> Result<(), NegotiationError> {
        match notice {
            RoomNotice::ConnectTo { id, polite } => {
                let media = self.factory.create(id);
                let mut negotiator = Negotiator::new(id, polite, media);
                // New links always have something to negotiate.
                let offer = negotiator.negotiation_needed().await?;
                self.links.insert(id, negotiator);
                self.send_signal(id, Some(offer));
                Ok(())
            }
            RoomNotice::DisconnectFrom { id } => {
                if self.links.remove(&id).is_some() {
                    debug!(target: "rc.negotiation", remote = %id, "Peer link closed");
                }
                Ok(())
            }
            RoomNotice::Signal {
                from,
                desc,
                candidate,
            } => {
                let Some(negotiator) = self.links.get_mut(&from) else {
                    warn!(target: "rc.negotiation", remote = %from, "Signal from unlinked peer");
                    return Ok(());
                };
                if let SignalOutcome::Answered(answer) =
                    negotiator.handle_signal(desc, candidate).await?
                {
                    self.send_signal(from, Some(answer));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn send_signal(&self, to: SignalId, desc: Option<SessionDescription>) {
        let event = ClientEvent::Room(RoomRequest::Signal {
            to: to.to_string(),
            desc,
            candidate: None,
        });
        if self.outbound.send(event).is_err() {
            debug!(target: "rc.negotiation", remote = %to, "Outbound closed, signal dropped");
        }
    }
}
