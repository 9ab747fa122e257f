//! Fake media stack for negotiation tests.
//!
//! [`FakeMedia`] tracks the signaling state the way a browser peer
//! connection does, and rejects descriptions that arrive in the wrong
//! state. It never produces real SDP.

use std::sync::Mutex;

use async_trait::async_trait;
use common::types::SignalId;
use room_controller::negotiation::{MediaNegotiator, NegotiationError, SignalingState};
use room_controller::peer_client::MediaFactory;
use room_controller::protocol::{IceCandidate, SdpType, SessionDescription};

#[derive(Debug)]
struct MediaState {
    signaling: SignalingState,
    has_remote: bool,
    offers_created: u32,
    answers_created: u32,
    rollbacks: u32,
    candidates: Vec<IceCandidate>,
}

/// Signaling state machine standing in for one peer connection.
#[derive(Debug)]
pub struct FakeMedia {
    remote: SignalId,
    state: Mutex<MediaState>,
}

impl FakeMedia {
    #[must_use]
    pub fn new(remote: SignalId) -> Self {
        Self {
            remote,
            state: Mutex::new(MediaState {
                signaling: SignalingState::Stable,
                has_remote: false,
                offers_created: 0,
                answers_created: 0,
                rollbacks: 0,
                candidates: Vec::new(),
            }),
        }
    }

    pub fn remote(&self) -> SignalId {
        self.remote
    }

    /// Whether an offer/answer exchange has completed at least once.
    pub fn is_connected(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.has_remote && state.signaling == SignalingState::Stable
    }

    pub fn offers_created(&self) -> u32 {
        self.state.lock().unwrap().offers_created
    }

    pub fn answers_created(&self) -> u32 {
        self.state.lock().unwrap().answers_created
    }

    pub fn rollbacks(&self) -> u32 {
        self.state.lock().unwrap().rollbacks
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().unwrap().candidates.clone()
    }
}

#[async_trait]
impl MediaNegotiator for FakeMedia {
    fn signaling_state(&self) -> SignalingState {
        self.state.lock().unwrap().signaling
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let mut state = self.state.lock().unwrap();
        if state.signaling == SignalingState::HaveRemoteOffer {
            return Err(NegotiationError::Media(
                "cannot offer with a remote offer pending".to_string(),
            ));
        }
        state.signaling = SignalingState::HaveLocalOffer;
        state.offers_created += 1;
        Ok(SessionDescription::offer(format!(
            "fake-offer-{}",
            state.offers_created
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let mut state = self.state.lock().unwrap();
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(NegotiationError::Media("no remote offer to answer".to_string()));
        }
        state.signaling = SignalingState::Stable;
        state.answers_created += 1;
        Ok(SessionDescription::answer(format!(
            "fake-answer-{}",
            state.answers_created
        )))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().unwrap();
        match (desc.kind, state.signaling) {
            (SdpType::Rollback, SignalingState::HaveLocalOffer) => {
                state.signaling = SignalingState::Stable;
                state.rollbacks += 1;
                Ok(())
            }
            (kind, _) => Err(NegotiationError::UnexpectedDescription(kind)),
        }
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().unwrap();
        match (desc.kind, state.signaling) {
            (SdpType::Offer, SignalingState::Stable) => {
                state.signaling = SignalingState::HaveRemoteOffer;
            }
            (SdpType::Answer | SdpType::Pranswer, SignalingState::HaveLocalOffer) => {
                state.signaling = SignalingState::Stable;
            }
            (kind, _) => return Err(NegotiationError::UnexpectedDescription(kind)),
        }
        state.has_remote = true;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().unwrap();
        if !state.has_remote {
            return Err(NegotiationError::Media(
                "candidate before remote description".to_string(),
            ));
        }
        state.candidates.push(candidate);
        Ok(())
    }
}

/// Creates a [`FakeMedia`] per peer link.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeMediaFactory;

impl MediaFactory for FakeMediaFactory {
    type Media = FakeMedia;

    fn create(&self, remote: SignalId) -> FakeMedia {
        FakeMedia::new(remote)
    }
}
