//! Offer/answer negotiation between two peers with collision handling.
//!
//! Both ends of a [`PeerLink`] may decide to send an offer at the same time.
//! Every pair has exactly one polite side, fixed by [`is_polite`]:
//!
//! - the impolite side ignores an offer that collides with its own
//! - the polite side rolls its own offer back and answers the remote one
//!
//! Descriptions and candidates travel over the room channel's `signal`
//! relay, which is ordered per pair. Session descriptions are opaque here;
//! generating and applying them is the [`MediaNegotiator`]'s business.

use async_trait::async_trait;
use common::types::SignalId;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::protocol::{IceCandidate, SdpType, SessionDescription};

/// Whether `local` yields to `remote` when their offers collide.
///
/// Symmetric: for two distinct ids exactly one side is polite.
#[must_use]
pub fn is_polite(local: SignalId, remote: SignalId) -> bool {
    local > remote
}

/// Local signaling state, as reported by the media stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    /// The media stack rejected an operation.
    #[error("Media error: {0}")]
    Media(String),

    /// A description arrived that makes no sense in the current state.
    #[error("Unexpected {0:?} description")]
    UnexpectedDescription(SdpType),

    /// Neither a description nor a candidate was relayed.
    #[error("Signal carries nothing to apply")]
    EmptySignal,
}

/// The media stack behind one peer connection.
#[async_trait]
pub trait MediaNegotiator: Send + Sync {
    fn signaling_state(&self) -> SignalingState;

    /// Create an offer and apply it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    /// Create an answer to the applied remote offer and apply it locally.
    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    /// Apply a local description. Only used here to roll back.
    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;
}

/// Negotiation flags for one remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLink {
    pub remote: SignalId,
    pub polite: bool,
    pub making_offer: bool,
    pub ignore_offer: bool,
    pub setting_remote_answer: bool,
}

impl PeerLink {
    #[must_use]
    pub fn new(remote: SignalId, polite: bool) -> Self {
        Self {
            remote,
            polite,
            making_offer: false,
            ignore_offer: false,
            setting_remote_answer: false,
        }
    }
}

/// Result of handling one relayed signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    /// A remote answer was applied.
    Applied,
    /// A remote offer was applied; send this answer back.
    Answered(SessionDescription),
    /// A colliding offer was dropped.
    IgnoredOffer,
    CandidateApplied,
    /// A candidate for an ignored offer failed to apply.
    CandidateDropped,
}

/// Drives perfect negotiation for one [`PeerLink`].
pub struct Negotiator<M> {
    link: PeerLink,
    media: M,
}

impl<M: MediaNegotiator> Negotiator<M> {
    #[must_use]
    pub fn new(remote: SignalId, polite: bool, media: M) -> Self {
        Self {
            link: PeerLink::new(remote, polite),
            media,
        }
    }

    #[must_use]
    pub fn link(&self) -> &PeerLink {
        &self.link
    }

    #[must_use]
    pub fn media(&self) -> &M {
        &self.media
    }

    /// Create an offer for the remote peer. The caller relays it.
    #[instrument(skip_all, name = "rc.negotiation.offer", fields(remote = %self.link.remote))]
    pub async fn negotiation_needed(&mut self) -> Result<SessionDescription, NegotiationError> {
        self.link.making_offer = true;
        let result = self.media.create_offer().await;
        self.link.making_offer = false;

        debug!(
            target: "rc.negotiation",
            remote = %self.link.remote,
            ok = result.is_ok(),
            "Offer created"
        );
        result
    }

    /// Handle a relayed `{desc?, candidate?}` message.
    ///
    /// A description is handled before a candidate carried in the same
    /// message; the outcome reported is the description's.
    #[instrument(skip_all, name = "rc.negotiation.signal", fields(remote = %self.link.remote))]
    pub async fn handle_signal(
        &mut self,
        desc: Option<SessionDescription>,
        candidate: Option<IceCandidate>,
    ) -> Result<SignalOutcome, NegotiationError> {
        let mut outcome = None;
        if let Some(desc) = desc {
            outcome = Some(self.handle_description(desc).await?);
        }
        if let Some(candidate) = candidate {
            let applied = self.handle_candidate(candidate).await?;
            if outcome.is_none() {
                outcome = Some(applied);
            }
        }
        outcome.ok_or(NegotiationError::EmptySignal)
    }

    async fn handle_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<SignalOutcome, NegotiationError> {
        let kind = desc.kind;
        if kind == SdpType::Rollback {
            return Err(NegotiationError::UnexpectedDescription(kind));
        }

        let state = self.media.signaling_state();
        let ready_for_offer = !self.link.making_offer
            && (state == SignalingState::Stable || self.link.setting_remote_answer);
        let collision = kind == SdpType::Offer && !ready_for_offer;

        self.link.ignore_offer = !self.link.polite && collision;
        if self.link.ignore_offer {
            debug!(
                target: "rc.negotiation",
                remote = %self.link.remote,
                "Ignoring colliding offer"
            );
            return Ok(SignalOutcome::IgnoredOffer);
        }

        if collision && state == SignalingState::HaveLocalOffer {
            debug!(
                target: "rc.negotiation",
                remote = %self.link.remote,
                "Rolling back local offer for colliding remote offer"
            );
            self.media
                .set_local_description(SessionDescription::rollback())
                .await?;
        }

        self.link.setting_remote_answer = kind == SdpType::Answer;
        let applied = self.media.set_remote_description(desc).await;
        self.link.setting_remote_answer = false;
        applied?;

        if kind == SdpType::Offer {
            let answer = self.media.create_answer().await?;
            debug!(target: "rc.negotiation", remote = %self.link.remote, "Answer created");
            Ok(SignalOutcome::Answered(answer))
        } else {
            Ok(SignalOutcome::Applied)
        }
    }

    async fn handle_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<SignalOutcome, NegotiationError> {
        match self.media.add_ice_candidate(candidate).await {
            Ok(()) => Ok(SignalOutcome::CandidateApplied),
            Err(e) if self.link.ignore_offer => {
                debug!(
                    target: "rc.negotiation",
                    remote = %self.link.remote,
                    error = %e,
                    "Dropping candidate for ignored offer"
                );
                Ok(SignalOutcome::CandidateDropped)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Media {
        state: Mutex<Option<SignalingState>>,
        remote_applied: Mutex<bool>,
        rollbacks: Mutex<u32>,
    }

    impl Media {
        fn state(&self) -> SignalingState {
            self.state.lock().unwrap().unwrap_or(SignalingState::Stable)
        }

        fn set(&self, state: SignalingState) {
            *self.state.lock().unwrap() = Some(state);
        }
    }

    #[async_trait]
    impl MediaNegotiator for Media {
        fn signaling_state(&self) -> SignalingState {
            self.state()
        }

        async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
            self.set(SignalingState::HaveLocalOffer);
            Ok(SessionDescription::offer("o"))
        }

        async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
            if self.state() != SignalingState::HaveRemoteOffer {
                return Err(NegotiationError::Media("no remote offer".to_string()));
            }
            self.set(SignalingState::Stable);
            Ok(SessionDescription::answer("a"))
        }

        async fn set_local_description(
            &self,
            desc: SessionDescription,
        ) -> Result<(), NegotiationError> {
            assert_eq!(desc.kind, SdpType::Rollback);
            *self.rollbacks.lock().unwrap() += 1;
            self.set(SignalingState::Stable);
            Ok(())
        }

        async fn set_remote_description(
            &self,
            desc: SessionDescription,
        ) -> Result<(), NegotiationError> {
            match (desc.kind, self.state()) {
                (SdpType::Offer, SignalingState::Stable) => {
                    self.set(SignalingState::HaveRemoteOffer);
                }
                (SdpType::Answer, SignalingState::HaveLocalOffer) => {
                    self.set(SignalingState::Stable);
                }
                (kind, _) => return Err(NegotiationError::UnexpectedDescription(kind)),
            }
            *self.remote_applied.lock().unwrap() = true;
            Ok(())
        }

        async fn add_ice_candidate(&self, _: IceCandidate) -> Result<(), NegotiationError> {
            if *self.remote_applied.lock().unwrap() {
                Ok(())
            } else {
                Err(NegotiationError::Media("no remote description".to_string()))
            }
        }
    }

    fn candidate() -> IceCandidate {
        IceCandidate {
            candidate: "candidate:1".to_string(),
            sdp_mid: None,
            sdp_m_line_index: Some(0),
        }
    }

    #[test]
    fn test_exactly_one_side_is_polite() {
        for _ in 0..32 {
            let a = SignalId::new();
            let b = SignalId::new();
            assert_ne!(is_polite(a, b), is_polite(b, a));
        }
    }

    #[tokio::test]
    async fn test_offer_answer_without_collision() {
        let mut caller = Negotiator::new(SignalId::new(), false, Media::default());
        let mut callee = Negotiator::new(SignalId::new(), true, Media::default());

        let offer = caller.negotiation_needed().await.unwrap();
        let SignalOutcome::Answered(answer) =
            callee.handle_signal(Some(offer), None).await.unwrap()
        else {
            panic!("expected answer");
        };
        let outcome = caller.handle_signal(Some(answer), None).await.unwrap();

        assert_eq!(outcome, SignalOutcome::Applied);
        assert_eq!(caller.media().state(), SignalingState::Stable);
        assert_eq!(callee.media().state(), SignalingState::Stable);
    }

    #[tokio::test]
    async fn test_collision_resolves_to_one_session() {
        let mut impolite = Negotiator::new(SignalId::new(), false, Media::default());
        let mut polite = Negotiator::new(SignalId::new(), true, Media::default());

        // Both offer before seeing the other's offer.
        let impolite_offer = impolite.negotiation_needed().await.unwrap();
        let polite_offer = polite.negotiation_needed().await.unwrap();

        let dropped = impolite.handle_signal(Some(polite_offer), None).await.unwrap();
        assert_eq!(dropped, SignalOutcome::IgnoredOffer);
        assert!(impolite.link().ignore_offer);

        let SignalOutcome::Answered(answer) =
            polite.handle_signal(Some(impolite_offer), None).await.unwrap()
        else {
            panic!("polite side must answer");
        };
        assert_eq!(*polite.media().rollbacks.lock().unwrap(), 1);

        let applied = impolite.handle_signal(Some(answer), None).await.unwrap();
        assert_eq!(applied, SignalOutcome::Applied);
        assert_eq!(impolite.media().state(), SignalingState::Stable);
        assert_eq!(polite.media().state(), SignalingState::Stable);
    }

    #[tokio::test]
    async fn test_candidate_for_ignored_offer_is_tolerated() {
        let mut impolite = Negotiator::new(SignalId::new(), false, Media::default());
        impolite.negotiation_needed().await.unwrap();

        impolite
            .handle_signal(Some(SessionDescription::offer("x")), None)
            .await
            .unwrap();
        let outcome = impolite.handle_signal(None, Some(candidate())).await.unwrap();
        assert_eq!(outcome, SignalOutcome::CandidateDropped);
    }

    #[tokio::test]
    async fn test_candidate_failure_surfaces_outside_ignored_offer() {
        let mut link = Negotiator::new(SignalId::new(), true, Media::default());
        let result = link.handle_signal(None, Some(candidate())).await;
        assert!(matches!(result, Err(NegotiationError::Media(_))));
    }

    #[tokio::test]
    async fn test_rollback_is_not_a_remote_description() {
        let mut link = Negotiator::new(SignalId::new(), true, Media::default());
        let result = link
            .handle_signal(Some(SessionDescription::rollback()), None)
            .await;
        assert!(matches!(
            result,
            Err(NegotiationError::UnexpectedDescription(SdpType::Rollback))
        ));
    }
}
