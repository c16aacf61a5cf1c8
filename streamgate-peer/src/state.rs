//! Negotiation state of a single peer connection
//!
//! ```text
//! Idle --NegotiationNeeded--> OfferSent --AnswerApplied--> Negotiated
//!   ^                            |                              |
//!   +------SignalingFailed-------+<----NegotiationNeeded--------+
//! any --Close--> Closed
//! ```
//!
//! The data channel is tracked separately because it opens and closes
//! independently of offer/answer rounds.
//!
//! A `NegotiationNeeded` that arrives while an offer is in flight is queued,
//! and [`NegotiationState::resume_pending`] starts one more round once the
//! current one settles.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No offer outstanding and no answer applied yet
    Idle,
    /// Offer posted, waiting for the answer
    OfferSent,
    /// Remote answer applied
    Negotiated,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationEvent {
    NegotiationNeeded,
    AnswerApplied,
    SignalingFailed,
    ChannelOpened,
    ChannelClosed,
    Close,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error("an offer is already in flight")]
    OfferInFlight,

    #[error("no offer is outstanding")]
    NoOfferOutstanding,

    #[error("session is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NegotiationState {
    phase: Phase,
    channel_open: bool,
    rounds: u32,
    renegotiate_pending: bool,
}

impl Default for NegotiationState {
    fn default() -> Self {
        Self::new()
    }
}

impl NegotiationState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: Phase::Idle,
            channel_open: false,
            rounds: 0,
            renegotiate_pending: false,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn channel_open(&self) -> bool {
        self.channel_open
    }

    /// Number of answers applied so far
    #[must_use]
    pub const fn rounds(&self) -> u32 {
        self.rounds
    }

    /// A negotiation request arrived during an offer and is still owed
    #[must_use]
    pub const fn renegotiate_pending(&self) -> bool {
        self.renegotiate_pending
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed)
    }

    /// Apply an event
    ///
    /// Errors leave the phase untouched; `OfferInFlight` additionally queues
    /// a renegotiation.
    pub fn apply(&mut self, event: NegotiationEvent) -> Result<Phase, TransitionError> {
        use NegotiationEvent as E;

        if self.is_closed() {
            // Closing twice is harmless, everything else is late
            return match event {
                E::Close => Ok(Phase::Closed),
                _ => Err(TransitionError::Closed),
            };
        }

        match (self.phase, event) {
            (Phase::OfferSent, E::NegotiationNeeded) => {
                self.renegotiate_pending = true;
                return Err(TransitionError::OfferInFlight);
            }
            (_, E::NegotiationNeeded) => self.phase = Phase::OfferSent,

            (Phase::OfferSent, E::AnswerApplied) => {
                self.phase = Phase::Negotiated;
                self.rounds += 1;
            }
            (_, E::AnswerApplied) => return Err(TransitionError::NoOfferOutstanding),

            (Phase::OfferSent, E::SignalingFailed) => self.phase = Phase::Idle,
            (_, E::SignalingFailed) => return Err(TransitionError::NoOfferOutstanding),

            (_, E::ChannelOpened) => self.channel_open = true,
            (_, E::ChannelClosed) => self.channel_open = false,

            (_, E::Close) => {
                self.phase = Phase::Closed;
                self.channel_open = false;
                self.renegotiate_pending = false;
            }
        }

        Ok(self.phase)
    }

    /// Start the queued round, if any, once no offer is in flight
    ///
    /// Returns true when the caller now owns a new `OfferSent` round.
    pub fn resume_pending(&mut self) -> bool {
        if !self.renegotiate_pending || self.is_closed() || self.phase == Phase::OfferSent {
            return false;
        }
        self.renegotiate_pending = false;
        self.phase = Phase::OfferSent;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use NegotiationEvent as E;

    #[test]
    fn test_happy_path() {
        let mut state = NegotiationState::new();
        assert_eq!(state.phase(), Phase::Idle);

        assert_eq!(state.apply(E::NegotiationNeeded), Ok(Phase::OfferSent));
        assert_eq!(state.apply(E::AnswerApplied), Ok(Phase::Negotiated));
        assert_eq!(state.apply(E::ChannelOpened), Ok(Phase::Negotiated));
        assert!(state.channel_open());
        assert_eq!(state.rounds(), 1);
    }

    #[test]
    fn test_offer_cannot_overlap() {
        let mut state = NegotiationState::new();
        state.apply(E::NegotiationNeeded).unwrap();

        assert_eq!(state.apply(E::NegotiationNeeded), Err(TransitionError::OfferInFlight));
        assert_eq!(state.phase(), Phase::OfferSent);
        assert!(state.renegotiate_pending());
        // nothing to resume while the first offer is still out
        assert!(!state.resume_pending());
    }

    #[test]
    fn test_queued_round_runs_after_answer() {
        let mut state = NegotiationState::new();
        state.apply(E::NegotiationNeeded).unwrap();
        let _ = state.apply(E::NegotiationNeeded);
        let _ = state.apply(E::NegotiationNeeded);

        state.apply(E::AnswerApplied).unwrap();
        assert!(state.resume_pending());
        assert_eq!(state.phase(), Phase::OfferSent);
        assert!(!state.renegotiate_pending());

        // several requests during one offer collapse into one round
        state.apply(E::AnswerApplied).unwrap();
        assert!(!state.resume_pending());
        assert_eq!(state.rounds(), 2);
    }

    #[test]
    fn test_queued_round_runs_after_signaling_failure() {
        let mut state = NegotiationState::new();
        state.apply(E::NegotiationNeeded).unwrap();
        let _ = state.apply(E::NegotiationNeeded);

        state.apply(E::SignalingFailed).unwrap();
        assert!(state.resume_pending());
        assert_eq!(state.phase(), Phase::OfferSent);
    }

    #[test]
    fn test_close_drops_queued_round() {
        let mut state = NegotiationState::new();
        state.apply(E::NegotiationNeeded).unwrap();
        let _ = state.apply(E::NegotiationNeeded);

        state.apply(E::Close).unwrap();
        assert!(!state.renegotiate_pending());
        assert!(!state.resume_pending());
        assert_eq!(state.phase(), Phase::Closed);
    }

    #[test]
    fn test_signaling_failure_returns_to_idle() {
        let mut state = NegotiationState::new();
        state.apply(E::NegotiationNeeded).unwrap();

        assert_eq!(state.apply(E::SignalingFailed), Ok(Phase::Idle));
        assert_eq!(state.rounds(), 0);
        // a later negotiation-needed may try again
        assert_eq!(state.apply(E::NegotiationNeeded), Ok(Phase::OfferSent));
    }

    #[test]
    fn test_renegotiation() {
        let mut state = NegotiationState::new();
        state.apply(E::NegotiationNeeded).unwrap();
        state.apply(E::AnswerApplied).unwrap();

        assert_eq!(state.apply(E::NegotiationNeeded), Ok(Phase::OfferSent));
        assert_eq!(state.apply(E::AnswerApplied), Ok(Phase::Negotiated));
        assert_eq!(state.rounds(), 2);
    }

    #[test]
    fn test_answer_without_offer() {
        let mut state = NegotiationState::new();
        assert_eq!(state.apply(E::AnswerApplied), Err(TransitionError::NoOfferOutstanding));
        assert_eq!(state.apply(E::SignalingFailed), Err(TransitionError::NoOfferOutstanding));
        assert_eq!(state.phase(), Phase::Idle);
    }

    #[test]
    fn test_channel_flag_is_independent() {
        let mut state = NegotiationState::new();
        state.apply(E::ChannelOpened).unwrap();
        state.apply(E::NegotiationNeeded).unwrap();
        assert!(state.channel_open());

        state.apply(E::ChannelClosed).unwrap();
        assert!(!state.channel_open());
        assert_eq!(state.phase(), Phase::OfferSent);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut state = NegotiationState::new();
        state.apply(E::NegotiationNeeded).unwrap();
        state.apply(E::ChannelOpened).unwrap();

        assert_eq!(state.apply(E::Close), Ok(Phase::Closed));
        assert!(!state.channel_open());
        assert_eq!(state.apply(E::Close), Ok(Phase::Closed));
        assert_eq!(state.apply(E::AnswerApplied), Err(TransitionError::Closed));
        assert_eq!(state.apply(E::NegotiationNeeded), Err(TransitionError::Closed));
        assert_eq!(state.apply(E::ChannelOpened), Err(TransitionError::Closed));
    }
}
