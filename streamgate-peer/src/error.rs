use thiserror::Error;

use crate::signaling::SignalingError;
use crate::state::TransitionError;

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Signaling failed: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Invalid negotiation transition: {0}")]
    Transition(#[from] TransitionError),

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Data channel error: {0}")]
    Channel(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
