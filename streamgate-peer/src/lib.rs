//! Streamgate negotiation client
//!
//! Opens a WebRTC peer connection against the streaming engine, exchanges
//! the SDP offer/answer over the engine's HTTP signaling routes and hands
//! received tracks to a [`MediaSink`].
//!
//! ## Flow
//!
//! 1. `GET /stream/codec/{suuid}` decides which transceivers to add
//! 2. an unreliable data channel labelled with the `suuid` is created
//! 3. every negotiation-needed posts a base64 offer to
//!    `/stream/receiver/{suuid}` and applies the returned answer
//! 4. once the channel opens, `ping` is sent every keepalive interval
//!
//! ## Usage
//!
//! ```rust,ignore
//! use streamgate_peer::{LoggingSink, PeerSession, StreamId};
//!
//! let sink = Arc::new(LoggingSink::new());
//! let session = PeerSession::connect(&config, StreamId::from("cam1"), sink).await?;
//! session.closed().await;
//! ```

pub mod error;
pub mod keepalive;
pub mod session;
pub mod signaling;
pub mod sink;
pub mod state;
pub mod track;
mod types;

pub use error::{PeerError, Result};
pub use keepalive::{Keepalive, KeepaliveChannel};
pub use session::{negotiate, PeerSession, SessionDescriptions, SessionOptions};
pub use signaling::{CodecInfo, SignalingClient, SignalingError};
pub use sink::{LoggingSink, MediaSink, TrackStats};
pub use state::{NegotiationEvent, NegotiationState, Phase, TransitionError};
pub use track::{OutputStream, TrackInfo, TrackKind};
pub use types::StreamId;
