//! Received media tracks and the output stream they accumulate into

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// Parse a kind as reported by the codec route, `None` for anything else
    #[must_use]
    pub fn parse(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }

    #[must_use]
    pub const fn codec_type(self) -> RTPCodecType {
        match self {
            Self::Audio => RTPCodecType::Audio,
            Self::Video => RTPCodecType::Video,
        }
    }
}

impl TryFrom<RTPCodecType> for TrackKind {
    type Error = RTPCodecType;

    fn try_from(codec_type: RTPCodecType) -> Result<Self, Self::Error> {
        match codec_type {
            RTPCodecType::Audio => Ok(Self::Audio),
            RTPCodecType::Video => Ok(Self::Video),
            other => Err(other),
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Snapshot of what was negotiated for a remote track
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub id: String,
    pub stream_id: String,
    pub kind: Option<TrackKind>,
    pub ssrc: u32,
    pub payload_type: u8,
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub fmtp: String,
}

impl TrackInfo {
    #[must_use]
    pub fn from_remote(track: &TrackRemote) -> Self {
        let codec = track.codec();
        Self {
            id: track.id(),
            stream_id: track.stream_id(),
            kind: TrackKind::try_from(track.kind()).ok(),
            ssrc: track.ssrc(),
            payload_type: track.payload_type(),
            mime_type: codec.capability.mime_type,
            clock_rate: codec.capability.clock_rate,
            channels: codec.capability.channels,
            fmtp: codec.capability.sdp_fmtp_line,
        }
    }
}

/// Tracks received so far, in arrival order
///
/// Cheap to clone; all clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct OutputStream {
    tracks: Arc<RwLock<Vec<TrackInfo>>>,
}

impl OutputStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a track, replacing an earlier entry with the same id
    pub fn add_track(&self, track: TrackInfo) {
        let mut tracks = self.tracks.write();
        if let Some(existing) = tracks.iter_mut().find(|t| t.id == track.id) {
            *existing = track;
        } else {
            tracks.push(track);
        }
    }

    #[must_use]
    pub fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_track(id: &str, kind: TrackKind) -> TrackInfo {
    TrackInfo {
        id: id.to_string(),
        stream_id: "cam1".to_string(),
        kind: Some(kind),
        ssrc: 1234,
        payload_type: 96,
        mime_type: match kind {
            TrackKind::Video => "video/H264".to_string(),
            TrackKind::Audio => "audio/opus".to_string(),
        },
        clock_rate: match kind {
            TrackKind::Video => 90000,
            TrackKind::Audio => 48000,
        },
        channels: 0,
        fmtp: String::new(),
    }
}
