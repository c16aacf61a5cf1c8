//! Display sink the received media is attached to

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;
use webrtc::rtp::packet::Packet;

use crate::track::{OutputStream, TrackInfo};

/// Consumer of the session's output stream
#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Called on every track arrival with the whole accumulated stream
    async fn bind(&self, stream: &OutputStream);

    /// Called once per track with its first RTP packet
    async fn on_loaded_metadata(&self, track: &TrackInfo, first: &Packet);

    async fn on_rtp(&self, track: &TrackInfo, packet: &Packet);
}

/// Per-track counters kept by [`LoggingSink`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackStats {
    pub packets: u64,
    pub bytes: u64,
    pub last_sequence_number: u16,
    pub last_timestamp: u32,
}

/// Sink that only logs, used by the command line client
#[derive(Debug, Default)]
pub struct LoggingSink {
    bindings: Mutex<u64>,
    stats: Mutex<HashMap<String, TrackStats>>,
}

impl LoggingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times an output stream was bound
    #[must_use]
    pub fn bindings(&self) -> u64 {
        *self.bindings.lock()
    }

    /// Counters per track id, sorted by id
    #[must_use]
    pub fn stats(&self) -> Vec<(String, TrackStats)> {
        let mut stats: Vec<_> = self
            .stats
            .lock()
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }
}

#[async_trait]
impl MediaSink for LoggingSink {
    async fn bind(&self, stream: &OutputStream) {
        *self.bindings.lock() += 1;
        let tracks = stream.tracks();
        let kinds: Vec<String> = tracks
            .iter()
            .map(|t| t.kind.map_or_else(|| "unknown".to_string(), |k| k.to_string()))
            .collect();
        info!(tracks = tracks.len(), kinds = ?kinds, "Output stream bound to sink");
    }

    async fn on_loaded_metadata(&self, track: &TrackInfo, first: &Packet) {
        info!(
            track_id = %track.id,
            mime_type = %track.mime_type,
            clock_rate = track.clock_rate,
            channels = track.channels,
            fmtp = %track.fmtp,
            ssrc = first.header.ssrc,
            first_payload_bytes = first.payload.len(),
            "Media loaded"
        );
    }

    async fn on_rtp(&self, track: &TrackInfo, packet: &Packet) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(track.id.clone()).or_default();
        entry.packets += 1;
        entry.bytes += packet.payload.len() as u64;
        entry.last_sequence_number = packet.header.sequence_number;
        entry.last_timestamp = packet.header.timestamp;
    }
}
