//! Peer session: one peer connection negotiated against the engine
//!
//! Setup order matters. Handlers are registered first, then the codec route
//! decides the transceivers, then the data channel is created. The
//! transport raises negotiation-needed from there on, and every round posts
//! an offer through [`SignalingClient`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use streamgate_core::Config;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

use crate::error::{PeerError, Result};
use crate::keepalive::Keepalive;
use crate::signaling::{CodecInfo, SignalingClient};
use crate::sink::MediaSink;
use crate::state::{NegotiationEvent, NegotiationState, TransitionError};
use crate::track::{OutputStream, TrackInfo, TrackKind};
use crate::types::StreamId;

/// Diagnostics are promoted to info when the client runs with `debug`
macro_rules! diag {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

/// Session knobs taken from `client.*`
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub debug: bool,
    pub ice_servers: Vec<String>,
    pub keepalive_interval: Duration,
    pub max_retransmits: u16,
}

impl SessionOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            debug: config.client.debug,
            ice_servers: config.client.ice_servers.clone(),
            keepalive_interval: Duration::from_millis(config.client.keepalive_interval_ms),
            max_retransmits: config.client.max_retransmits,
        }
    }
}

/// Offer/answer half of a peer connection
#[async_trait]
pub trait SessionDescriptions: Send + Sync {
    /// Create an offer, install it as local description and return the SDP
    /// to send
    async fn create_local_offer(&self) -> Result<String>;

    async fn apply_remote_answer(&self, sdp: String) -> Result<()>;
}

#[async_trait]
impl SessionDescriptions for RTCPeerConnection {
    async fn create_local_offer(&self) -> Result<String> {
        let offer = self.create_offer(None).await?;

        // No trickle channel exists, so the offer must carry every candidate
        let mut gathering = self.gathering_complete_promise().await;
        self.set_local_description(offer).await?;
        let _ = gathering.recv().await;

        self.local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| PeerError::Negotiation("no local description after offer".to_string()))
    }

    async fn apply_remote_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)?;
        self.set_remote_description(answer).await?;
        Ok(())
    }
}

/// Negotiate with the engine
///
/// The remote description is only touched when the engine returned a
/// non-empty, decodable answer. A failed round puts the machine back to
/// idle and is not retried. Requests that arrive while an offer is in
/// flight are queued and answered by one more round afterwards.
pub async fn negotiate<D>(
    descriptions: &D,
    signaling: &SignalingClient,
    suuid: &str,
    state: &Mutex<NegotiationState>,
    debug: bool,
) -> Result<()>
where
    D: SessionDescriptions + ?Sized,
{
    state.lock().apply(NegotiationEvent::NegotiationNeeded)?;

    let mut result = run_round(descriptions, signaling, suuid, state, debug).await;
    loop {
        let resumed = state.lock().resume_pending();
        if !resumed {
            break;
        }
        if let Err(e) = &result {
            warn!(stream = suuid, error = %e, "Negotiation round failed");
        }
        diag!(debug, stream = suuid, "Running queued negotiation");
        result = run_round(descriptions, signaling, suuid, state, debug).await;
    }
    result
}

/// One offer/answer round; the caller already moved the machine to `OfferSent`
async fn run_round<D>(
    descriptions: &D,
    signaling: &SignalingClient,
    suuid: &str,
    state: &Mutex<NegotiationState>,
    debug: bool,
) -> Result<()>
where
    D: SessionDescriptions + ?Sized,
{
    let offer = match descriptions.create_local_offer().await {
        Ok(sdp) => sdp,
        Err(e) => {
            let _ = state.lock().apply(NegotiationEvent::SignalingFailed);
            return Err(e);
        }
    };

    let answer = match signaling.exchange_offer(suuid, &offer).await {
        Ok(answer) => answer,
        Err(e) => {
            warn!(
                server = %signaling.base_url(),
                stream = suuid,
                error = %e,
                "Cannot connect to signaling endpoint"
            );
            let _ = state.lock().apply(NegotiationEvent::SignalingFailed);
            return Err(e.into());
        }
    };

    if let Err(e) = descriptions.apply_remote_answer(answer).await {
        let _ = state.lock().apply(NegotiationEvent::SignalingFailed);
        return Err(e);
    }

    let rounds = {
        let mut state = state.lock();
        state.apply(NegotiationEvent::AnswerApplied)?;
        state.rounds()
    };
    diag!(debug, stream = suuid, rounds, "Negotiation complete");

    Ok(())
}

/// Kinds to add transceivers for, unknown kinds are skipped
#[must_use]
pub fn transceiver_kinds(codecs: &[CodecInfo]) -> Vec<TrackKind> {
    codecs
        .iter()
        .filter_map(|codec| {
            let kind = TrackKind::parse(&codec.kind);
            if kind.is_none() {
                warn!(kind = %codec.kind, "Ignoring unknown media kind");
            }
            kind
        })
        .collect()
}

fn build_api() -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn rtc_configuration(ice_servers: &[String]) -> RTCConfiguration {
    let ice_servers = if ice_servers.is_empty() {
        Vec::new()
    } else {
        vec![RTCIceServer {
            urls: ice_servers.to_vec(),
            ..Default::default()
        }]
    };

    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

/// Query the codec route and add one `sendrecv` transceiver per kind
///
/// Returns how many transceivers were added. A failing or empty codec
/// route is logged and the session goes on without transceivers.
async fn add_transceivers(
    pc: &RTCPeerConnection,
    signaling: &SignalingClient,
    suuid: &str,
    debug: bool,
) -> usize {
    let codecs = match signaling.codecs(suuid).await {
        Ok(codecs) => codecs,
        Err(e) => {
            warn!(stream = suuid, error = %e, "Codec query failed");
            Vec::new()
        }
    };

    if codecs.is_empty() {
        diag!(debug, stream = suuid, "Received no streams");
    } else {
        diag!(debug, stream = suuid, streams = ?codecs, "Received streams");
    }

    let mut added = 0;
    for kind in transceiver_kinds(&codecs) {
        let init = RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Sendrecv,
            send_encodings: vec![],
        };
        match pc.add_transceiver_from_kind(kind.codec_type(), Some(init)).await {
            Ok(_) => added += 1,
            Err(e) => warn!(kind = %kind, error = %e, "Failed to add transceiver"),
        }
    }
    added
}

/// A negotiated (or negotiating) session with the engine
///
/// Dropping the session cancels the keepalive and the track readers; call
/// [`PeerSession::close`] to also close the peer connection.
pub struct PeerSession {
    stream_id: StreamId,
    pc: Arc<RTCPeerConnection>,
    data_channel: Arc<RTCDataChannel>,
    state: Arc<Mutex<NegotiationState>>,
    output: OutputStream,
    keepalive: Arc<Mutex<Option<Keepalive>>>,
    shutdown: CancellationToken,
}

impl PeerSession {
    /// Start a session for `stream_id` with the signaling endpoint from `config`
    pub async fn connect(
        config: &Config,
        stream_id: StreamId,
        sink: Arc<dyn MediaSink>,
    ) -> Result<Self> {
        let signaling = SignalingClient::from_config(config)?;
        Self::connect_with(SessionOptions::from_config(config), signaling, stream_id, sink).await
    }

    pub async fn connect_with(
        options: SessionOptions,
        signaling: SignalingClient,
        stream_id: StreamId,
        sink: Arc<dyn MediaSink>,
    ) -> Result<Self> {
        let debug = options.debug;
        diag!(debug, server = %signaling.base_url(), stream = %stream_id, "Client starting");

        let api = build_api()?;
        let pc = Arc::new(
            api.new_peer_connection(rtc_configuration(&options.ice_servers))
                .await?,
        );

        let state = Arc::new(Mutex::new(NegotiationState::new()));
        let keepalive: Arc<Mutex<Option<Keepalive>>> = Arc::new(Mutex::new(None));
        let shutdown = CancellationToken::new();
        let output = OutputStream::new();

        // Handlers go in before anything can raise negotiation-needed
        register_state_handlers(&pc, &state, &keepalive, &shutdown, debug);
        register_negotiation_handler(&pc, &signaling, &stream_id, &state, debug);
        register_track_handler(&pc, &output, sink, &shutdown, debug);

        add_transceivers(&pc, &signaling, stream_id.as_str(), debug).await;

        let init = RTCDataChannelInit {
            max_retransmits: Some(options.max_retransmits),
            ..Default::default()
        };
        let data_channel = pc.create_data_channel(stream_id.as_str(), Some(init)).await?;
        register_channel_handlers(
            &data_channel,
            &state,
            &keepalive,
            options.keepalive_interval,
            &shutdown,
            debug,
        );

        Ok(Self {
            stream_id,
            pc,
            data_channel,
            state,
            output,
            keepalive,
            shutdown,
        })
    }

    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    #[must_use]
    pub fn state(&self) -> NegotiationState {
        *self.state.lock()
    }

    #[must_use]
    pub fn output(&self) -> &OutputStream {
        &self.output
    }

    #[must_use]
    pub fn data_channel_label(&self) -> &str {
        self.data_channel.label()
    }

    /// Resolves once the peer connection closed or [`PeerSession::close`] ran
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    pub async fn close(&self) -> Result<()> {
        let _ = self.state.lock().apply(NegotiationEvent::Close);
        if let Some(keepalive) = self.keepalive.lock().take() {
            keepalive.stop();
        }
        self.shutdown.cancel();
        self.pc.close().await?;
        info!(stream = %self.stream_id, "Session closed");
        Ok(())
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn stop_keepalive(keepalive: &Mutex<Option<Keepalive>>) {
    if let Some(keepalive) = keepalive.lock().take() {
        keepalive.stop();
    }
}

fn register_state_handlers(
    pc: &RTCPeerConnection,
    state: &Arc<Mutex<NegotiationState>>,
    keepalive: &Arc<Mutex<Option<Keepalive>>>,
    shutdown: &CancellationToken,
    debug: bool,
) {
    pc.on_ice_connection_state_change(Box::new(move |ice_state: RTCIceConnectionState| {
        Box::pin(async move {
            diag!(debug, state = %ice_state, "ICE connection state changed");
        })
    }));

    let state = Arc::clone(state);
    let keepalive = Arc::clone(keepalive);
    let shutdown = shutdown.clone();
    pc.on_peer_connection_state_change(Box::new(move |pc_state: RTCPeerConnectionState| {
        let state = Arc::clone(&state);
        let keepalive = Arc::clone(&keepalive);
        let shutdown = shutdown.clone();
        Box::pin(async move {
            match pc_state {
                RTCPeerConnectionState::Failed => {
                    warn!(state = %pc_state, "Peer connection failed");
                }
                RTCPeerConnectionState::Closed => {
                    diag!(debug, state = %pc_state, "Peer connection closed");
                    let _ = state.lock().apply(NegotiationEvent::Close);
                    stop_keepalive(&keepalive);
                    shutdown.cancel();
                }
                _ => {
                    diag!(debug, state = %pc_state, "Peer connection state changed");
                }
            }
        })
    }));
}

fn register_negotiation_handler(
    pc: &Arc<RTCPeerConnection>,
    signaling: &SignalingClient,
    stream_id: &StreamId,
    state: &Arc<Mutex<NegotiationState>>,
    debug: bool,
) {
    let weak: Weak<RTCPeerConnection> = Arc::downgrade(pc);
    let signaling = signaling.clone();
    let stream_id = stream_id.clone();
    let state = Arc::clone(state);

    pc.on_negotiation_needed(Box::new(move || {
        let weak = weak.clone();
        let signaling = signaling.clone();
        let stream_id = stream_id.clone();
        let state = Arc::clone(&state);
        Box::pin(async move {
            let Some(pc) = weak.upgrade() else {
                return;
            };
            // Run outside the transport's callback so it is free to keep
            // processing while the offer is in flight
            tokio::spawn(async move {
                match negotiate(pc.as_ref(), &signaling, stream_id.as_str(), &state, debug).await {
                    Ok(()) => {}
                    Err(PeerError::Transition(TransitionError::OfferInFlight)) => {
                        debug!(stream = %stream_id, "Negotiation in flight, queued another round");
                    }
                    Err(e) => {
                        warn!(stream = %stream_id, error = %e, "Negotiation failed");
                    }
                }
            });
        })
    }));
}

fn register_track_handler(
    pc: &RTCPeerConnection,
    output: &OutputStream,
    sink: Arc<dyn MediaSink>,
    shutdown: &CancellationToken,
    debug: bool,
) {
    let output = output.clone();
    let shutdown = shutdown.clone();

    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let output = output.clone();
            let sink = Arc::clone(&sink);
            let token = shutdown.child_token();
            Box::pin(async move {
                let info = TrackInfo::from_remote(&track);
                diag!(
                    debug,
                    track_id = %info.id,
                    kind = ?info.kind,
                    mime_type = %info.mime_type,
                    ssrc = info.ssrc,
                    "Received track"
                );

                output.add_track(info.clone());
                sink.bind(&output).await;

                tokio::spawn(read_track(track, info, sink, token, debug));
            })
        },
    ));
}

async fn read_track(
    track: Arc<TrackRemote>,
    info: TrackInfo,
    sink: Arc<dyn MediaSink>,
    token: CancellationToken,
    debug: bool,
) {
    let mut first = true;
    loop {
        let packet = tokio::select! {
            () = token.cancelled() => break,
            result = track.read_rtp() => match result {
                Ok((packet, _attributes)) => packet,
                Err(e) => {
                    diag!(debug, track_id = %info.id, error = %e, "Track ended");
                    break;
                }
            },
        };

        if first {
            first = false;
            sink.on_loaded_metadata(&info, &packet).await;
        }
        sink.on_rtp(&info, &packet).await;
    }
    debug!(track_id = %info.id, "RTP reader stopped");
}

fn register_channel_handlers(
    dc: &Arc<RTCDataChannel>,
    state: &Arc<Mutex<NegotiationState>>,
    keepalive: &Arc<Mutex<Option<Keepalive>>>,
    period: Duration,
    shutdown: &CancellationToken,
    debug: bool,
) {
    let label = dc.label().to_string();

    {
        let weak: Weak<RTCDataChannel> = Arc::downgrade(dc);
        let state = Arc::clone(state);
        let keepalive = Arc::clone(keepalive);
        let shutdown = shutdown.clone();
        let label = label.clone();
        dc.on_open(Box::new(move || {
            let weak = weak.clone();
            let state = Arc::clone(&state);
            let keepalive = Arc::clone(&keepalive);
            let shutdown = shutdown.clone();
            let label = label.clone();
            Box::pin(async move {
                diag!(debug, channel = %label, "Channel open");
                if let Err(e) = state.lock().apply(NegotiationEvent::ChannelOpened) {
                    debug!(channel = %label, error = %e, "Ignoring channel open");
                    return;
                }
                let Some(dc) = weak.upgrade() else {
                    return;
                };
                let started = Keepalive::start(dc, period, &shutdown);
                if let Some(previous) = keepalive.lock().replace(started) {
                    previous.stop();
                }
            })
        }));
    }

    {
        let label = label.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let label = label.clone();
            Box::pin(async move {
                let payload = String::from_utf8_lossy(&msg.data);
                diag!(debug, channel = %label, is_string = msg.is_string, payload = %payload, "Channel message");
            })
        }));
    }

    {
        let label = label.clone();
        let keepalive = Arc::clone(keepalive);
        dc.on_error(Box::new(move |err: webrtc::Error| {
            let label = label.clone();
            let keepalive = Arc::clone(&keepalive);
            Box::pin(async move {
                warn!(channel = %label, error = %err, "Channel error");
                stop_keepalive(&keepalive);
            })
        }));
    }

    let state = Arc::clone(state);
    let keepalive = Arc::clone(keepalive);
    dc.on_close(Box::new(move || {
        let label = label.clone();
        let state = Arc::clone(&state);
        let keepalive = Arc::clone(&keepalive);
        Box::pin(async move {
            diag!(debug, channel = %label, "Channel close");
            let _ = state.lock().apply(NegotiationEvent::ChannelClosed);
            stop_keepalive(&keepalive);
        })
    }));
}
