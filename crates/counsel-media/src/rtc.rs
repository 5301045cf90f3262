//! [`PeerConnection`] backed by the `webrtc` crate.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use counsel_shared::protocol::{IceCandidate, SdpKind, SessionDescription};

use crate::capture::{LocalStream, LocalTrack, MediaSample, TrackKind};
use crate::config::CallConfig;
use crate::error::MediaError;
use crate::peer::{PeerConnection, PeerEvent, PeerFactory, PeerHandle, PeerState};

const PEER_EVENT_BUFFER: usize = 64;

fn webrtc_err(e: webrtc::Error) -> MediaError {
    MediaError::WebRtc(e.to_string())
}

const STREAM_ID: &str = "counsel";

fn codec(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_PCMU.to_owned(),
            clock_rate: 8000,
            channels: 1,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
    }
}

fn codec_type(kind: TrackKind) -> RTPCodecType {
    match kind {
        TrackKind::Audio => RTPCodecType::Audio,
        TrackKind::Video => RTPCodecType::Video,
    }
}

/// Builds peers with default codecs and STUN-only ICE. Every local track is
/// sent; a kind with no local track still gets a `sendrecv` transceiver so
/// the remote side's media is received.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtcPeerFactory;

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(
        &self,
        config: &CallConfig,
        local: &LocalStream,
    ) -> Result<PeerHandle, MediaError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(webrtc_err)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media).map_err(webrtc_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.stun_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(webrtc_err)?);
        let mut pumps = Vec::new();
        for track in local.tracks() {
            pumps.extend(send_track(&pc, track).await?);
        }
        for kind in [TrackKind::Audio, TrackKind::Video] {
            if local.tracks().iter().any(|t| t.kind() == kind) {
                continue;
            }
            pc.add_transceiver_from_kind(codec_type(kind), None)
                .await
                .map_err(webrtc_err)?;
        }

        let (tx, rx) = mpsc::channel(PEER_EVENT_BUFFER);

        let candidate_tx = tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                // `None` marks the end of gathering.
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(PeerEvent::LocalCandidate(from_init(init))).await;
                    }
                    Err(e) => warn!(error = %e, "Could not serialise local ICE candidate"),
                }
            })
        }));

        let state_tx = tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            Box::pin(async move {
                debug!(state = %state, "Peer connection state changed");
                let _ = tx.send(PeerEvent::StateChanged(map_state(state))).await;
            })
        }));

        let track_tx = tx;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = track_tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    _ => return,
                };
                let _ = tx.send(PeerEvent::RemoteTrack(kind)).await;
            })
        }));

        Ok((Box::new(RtcPeer { pc, pumps }), rx))
    }
}

/// Attach `track` to the connection. Returns the tasks copying its samples
/// out and draining the sender's RTCP.
async fn send_track(
    pc: &RTCPeerConnection,
    track: &LocalTrack,
) -> Result<[JoinHandle<()>; 2], MediaError> {
    let id = match track.kind() {
        TrackKind::Audio => "audio",
        TrackKind::Video => "video",
    };
    let rtc_track = Arc::new(TrackLocalStaticSample::new(
        codec(track.kind()),
        id.to_owned(),
        STREAM_ID.to_owned(),
    ));
    let sender = pc
        .add_track(rtc_track.clone() as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(webrtc_err)?;
    debug!(kind = ?track.kind(), label = track.label(), "Local track attached");

    Ok([
        tokio::spawn(pump_samples(rtc_track, track.subscribe())),
        tokio::spawn(drain_rtcp(sender)),
    ])
}

async fn pump_samples(
    track: Arc<TrackLocalStaticSample>,
    mut samples: broadcast::Receiver<MediaSample>,
) {
    loop {
        match samples.recv().await {
            Ok(sample) => {
                let sample = Sample {
                    data: sample.data,
                    duration: sample.duration,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    debug!(error = %e, "Sample write failed");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Sample pump fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// Interceptors only run while someone reads the sender.
async fn drain_rtcp(sender: Arc<RTCRtpSender>) {
    let mut buf = vec![0u8; 1500];
    while sender.read(&mut buf).await.is_ok() {}
}

struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    pumps: Vec<JoinHandle<()>>,
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let offer = self.pc.create_offer(None).await.map_err(webrtc_err)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let answer = self.pc.create_answer(None).await.map_err(webrtc_err)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(webrtc_err)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(webrtc_err)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(webrtc_err)
    }

    async fn close(&self) -> Result<(), MediaError> {
        for pump in &self.pumps {
            pump.abort();
        }
        self.pc.close().await.map_err(webrtc_err)
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, MediaError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(|e| MediaError::Signal(e.to_string()))
}

fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn map_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
        _ => PeerState::New,
    }
}
