//! Media engine backed by webrtc-rs.

use crate::config::{ClientConfig, MediaConfig, VideoCodec};
use crate::error::EngineError;
use crate::peer::engine::{
    EngineFactory, LocalTracks, MediaEngine, MediaTrack, NativeSession, RemoteStream,
};
use crate::peer::ice::{connection_state, from_init, gathering_state, rtc_config, to_init};
use crate::peer::media::{RtcLocalTrack, RtcRemoteTrack};
use crate::peer::observer::SessionObserver;
use crate::peer::types::{
    CandidatePairStats, HandleId, IceCandidate, SdpType, SessionDescription, StatsReport, TrackKind,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as CodecRegistry;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::TrackLocal;

const STREAM_ID: &str = "ARDAMS";
const VIDEO_TRACK_ID: &str = "ARDAMSv0";
const AUDIO_TRACK_ID: &str = "ARDAMSa0";

type LocalTrackMap = Arc<Mutex<HashMap<String, Arc<RtcLocalTrack>>>>;

#[derive(Debug, Default, Clone, Copy)]
pub struct RtcEngineFactory;

#[async_trait]
impl EngineFactory for RtcEngineFactory {
    async fn create_engine(
        &self,
        config: &ClientConfig,
    ) -> Result<Arc<dyn MediaEngine>, EngineError> {
        let mut codecs = CodecRegistry::default();
        codecs
            .register_default_codecs()
            .map_err(|e| EngineError::Bootstrap(format!("codec registration: {e}")))?;
        let registry = register_default_interceptors(Registry::new(), &mut codecs)
            .map_err(|e| EngineError::Bootstrap(format!("interceptor registration: {e}")))?;
        let api = APIBuilder::new()
            .with_media_engine(codecs)
            .with_interceptor_registry(registry)
            .build();

        let media = &config.media;
        if media.video_codec_hw_acceleration || media.video_flexfec {
            debug!("hardware acceleration and FlexFEC are not available, using software codecs");
        }
        info!("preferred video codec {}", media.video_codec.sdp_name());

        Ok(Arc::new(RtcEngine {
            api,
            config: config.clone(),
            local_tracks: Arc::default(),
        }))
    }
}

pub struct RtcEngine {
    api: API,
    config: ClientConfig,
    /// Local tracks by id, so sessions can bind the concrete tracks.
    local_tracks: LocalTrackMap,
}

#[async_trait]
impl MediaEngine for RtcEngine {
    async fn create_session(
        &self,
        handle: HandleId,
        observer: SessionObserver,
    ) -> Result<Arc<dyn NativeSession>, EngineError> {
        let pc = self
            .api
            .new_peer_connection(rtc_config(&self.config))
            .await
            .map_err(|e| EngineError::SessionCreation(e.to_string()))?;
        let pc = Arc::new(pc);
        wire_observer(&pc, observer);
        debug!("[{handle}] peer connection created");
        Ok(Arc::new(RtcSession {
            handle,
            pc,
            local_tracks: self.local_tracks.clone(),
        }))
    }

    async fn create_local_tracks(&self, media: &MediaConfig) -> Result<LocalTracks, EngineError> {
        let format = media.capture_format();
        debug!(
            "local tracks for {}x{}@{} (hd: {}), audio {:?} at {} kbps",
            format.width,
            format.height,
            format.fps,
            format.is_hd(),
            media.audio_codec,
            media.audio_start_bitrate
        );

        let audio = RtcLocalTrack::new(
            TrackKind::Audio,
            RTCRtpCodecCapability {
                mime_type: media.audio_codec.mime_type().to_string(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            AUDIO_TRACK_ID,
            STREAM_ID,
            format.fps,
        );
        let video = RtcLocalTrack::new(
            TrackKind::Video,
            video_capability(media.video_codec),
            VIDEO_TRACK_ID,
            STREAM_ID,
            format.fps,
        );

        {
            let mut tracks = self.local_tracks.lock();
            tracks.insert(AUDIO_TRACK_ID.to_string(), audio.clone());
            tracks.insert(VIDEO_TRACK_ID.to_string(), video.clone());
        }

        Ok(LocalTracks {
            audio,
            video: video.clone(),
            capture_input: video,
        })
    }

    async fn dispose(&self) -> Result<(), EngineError> {
        self.local_tracks.lock().clear();
        debug!("engine disposed");
        Ok(())
    }
}

fn video_capability(codec: VideoCodec) -> RTCRtpCodecCapability {
    let profile = match codec {
        VideoCodec::H264Baseline => Some("42e01f"),
        VideoCodec::H264High => Some("640c1f"),
        VideoCodec::Vp8 | VideoCodec::Vp9 => None,
    };
    let sdp_fmtp_line = profile
        .map(|id| format!("level-asymmetry-allowed=1;packetization-mode=1;profile-level-id={id}"))
        .unwrap_or_default();
    RTCRtpCodecCapability {
        mime_type: codec.mime_type().to_string(),
        clock_rate: 90_000,
        sdp_fmtp_line,
        ..Default::default()
    }
}

/// Routes the peer connection callbacks into `observer`.
fn wire_observer(pc: &RTCPeerConnection, observer: SessionObserver) {
    let obs = observer.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => match c.to_json() {
                Ok(init) => obs.on_ice_candidate(Some(from_init(init))),
                Err(e) => warn!("[{}] unserializable local candidate: {e}", obs.handle()),
            },
            None => obs.on_ice_candidate(None),
        }
        Box::pin(async {})
    }));

    let obs = observer.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        if let Some(state) = connection_state(state) {
            obs.on_ice_connection_change(state);
        }
        Box::pin(async {})
    }));

    let obs = observer.clone();
    pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
        if let Some(state) = gathering_state(state) {
            obs.on_ice_gathering_change(state);
        }
        Box::pin(async {})
    }));

    let obs = observer.clone();
    pc.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
        obs.on_signaling_change(state);
        Box::pin(async {})
    }));

    // one stream per remote track; the reader task is spawned so the
    // handler returns right away
    let obs = observer.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let stream_id = track.stream_id();
        let remote: Arc<dyn MediaTrack> = RtcRemoteTrack::spawn(track);
        let (audio_tracks, video_tracks) = match remote.kind() {
            TrackKind::Audio => (vec![remote], Vec::new()),
            TrackKind::Video => (Vec::new(), vec![remote]),
        };
        obs.on_add_stream(RemoteStream {
            id: stream_id,
            audio_tracks,
            video_tracks,
        });
        Box::pin(async {})
    }));

    let obs = observer.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        obs.on_data_channel(dc.label());
        Box::pin(async {})
    }));

    let obs = observer;
    pc.on_negotiation_needed(Box::new(move || {
        obs.on_renegotiation_needed();
        Box::pin(async {})
    }));
}

pub struct RtcSession {
    handle: HandleId,
    pc: Arc<RTCPeerConnection>,
    local_tracks: LocalTrackMap,
}

fn to_rtc(sdp: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let desc = match sdp.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(sdp.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp.sdp)?,
        SdpType::Rollback => {
            return Err(EngineError::Description("rollback is not supported".into()));
        }
    };
    Ok(desc)
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, EngineError> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(EngineError::Description("unspecified description type".into()));
        }
    };
    Ok(SessionDescription::new(sdp_type, desc.sdp))
}

#[async_trait]
impl NativeSession for RtcSession {
    async fn create_description(&self, kind: SdpType) -> Result<SessionDescription, EngineError> {
        let desc = match kind {
            SdpType::Offer => self.pc.create_offer(None).await?,
            SdpType::Answer => self.pc.create_answer(None).await?,
            other => return Err(EngineError::Description(format!("cannot create {other}"))),
        };
        from_rtc(desc)
    }

    async fn apply_local_description(&self, sdp: SessionDescription) -> Result<(), EngineError> {
        self.pc.set_local_description(to_rtc(sdp)?).await?;
        Ok(())
    }

    async fn apply_remote_description(&self, sdp: SessionDescription) -> Result<(), EngineError> {
        self.pc.set_remote_description(to_rtc(sdp)?).await?;
        Ok(())
    }

    async fn add_local_tracks(&self, tracks: &LocalTracks) -> Result<(), EngineError> {
        for track in [&tracks.audio, &tracks.video] {
            let local = self
                .local_tracks
                .lock()
                .get(track.id())
                .cloned()
                .ok_or_else(|| EngineError::Track(format!("unknown local track {}", track.id())))?;
            let rtc_track: Arc<dyn TrackLocal + Send + Sync> = local.rtc_track();
            let sender = self
                .pc
                .add_track(rtc_track)
                .await
                .map_err(|e| EngineError::Track(e.to_string()))?;
            // RTCP has to be read for the interceptors to work
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }
        debug!("[{}] local tracks added", self.handle);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.pc
            .add_ice_candidate(to_init(candidate))
            .await
            .map_err(|e| EngineError::Candidate(e.to_string()))
    }

    async fn stats(&self) -> Result<StatsReport, EngineError> {
        let stats = self.pc.get_stats().await;
        let entry_count = stats.reports.len();
        let candidate_pairs = stats
            .reports
            .into_values()
            .filter_map(|entry| match entry {
                StatsReportType::CandidatePair(pair) => Some(CandidatePairStats {
                    local_candidate_id: pair.local_candidate_id,
                    remote_candidate_id: pair.remote_candidate_id,
                    nominated: pair.nominated,
                    bytes_sent: pair.bytes_sent,
                    bytes_received: pair.bytes_received,
                    state: format!("{:?}", pair.state),
                }),
                _ => None,
            })
            .collect();
        Ok(StatsReport::new(entry_count, candidate_pairs))
    }

    async fn dispose(&self) -> Result<(), EngineError> {
        self.pc
            .close()
            .await
            .map_err(|e| EngineError::Dispose(e.to_string()))?;
        debug!("[{}] peer connection closed", self.handle);
        Ok(())
    }
}
