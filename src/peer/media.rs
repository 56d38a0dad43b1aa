//! webrtc-rs backed media tracks.

use crate::peer::engine::{MediaTrack, VideoSink};
use crate::peer::types::{TrackKind, VideoFrame};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Local track backed by a `TrackLocalStaticSample`.
///
/// Video tracks double as the capture sink: frames pushed by the capture
/// source are rendered to the registered sinks and, when they carry encoded
/// payload, written to the track. Raw frames are only rendered.
pub struct RtcLocalTrack {
    kind: TrackKind,
    track: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    sinks: Mutex<Vec<Arc<dyn VideoSink>>>,
    samples: mpsc::UnboundedSender<Sample>,
    frame_duration: Duration,
}

impl fmt::Debug for RtcLocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcLocalTrack")
            .field("id", &self.track.id())
            .field("kind", &self.kind)
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .finish()
    }
}

impl RtcLocalTrack {
    /// Must be called from within the tokio runtime: the sample writer runs
    /// as a task on it.
    pub fn new(
        kind: TrackKind,
        capability: RTCRtpCodecCapability,
        id: &str,
        stream_id: &str,
        fps: u32,
    ) -> Arc<Self> {
        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            id.to_string(),
            stream_id.to_string(),
        ));
        let (samples, mut rx) = mpsc::unbounded_channel::<Sample>();
        let writer = track.clone();
        tokio::spawn(async move {
            while let Some(sample) = rx.recv().await {
                if let Err(e) = writer.write_sample(&sample).await {
                    warn!("track {}: write_sample failed: {e}", writer.id());
                }
            }
        });
        Arc::new(Self {
            kind,
            track,
            enabled: AtomicBool::new(true),
            sinks: Mutex::new(Vec::new()),
            samples,
            frame_duration: Duration::from_secs(1) / fps.max(1),
        })
    }

    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }
}

impl MediaTrack for RtcLocalTrack {
    fn id(&self) -> &str {
        self.track.id()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn add_sink(&self, sink: Arc<dyn VideoSink>) {
        if self.kind == TrackKind::Video {
            self.sinks.lock().push(sink);
        }
    }
}

impl VideoSink for RtcLocalTrack {
    fn on_frame(&self, frame: &VideoFrame) {
        if !self.is_enabled() {
            return;
        }
        for sink in self.sinks.lock().iter() {
            sink.on_frame(frame);
        }
        if !frame.encoded {
            trace!("raw {}x{} frame rendered only", frame.width, frame.height);
            return;
        }
        let sample = Sample {
            data: frame.data.clone(),
            duration: self.frame_duration,
            ..Default::default()
        };
        if self.samples.send(sample).is_err() {
            debug!("track {}: sample writer gone", self.track.id());
        }
    }
}

/// Remote track announced through `on_track`. Its RTP payload is forwarded
/// to the registered sinks as encoded frames.
pub struct RtcRemoteTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    sinks: Mutex<Vec<Arc<dyn VideoSink>>>,
}

impl fmt::Debug for RtcRemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcRemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl RtcRemoteTrack {
    /// Wraps `remote` and starts its read loop. The loop ends when the
    /// peer connection closes.
    pub fn spawn(remote: Arc<TrackRemote>) -> Arc<Self> {
        let kind = match remote.kind() {
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        };
        let track = Arc::new(Self {
            id: remote.id(),
            kind,
            enabled: AtomicBool::new(false),
            sinks: Mutex::new(Vec::new()),
        });

        let reader = track.clone();
        tokio::spawn(async move {
            let mut packets = 0u64;
            while let Ok((packet, _)) = remote.read_rtp().await {
                packets += 1;
                if reader.kind != TrackKind::Video || !reader.is_enabled() {
                    continue;
                }
                let frame = VideoFrame {
                    width: 0,
                    height: 0,
                    timestamp_us: i64::from(packet.header.timestamp),
                    data: packet.payload,
                    encoded: true,
                };
                for sink in reader.sinks.lock().iter() {
                    sink.on_frame(&frame);
                }
            }
            debug!("remote track {} ended after {packets} packets", reader.id);
        });
        track
    }
}

impl MediaTrack for RtcRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn add_sink(&self, sink: Arc<dyn VideoSink>) {
        if self.kind == TrackKind::Video {
            self.sinks.lock().push(sink);
        }
    }
}
