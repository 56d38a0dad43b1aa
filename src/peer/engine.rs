//! Seams to the native media engine and the capture/render collaborators.
//!
//! The client never touches WebRTC internals directly. Everything goes through
//! these traits and is only ever called from the executor thread, so
//! implementations do not need to be reentrant across callers.

use crate::config::{CaptureFormat, ClientConfig, MediaConfig};
use crate::error::{CaptureError, EngineError};
use crate::peer::observer::SessionObserver;
use crate::peer::types::{
    HandleId, IceCandidate, SdpType, SessionDescription, StatsReport, TrackKind, VideoFrame,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Bootstraps a [`MediaEngine`] once per call setup.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create_engine(&self, config: &ClientConfig)
        -> Result<Arc<dyn MediaEngine>, EngineError>;
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Allocates a native session. The engine reports connectivity and stream
    /// events for it through `observer`.
    async fn create_session(
        &self,
        handle: HandleId,
        observer: SessionObserver,
    ) -> Result<Arc<dyn NativeSession>, EngineError>;

    /// Creates the local audio and video tracks for a publishing session.
    async fn create_local_tracks(&self, media: &MediaConfig) -> Result<LocalTracks, EngineError>;

    /// Releases the engine. Sessions must have been disposed already.
    async fn dispose(&self) -> Result<(), EngineError>;
}

/// One native peer session, exclusively owned by a `ConnectionSession`.
#[async_trait]
pub trait NativeSession: Send + Sync {
    async fn create_description(&self, kind: SdpType) -> Result<SessionDescription, EngineError>;

    async fn apply_local_description(&self, sdp: SessionDescription) -> Result<(), EngineError>;

    async fn apply_remote_description(&self, sdp: SessionDescription) -> Result<(), EngineError>;

    async fn add_local_tracks(&self, tracks: &LocalTracks) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    async fn stats(&self) -> Result<StatsReport, EngineError>;

    async fn dispose(&self) -> Result<(), EngineError>;
}

pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    fn set_enabled(&self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// Registers a render target. Audio tracks ignore sinks.
    fn add_sink(&self, sink: Arc<dyn VideoSink>);
}

/// Render target for video frames
pub trait VideoSink: Send + Sync {
    fn on_frame(&self, frame: &VideoFrame);
}

/// Camera or screen capturer feeding a local video track.
pub trait CaptureSource: Send + Sync {
    fn start_capture(
        &self,
        format: CaptureFormat,
        sink: Arc<dyn VideoSink>,
    ) -> Result<(), CaptureError>;

    /// Blocks until the capturer has actually stopped.
    fn stop_capture(&self) -> Result<(), CaptureError>;

    fn adapt_output_format(&self, format: CaptureFormat) -> Result<(), CaptureError>;

    /// Returns false when the source is not a switchable camera.
    fn switch_camera(&self) -> bool {
        false
    }
}

/// Local tracks for one publishing session
#[derive(Clone)]
pub struct LocalTracks {
    pub audio: Arc<dyn MediaTrack>,
    pub video: Arc<dyn MediaTrack>,
    /// Where the capture source pushes frames for `video`.
    pub capture_input: Arc<dyn VideoSink>,
}

impl fmt::Debug for LocalTracks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTracks")
            .field("audio", &self.audio)
            .field("video", &self.video)
            .finish_non_exhaustive()
    }
}

/// Remote stream announced by the engine
#[derive(Debug, Clone)]
pub struct RemoteStream {
    pub id: String,
    pub audio_tracks: Vec<Arc<dyn MediaTrack>>,
    pub video_tracks: Vec<Arc<dyn MediaTrack>>,
}

/// What the application hands over when it starts publishing.
#[derive(Clone)]
pub struct LocalMedia {
    pub local_sink: Arc<dyn VideoSink>,
    pub remote_sinks: Vec<Arc<dyn VideoSink>>,
    pub capture: Arc<dyn CaptureSource>,
}

impl LocalMedia {
    pub fn new(
        local_sink: Arc<dyn VideoSink>,
        remote_sinks: Vec<Arc<dyn VideoSink>>,
        capture: Arc<dyn CaptureSource>,
    ) -> Self {
        Self {
            local_sink,
            remote_sinks,
            capture,
        }
    }
}
