#![allow(dead_code)]

use async_trait::async_trait;
use janus_room::config::{CaptureFormat, ClientConfig, FailurePolicy, MediaConfig};
use janus_room::error::{CaptureError, EngineError};
use janus_room::peer::types::{
    CandidatePairStats, HandleId, IceCandidate, SdpType, SessionDescription, StatsReport,
    TrackKind, VideoFrame,
};
use janus_room::peer::{
    CaptureSource, EngineFactory, LocalTracks, MediaEngine, MediaTrack, NativeSession,
    SessionObserver, VideoSink,
};
use janus_room::{ClientEvent, EventSink, PeerConnectionClient};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared switches and counters of the in-memory engine.
#[derive(Default)]
pub struct MockControl {
    pub fail_bootstrap: AtomicBool,
    /// Appends an Opus audio section to every created description.
    pub audio_sdp: AtomicBool,
    pub fail_create: Mutex<HashSet<HandleId>>,
    pub fail_apply: Mutex<HashSet<HandleId>>,
    pub engines_created: AtomicUsize,
    pub engine_disposed: AtomicUsize,
    pub sessions: Mutex<Vec<Arc<MockSession>>>,
    pub tracks: Mutex<Vec<Arc<MockTrack>>>,
}

impl MockControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every native session created for `handle`, oldest first.
    pub fn sessions_for(&self, handle: HandleId) -> Vec<Arc<MockSession>> {
        self.sessions
            .lock()
            .iter()
            .filter(|s| s.handle == handle)
            .cloned()
            .collect()
    }

    pub fn latest(&self, handle: HandleId) -> Arc<MockSession> {
        self.sessions_for(handle)
            .pop()
            .unwrap_or_else(|| panic!("no session for {handle}"))
    }

    pub fn fail_create_for(&self, handle: HandleId) {
        self.fail_create.lock().insert(handle);
    }

    pub fn fail_apply_for(&self, handle: HandleId) {
        self.fail_apply.lock().insert(handle);
    }

    pub fn track(&self, kind: TrackKind) -> Arc<MockTrack> {
        self.tracks
            .lock()
            .iter()
            .rev()
            .find(|t| t.kind == kind)
            .cloned()
            .expect("no local track")
    }
}

pub struct MockEngineFactory {
    pub control: Arc<MockControl>,
}

#[async_trait]
impl EngineFactory for MockEngineFactory {
    async fn create_engine(
        &self,
        _config: &ClientConfig,
    ) -> Result<Arc<dyn MediaEngine>, EngineError> {
        if self.control.fail_bootstrap.load(Ordering::SeqCst) {
            return Err(EngineError::Bootstrap("no codecs".into()));
        }
        self.control.engines_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockEngine {
            control: self.control.clone(),
        }))
    }
}

pub struct MockEngine {
    control: Arc<MockControl>,
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_session(
        &self,
        handle: HandleId,
        observer: SessionObserver,
    ) -> Result<Arc<dyn NativeSession>, EngineError> {
        let session = Arc::new(MockSession {
            handle,
            observer,
            control: self.control.clone(),
            disposed: AtomicUsize::new(0),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            tracks_added: AtomicUsize::new(0),
        });
        self.control.sessions.lock().push(session.clone());
        Ok(session)
    }

    async fn create_local_tracks(&self, _media: &MediaConfig) -> Result<LocalTracks, EngineError> {
        let audio = MockTrack::new("audio0", TrackKind::Audio);
        let video = MockTrack::new("video0", TrackKind::Video);
        {
            let mut tracks = self.control.tracks.lock();
            tracks.push(audio.clone());
            tracks.push(video.clone());
        }
        Ok(LocalTracks {
            audio,
            video: video.clone(),
            capture_input: video,
        })
    }

    async fn dispose(&self) -> Result<(), EngineError> {
        self.control.engine_disposed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockSession {
    pub handle: HandleId,
    pub observer: SessionObserver,
    control: Arc<MockControl>,
    pub disposed: AtomicUsize,
    pub local: Mutex<Option<SessionDescription>>,
    pub remote: Mutex<Option<SessionDescription>>,
    pub candidates: Mutex<Vec<IceCandidate>>,
    pub tracks_added: AtomicUsize,
}

impl MockSession {
    pub fn dispose_count(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    fn apply_fails(&self) -> bool {
        self.control.fail_apply.lock().contains(&self.handle)
    }
}

#[async_trait]
impl NativeSession for MockSession {
    async fn create_description(&self, kind: SdpType) -> Result<SessionDescription, EngineError> {
        if self.control.fail_create.lock().contains(&self.handle) {
            return Err(EngineError::Description(format!("cannot create {kind}")));
        }
        let mut sdp = format!("v=0 {kind} {}", self.handle);
        if self.control.audio_sdp.load(Ordering::SeqCst) {
            sdp.push_str("\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=rtpmap:111 opus/48000/2\r\n");
        }
        Ok(SessionDescription::new(kind, sdp))
    }

    async fn apply_local_description(&self, sdp: SessionDescription) -> Result<(), EngineError> {
        if self.apply_fails() {
            return Err(EngineError::Description("local rejected".into()));
        }
        *self.local.lock() = Some(sdp);
        Ok(())
    }

    async fn apply_remote_description(&self, sdp: SessionDescription) -> Result<(), EngineError> {
        if self.apply_fails() {
            return Err(EngineError::Description("remote rejected".into()));
        }
        *self.remote.lock() = Some(sdp);
        Ok(())
    }

    async fn add_local_tracks(&self, _tracks: &LocalTracks) -> Result<(), EngineError> {
        self.tracks_added.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn stats(&self) -> Result<StatsReport, EngineError> {
        Ok(StatsReport::new(
            3,
            vec![CandidatePairStats {
                local_candidate_id: "local".into(),
                remote_candidate_id: "remote".into(),
                nominated: true,
                bytes_sent: 10,
                bytes_received: 20,
                state: "succeeded".into(),
            }],
        ))
    }

    async fn dispose(&self) -> Result<(), EngineError> {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockTrack {
    id: String,
    pub kind: TrackKind,
    enabled: AtomicBool,
    pub sinks: AtomicUsize,
}

impl MockTrack {
    pub fn new(id: &str, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            enabled: AtomicBool::new(false),
            sinks: AtomicUsize::new(0),
        })
    }
}

impl MediaTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn add_sink(&self, _sink: Arc<dyn VideoSink>) {
        self.sinks.fetch_add(1, Ordering::SeqCst);
    }
}

impl VideoSink for MockTrack {
    fn on_frame(&self, _frame: &VideoFrame) {}
}

#[derive(Default)]
pub struct CountingSink {
    pub frames: AtomicUsize,
}

impl VideoSink for CountingSink {
    fn on_frame(&self, _frame: &VideoFrame) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockCapture {
    pub camera: bool,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub switched: AtomicUsize,
    pub formats: Mutex<Vec<CaptureFormat>>,
}

impl CaptureSource for MockCapture {
    fn start_capture(
        &self,
        format: CaptureFormat,
        _sink: Arc<dyn VideoSink>,
    ) -> Result<(), CaptureError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.formats.lock().push(format);
        Ok(())
    }

    fn stop_capture(&self) -> Result<(), CaptureError> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn adapt_output_format(&self, format: CaptureFormat) -> Result<(), CaptureError> {
        self.formats.lock().push(format);
        Ok(())
    }

    fn switch_camera(&self) -> bool {
        if self.camera {
            self.switched.fetch_add(1, Ordering::SeqCst);
        }
        self.camera
    }
}

pub struct Harness {
    pub client: PeerConnectionClient,
    pub events: UnboundedReceiver<ClientEvent>,
    pub control: Arc<MockControl>,
}

impl Harness {
    /// Client over the mock engine, already initialized.
    pub fn new(policy: FailurePolicy) -> Self {
        Self::with_config(
            MockControl::new(),
            ClientConfig {
                failure_policy: policy,
                ..Default::default()
            },
        )
    }

    pub fn with_config(control: Arc<MockControl>, config: ClientConfig) -> Self {
        let mut harness = Self::uninitialized(control);
        let (sink, events) = EventSink::channel();
        harness.client.initialize_engine(config, sink).unwrap();
        harness.events = events;
        harness
    }

    pub fn uninitialized(control: Arc<MockControl>) -> Self {
        let client = PeerConnectionClient::new(Arc::new(MockEngineFactory {
            control: control.clone(),
        }))
        .unwrap();
        let (_, events) = EventSink::channel();
        Self {
            client,
            events,
            control,
        }
    }

    pub fn publish(&self, handle: HandleId, capture: Arc<MockCapture>) {
        self.client
            .create_initiator_session(
                Arc::new(CountingSink::default()),
                vec![Arc::new(CountingSink::default()), Arc::new(CountingSink::default())],
                capture,
                handle,
            )
            .unwrap();
    }

    pub async fn next_event(&mut self) -> ClientEvent {
        timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    /// Lets follow-up commands posted by the executor run to completion.
    pub async fn settle(&self) {
        for _ in 0..8 {
            self.client.handles().await.unwrap();
        }
    }

    /// Everything emitted so far, after the queue has settled.
    pub async fn drain(&mut self) -> Vec<ClientEvent> {
        self.settle().await;
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn offer(handle: u64) -> SessionDescription {
    SessionDescription::offer(format!("v=0 remote offer {handle}"))
}

pub fn answer(handle: u64) -> SessionDescription {
    SessionDescription::answer(format!("v=0 remote answer {handle}"))
}

pub fn host_candidate(port: u16) -> IceCandidate {
    IceCandidate::new(
        format!("candidate:1 1 udp 2122260223 192.168.1.2 {port} typ host"),
        Some("0".into()),
        Some(0),
    )
}
