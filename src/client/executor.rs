//! The serial executor.
//!
//! One loop on one thread drains the command queue. It owns the session
//! registry and the factory state outright, so every registry write and
//! every engine call happens here and nowhere else.

use crate::client::command::Command;
use crate::client::queue::{CommandReceiver, WeakCommandQueue};
use crate::config::{CaptureFormat, ClientConfig, FailurePolicy};
use crate::error::EngineError;
use crate::events::{ClientEvent, EventSink};
use crate::logger::{dump_candidate, dump_stats};
use crate::peer::engine::{EngineFactory, LocalMedia, MediaEngine, NativeSession, VideoSink};
use crate::peer::negotiation::{
    failure_message, with_audio_start_bitrate, DescriptionSide, FailurePhase, NegotiationSignal,
};
use crate::peer::observer::{dispatch, ConnectionEvent, ObserverOutcome, SessionObserver};
use crate::peer::session::{ConnectionSession, PublishedMedia, SessionRegistry};
use crate::peer::types::{HandleId, IceCandidate, Role, SdpType, SessionDescription};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Fields that live for one call setup: reset by `Initialize`, released by
/// `CloseAll`.
struct FactoryState {
    config: ClientConfig,
    engine: Option<Arc<dyn MediaEngine>>,
    sink: Option<EventSink>,
    /// Engine bootstrap failure. Fatal under every policy.
    engine_error: Option<String>,
    /// Shared latch, only used with `FailurePolicy::Shared`.
    error: Option<String>,
    audio_enabled: bool,
    video_enabled: bool,
    /// Render targets for remote video, handed over by the publisher.
    remote_sinks: Vec<Arc<dyn VideoSink>>,
    stats_timers: HashMap<HandleId, JoinHandle<()>>,
    released: bool,
}

impl FactoryState {
    fn new(config: ClientConfig, sink: Option<EventSink>) -> Self {
        Self {
            config,
            engine: None,
            sink,
            engine_error: None,
            error: None,
            audio_enabled: true,
            video_enabled: true,
            remote_sinks: Vec::new(),
            stats_timers: HashMap::new(),
            released: false,
        }
    }

    fn stop_timers(&mut self) {
        for (_, timer) in self.stats_timers.drain() {
            timer.abort();
        }
    }
}

pub(crate) struct Executor {
    factory: Arc<dyn EngineFactory>,
    queue: WeakCommandQueue,
    commands: CommandReceiver,
    registry: SessionRegistry,
    state: FactoryState,
}

impl Executor {
    pub(crate) fn new(
        factory: Arc<dyn EngineFactory>,
        queue: WeakCommandQueue,
        commands: CommandReceiver,
    ) -> Self {
        Self {
            factory,
            queue,
            commands,
            registry: SessionRegistry::default(),
            state: FactoryState::new(ClientConfig::default(), None),
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("executor started");
        while let Some(command) = self.commands.recv().await {
            if !self.handle(command).await {
                break;
            }
        }
        self.state.stop_timers();
        debug!("executor stopped with {} live sessions", self.registry.len());
    }

    /// Returns false when the loop has to stop.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Initialize { config, sink } => self.initialize(*config, sink).await,
            Command::CreateInitiator { handle, media } => {
                self.create_initiator(handle, media).await
            }
            Command::CreateOffer(handle) => self.create_offer(handle).await,
            Command::SetRemoteDescription { handle, sdp } => {
                self.set_remote_description(handle, sdp).await
            }
            Command::AcceptOffer { handle, sdp } => self.accept_offer(handle, sdp).await,
            Command::AddRemoteCandidate { handle, candidate } => {
                self.add_remote_candidate(handle, candidate).await
            }
            Command::DescriptionCreated {
                handle,
                generation,
                result,
            } => self.on_description_created(handle, generation, result).await,
            Command::DescriptionApplied {
                handle,
                generation,
                side,
                result,
            } => self.on_description_applied(handle, generation, side, result).await,
            Command::Connection {
                handle,
                generation,
                event,
            } => self.on_connection_event(handle, generation, event),
            Command::PollStats {
                handle,
                period,
                enabled,
            } => self.poll_stats(handle, period, enabled),
            Command::FetchStats(handle) => self.fetch_stats(handle).await,
            Command::SetAudioEnabled(enabled) => self.set_audio_enabled(enabled),
            Command::SetVideoEnabled(enabled) => self.set_video_enabled(enabled),
            Command::StopVideoSource => self.stop_video_source(),
            Command::StartVideoSource => self.start_video_source(),
            Command::SwitchCamera => self.switch_camera(),
            Command::ChangeCaptureFormat(format) => self.change_capture_format(format),
            Command::CloseAll { done } => {
                self.close_all().await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            Command::Snapshot { handle, reply } => {
                let _ = reply.send(self.registry.get(&handle).map(ConnectionSession::snapshot));
            }
            Command::Handles { reply } => {
                let _ = reply.send(self.registry.handles());
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn post(&self, command: Command) {
        if !self.queue.send(command) {
            debug!("client dropped, engine outcome discarded");
        }
    }

    fn emit(&self, event: ClientEvent) {
        match &self.state.sink {
            Some(sink) => sink.emit(event),
            None => debug!("no event sink installed, dropping {event:?}"),
        }
    }

    // ---- engine bootstrap ----

    async fn initialize(&mut self, config: ClientConfig, sink: EventSink) {
        if !self.registry.is_empty() {
            warn!(
                "re-initializing with {} live sessions; disposing them",
                self.registry.len()
            );
            for session in self.registry.drain() {
                dispose_session(session).await;
            }
        }
        self.state.stop_timers();
        if let Some(engine) = self.state.engine.take() {
            if let Err(e) = engine.dispose().await {
                warn!("failed to dispose previous engine: {e}");
            }
        }

        self.queue.set_high_water_mark(config.queue_high_water_mark);
        self.state = FactoryState::new(config, Some(sink));

        match self.factory.create_engine(&self.state.config).await {
            Ok(engine) => {
                info!(
                    "engine created, failure policy {:?}, {} ice servers",
                    self.state.config.failure_policy,
                    self.state.config.ice_servers.len()
                );
                self.state.engine = Some(engine);
            }
            Err(e) => self.report_error(None, format!("Failed to create engine: {e}")),
        }
    }

    // ---- guards ----

    fn engine(&self, op: &str) -> Option<Arc<dyn MediaEngine>> {
        if let Some(message) = &self.state.engine_error {
            warn!("{op}: engine failed earlier ({message}), ignoring");
            return None;
        }
        let engine = self.state.engine.clone();
        if engine.is_none() {
            warn!("{op}: engine is not initialized, ignoring");
        }
        engine
    }

    fn is_blocked(&self, handle: HandleId) -> bool {
        if self.state.engine_error.is_some() {
            return true;
        }
        match self.state.config.failure_policy {
            FailurePolicy::Shared => self.state.error.is_some(),
            FailurePolicy::PerSession => self
                .registry
                .get(&handle)
                .is_some_and(|session| session.failure.is_some()),
        }
    }

    /// Native session and generation for a session that may take new
    /// operations right now.
    fn ready_session(&self, handle: HandleId, op: &str) -> Option<(Arc<dyn NativeSession>, u64)> {
        self.engine(op)?;
        let Some(session) = self.registry.get(&handle) else {
            warn!("[{handle}] {op}: no such session, ignoring");
            return None;
        };
        if self.is_blocked(handle) {
            warn!("[{handle}] {op}: client is in a failed state, ignoring");
            return None;
        }
        Some((session.native.clone(), session.generation))
    }

    /// True when an engine outcome still belongs to the registered session.
    fn accepts(&self, handle: HandleId, generation: u64, what: &str) -> bool {
        match self.registry.get(&handle) {
            Some(session) if session.generation == generation => true,
            Some(_) => {
                debug!("[{handle}] dropping {what} for a superseded session");
                false
            }
            None => {
                debug!("[{handle}] dropping {what} for an unknown session");
                false
            }
        }
    }

    // ---- session creation ----

    async fn open_session(
        &mut self,
        handle: HandleId,
        role: Role,
    ) -> Option<(Arc<dyn NativeSession>, u64)> {
        let engine = self.engine("createSession")?;
        if self.state.config.failure_policy == FailurePolicy::Shared && self.state.error.is_some() {
            warn!("[{handle}] createSession: client is in a failed state, ignoring");
            return None;
        }

        let generation = self.registry.next_generation();
        let observer = SessionObserver::new(handle, generation, self.queue.clone());
        let native = match engine.create_session(handle, observer).await {
            Ok(native) => native,
            Err(e) => {
                self.report_error(Some(handle), format!("Failed to create peer connection: {e}"));
                return None;
            }
        };

        let session = ConnectionSession::new(handle, role, generation, native.clone());
        if let Some(previous) = self.registry.insert(session) {
            warn!(
                "[{handle}] session replaced ({:?} → {role:?}), previous one left undisposed",
                previous.role()
            );
        }
        info!("[{handle}] {role:?} session created");
        Some((native, generation))
    }

    async fn create_initiator(&mut self, handle: HandleId, media: LocalMedia) {
        let Some((native, _)) = self.open_session(handle, Role::Initiator).await else {
            return;
        };
        let Some(engine) = self.state.engine.clone() else {
            return;
        };

        let tracks = match engine.create_local_tracks(&self.state.config.media).await {
            Ok(tracks) => tracks,
            Err(e) => {
                self.report_error(Some(handle), format!("Failed to create local tracks: {e}"));
                return;
            }
        };
        tracks.audio.set_enabled(self.state.audio_enabled);
        tracks.video.set_enabled(self.state.video_enabled);
        tracks.video.add_sink(media.local_sink.clone());
        self.state.remote_sinks = media.remote_sinks.clone();

        let format = self.state.config.media.capture_format();
        let started = media
            .capture
            .start_capture(format, tracks.capture_input.clone());
        let capture_stopped = match started {
            Ok(()) => {
                debug!(
                    "[{handle}] capture started at {}x{}@{}",
                    format.width, format.height, format.fps
                );
                false
            }
            Err(e) => {
                warn!("[{handle}] capture did not start: {e}");
                true
            }
        };

        if let Err(e) = native.add_local_tracks(&tracks).await {
            self.report_error(Some(handle), format!("Failed to add local tracks: {e}"));
        }
        if let Some(session) = self.registry.get_mut(&handle) {
            session.local = Some(PublishedMedia {
                media,
                tracks,
                capture_stopped,
            });
        }
    }

    // ---- negotiation ----

    async fn create_offer(&mut self, handle: HandleId) {
        let Some((native, generation)) = self.ready_session(handle, "createOffer") else {
            return;
        };
        if let Some(session) = self.registry.get_mut(&handle) {
            if session.role() != Role::Initiator {
                warn!("[{handle}] createOffer on a responder session");
            }
            session.negotiation.request_description(SdpType::Offer);
        }
        debug!("[{handle}] PC create OFFER");
        let result = native.create_description(SdpType::Offer).await;
        self.post(Command::DescriptionCreated {
            handle,
            generation,
            result,
        });
    }

    async fn set_remote_description(&mut self, handle: HandleId, sdp: SessionDescription) {
        let Some((native, generation)) = self.ready_session(handle, "setRemoteDescription") else {
            return;
        };
        if let Some(session) = self.registry.get_mut(&handle) {
            session.negotiation.remote_applying();
        }
        debug!("[{handle}] set remote {}", sdp.sdp_type);
        let result = native.apply_remote_description(sdp).await;
        self.post(Command::DescriptionApplied {
            handle,
            generation,
            side: DescriptionSide::Remote,
            result,
        });
    }

    async fn accept_offer(&mut self, handle: HandleId, sdp: SessionDescription) {
        let Some((native, generation)) = self.open_session(handle, Role::Responder).await else {
            return;
        };
        if let Some(session) = self.registry.get_mut(&handle) {
            session.negotiation.remote_applying();
        }
        debug!("[{handle}] set remote offer");
        let result = native.apply_remote_description(sdp).await;
        let applied = result.is_ok();
        self.post(Command::DescriptionApplied {
            handle,
            generation,
            side: DescriptionSide::Remote,
            result,
        });
        if !applied {
            return;
        }

        if let Some(session) = self.registry.get_mut(&handle) {
            session.negotiation.request_description(SdpType::Answer);
        }
        debug!("[{handle}] PC create ANSWER");
        let result = native.create_description(SdpType::Answer).await;
        self.post(Command::DescriptionCreated {
            handle,
            generation,
            result,
        });
    }

    async fn on_description_created(
        &mut self,
        handle: HandleId,
        generation: u64,
        result: Result<SessionDescription, EngineError>,
    ) {
        if !self.accepts(handle, generation, "created description") {
            return;
        }
        let mut sdp = match result {
            Ok(sdp) => sdp,
            Err(e) => {
                self.report_error(Some(handle), failure_message(FailurePhase::Create, &e));
                return;
            }
        };
        let media = &self.state.config.media;
        if media.audio_start_bitrate > 0 {
            let codec = media.audio_codec.sdp_name();
            sdp.sdp = with_audio_start_bitrate(&sdp.sdp, codec, media.audio_start_bitrate);
        }
        if self.is_blocked(handle) {
            debug!("[{handle}] failed state, not applying local {}", sdp.sdp_type);
            return;
        }
        let Some(session) = self.registry.get_mut(&handle) else {
            return;
        };
        let sdp = session.negotiation.description_created(sdp);
        let native = session.native.clone();
        debug!("[{handle}] set local {}", sdp.sdp_type);
        let result = native.apply_local_description(sdp).await;
        self.post(Command::DescriptionApplied {
            handle,
            generation,
            side: DescriptionSide::Local,
            result,
        });
    }

    async fn on_description_applied(
        &mut self,
        handle: HandleId,
        generation: u64,
        side: DescriptionSide,
        result: Result<(), EngineError>,
    ) {
        if !self.accepts(handle, generation, "applied description") {
            return;
        }
        if let Err(e) = result {
            self.report_error(Some(handle), failure_message(FailurePhase::Apply, &e));
            return;
        }
        if self.is_blocked(handle) {
            debug!("[{handle}] failed state, ignoring {side:?} description apply");
            return;
        }
        let Some(session) = self.registry.get_mut(&handle) else {
            return;
        };
        let signal = session.negotiation.description_applied(side);
        let pending = if side == DescriptionSide::Remote {
            std::mem::take(&mut session.pending_candidates)
        } else {
            Vec::new()
        };
        let native = session.native.clone();

        if !pending.is_empty() {
            debug!("[{handle}] applying {} queued remote candidates", pending.len());
            for candidate in pending {
                if let Err(e) = native.add_ice_candidate(candidate).await {
                    warn!("[{handle}] failed to apply queued candidate: {e}");
                }
            }
        }

        match signal {
            Some(NegotiationSignal::OfferReady(sdp)) => {
                info!("[{handle}] local offer ready");
                self.emit(ClientEvent::OfferReady { handle, sdp });
            }
            Some(NegotiationSignal::AnswerReady(sdp)) => {
                info!("[{handle}] local answer ready");
                self.emit(ClientEvent::AnswerReady { handle, sdp });
            }
            None => debug!("[{handle}] {side:?} description set"),
        }
    }

    async fn add_remote_candidate(&mut self, handle: HandleId, candidate: IceCandidate) {
        let Some((native, _)) = self.ready_session(handle, "addRemoteIceCandidate") else {
            return;
        };
        dump_candidate("REMOTE", handle, &candidate);
        if let Some(session) = self.registry.get_mut(&handle) {
            if !session.negotiation.has_remote_description() {
                session.pending_candidates.push(candidate);
                debug!(
                    "[{handle}] remote description not set yet, {} candidates queued",
                    session.pending_candidates.len()
                );
                return;
            }
        }
        if let Err(e) = native.add_ice_candidate(candidate).await {
            warn!("[{handle}] failed to add remote candidate: {e}");
        }
    }

    // ---- observer events ----

    fn on_connection_event(&mut self, handle: HandleId, generation: u64, event: ConnectionEvent) {
        if !self.accepts(handle, generation, "observer event") {
            return;
        }
        let blocked = self.is_blocked(handle);
        let Some(session) = self.registry.get_mut(&handle) else {
            return;
        };
        match dispatch(session, event, blocked, &self.state.remote_sinks) {
            ObserverOutcome::Emit(event) => {
                if let ClientEvent::RemoteRender { track, .. } = &event {
                    track.set_enabled(self.state.video_enabled);
                }
                self.emit(event);
            }
            ObserverOutcome::Fail(message) => self.report_error(Some(handle), message),
            ObserverOutcome::Ignored => {}
        }
    }

    // ---- stats ----

    fn poll_stats(&mut self, handle: HandleId, period: Duration, enabled: bool) {
        if let Some(timer) = self.state.stats_timers.remove(&handle) {
            timer.abort();
            debug!("[{handle}] stats polling stopped");
        }
        if !enabled {
            return;
        }
        if self.registry.get(&handle).is_none() {
            warn!("[{handle}] enableStatsEvents: no such session, ignoring");
            return;
        }
        if period.is_zero() {
            warn!("[{handle}] enableStatsEvents: zero period, ignoring");
            return;
        }

        let queue = self.queue.clone();
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !queue.send(Command::FetchStats(handle)) {
                    break;
                }
            }
        });
        self.state.stats_timers.insert(handle, timer);
        debug!("[{handle}] stats polling every {period:?}");
    }

    async fn fetch_stats(&mut self, handle: HandleId) {
        let Some((native, _)) = self.ready_session(handle, "getStats") else {
            return;
        };
        match native.stats().await {
            Ok(report) => {
                dump_stats(handle, &report);
                self.emit(ClientEvent::StatsReady { handle, report });
            }
            Err(e) => warn!("[{handle}] getStats failed: {e}"),
        }
    }

    // ---- local media ----

    fn set_audio_enabled(&mut self, enabled: bool) {
        self.state.audio_enabled = enabled;
        for local in self.registry.values().filter_map(|s| s.local.as_ref()) {
            local.tracks.audio.set_enabled(enabled);
        }
        debug!("audio enabled: {enabled}");
    }

    fn set_video_enabled(&mut self, enabled: bool) {
        self.state.video_enabled = enabled;
        for session in self.registry.values() {
            if let Some(local) = &session.local {
                local.tracks.video.set_enabled(enabled);
            }
            if let Some(track) = session.remote_video_track() {
                track.set_enabled(enabled);
            }
        }
        debug!("video enabled: {enabled}");
    }

    fn stop_video_source(&mut self) {
        for session in self.registry.values_mut() {
            let handle = session.handle;
            let Some(local) = session.local.as_mut() else {
                continue;
            };
            if local.capture_stopped {
                continue;
            }
            debug!("[{handle}] stop video source");
            match local.media.capture.stop_capture() {
                Ok(()) => local.capture_stopped = true,
                Err(e) => warn!("[{handle}] failed to stop capture: {e}"),
            }
        }
    }

    fn start_video_source(&mut self) {
        let format = self.state.config.media.capture_format();
        for session in self.registry.values_mut() {
            let handle = session.handle;
            let Some(local) = session.local.as_mut() else {
                continue;
            };
            if !local.capture_stopped {
                continue;
            }
            debug!("[{handle}] restart video source");
            match local.media.capture.start_capture(format, local.tracks.capture_input.clone()) {
                Ok(()) => local.capture_stopped = false,
                Err(e) => warn!("[{handle}] failed to restart capture: {e}"),
            }
        }
    }

    fn switch_camera(&mut self) {
        let handles: Vec<HandleId> = self
            .registry
            .values()
            .filter(|s| s.local.is_some())
            .map(|s| s.handle)
            .collect();
        for handle in handles {
            if self.is_blocked(handle) {
                warn!("[{handle}] switchCamera: failed state, ignoring");
                continue;
            }
            let Some(local) = self.registry.get(&handle).and_then(|s| s.local.as_ref()) else {
                continue;
            };
            if local.media.capture.switch_camera() {
                debug!("[{handle}] camera switched");
            } else {
                info!("[{handle}] will not switch camera, capture source is not a camera");
            }
        }
    }

    fn change_capture_format(&mut self, format: CaptureFormat) {
        let handles: Vec<HandleId> = self
            .registry
            .values()
            .filter(|s| s.local.is_some())
            .map(|s| s.handle)
            .collect();
        if handles.is_empty() {
            warn!("changeCaptureFormat: no capture source, ignoring");
            return;
        }
        for handle in handles {
            if self.is_blocked(handle) {
                error!("[{handle}] failed to change capture format, client is in a failed state");
                continue;
            }
            let Some(local) = self.registry.get(&handle).and_then(|s| s.local.as_ref()) else {
                continue;
            };
            debug!(
                "[{handle}] changeCaptureFormat: {}x{}@{}",
                format.width, format.height, format.fps
            );
            if let Err(e) = local.media.capture.adapt_output_format(format) {
                warn!("[{handle}] {e}");
            }
        }
    }

    // ---- teardown ----

    async fn close_all(&mut self) {
        if self.state.released {
            warn!("closeAll: already released, ignoring");
            return;
        }
        info!(
            "closing {} sessions, {} commands still queued",
            self.registry.len(),
            self.queue.depth()
        );
        self.state.stop_timers();
        for session in self.registry.drain() {
            dispose_session(session).await;
        }
        if let Some(engine) = self.state.engine.take() {
            if let Err(e) = engine.dispose().await {
                warn!("failed to dispose engine: {e}");
            }
        }
        self.state.remote_sinks.clear();
        self.state.released = true;
        info!("closing peer connection done");
        self.emit(ClientEvent::Closed);
    }

    // ---- error path ----

    /// Funnels every reportable failure. `None` is the engine bootstrap
    /// failure; anything else is scoped by the configured policy. A failure
    /// hitting an already-latched scope is only logged.
    fn report_error(&mut self, handle: Option<HandleId>, message: String) {
        let Some(handle) = handle else {
            if self.state.engine_error.is_some() {
                debug!("swallowed engine error: {message}");
                return;
            }
            error!("engine error: {message}");
            self.state.engine_error = Some(message.clone());
            self.emit(ClientEvent::Error { handle: None, message });
            return;
        };

        let latched = match self.state.config.failure_policy {
            FailurePolicy::Shared => {
                let latched = self.state.error.is_some() || self.state.engine_error.is_some();
                if !latched {
                    self.state.error = Some(message.clone());
                }
                latched
            }
            FailurePolicy::PerSession => self
                .registry
                .get(&handle)
                .is_some_and(|session| session.failure.is_some()),
        };
        if latched {
            debug!("[{handle}] swallowed error: {message}");
            return;
        }
        if let Some(session) = self.registry.get_mut(&handle) {
            session.fail(message.clone());
        }
        error!("[{handle}] peer connection error: {message}");
        self.emit(ClientEvent::Error {
            handle: Some(handle),
            message,
        });
    }
}

async fn dispose_session(session: ConnectionSession) {
    let handle = session.handle;
    if let Err(e) = session.native.dispose().await {
        warn!("[{handle}] failed to dispose native session: {e}");
    }
    if let Some(local) = session.local {
        if !local.capture_stopped {
            if let Err(e) = local.media.capture.stop_capture() {
                warn!("[{handle}] failed to stop capture: {e}");
            }
        }
    }
    debug!("[{handle}] session disposed");
}
