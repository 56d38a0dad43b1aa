//! Per-session connectivity and stream observer.
//!
//! [`SessionObserver`] is the half the engine holds: each callback is
//! re-enqueued onto the executor queue before it touches any state.
//! [`dispatch`] is the half that runs on the executor.

use crate::client::command::Command;
use crate::client::queue::WeakCommandQueue;
use crate::events::ClientEvent;
use crate::logger::dump_candidate;
use crate::peer::engine::{RemoteStream, VideoSink};
use crate::peer::ice::analyze_candidates;
use crate::peer::session::ConnectionSession;
use crate::peer::types::{HandleId, IceCandidate, IceConnectionState, IceGatheringState};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

pub const ICE_FAILED_MESSAGE: &str = "ICE connection failed.";

/// Engine notification waiting to be dispatched on the executor
#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    /// `None` means candidate gathering is complete.
    CandidateDiscovered(Option<IceCandidate>),
    CandidatesRemoved(Vec<IceCandidate>),
    IceConnectionChanged(IceConnectionState),
    StreamAdded(RemoteStream),
    StreamRemoved(String),
}

/// Handed to the engine when a native session is created. Holds the
/// session's handle, not the session itself.
#[derive(Clone)]
pub struct SessionObserver {
    handle: HandleId,
    generation: u64,
    queue: WeakCommandQueue,
}

impl fmt::Debug for SessionObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionObserver")
            .field("handle", &self.handle)
            .field("generation", &self.generation)
            .finish()
    }
}

impl SessionObserver {
    pub(crate) fn new(handle: HandleId, generation: u64, queue: WeakCommandQueue) -> Self {
        Self {
            handle,
            generation,
            queue,
        }
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    fn post(&self, event: ConnectionEvent) {
        let delivered = self.queue.send(Command::Connection {
            handle: self.handle,
            generation: self.generation,
            event,
        });
        if !delivered {
            debug!("[{}] executor gone, dropping observer event", self.handle);
        }
    }

    pub fn on_ice_candidate(&self, candidate: Option<IceCandidate>) {
        self.post(ConnectionEvent::CandidateDiscovered(candidate));
    }

    pub fn on_ice_candidates_removed(&self, candidates: Vec<IceCandidate>) {
        self.post(ConnectionEvent::CandidatesRemoved(candidates));
    }

    pub fn on_ice_connection_change(&self, state: IceConnectionState) {
        self.post(ConnectionEvent::IceConnectionChanged(state));
    }

    pub fn on_add_stream(&self, stream: RemoteStream) {
        self.post(ConnectionEvent::StreamAdded(stream));
    }

    pub fn on_remove_stream(&self, stream_id: impl Into<String>) {
        self.post(ConnectionEvent::StreamRemoved(stream_id.into()));
    }

    pub fn on_ice_gathering_change(&self, state: IceGatheringState) {
        debug!("[{}] IceGatheringState: {state:?}", self.handle);
    }

    pub fn on_signaling_change(&self, state: impl fmt::Debug) {
        debug!("[{}] SignalingState: {state:?}", self.handle);
    }

    pub fn on_data_channel(&self, label: &str) {
        debug!("[{}] New data channel {label}", self.handle);
    }

    // Signaling is pre-agreed with the gateway; renegotiation is not supported.
    pub fn on_renegotiation_needed(&self) {
        debug!("[{}] renegotiation needed, ignoring", self.handle);
    }
}

/// What the executor has to do after dispatching an observer event.
#[derive(Debug)]
pub(crate) enum ObserverOutcome {
    Emit(ClientEvent),
    Fail(String),
    Ignored,
}

/// Applies one observer event to its session.
///
/// `blocked` is true when the session (or the whole client) is in a failed
/// state; stream announcements are dropped then.
pub(crate) fn dispatch(
    session: &mut ConnectionSession,
    event: ConnectionEvent,
    blocked: bool,
    remote_sinks: &[Arc<dyn VideoSink>],
) -> ObserverOutcome {
    let handle = session.handle;
    match event {
        ConnectionEvent::CandidateDiscovered(Some(candidate)) => {
            dump_candidate("LOCAL", handle, &candidate);
            session.local_candidates.push(candidate.clone());
            ObserverOutcome::Emit(ClientEvent::IceCandidate { handle, candidate })
        }
        ConnectionEvent::CandidateDiscovered(None) => {
            debug!("[{handle}] ICE candidate gathering completed");
            analyze_candidates(&session.local_candidates);
            ObserverOutcome::Emit(ClientEvent::IceGatheringComplete { handle })
        }
        ConnectionEvent::CandidatesRemoved(candidates) => {
            debug!("[{handle}] {} local candidates removed", candidates.len());
            ObserverOutcome::Emit(ClientEvent::IceCandidatesRemoved { candidates })
        }
        ConnectionEvent::IceConnectionChanged(state) => {
            debug!("[{handle}] IceConnectionState: {state:?}");
            match state {
                IceConnectionState::Connected => {
                    ObserverOutcome::Emit(ClientEvent::IceConnected { handle })
                }
                IceConnectionState::Disconnected => {
                    ObserverOutcome::Emit(ClientEvent::IceDisconnected { handle })
                }
                IceConnectionState::Failed => ObserverOutcome::Fail(ICE_FAILED_MESSAGE.to_string()),
                _ => ObserverOutcome::Ignored,
            }
        }
        ConnectionEvent::StreamAdded(stream) => {
            if blocked {
                return ObserverOutcome::Ignored;
            }
            info!(
                "[{handle}] remote stream {} added: {} video / {} audio tracks",
                stream.id,
                stream.video_tracks.len(),
                stream.audio_tracks.len()
            );
            // only single-video-track streams are rendered
            if stream.video_tracks.len() != 1 {
                return ObserverOutcome::Ignored;
            }
            let track = stream.video_tracks[0].clone();
            track.set_enabled(true);
            for sink in remote_sinks {
                track.add_sink(sink.clone());
            }
            session.remote_video = Some(Arc::downgrade(&track));
            ObserverOutcome::Emit(ClientEvent::RemoteRender { handle, track })
        }
        ConnectionEvent::StreamRemoved(stream_id) => {
            debug!("[{handle}] remote stream {stream_id} removed");
            session.remote_video = None;
            ObserverOutcome::Ignored
        }
    }
}
