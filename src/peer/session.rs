use crate::peer::engine::{LocalMedia, LocalTracks, MediaTrack, NativeSession};
use crate::peer::negotiation::{Negotiation, NegotiationState};
use crate::peer::types::{HandleId, IceCandidate, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Media owned by a publishing session
pub(crate) struct PublishedMedia {
    pub media: LocalMedia,
    pub tracks: LocalTracks,
    pub capture_stopped: bool,
}

/// Negotiation state and native session for one gateway handle.
pub(crate) struct ConnectionSession {
    pub handle: HandleId,
    pub generation: u64,
    pub native: Arc<dyn NativeSession>,
    pub negotiation: Negotiation,
    pub local: Option<PublishedMedia>,
    pub remote_video: Option<Weak<dyn MediaTrack>>,
    /// Remote candidates that arrived before the remote description.
    pub pending_candidates: Vec<IceCandidate>,
    /// Local candidates gathered so far.
    pub local_candidates: Vec<IceCandidate>,
    pub failure: Option<String>,
}

impl ConnectionSession {
    pub fn new(
        handle: HandleId,
        role: Role,
        generation: u64,
        native: Arc<dyn NativeSession>,
    ) -> Self {
        Self {
            handle,
            generation,
            native,
            negotiation: Negotiation::new(role),
            local: None,
            remote_video: None,
            pending_candidates: Vec::new(),
            local_candidates: Vec::new(),
            failure: None,
        }
    }

    pub fn role(&self) -> Role {
        self.negotiation.role()
    }

    pub fn fail(&mut self, message: String) {
        self.negotiation.fail();
        self.failure = Some(message);
    }

    pub fn remote_video_track(&self) -> Option<Arc<dyn MediaTrack>> {
        self.remote_video.as_ref().and_then(Weak::upgrade)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            handle: self.handle,
            role: self.role(),
            state: self.negotiation.state(),
            has_local_description: self.negotiation.has_local_description(),
            has_remote_description: self.negotiation.has_remote_description(),
            remote_description_pending: self.negotiation.is_remote_applying(),
            has_remote_video: self.remote_video_track().is_some(),
            publishing: self.local.is_some(),
            pending_candidates: self.pending_candidates.len(),
            failure: self.failure.clone(),
        }
    }
}

/// Read-only view of a registered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub handle: HandleId,
    pub role: Role,
    pub state: NegotiationState,
    pub has_local_description: bool,
    pub has_remote_description: bool,
    pub remote_description_pending: bool,
    pub has_remote_video: bool,
    pub publishing: bool,
    pub pending_candidates: usize,
    pub failure: Option<String>,
}

/// handle → session map. Owned by the executor, so every write happens on
/// the executor thread.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: HashMap<HandleId, ConnectionSession>,
    generations: u64,
}

impl SessionRegistry {
    pub fn next_generation(&mut self) -> u64 {
        self.generations += 1;
        self.generations
    }

    /// Inserts `session`, returning the entry it replaced. The replaced
    /// session's native handle is not disposed.
    pub fn insert(&mut self, session: ConnectionSession) -> Option<ConnectionSession> {
        self.sessions.insert(session.handle, session)
    }

    pub fn get(&self, handle: &HandleId) -> Option<&ConnectionSession> {
        self.sessions.get(handle)
    }

    pub fn get_mut(&mut self, handle: &HandleId) -> Option<&mut ConnectionSession> {
        self.sessions.get_mut(handle)
    }

    pub fn values(&self) -> impl Iterator<Item = &ConnectionSession> {
        self.sessions.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut ConnectionSession> {
        self.sessions.values_mut()
    }

    pub fn drain(&mut self) -> Vec<ConnectionSession> {
        self.sessions.drain().map(|(_, s)| s).collect()
    }

    pub fn handles(&self) -> Vec<HandleId> {
        let mut handles: Vec<_> = self.sessions.keys().copied().collect();
        handles.sort();
        handles
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
