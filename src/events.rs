use crate::peer::engine::MediaTrack;
use crate::peer::types::{HandleId, IceCandidate, SessionDescription, StatsReport};
use crate::signaling::{OutboundMessage, SignalingGateway};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Everything the client reports back to the application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Local offer created and applied; send it to the gateway.
    OfferReady { handle: HandleId, sdp: SessionDescription },
    /// Local answer applied on top of the remote offer; send it back.
    AnswerReady { handle: HandleId, sdp: SessionDescription },
    IceCandidate { handle: HandleId, candidate: IceCandidate },
    IceGatheringComplete { handle: HandleId },
    /// Not tagged with a handle.
    IceCandidatesRemoved { candidates: Vec<IceCandidate> },
    IceConnected { handle: HandleId },
    IceDisconnected { handle: HandleId },
    RemoteRender { handle: HandleId, track: Arc<dyn MediaTrack> },
    StatsReady { handle: HandleId, report: StatsReport },
    /// `handle` is `None` for engine-level failures.
    Error { handle: Option<HandleId>, message: String },
    Closed,
}

impl ClientEvent {
    pub fn handle(&self) -> Option<HandleId> {
        match self {
            ClientEvent::OfferReady { handle, .. }
            | ClientEvent::AnswerReady { handle, .. }
            | ClientEvent::IceCandidate { handle, .. }
            | ClientEvent::IceGatheringComplete { handle }
            | ClientEvent::IceConnected { handle }
            | ClientEvent::IceDisconnected { handle }
            | ClientEvent::RemoteRender { handle, .. }
            | ClientEvent::StatsReady { handle, .. } => Some(*handle),
            ClientEvent::Error { handle, .. } => *handle,
            ClientEvent::IceCandidatesRemoved { .. } | ClientEvent::Closed => None,
        }
    }
}

/// Where the executor delivers events: an application channel plus an
/// optional gateway for outbound protocol messages.
#[derive(Clone)]
pub struct EventSink {
    events: mpsc::UnboundedSender<ClientEvent>,
    gateway: Option<Arc<dyn SignalingGateway>>,
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("gateway", &self.gateway.is_some())
            .finish()
    }
}

impl EventSink {
    pub fn new(events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self { events, gateway: None }
    }

    /// Sink plus the receiving end the application drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn SignalingGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        if let Some(gateway) = &self.gateway {
            if let Some(message) = OutboundMessage::from_event(&event) {
                if let Err(e) = gateway.send(message) {
                    warn!("gateway rejected outbound message: {e}");
                }
            }
        }
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}
