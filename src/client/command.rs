use crate::config::{CaptureFormat, ClientConfig};
use crate::error::EngineError;
use crate::events::EventSink;
use crate::peer::engine::LocalMedia;
use crate::peer::negotiation::DescriptionSide;
use crate::peer::observer::ConnectionEvent;
use crate::peer::session::SessionSnapshot;
use crate::peer::types::{HandleId, IceCandidate, SessionDescription};
use std::time::Duration;
use tokio::sync::oneshot;

/// Unit of work for the executor.
///
/// Application requests, engine outcomes and observer notifications all
/// travel through the same queue, which gives them one total order.
pub(crate) enum Command {
    Initialize {
        config: Box<ClientConfig>,
        sink: EventSink,
    },
    CreateInitiator {
        handle: HandleId,
        media: LocalMedia,
    },
    CreateOffer(HandleId),
    SetRemoteDescription {
        handle: HandleId,
        sdp: SessionDescription,
    },
    AcceptOffer {
        handle: HandleId,
        sdp: SessionDescription,
    },
    AddRemoteCandidate {
        handle: HandleId,
        candidate: IceCandidate,
    },

    // engine outcomes
    DescriptionCreated {
        handle: HandleId,
        generation: u64,
        result: Result<SessionDescription, EngineError>,
    },
    DescriptionApplied {
        handle: HandleId,
        generation: u64,
        side: DescriptionSide,
        result: Result<(), EngineError>,
    },
    Connection {
        handle: HandleId,
        generation: u64,
        event: ConnectionEvent,
    },

    PollStats {
        handle: HandleId,
        period: Duration,
        enabled: bool,
    },
    FetchStats(HandleId),

    SetAudioEnabled(bool),
    SetVideoEnabled(bool),
    StopVideoSource,
    StartVideoSource,
    SwitchCamera,
    ChangeCaptureFormat(CaptureFormat),

    CloseAll {
        done: Option<oneshot::Sender<()>>,
    },
    Snapshot {
        handle: HandleId,
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
    Handles {
        reply: oneshot::Sender<Vec<HandleId>>,
    },
    Shutdown,
}
