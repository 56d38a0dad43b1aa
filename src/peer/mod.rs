pub mod connection;
pub mod engine;
pub mod ice;
pub mod media;
pub mod negotiation;
pub mod observer;
pub mod session;
pub mod types;

pub use engine::{
    CaptureSource, EngineFactory, LocalMedia, LocalTracks, MediaEngine, MediaTrack, NativeSession,
    RemoteStream, VideoSink,
};
pub use negotiation::NegotiationState;
pub use observer::SessionObserver;
pub use session::SessionSnapshot;
pub use types::{
    HandleId, IceCandidate, IceConnectionState, IceGatheringState, Role, SdpType,
    SessionDescription, StatsReport, TrackKind, VideoFrame,
};
