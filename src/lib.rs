//! Session registry and offer/answer orchestration for a Janus video room
//! client.
//!
//! A [`PeerConnectionClient`] owns one executor thread that serializes every
//! operation against the media engine. Outcomes are delivered as
//! [`ClientEvent`]s through an [`EventSink`]; protocol messages for the
//! gateway can be tapped with a [`SignalingGateway`].
//!
//! The library only emits `tracing` events. Applications that want the
//! configured output call [`logger::init`] with `ClientConfig::logging`.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod logger;
pub mod peer;
pub mod signaling;
pub mod utils;

pub use client::PeerConnectionClient;
pub use config::{ClientConfig, FailurePolicy, MediaConfig};
pub use error::{ClientError, EngineError};
pub use events::{ClientEvent, EventSink};
pub use peer::{HandleId, IceCandidate, Role, SdpType, SessionDescription};
pub use signaling::{InboundMessage, OutboundMessage, SignalingGateway};
