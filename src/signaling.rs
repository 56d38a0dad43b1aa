//! Janus protocol messages exchanged with the signaling gateway.
//!
//! Only the negotiation-relevant subset lives here: publishing offers,
//! subscriber answers and trickled candidates. Session keepalives, plugin
//! attach and room membership are the transport's business.

use crate::client::PeerConnectionClient;
use crate::error::{ClientError, SignalingError};
use crate::events::ClientEvent;
use crate::peer::types::{HandleId, IceCandidate, SdpType, SessionDescription};
use crate::utils::random_id;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

/// Receives outbound messages from the executor. Implementations should
/// hand the message off (e.g. to a websocket writer) and return quickly.
pub trait SignalingGateway: Send + Sync {
    fn send(&self, message: OutboundMessage) -> Result<(), SignalingError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    LocalOffer { handle: HandleId, sdp: SessionDescription },
    LocalAnswer { handle: HandleId, sdp: SessionDescription },
    Candidate { handle: HandleId, candidate: IceCandidate },
    CandidatesComplete { handle: HandleId },
}

impl OutboundMessage {
    /// Picks the events that have to go out to the gateway.
    pub fn from_event(event: &ClientEvent) -> Option<Self> {
        match event {
            ClientEvent::OfferReady { handle, sdp } => Some(OutboundMessage::LocalOffer {
                handle: *handle,
                sdp: sdp.clone(),
            }),
            ClientEvent::AnswerReady { handle, sdp } => Some(OutboundMessage::LocalAnswer {
                handle: *handle,
                sdp: sdp.clone(),
            }),
            ClientEvent::IceCandidate { handle, candidate } => Some(OutboundMessage::Candidate {
                handle: *handle,
                candidate: candidate.clone(),
            }),
            ClientEvent::IceGatheringComplete { handle } => {
                Some(OutboundMessage::CandidatesComplete { handle: *handle })
            }
            _ => None,
        }
    }

    pub fn handle(&self) -> HandleId {
        match self {
            OutboundMessage::LocalOffer { handle, .. }
            | OutboundMessage::LocalAnswer { handle, .. }
            | OutboundMessage::Candidate { handle, .. }
            | OutboundMessage::CandidatesComplete { handle } => *handle,
        }
    }

    /// Wire form for the given gateway session.
    pub fn to_janus(&self, session_id: u64) -> JanusRequest {
        let mut request = JanusRequest {
            janus: "message".into(),
            transaction: random_id(),
            session_id,
            handle_id: self.handle(),
            body: None,
            jsep: None,
            candidate: None,
        };
        match self {
            OutboundMessage::LocalOffer { sdp, .. } => {
                request.body = Some(json!({"request": "configure", "audio": true, "video": true}));
                request.jsep = Some(sdp.clone());
            }
            OutboundMessage::LocalAnswer { sdp, .. } => {
                request.body = Some(json!({"request": "start"}));
                request.jsep = Some(sdp.clone());
            }
            OutboundMessage::Candidate { candidate, .. } => {
                request.janus = "trickle".into();
                request.candidate = Some(TrickleCandidate::Candidate(candidate.clone()));
            }
            OutboundMessage::CandidatesComplete { .. } => {
                request.janus = "trickle".into();
                request.candidate = Some(TrickleCandidate::Completed { completed: true });
            }
        }
        request
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JanusRequest {
    pub janus: String,
    pub transaction: String,
    pub session_id: u64,
    pub handle_id: HandleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsep: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<TrickleCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrickleCandidate {
    Completed { completed: bool },
    Candidate(IceCandidate),
}

/// Negotiation messages received from the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    RemoteOffer { handle: HandleId, sdp: SessionDescription },
    RemoteAnswer { handle: HandleId, sdp: SessionDescription },
    /// `None` once the remote side finished gathering.
    RemoteCandidate { handle: HandleId, candidate: Option<IceCandidate> },
}

#[derive(Debug, Deserialize)]
struct JanusIncoming {
    janus: String,
    #[serde(default)]
    sender: Option<HandleId>,
    #[serde(default)]
    jsep: Option<SessionDescription>,
    #[serde(default)]
    candidate: Option<TrickleCandidate>,
}

impl InboundMessage {
    /// Parses a gateway message. Messages that carry nothing for the
    /// negotiation layer (acks, keepalives, plain plugin events) yield `None`.
    pub fn parse(raw: &str) -> Result<Option<Self>, SignalingError> {
        let msg: JanusIncoming = serde_json::from_str(raw)?;
        match msg.janus.as_str() {
            "event" => {
                let Some(sdp) = msg.jsep else {
                    return Ok(None);
                };
                let handle = msg
                    .sender
                    .ok_or_else(|| SignalingError::Unexpected("jsep without sender".into()))?;
                match sdp.sdp_type {
                    SdpType::Offer => Ok(Some(InboundMessage::RemoteOffer { handle, sdp })),
                    SdpType::Answer => Ok(Some(InboundMessage::RemoteAnswer { handle, sdp })),
                    other => Err(SignalingError::Unexpected(format!("jsep type {other}"))),
                }
            }
            "trickle" => {
                let handle = msg
                    .sender
                    .ok_or_else(|| SignalingError::Unexpected("trickle without sender".into()))?;
                let candidate = match msg.candidate {
                    Some(TrickleCandidate::Candidate(c)) => Some(c),
                    Some(TrickleCandidate::Completed { .. }) => None,
                    None => {
                        return Err(SignalingError::Unexpected(
                            "trickle without candidate".into(),
                        ))
                    }
                };
                Ok(Some(InboundMessage::RemoteCandidate { handle, candidate }))
            }
            _ => Ok(None),
        }
    }
}

/// Feeds an inbound message into the client.
pub fn route_inbound(
    client: &PeerConnectionClient,
    message: InboundMessage,
) -> Result<(), ClientError> {
    match message {
        InboundMessage::RemoteOffer { handle, sdp } => client.accept_responder_offer(handle, sdp),
        InboundMessage::RemoteAnswer { handle, sdp } => client.set_remote_description(handle, sdp),
        InboundMessage::RemoteCandidate {
            handle,
            candidate: Some(candidate),
        } => client.add_remote_candidate(handle, candidate),
        InboundMessage::RemoteCandidate { handle, candidate: None } => {
            debug!("[{handle}] remote candidate gathering completed");
            Ok(())
        }
    }
}

/// Gateway that serializes outbound messages to Janus JSON text and hands
/// them to a channel drained by the websocket writer.
pub struct ChannelGateway {
    session_id: u64,
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelGateway {
    pub fn new(session_id: u64) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { session_id, tx }, rx)
    }
}

impl SignalingGateway for ChannelGateway {
    fn send(&self, message: OutboundMessage) -> Result<(), SignalingError> {
        let text = serde_json::to_string(&message.to_janus(self.session_id))?;
        debug!("Sent: {text}");
        self.tx
            .send(text)
            .map_err(|_| SignalingError::Send("websocket writer closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_goes_out_as_configure_request() {
        let msg = OutboundMessage::LocalOffer {
            handle: HandleId(42),
            sdp: SessionDescription::offer("v=0"),
        };
        let json = serde_json::to_value(msg.to_janus(7)).unwrap();
        assert_eq!(json["janus"], "message");
        assert_eq!(json["session_id"], 7);
        assert_eq!(json["handle_id"], 42);
        assert_eq!(json["body"]["request"], "configure");
        assert_eq!(json["jsep"]["type"], "offer");
        assert_eq!(json["jsep"]["sdp"], "v=0");
        assert!(json.get("candidate").is_none());
    }

    #[test]
    fn answer_goes_out_as_start_request() {
        let msg = OutboundMessage::LocalAnswer {
            handle: HandleId(9),
            sdp: SessionDescription::answer("v=0 a"),
        };
        let json = serde_json::to_value(msg.to_janus(1)).unwrap();
        assert_eq!(json["body"]["request"], "start");
        assert_eq!(json["jsep"]["type"], "answer");
    }

    #[test]
    fn gathering_complete_is_a_completed_trickle() {
        let json = serde_json::to_value(
            OutboundMessage::CandidatesComplete { handle: HandleId(3) }.to_janus(1),
        )
        .unwrap();
        assert_eq!(json["janus"], "trickle");
        assert_eq!(json["candidate"]["completed"], true);
    }

    #[test]
    fn parses_subscriber_offer_event() {
        let raw = r#"{
            "janus": "event", "session_id": 1, "sender": 8814512,
            "plugindata": {"plugin": "janus.plugin.videoroom", "data": {"videoroom": "attached"}},
            "jsep": {"type": "offer", "sdp": "v=0 remote"}
        }"#;
        assert_eq!(
            InboundMessage::parse(raw).unwrap(),
            Some(InboundMessage::RemoteOffer {
                handle: HandleId(8814512),
                sdp: SessionDescription::offer("v=0 remote"),
            })
        );
    }

    #[test]
    fn parses_publisher_answer_and_trickle() {
        let answer = r#"{"janus":"event","sender":5,"jsep":{"type":"answer","sdp":"v=0"}}"#;
        assert!(matches!(
            InboundMessage::parse(answer).unwrap(),
            Some(InboundMessage::RemoteAnswer { handle: HandleId(5), .. })
        ));

        let done = r#"{"janus":"trickle","sender":5,"candidate":{"completed":true}}"#;
        assert_eq!(
            InboundMessage::parse(done).unwrap(),
            Some(InboundMessage::RemoteCandidate {
                handle: HandleId(5),
                candidate: None
            })
        );

        let cand = r#"{"janus":"trickle","sender":5,"candidate":{
            "candidate":"candidate:1 1 udp 1 1.1.1.1 9 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        match InboundMessage::parse(cand).unwrap() {
            Some(InboundMessage::RemoteCandidate {
                candidate: Some(c), ..
            }) => assert_eq!(c.sdp_mid.as_deref(), Some("0")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn acks_and_plain_events_are_not_negotiation() {
        assert_eq!(InboundMessage::parse(r#"{"janus":"ack","transaction":"x"}"#).unwrap(), None);
        assert_eq!(
            InboundMessage::parse(r#"{"janus":"event","sender":1,"plugindata":{}}"#).unwrap(),
            None
        );
    }

    #[test]
    fn jsep_without_sender_is_rejected() {
        let err = InboundMessage::parse(r#"{"janus":"event","jsep":{"type":"offer","sdp":""}}"#)
            .unwrap_err();
        assert!(matches!(err, SignalingError::Unexpected(_)));
    }

    #[tokio::test]
    async fn channel_gateway_serializes_to_text() {
        let (gateway, mut rx) = ChannelGateway::new(77);
        gateway
            .send(OutboundMessage::CandidatesComplete { handle: HandleId(2) })
            .unwrap();
        let text = rx.recv().await.unwrap();
        let json: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["session_id"], 77);
        assert_eq!(json["handle_id"], 2);
    }
}
