//! Per-session offer/answer state machine.
//!
//! Completion is not a fixed number of steps: when one side's description
//! becomes set, the machine looks at which of {local, remote} is already
//! present and decides whether the role has something to announce.
//!
//! * Initiator: the local offer is announced when it is applied while no
//!   remote description exists yet. Applying the remote answer afterwards
//!   announces nothing.
//! * Responder: the local answer is announced once it is applied on top of
//!   the already-applied remote offer.

use crate::error::EngineError;
use crate::peer::types::{Role, SdpType, SessionDescription};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationState {
    Idle,
    DescriptionRequested,
    DescriptionCreated,
    LocalDescriptionApplying,
    /// Local side done, remote side not applied yet.
    LocalDescriptionApplied,
    Negotiated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionSide {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    Create,
    Apply,
}

/// Something the application has to forward to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationSignal {
    OfferReady(SessionDescription),
    AnswerReady(SessionDescription),
}

#[derive(Debug, Clone)]
pub struct Negotiation {
    role: Role,
    state: NegotiationState,
    requested: Option<SdpType>,
    local: Option<SessionDescription>,
    local_applied: bool,
    remote_applying: bool,
    remote_applied: bool,
}

impl Negotiation {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: NegotiationState::Idle,
            requested: None,
            local: None,
            local_applied: false,
            remote_applying: false,
            remote_applied: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local.as_ref()
    }

    pub fn has_local_description(&self) -> bool {
        self.local_applied
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_applied
    }

    pub fn is_remote_applying(&self) -> bool {
        self.remote_applying
    }

    pub fn requested(&self) -> Option<SdpType> {
        self.requested
    }

    /// A description of `kind` has been requested from the engine.
    pub fn request_description(&mut self, kind: SdpType) {
        self.requested = Some(kind);
        self.state = NegotiationState::DescriptionRequested;
    }

    /// Caches the generated description and returns it for local application.
    /// The local apply step is never skipped.
    pub fn description_created(&mut self, sdp: SessionDescription) -> SessionDescription {
        self.state = NegotiationState::DescriptionCreated;
        self.local = Some(sdp.clone());
        self.state = NegotiationState::LocalDescriptionApplying;
        sdp
    }

    pub fn remote_applying(&mut self) {
        self.remote_applying = true;
    }

    /// Records a successful apply and returns what, if anything, is ready to
    /// be announced.
    pub fn description_applied(&mut self, side: DescriptionSide) -> Option<NegotiationSignal> {
        match side {
            DescriptionSide::Local => self.local_applied = true,
            DescriptionSide::Remote => {
                self.remote_applying = false;
                self.remote_applied = true;
            }
        }

        if self.local_applied && self.remote_applied {
            self.state = NegotiationState::Negotiated;
        } else if self.local_applied {
            self.state = NegotiationState::LocalDescriptionApplied;
        }

        let local = self.local.clone()?;
        match self.role {
            Role::Initiator if !self.remote_applied => Some(NegotiationSignal::OfferReady(local)),
            Role::Responder if self.local_applied => Some(NegotiationSignal::AnswerReady(local)),
            _ => None,
        }
    }

    pub fn fail(&mut self) {
        self.state = NegotiationState::Failed;
    }
}

/// Message reported on the shared error path.
pub fn failure_message(phase: FailurePhase, err: &EngineError) -> String {
    match phase {
        FailurePhase::Create => format!("createSDP error: {err}"),
        FailurePhase::Apply => format!("setSDP error: {err}"),
    }
}

/// Adds `maxaveragebitrate` to the fmtp line of `codec` (creating the line
/// when the codec has none). Descriptions without the codec, or with a
/// bitrate already set, come back unchanged.
pub fn with_audio_start_bitrate(sdp: &str, codec: &str, kbps: u32) -> String {
    let newline = if sdp.contains("\r\n") { "\r\n" } else { "\n" };
    let lines: Vec<&str> = sdp.split(newline).collect();

    let rtpmap_prefix = "a=rtpmap:";
    let Some((rtpmap_index, payload_type)) = lines.iter().enumerate().find_map(|(i, line)| {
        let rest = line.strip_prefix(rtpmap_prefix)?;
        let (pt, encoding) = rest.split_once(' ')?;
        let name = encoding.split('/').next()?;
        name.eq_ignore_ascii_case(codec).then(|| (i, pt.to_string()))
    }) else {
        debug!("no {codec} payload in description, bitrate left unset");
        return sdp.to_string();
    };

    let bitrate = format!("maxaveragebitrate={}", u64::from(kbps) * 1000);
    let fmtp_prefix = format!("a=fmtp:{payload_type} ");
    let mut out: Vec<String> = lines.iter().map(|line| line.to_string()).collect();
    match out.iter().position(|line| line.starts_with(&fmtp_prefix)) {
        Some(i) if out[i].contains("maxaveragebitrate=") => return sdp.to_string(),
        Some(i) => out[i] = format!("{}; {bitrate}", out[i]),
        None => out.insert(rtpmap_index + 1, format!("{fmtp_prefix}{bitrate}")),
    }
    debug!("{codec} start bitrate set to {kbps} kbps");
    out.join(newline)
}
