use crate::config::{ClientConfig, IceServerConfig, IceTransportPolicy};
use crate::peer::types::{IceCandidate, IceConnectionState, IceGatheringState};
use crate::utils::add_ice_url_scheme;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;

/// Peer connection configuration for one session
pub fn rtc_config(config: &ClientConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(&config.ice_servers),
        ice_transport_policy: match config.ice_transport_policy {
            IceTransportPolicy::All => RTCIceTransportPolicy::All,
            IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
        },
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[IceServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: vec![add_ice_url_scheme(server)],
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
        })
        .collect()
}

pub fn to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: None,
    }
}

pub fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate::new(init.candidate, init.sdp_mid, init.sdp_mline_index)
}

pub fn connection_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    Some(match state {
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        RTCIceConnectionState::Unspecified => return None,
    })
}

pub fn gathering_state(state: RTCIceGathererState) -> Option<IceGatheringState> {
    match state {
        RTCIceGathererState::New => Some(IceGatheringState::New),
        RTCIceGathererState::Gathering => Some(IceGatheringState::Gathering),
        RTCIceGathererState::Complete => Some(IceGatheringState::Complete),
        _ => None,
    }
}

/// Counts candidates by type and warns when no relay path was gathered.
pub fn analyze_candidates(candidates: &[IceCandidate]) {
    let (mut host, mut srflx, mut relay) = (0, 0, 0);
    for candidate in candidates {
        match candidate.kind() {
            "host" => host += 1,
            "srflx" | "prflx" => srflx += 1,
            "relay" => relay += 1,
            _ => {}
        }
    }
    debug!("Candidate analysis: {host} host, {srflx} srflx, {relay} relay");
    if relay == 0 {
        warn!("No TURN relay candidates found, connection through NAT may fail");
    }
}
