use crate::config::LoggingConfig;
use crate::error::ClientError;
use crate::peer::types::{HandleId, IceCandidate, StatsReport};
use tracing::{debug, info};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Installs the global `tracing` subscriber.
///
/// A disabled config installs nothing. `RUST_LOG` takes precedence over the
/// configured filter when set.
pub fn init(config: &LoggingConfig) -> Result<(), ClientError> {
    if !config.enabled {
        return Ok(());
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_target(true)
        .try_init()
        .map_err(|_| ClientError::Logger)
}

/// Logs a trickled candidate as it appears
pub fn dump_candidate(label: &str, handle: HandleId, cand: &IceCandidate) {
    debug!(
        "Trickle {label} [{handle}]: candidate={} sdp_mid={:?} sdp_mline_index={:?} type={}",
        cand.candidate,
        cand.sdp_mid,
        cand.sdp_mline_index,
        cand.kind()
    );
}

/// Quick summary of a stats snapshot: the nominated pair, if any
pub fn dump_stats(handle: HandleId, report: &StatsReport) {
    match report.nominated_pair() {
        Some(pair) => info!(
            "STATS [{handle}]: {}:{} bytes={}/{} state={}",
            pair.local_candidate_id,
            pair.remote_candidate_id,
            pair.bytes_sent,
            pair.bytes_received,
            pair.state
        ),
        None => debug!(
            "STATS [{handle}]: {} entries, no nominated pair",
            report.entry_count
        ),
    }
}
