use crate::config::{IceServerConfig, IceServerType};
use rand::Rng;

/// Random hex id for signaling transactions.
pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Prefixes the ICE server URL with a scheme if it has none
pub fn add_ice_url_scheme(config: &IceServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
    {
        config.url.clone()
    } else {
        let scheme = match config.r#type {
            IceServerType::Turn => "turn:",
            IceServerType::Stun => "stun:",
        };
        format!("{}{}", scheme, config.url)
    }
}
