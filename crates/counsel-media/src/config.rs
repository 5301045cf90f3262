use std::time::Duration;

use counsel_shared::constants::{DEFAULT_CALL_OFFER_DELAY_MS, DEFAULT_STUN_SERVER};

/// Call negotiation settings.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// STUN servers handed to ICE. No TURN relay is configured, so calls
    /// across restrictive NATs may not connect.
    pub stun_servers: Vec<String>,
    /// Pause between seeing the peer join and sending the offer, so the
    /// peer's connection object exists by the time the offer lands.
    pub offer_delay: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            offer_delay: Duration::from_millis(DEFAULT_CALL_OFFER_DELAY_MS),
        }
    }
}
