//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so a client can start against a local relay
//! and API with no configuration at all.

use std::time::Duration;

use counsel_media::CallConfig;
use counsel_net::TransportConfig;
use counsel_shared::attachment::MediaHosts;
use counsel_shared::constants::{
    DEFAULT_CALL_OFFER_DELAY_MS, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY_MS,
    DEFAULT_SEND_ERROR_WINDOW_MS,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Websocket endpoint of the real-time relay.
    /// Env: `COUNSEL_SOCKET_URL`
    /// Default: `ws://localhost:5000/socket`
    pub socket_url: String,

    /// Base URL of the REST backend.
    /// Env: `COUNSEL_API_URL`
    /// Default: `http://localhost:3000/api`
    pub api_url: String,

    /// Env: `COUNSEL_RECONNECT_ATTEMPTS`
    pub reconnect_attempts: u32,

    /// Env: `COUNSEL_RECONNECT_DELAY_MS`
    pub reconnect_delay: Duration,

    /// How long a send waits for a matching `chat-error`.
    /// Env: `COUNSEL_SEND_ERROR_WINDOW_MS`
    pub send_error_window: Duration,

    /// STUN servers and offer delay.
    /// Env: `COUNSEL_STUN_SERVERS` (comma separated), `COUNSEL_CALL_OFFER_DELAY_MS`
    pub call: CallConfig,

    /// Env: `COUNSEL_MEDIA_HOSTS` (comma separated)
    pub media_hosts: MediaHosts,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_url: TransportConfig::default().url,
            api_url: "http://localhost:3000/api".to_string(),
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            send_error_window: Duration::from_millis(DEFAULT_SEND_ERROR_WINDOW_MS),
            call: CallConfig {
                offer_delay: Duration::from_millis(DEFAULT_CALL_OFFER_DELAY_MS),
                ..CallConfig::default()
            },
            media_hosts: MediaHosts::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = var("COUNSEL_SOCKET_URL") {
            config.socket_url = url;
        }

        if let Some(url) = var("COUNSEL_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }

        if let Some(n) = parse_var(&var, "COUNSEL_RECONNECT_ATTEMPTS") {
            config.reconnect_attempts = n;
        }

        if let Some(ms) = parse_var(&var, "COUNSEL_RECONNECT_DELAY_MS") {
            config.reconnect_delay = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var(&var, "COUNSEL_SEND_ERROR_WINDOW_MS") {
            config.send_error_window = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var(&var, "COUNSEL_CALL_OFFER_DELAY_MS") {
            config.call.offer_delay = Duration::from_millis(ms);
        }

        if let Some(servers) = var("COUNSEL_STUN_SERVERS") {
            let servers = split_list(&servers);
            if servers.is_empty() {
                tracing::warn!("Empty COUNSEL_STUN_SERVERS, using default");
            } else {
                config.call.stun_servers = servers;
            }
        }

        if let Some(hosts) = var("COUNSEL_MEDIA_HOSTS") {
            config.media_hosts = MediaHosts::new(split_list(&hosts));
        }

        config
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            url: self.socket_url.clone(),
            reconnect_attempts: self.reconnect_attempts,
            reconnect_delay: self.reconnect_delay,
            ..TransportConfig::default()
        }
    }
}

fn parse_var<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = var(key)?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %value, "Invalid value, using default");
            None
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
