//! Environment-driven configuration.
//!
//! Everything is read once at startup. Defaults match the public ESI
//! deployment; every knob can be overridden with an environment variable so
//! the service runs unchanged in docker, CI, and local development.

use std::env;

const DEFAULT_ESI_BASE_URL: &str = "https://esi.evetech.net";
const DEFAULT_USER_AGENT: &str = "eve-marketwatch";

/// Default id of the persistent wormhole region that carries a real market.
/// Transient wormhole regions above the regular id space are skipped.
const DEFAULT_WORMHOLE_REGION_ID: i32 = 11_000_031;

/// Upstream (ESI) client settings.
#[derive(Debug, Clone)]
pub struct EsiConfig {
    /// Base URL of the upstream API. Tests point this at a local mock.
    pub base_url: String,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Process-wide cap on in-flight upstream requests.
    pub max_concurrent_requests: usize,
    /// SSO refresh token. Empty disables authenticated polling.
    pub refresh_token: String,
    /// SSO client id for the token store.
    pub client_id: String,
    /// SSO client secret for the token store.
    pub client_secret: String,
}

impl EsiConfig {
    /// True when a complete authenticated identity is configured.
    pub fn authenticated(&self) -> bool {
        !self.refresh_token.trim().is_empty()
            && !self.client_id.trim().is_empty()
            && !self.client_secret.trim().is_empty()
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub esi: EsiConfig,
    /// Port for the websocket listener.
    pub ws_port: u16,
    /// Port for the prometheus metrics listener.
    pub metrics_port: u16,
    /// Bounded send-queue capacity per websocket client.
    pub client_queue_size: usize,
    /// Region id of the one wormhole region that is still polled.
    pub wormhole_region_id: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            esi: EsiConfig {
                base_url: DEFAULT_ESI_BASE_URL.to_string(),
                user_agent: DEFAULT_USER_AGENT.to_string(),
                max_concurrent_requests: 100,
                refresh_token: String::new(),
                client_id: String::new(),
                client_secret: String::new(),
            },
            ws_port: 3005,
            metrics_port: 3000,
            client_queue_size: 256,
            wormhole_region_id: DEFAULT_WORMHOLE_REGION_ID,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("ESI_BASE_URL") {
            if !v.trim().is_empty() {
                cfg.esi.base_url = v;
            }
        }
        if let Ok(v) = env::var("ESI_USER_AGENT") {
            if !v.trim().is_empty() {
                cfg.esi.user_agent = v;
            }
        }
        cfg.esi.max_concurrent_requests = env_parse(
            "ESI_MAX_CONCURRENT_REQUESTS",
            cfg.esi.max_concurrent_requests,
        );
        cfg.esi.refresh_token = env::var("ESI_REFRESHKEY").unwrap_or_default();
        cfg.esi.client_id = env::var("ESI_CLIENTID_TOKENSTORE").unwrap_or_default();
        cfg.esi.client_secret = env::var("ESI_SECRET_TOKENSTORE").unwrap_or_default();

        cfg.ws_port = env_parse("WS_PORT", cfg.ws_port);
        cfg.metrics_port = env_parse("METRICS_PORT", cfg.metrics_port);
        cfg.client_queue_size = env_parse("CLIENT_QUEUE_SIZE", cfg.client_queue_size);
        cfg.wormhole_region_id = env_parse("WORMHOLE_REGION_ID", cfg.wormhole_region_id);

        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.ws_port, 3005);
        assert_eq!(cfg.metrics_port, 3000);
        assert_eq!(cfg.client_queue_size, 256);
        assert_eq!(cfg.wormhole_region_id, 11_000_031);
        assert!(!cfg.esi.authenticated());
    }

    #[test]
    fn authenticated_requires_all_three_secrets() {
        let mut esi = Config::default().esi;
        esi.refresh_token = "refresh".to_string();
        esi.client_id = "client".to_string();
        assert!(!esi.authenticated());
        esi.client_secret = "secret".to_string();
        assert!(esi.authenticated());
    }
}
