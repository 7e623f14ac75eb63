//! Gateway configuration surface (design §6 "Configuration surface").
//!
//! Backend selection and credentials live outside this struct — the core only accepts
//! an already-constructed [`crate::adapter::AgentHandler`] from the caller (`cli`).

use std::env;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub hostname: String,
    pub auth_token: Option<String>,
    pub auth_password: Option<String>,
    pub tick_interval_ms: u64,
    pub health_refresh_interval_ms: u64,
    pub max_payload: usize,
    pub handshake_timeout_ms: u64,
    pub dedupe_max_keys: usize,
    pub dedupe_ttl_ms: u64,
    pub log_dir: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8765,
            hostname: "127.0.0.1".to_string(),
            auth_token: None,
            auth_password: None,
            tick_interval_ms: 30_000,
            health_refresh_interval_ms: 60_000,
            max_payload: 25 * 1024 * 1024,
            handshake_timeout_ms: 10_000,
            dedupe_max_keys: 1000,
            dedupe_ttl_ms: 5 * 60 * 1000,
            log_dir: None,
        }
    }
}

impl GatewayConfig {
    /// Overlays `GATEWAY_*` environment variables onto the defaults. Called after
    /// `config::load_and_apply` has merged `.env`/XDG config into the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = env::var("GATEWAY_PORT") {
            if let Ok(port) = v.parse() {
                cfg.port = port;
            }
        }
        if let Ok(v) = env::var("GATEWAY_HOSTNAME") {
            cfg.hostname = v;
        }
        if let Ok(v) = env::var("GATEWAY_AUTH_TOKEN") {
            cfg.auth_token = Some(v);
        }
        if let Ok(v) = env::var("GATEWAY_AUTH_PASSWORD") {
            cfg.auth_password = Some(v);
        }
        if let Ok(v) = env::var("GATEWAY_TICK_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                cfg.tick_interval_ms = n;
            }
        }
        if let Ok(v) = env::var("GATEWAY_HEALTH_REFRESH_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                cfg.health_refresh_interval_ms = n;
            }
        }
        if let Ok(v) = env::var("GATEWAY_MAX_PAYLOAD") {
            if let Ok(n) = v.parse() {
                cfg.max_payload = n;
            }
        }
        if let Ok(v) = env::var("GATEWAY_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                cfg.handshake_timeout_ms = n;
            }
        }
        if let Ok(v) = env::var("GATEWAY_DEDUPE_MAX_KEYS") {
            if let Ok(n) = v.parse() {
                cfg.dedupe_max_keys = n;
            }
        }
        if let Ok(v) = env::var("GATEWAY_DEDUPE_TTL_MS") {
            if let Ok(n) = v.parse() {
                cfg.dedupe_ttl_ms = n;
            }
        }
        if let Ok(v) = env::var("GATEWAY_LOG_DIR") {
            cfg.log_dir = Some(v);
        }
        cfg
    }

    /// The subset of config surfaced by `config.get` — secrets (`auth_token`,
    /// `auth_password`) are never returned.
    pub fn public_view(&self) -> serde_json::Value {
        serde_json::json!({
            "port": self.port,
            "hostname": self.hostname,
            "tickIntervalMs": self.tick_interval_ms,
            "healthRefreshIntervalMs": self.health_refresh_interval_ms,
            "maxPayload": self.max_payload,
            "handshakeTimeoutMs": self.handshake_timeout_ms,
            "dedupeMaxKeys": self.dedupe_max_keys,
            "dedupeTtlMs": self.dedupe_ttl_ms,
            "logDir": self.log_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_view_omits_secrets() {
        let mut cfg = GatewayConfig::default();
        cfg.auth_token = Some("secret".to_string());
        let v = cfg.public_view();
        assert!(v.get("authToken").is_none());
        assert!(v.get("auth_token").is_none());
        assert_eq!(v["port"], 8765);
    }
}
