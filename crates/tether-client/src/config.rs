//! Client configuration.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the Tether client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TetherConfig {
    /// Gateway WebSocket URL.
    pub gateway_url: String,
    /// Bearer token for the handshake.
    pub token: Option<String>,
    /// Whether the CLI fallback transport may be used.
    pub fallback_enabled: bool,
    /// Explicit path to the fallback executable; when unset the standard
    /// install locations are scanned.
    pub cli_path: Option<PathBuf>,
    /// Maximum concurrently open chat surfaces.
    pub pool_capacity: usize,
    /// RPC timeout in seconds.
    pub request_timeout_secs: u64,
    /// Connect handshake timeout in seconds.
    pub handshake_timeout_secs: u64,
    /// Chat run idle timeout in seconds.
    pub idle_timeout_secs: u64,
    /// Minimum log level when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            gateway_url: "ws://127.0.0.1:8787/gateway".into(),
            token: None,
            fallback_enabled: true,
            cli_path: None,
            pool_capacity: tether_chat::DEFAULT_POOL_CAPACITY,
            request_timeout_secs: 60,
            handshake_timeout_secs: 10,
            idle_timeout_secs: 10 * 60,
            log_level: "warn".into(),
        }
    }
}

impl TetherConfig {
    /// Defaults overlaid with `TETHER_*` environment variables.
    pub fn from_env() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::default().overlay(&vars)
    }

    fn overlay(mut self, vars: &HashMap<String, String>) -> Self {
        if let Some(url) = vars.get("TETHER_GATEWAY_URL") {
            self.gateway_url = url.clone();
        }
        if let Some(token) = vars.get("TETHER_TOKEN") {
            self.token = Some(token.clone());
        }
        if let Some(raw) = vars.get("TETHER_FALLBACK") {
            self.fallback_enabled = !matches!(raw.as_str(), "0" | "false" | "off");
        }
        if let Some(path) = vars.get("TETHER_CLI_PATH") {
            self.cli_path = Some(PathBuf::from(path));
        }
        overlay_number(vars, "TETHER_POOL_CAPACITY", &mut self.pool_capacity);
        overlay_number(vars, "TETHER_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
        overlay_number(vars, "TETHER_HANDSHAKE_TIMEOUT_SECS", &mut self.handshake_timeout_secs);
        overlay_number(vars, "TETHER_IDLE_TIMEOUT_SECS", &mut self.idle_timeout_secs);
        if let Some(level) = vars.get("TETHER_LOG") {
            self.log_level = level.clone();
        }
        self
    }
}

/// Unparseable values keep the default rather than failing startup.
fn overlay_number<T: std::str::FromStr>(vars: &HashMap<String, String>, key: &str, slot: &mut T) {
    if let Some(parsed) = vars.get(key).and_then(|raw| raw.parse().ok()) {
        *slot = parsed;
    }
}
