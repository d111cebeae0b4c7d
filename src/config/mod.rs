//! Configuration — TOML file with `.env` overrides.
//!
//! Loaded and validated once at startup by [`loader::load_config`].
//! Every externally reachable endpoint, port, and timeout lives here —
//! nothing in `core`/`adapters` hardcodes a host, port, or interval.

pub mod loader;

use serde::Deserialize;

/// Top-level relay configuration, loaded from `config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Polymarket Gamma-style REST API base URL.
    pub api_url: String,
    /// Upstream market-data WebSocket URL.
    pub ws_url: String,
    /// SQLite database file path.
    pub db_path: String,
    /// REST request timeout, in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout: u64,
    /// REST client rate limit, in requests per second.
    #[serde(default = "default_http_rps")]
    pub http_rps: u32,
    /// Upstream heartbeat interval, in seconds.
    #[serde(default = "default_heartbeat")]
    pub ws_heartbeat_sec: u64,
    /// Initial upstream reconnect backoff, in seconds (doubles up to 60s).
    #[serde(default = "default_reconnect")]
    pub ws_reconnect_sec: u64,
    /// Whether the downstream relay server is started.
    #[serde(default)]
    pub forward_enabled: bool,
    /// Relay server bind host.
    #[serde(default = "default_forward_host")]
    pub forward_host: String,
    /// Relay server bind port.
    #[serde(default = "default_forward_port")]
    pub forward_port: u16,
    /// Whether the health/monitoring HTTP endpoint is started.
    #[serde(default)]
    pub web_enabled: bool,
    /// Health endpoint bind host.
    #[serde(default = "default_web_host")]
    pub web_host: String,
    /// Health endpoint bind port.
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    /// Periodic market-scan interval, in seconds.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_sec: u64,
    /// Category filter applied to scans and catalog queries (`None` = all).
    #[serde(default)]
    pub category: Option<String>,
    /// Tracing env-filter directive, e.g. `"info"` or `"polymarket_relay=debug"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Whether a detected sequence gap is applied anyway (`true`, default)
    /// or dropped until the next snapshot (`false`).
    #[serde(default = "default_true")]
    pub sequencer_accept_gaps: bool,
    /// A Polymarket URL or bare slug to resolve and subscribe to at
    /// startup, in addition to whatever the scanner discovers (`None` =
    /// rely on the scanner alone).
    #[serde(default)]
    pub subscribe_url: Option<String>,
}

fn default_http_timeout() -> u64 {
    30
}

fn default_http_rps() -> u32 {
    10
}

fn default_heartbeat() -> u64 {
    15
}

fn default_reconnect() -> u64 {
    5
}

fn default_forward_host() -> String {
    "0.0.0.0".to_string()
}

fn default_forward_port() -> u16 {
    8765
}

fn default_web_host() -> String {
    "0.0.0.0".to_string()
}

fn default_web_port() -> u16 {
    8080
}

fn default_scan_interval() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
