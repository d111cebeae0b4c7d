//! Configuration loading and validation — `config.toml` plus environment
//! overrides, validated eagerly so a bad deployment fails at startup
//! instead of partway through the first connection.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Load `config.toml` at `path`, apply environment overrides already
/// populated via `.env` (see [`dotenvy`] in `main`), and validate the
/// result.
pub fn load_config(path: &str) -> Result<AppConfig> {
    let path = Path::new(path);

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let mut config: AppConfig =
        toml::from_str(&content).with_context(|| "failed to parse config.toml")?;

    apply_env_overrides(&mut config);
    validate_config(&config)?;

    info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        forward_enabled = config.forward_enabled,
        web_enabled = config.web_enabled,
        "configuration loaded"
    );

    Ok(config)
}

/// `.env`/process environment variables take precedence over the file,
/// named identically to their config keys, upper-cased.
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = std::env::var("API_URL") {
        config.api_url = v;
    }
    if let Ok(v) = std::env::var("WS_URL") {
        config.ws_url = v;
    }
    if let Ok(v) = std::env::var("DB_PATH") {
        config.db_path = v;
    }
    if let Ok(v) = std::env::var("LOG_LEVEL") {
        config.log_level = v;
    }
    if let Ok(v) = std::env::var("FORWARD_ENABLED").and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent)) {
        config.forward_enabled = v;
    }
    if let Ok(v) = std::env::var("WEB_ENABLED").and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent)) {
        config.web_enabled = v;
    }
}

fn validate_config(config: &AppConfig) -> Result<()> {
    anyhow::ensure!(!config.api_url.is_empty(), "api_url must not be empty");
    anyhow::ensure!(!config.ws_url.is_empty(), "ws_url must not be empty");
    anyhow::ensure!(!config.db_path.is_empty(), "db_path must not be empty");

    anyhow::ensure!(config.http_timeout > 0, "http_timeout must be positive");
    anyhow::ensure!(config.http_rps > 0, "http_rps must be positive");
    anyhow::ensure!(config.ws_heartbeat_sec > 0, "ws_heartbeat_sec must be positive");
    anyhow::ensure!(config.ws_reconnect_sec > 0, "ws_reconnect_sec must be positive");
    anyhow::ensure!(config.scan_interval_sec > 0, "scan_interval_sec must be positive");

    if config.forward_enabled {
        anyhow::ensure!(!config.forward_host.is_empty(), "forward_host must not be empty when forward_enabled");
        anyhow::ensure!(config.forward_port > 0, "forward_port must be nonzero when forward_enabled");
    }
    if config.web_enabled {
        anyhow::ensure!(!config.web_host.is_empty(), "web_host must not be empty when web_enabled");
        anyhow::ensure!(config.web_port > 0, "web_port must be nonzero when web_enabled");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_nonexistent_file_errors() {
        let result = load_config("nonexistent.toml");
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_empty_api_url() {
        let config = AppConfig {
            api_url: String::new(),
            ws_url: "wss://example".into(),
            db_path: "relay.db".into(),
            http_timeout: 30,
            http_rps: 10,
            ws_heartbeat_sec: 15,
            ws_reconnect_sec: 5,
            forward_enabled: false,
            forward_host: String::new(),
            forward_port: 0,
            web_enabled: false,
            web_host: String::new(),
            web_port: 0,
            scan_interval_sec: 300,
            category: None,
            log_level: "info".into(),
            sequencer_accept_gaps: true,
            subscribe_url: None,
        };
        assert!(validate_config(&config).is_err());
    }
}
