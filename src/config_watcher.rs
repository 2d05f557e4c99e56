//! Counterparty credential hot-reload
//!
//! Periodically re-reads the config file and `INTERBANK_COUNTERPARTY_TOKEN`
//! and swaps the gateway's bearer credential when it changed. A file that
//! can't be read or fails validation never replaces the current credential.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, COUNTERPARTY_TOKEN_ENV};
use crate::interbank::HttpGateway;

/// Configuration reload result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigReloadResult {
    /// Credential unchanged
    Unchanged,
    /// New credential in use
    Rotated,
    /// Config file read failed, keeping old credential
    ReadError(String),
    /// Config validation failed, keeping old credential
    ValidationError(String),
}

/// Re-read the config once and rotate the credential if it changed
pub fn reload_credential(
    config_path: &Path,
    token_override: Option<String>,
    gateway: &HttpGateway,
) -> ConfigReloadResult {
    let content = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(e) => {
            tracing::error!(
                target: "CONFIG",
                path = %config_path.display(),
                "Failed to reload config: {}, keeping current credential",
                e
            );
            return ConfigReloadResult::ReadError(e.to_string());
        }
    };

    let config = match AppConfig::from_yaml(&content, token_override) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(
                target: "CONFIG",
                path = %config_path.display(),
                "Invalid config: {:#}, keeping current credential",
                e
            );
            return ConfigReloadResult::ValidationError(format!("{:#}", e));
        }
    };

    let token = config.interbank.counterparty.api_token;
    if *gateway.credential() == token {
        return ConfigReloadResult::Unchanged;
    }
    if token.is_empty() {
        tracing::error!(target: "CONFIG", "Counterparty credential removed from config, keeping current one");
        return ConfigReloadResult::ValidationError("empty counterparty credential".to_string());
    }

    gateway.rotate_credential(token);
    tracing::info!(target: "CONFIG", "Counterparty credential reloaded");
    ConfigReloadResult::Rotated
}

/// Background credential watcher
pub async fn config_watcher(
    config_path: PathBuf,
    gateway: Arc<HttpGateway>,
    check_interval: Duration,
) {
    loop {
        tokio::time::sleep(check_interval).await;
        let token = std::env::var(COUNTERPARTY_TOKEN_ENV).ok();
        reload_credential(&config_path, token, &gateway);
    }
}
