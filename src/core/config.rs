use std::path::Path;

use serde::Deserialize;

use super::AppCore;

const DEFAULT_API_BASE_URL: &str = "http://localhost/api";
const DEFAULT_WS_BASE_URL: &str = "ws://localhost/ws";

/// Fixed intervals from the baseline design: reconnect retries and
/// notification lifetime are both five seconds.
pub(super) const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
pub(super) const DEFAULT_NOTIFICATION_TTL_MS: u64 = 5_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(super) struct AppConfig {
    pub(super) disable_network: Option<bool>,
    pub(super) api_base_url: Option<String>,
    pub(super) ws_base_url: Option<String>,
    // Test knobs: shorten the fixed intervals without changing semantics.
    pub(super) reconnect_delay_ms: Option<u64>,
    pub(super) notification_ttl_ms: Option<u64>,
}

pub(super) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join("cipherchat_config.json");
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    serde_json::from_slice::<AppConfig>(&bytes).unwrap_or_default()
}

impl AppCore {
    pub(super) fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.config.disable_network {
            return !disable;
        }
        std::env::var("CIPHERCHAT_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }

    pub(super) fn api_base_url(&self) -> String {
        self.config
            .api_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    /// Live channel endpoint is peer-scoped: `<ws_base>/<identity_id>`.
    pub(super) fn ws_endpoint(&self, identity_id: crate::state::UserId) -> String {
        let base = self
            .config
            .ws_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_WS_BASE_URL.to_string());
        format!("{}/{identity_id}", base.trim_end_matches('/'))
    }

    pub(super) fn reconnect_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(
            self.config
                .reconnect_delay_ms
                .unwrap_or(DEFAULT_RECONNECT_DELAY_MS),
        )
    }

    pub(super) fn notification_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_millis(
            self.config
                .notification_ttl_ms
                .unwrap_or(DEFAULT_NOTIFICATION_TTL_MS),
        )
    }
}
