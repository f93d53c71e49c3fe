use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::AppCore;

pub(crate) const CONFIG_FILE_NAME: &str = "chatsite_config.json";

const DEFAULT_RECONNECT_BASE_MS: u64 = 1_000;
const DEFAULT_RECONNECT_CAP_MS: u64 = 15_000;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) disable_network: Option<bool>,
    pub(crate) api_base_url: Option<String>,
    pub(crate) ws_base_url: Option<String>,
    pub(crate) reconnect_base_ms: Option<u64>,
    pub(crate) reconnect_cap_ms: Option<u64>,
}

impl AppConfig {
    pub(crate) fn reconnect_base(&self) -> Duration {
        Duration::from_millis(
            self.reconnect_base_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_RECONNECT_BASE_MS),
        )
    }

    pub(crate) fn reconnect_cap(&self) -> Duration {
        let cap = Duration::from_millis(self.reconnect_cap_ms.unwrap_or(DEFAULT_RECONNECT_CAP_MS));
        cap.max(self.reconnect_base())
    }

    pub(crate) fn api_base_url(&self) -> Option<String> {
        non_empty(self.api_base_url.as_deref()).map(|s| s.trim_end_matches('/').to_string())
    }

    /// `ws_base_url` wins; otherwise the API origin with its scheme swapped.
    pub(crate) fn websocket_url(&self) -> Option<String> {
        if let Some(ws) = non_empty(self.ws_base_url.as_deref()) {
            return Some(with_ws_path(ws));
        }
        let api = self.api_base_url()?;
        let swapped = if let Some(rest) = api.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = api.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return None;
        };
        Some(with_ws_path(&swapped))
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn with_ws_path(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/ws") {
        base.to_string()
    } else {
        format!("{base}/ws")
    }
}

pub(crate) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    match serde_json::from_slice::<AppConfig>(&bytes) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), %e, "config unreadable, using defaults");
            AppConfig::default()
        }
    }
}

impl AppCore {
    pub(super) fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.config.disable_network {
            return !disable;
        }
        std::env::var("CHATSITE_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }
}
