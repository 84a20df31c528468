use crate::paths::AppPaths;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 25;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_HTML_BYTES: u64 = 4 * 1024 * 1024;
const MIN_MAX_HTML_BYTES: u64 = 64 * 1024;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 10 * 60;
const DEFAULT_RENDER_POLL_INTERVAL_MS: u64 = 500;
const MAX_RENDER_POLL_INTERVAL_MS: u64 = 5_000;
const MAX_CHAPTER_DELAY_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub max_html_bytes: u64,
    /// Upper bound for one Render Bridge load, polling included.
    pub render_timeout_secs: u64,
    pub render_poll_interval_ms: u64,
    pub chapter_delay_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_html_bytes: DEFAULT_MAX_HTML_BYTES,
            render_timeout_secs: DEFAULT_RENDER_TIMEOUT_SECS,
            render_poll_interval_ms: DEFAULT_RENDER_POLL_INTERVAL_MS,
            chapter_delay_ms: 0,
        }
    }
}

impl ResolverConfig {
    pub fn clamped(mut self) -> Self {
        if self.user_agent.trim().is_empty() {
            self.user_agent = DEFAULT_USER_AGENT.to_string();
        }
        self.request_timeout_secs = self.request_timeout_secs.clamp(1, MAX_REQUEST_TIMEOUT_SECS);
        self.max_html_bytes = self.max_html_bytes.max(MIN_MAX_HTML_BYTES);
        self.render_timeout_secs = self.render_timeout_secs.max(1);
        self.render_poll_interval_ms = self
            .render_poll_interval_ms
            .clamp(10, MAX_RENDER_POLL_INTERVAL_MS);
        self.chapter_delay_ms = self.chapter_delay_ms.min(MAX_CHAPTER_DELAY_MS);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    pub fn render_poll_interval(&self) -> Duration {
        Duration::from_millis(self.render_poll_interval_ms)
    }

    pub fn chapter_delay(&self) -> Duration {
        Duration::from_millis(self.chapter_delay_ms)
    }
}

pub fn load_resolver_config(paths: &AppPaths) -> Result<ResolverConfig> {
    let path = paths.resolver_config_path();
    if !path.exists() {
        return Ok(ResolverConfig::default());
    }
    let bytes = std::fs::read(&path)?;
    let parsed: ResolverConfig = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::Configuration(format!(
            "failed to parse resolver config at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    Ok(parsed.clamped())
}

pub fn save_resolver_config(paths: &AppPaths, config: &ResolverConfig) -> Result<()> {
    let path = paths.resolver_config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}
