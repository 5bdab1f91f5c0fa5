use crate::dom::Viewport;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Runtime configuration for the relay and its host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub page_url: Url,
    pub referrer: String,
    pub user_agent: String,
    /// Directory for the durable store file; in-memory when unset.
    pub storage_dir: Option<PathBuf>,
    pub cdp_enabled: bool,
    pub viewport: Viewport,
    pub banner_delay_ms: u64,
    pub submit_reset_ms: u64,
    pub milestone_interval_secs: u64,
    pub video_label: String,
    pub default_form_id: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            page_url: Url::parse("http://localhost/").expect("static url parses"),
            referrer: String::new(),
            user_agent: format!("consent-relay/{}", env!("CARGO_PKG_VERSION")),
            storage_dir: None,
            cdp_enabled: true,
            viewport: Viewport::default(),
            banner_delay_ms: 2000,
            submit_reset_ms: 3000,
            milestone_interval_secs: 10,
            video_label: "ASU MBA Overview".to_string(),
            default_form_id: "contact_form".to_string(),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let page_url = match std::env::var("RELAY_PAGE_URL") {
            Ok(raw) => Url::parse(&raw).context("failed to parse RELAY_PAGE_URL")?,
            Err(_) => defaults.page_url,
        };
        let referrer = std::env::var("RELAY_REFERRER").unwrap_or(defaults.referrer);
        let user_agent = std::env::var("RELAY_USER_AGENT").unwrap_or(defaults.user_agent);
        let storage_dir = std::env::var("RELAY_STORAGE_DIR").ok().map(PathBuf::from);

        let cdp_enabled = std::env::var("RELAY_CDP_ENABLED")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.cdp_enabled);

        let viewport = Viewport {
            width: env_parse("RELAY_VIEWPORT_WIDTH").unwrap_or(defaults.viewport.width),
            height: env_parse("RELAY_VIEWPORT_HEIGHT").unwrap_or(defaults.viewport.height),
        };

        let banner_delay_ms = env_parse("RELAY_BANNER_DELAY_MS").unwrap_or(defaults.banner_delay_ms);
        let submit_reset_ms = env_parse("RELAY_SUBMIT_RESET_MS").unwrap_or(defaults.submit_reset_ms);
        let milestone_interval_secs = env_parse("RELAY_MILESTONE_INTERVAL_SECS")
            .filter(|secs| *secs > 0)
            .unwrap_or(defaults.milestone_interval_secs);

        let video_label = std::env::var("RELAY_VIDEO_LABEL").unwrap_or(defaults.video_label);
        let default_form_id =
            std::env::var("RELAY_DEFAULT_FORM_ID").unwrap_or(defaults.default_form_id);

        Ok(Self {
            page_url,
            referrer,
            user_agent,
            storage_dir,
            cdp_enabled,
            viewport,
            banner_delay_ms,
            submit_reset_ms,
            milestone_interval_secs,
            video_label,
            default_form_id,
        })
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw).context("failed to parse relay config")?;
        anyhow::ensure!(
            config.milestone_interval_secs > 0,
            "milestone_interval_secs must be > 0"
        );
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {:?}", path))?;
        Self::from_toml_str(&raw)
    }

    pub fn banner_delay(&self) -> Duration {
        Duration::from_millis(self.banner_delay_ms)
    }

    pub fn submit_reset_delay(&self) -> Duration {
        Duration::from_millis(self.submit_reset_ms)
    }

    pub fn milestone_interval(&self) -> Duration {
        Duration::from_secs(self.milestone_interval_secs)
    }

    /// Absolute form of an `href`, the way `anchor.href` reads in a browser.
    pub fn resolve_href(&self, href: &str) -> String {
        self.page_url
            .join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}
