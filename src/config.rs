//! Configuration module for Roost

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::bluesky::DEFAULT_PDS_URL;
use crate::models::FeedId;
use crate::moderation::ModerationSettings;
use crate::paths;

/// Environment variable holding the Bluesky app password
pub const APP_PASSWORD_ENV: &str = "ROOST_APP_PASSWORD";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bluesky handle to log in with
    #[serde(default)]
    pub handle: String,

    /// PDS URL
    #[serde(default = "default_pds_url")]
    pub pds_url: String,

    /// Feed to show: "following", or a feed generator / list `at://` URI
    #[serde(default = "default_feed")]
    pub feed: String,

    /// Timeline engine tuning
    #[serde(default)]
    pub timeline: TimelineSettings,

    /// Label preferences
    #[serde(default)]
    pub moderation: ModerationSettings,
}

/// Timeline engine tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineSettings {
    /// Number of posts to fetch per request
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Background refresh interval in seconds (0 = manual only)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Background fetches closer together than this are skipped
    #[serde(default = "default_minimum_fetch_interval")]
    pub minimum_fetch_interval_secs: u64,

    /// Consecutive background failures before an error is shown
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Pages searched for the saved scroll anchor
    #[serde(default = "default_anchor_max_pages")]
    pub anchor_max_pages: usize,

    /// Posts searched for the saved scroll anchor
    #[serde(default = "default_anchor_max_posts")]
    pub anchor_max_posts: usize,

    /// New posts are inserted automatically while the top visible row is above this index
    #[serde(default = "default_auto_insert_threshold")]
    pub auto_insert_threshold: usize,

    /// Entries kept in the post cache per feed
    #[serde(default = "default_cache_limit")]
    pub cache_limit: usize,

    /// Cached entries older than this are pruned at startup
    #[serde(default = "default_cache_max_age_hours")]
    pub cache_max_age_hours: u64,
}

fn default_pds_url() -> String {
    DEFAULT_PDS_URL.to_string()
}

fn default_feed() -> String {
    "following".to_string()
}

fn default_page_size() -> usize {
    50
}

fn default_refresh_interval() -> u64 {
    60
}

fn default_minimum_fetch_interval() -> u64 {
    5
}

fn default_max_consecutive_failures() -> u32 {
    10
}

fn default_anchor_max_pages() -> usize {
    10
}

fn default_anchor_max_posts() -> usize {
    500
}

fn default_auto_insert_threshold() -> usize {
    3
}

fn default_cache_limit() -> usize {
    200
}

fn default_cache_max_age_hours() -> u64 {
    24 * 7
}

impl Default for TimelineSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            refresh_interval_secs: default_refresh_interval(),
            minimum_fetch_interval_secs: default_minimum_fetch_interval(),
            max_consecutive_failures: default_max_consecutive_failures(),
            anchor_max_pages: default_anchor_max_pages(),
            anchor_max_posts: default_anchor_max_posts(),
            auto_insert_threshold: default_auto_insert_threshold(),
            cache_limit: default_cache_limit(),
            cache_max_age_hours: default_cache_max_age_hours(),
        }
    }
}

impl TimelineSettings {
    /// Background refresh interval, `None` for manual refresh only
    pub const fn refresh_interval(&self) -> Option<Duration> {
        if self.refresh_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.refresh_interval_secs))
        }
    }

    /// Minimum spacing between background fetches
    pub const fn minimum_fetch_interval(&self) -> Duration {
        Duration::from_secs(self.minimum_fetch_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handle: String::new(),
            pds_url: default_pds_url(),
            feed: default_feed(),
            timeline: TimelineSettings::default(),
            moderation: ModerationSettings::default(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        paths::config_path()
    }

    /// Load config from the default path or create default
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_from(&path)
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        self.save_to(&path)
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// The configured feed
    pub fn feed_id(&self) -> Result<FeedId> {
        FeedId::from_str(&self.feed)
            .with_context(|| format!("Unknown feed '{}' (use 'following' or an at:// feed URI)", self.feed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::LabelPreference;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.pds_url, DEFAULT_PDS_URL);
        assert_eq!(config.timeline, TimelineSettings::default());
        assert_eq!(config.feed_id().unwrap(), FeedId::Following);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
handle = "alice.bsky.social"

[timeline]
refresh_interval_secs = 0
page_size = 30

[moderation]
adult_content_enabled = true

[moderation.labels]
spam = "hide"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.handle, "alice.bsky.social");
        assert_eq!(config.timeline.page_size, 30);
        assert_eq!(config.timeline.refresh_interval(), None);
        assert_eq!(config.timeline.max_consecutive_failures, 10);
        assert_eq!(config.timeline.minimum_fetch_interval(), Duration::from_secs(5));
        assert!(config.moderation.adult_content_enabled);
        assert_eq!(
            config.moderation.labels.get("spam"),
            Some(&LabelPreference::Hide)
        );
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.feed = "at://did:plc:z/app.bsky.feed.generator/hot".into();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert!(matches!(loaded.feed_id().unwrap(), FeedId::Generator(_)));
    }
}
