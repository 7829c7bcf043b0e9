//! Configuration for the follow service.
//!
//! Every field has a default, so an empty JSON object is a complete config.
//! A few settings can be overridden from the environment:
//!
//! | variable           | field             |
//! |--------------------|-------------------|
//! | `FOLLOW_DB_PATH`   | `db_path`         |
//! | `FOLLOW_BIND_ADDR` | `bind_addr`       |
//! | `REDDIT_BASE_URL`  | `reddit.base_url` |

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// SQLite database holding followed subreddits and the audit trail
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Address the HTTP server listens on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub reddit: RedditConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Reddit throttles generic user agents hard
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Listing window for the top post: hour, day, week, month, year, all
    #[serde(default = "default_top_window")]
    pub top_window: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("follows.db")
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_base_url() -> String {
    "https://www.reddit.com".to_string()
}

fn default_user_agent() -> String {
    format!("subreddit-follow/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_top_window() -> String {
    "day".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            db_path: default_db_path(),
            bind_addr: default_bind_addr(),
            reddit: RedditConfig::default(),
        }
    }
}

impl Default for RedditConfig {
    fn default() -> Self {
        RedditConfig {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            top_window: default_top_window(),
        }
    }
}

impl AppConfig {
    /// Read `path` (JSON) if given, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_json(&raw)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => AppConfig::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db_path) = lookup("FOLLOW_DB_PATH") {
            self.db_path = PathBuf::from(db_path);
        }
        if let Some(bind_addr) = lookup("FOLLOW_BIND_ADDR") {
            self.bind_addr = bind_addr;
        }
        if let Some(base_url) = lookup("REDDIT_BASE_URL") {
            self.reddit.base_url = base_url;
        }
    }
}
