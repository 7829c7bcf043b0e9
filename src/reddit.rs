// 🌐 Reddit feed source
//
// Blocking HTTP client behind the `FeedSource` trait. Every failure is
// logged and swallowed: existence becomes `false`, a top post becomes the
// empty summary.

use crate::config::RedditConfig;
use crate::feed::{parse_top_listing, FeedSource, PostSummary};
use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub struct RedditClient {
    http: Client,
    base_url: String,
    top_window: String,
}

impl RedditClient {
    pub fn new(config: &RedditConfig) -> Result<Self> {
        // Unknown subreddits redirect to search; following that would look
        // like a successful fetch
        let http = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(Policy::none())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(RedditClient {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            top_window: config.top_window.clone(),
        })
    }

    fn subreddit_url(&self, name: &str, resource: &str) -> String {
        format!(
            "{}/r/{}/{}",
            self.base_url,
            urlencoding::encode(name),
            resource
        )
    }

    fn fetch_json(&self, url: &str) -> Result<Value> {
        debug!(url, "fetching");
        let response = self.http.get(url).send()?;

        // Redirects are not followed, so 3xx has to be rejected here too
        let status = response.status();
        if !status.is_success() {
            bail!("unexpected status {} from {}", status, url);
        }

        let body = response.json()?;
        Ok(body)
    }
}

impl FeedSource for RedditClient {
    fn exists(&self, name: &str) -> bool {
        let url = self.subreddit_url(name, "about.json");

        match self.fetch_json(&url) {
            // t5 is Reddit's kind tag for a subreddit object
            Ok(about) => about.get("kind").and_then(Value::as_str) == Some("t5"),
            Err(e) => {
                warn!(subreddit = name, error = %e, "existence check failed");
                false
            }
        }
    }

    fn top_post(&self, name: &str) -> PostSummary {
        let url = self.subreddit_url(
            name,
            &format!("top.json?limit=1&t={}", urlencoding::encode(&self.top_window)),
        );

        match self.fetch_json(&url) {
            Ok(listing) => parse_top_listing(&listing),
            Err(e) => {
                warn!(subreddit = name, error = %e, "top post fetch failed");
                PostSummary::default()
            }
        }
    }
}
