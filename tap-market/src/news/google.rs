//! Google News RSS search.
//!
//! Keyless; used when the primary source is unconfigured, empty or slow.

use async_trait::async_trait;
use std::time::Duration;
use tap_common::config::NewsConfig;
use tracing::debug;

use super::{strip_tags, NewsError, NewsSource};
use crate::model::NewsItem;

/// Source label on returned items
pub const SOURCE_NAME: &str = "Google News";

const DEFAULT_ENDPOINT: &str = "https://news.google.com/rss/search";

/// Google News RSS client.
pub struct GoogleNewsRss {
    client: reqwest::Client,
    endpoint: String,
    hl: String,
    gl: String,
    ceid: String,
}

impl GoogleNewsRss {
    /// Korean edition against the public endpoint.
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT, Duration::from_secs(10))
    }

    pub fn with_endpoint(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: endpoint.into(),
            hl: "ko".to_string(),
            gl: "KR".to_string(),
            ceid: "KR:ko".to_string(),
        }
    }

    /// Create from config
    pub fn from_config(config: &NewsConfig) -> Self {
        let mut source = Self::with_endpoint(
            config.google_endpoint.clone(),
            Duration::from_secs(config.secondary_timeout_secs),
        );
        source.hl = config.google_hl.clone();
        source.gl = config.google_gl.clone();
        source.ceid = config.google_ceid.clone();
        source
    }
}

impl Default for GoogleNewsRss {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert the first `limit` feed items.
fn items_from_channel(channel: &rss::Channel, limit: usize) -> Vec<NewsItem> {
    channel
        .items()
        .iter()
        .take(limit)
        .map(|item| NewsItem {
            title: item.title().unwrap_or_default().to_string(),
            link: item.link().unwrap_or_default().to_string(),
            description: item.description().map(strip_tags).unwrap_or_default(),
            published_at: item.pub_date().unwrap_or_default().to_string(),
            source: SOURCE_NAME.to_string(),
        })
        .collect()
}

#[async_trait]
impl NewsSource for GoogleNewsRss {
    fn name(&self) -> &'static str {
        "google_news"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<NewsItem>, NewsError> {
        debug!(query, limit, "Searching Google News RSS");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("hl", self.hl.as_str()),
                ("gl", self.gl.as_str()),
                ("ceid", self.ceid.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NewsError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let content = response.bytes().await?;
        let channel = rss::Channel::read_from(&content[..])
            .map_err(|e| NewsError::Parse(e.to_string()))?;

        Ok(items_from_channel(&channel, limit))
    }
}
