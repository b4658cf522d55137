//! Instrument news with provider fallback.
//!
//! # Sources
//! - **Naver search API** (primary): keyed, bounded by a hard timeout
//! - **Google News RSS** (secondary): keyless fallback
//!
//! [`NewsFetcher::fetch_stock_news`] never fails; exhausting both sources
//! yields an empty list.

mod google;
mod naver;

pub use google::GoogleNewsRss;
pub use naver::NaverNews;

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tap_common::config::NewsConfig;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::NewsItem;

/// Default number of articles per instrument.
pub const DEFAULT_NEWS_LIMIT: usize = 5;

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Remove markup tags from provider text.
pub fn strip_tags(text: &str) -> String {
    TAG_PATTERN.replace_all(text, "").trim().to_string()
}

/// Errors from a news source.
#[derive(Debug, Error)]
pub enum NewsError {
    #[error("News source not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("News source timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for NewsError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// A searchable news provider.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Source name for logging
    fn name(&self) -> &'static str;

    /// Whether the source has the credentials it needs.
    fn is_configured(&self) -> bool {
        true
    }

    /// Latest articles matching `query`, at most `limit`.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<NewsItem>, NewsError>;
}

/// Primary/secondary news fallback chain.
pub struct NewsFetcher {
    primary: Arc<dyn NewsSource>,
    secondary: Arc<dyn NewsSource>,
    primary_timeout: Duration,
}

impl NewsFetcher {
    pub fn new(
        primary: Arc<dyn NewsSource>,
        secondary: Arc<dyn NewsSource>,
        primary_timeout: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            primary_timeout,
        }
    }

    /// Naver primary and Google News fallback from config.
    pub fn from_config(config: &NewsConfig) -> Self {
        Self::new(
            Arc::new(NaverNews::from_config(config)),
            Arc::new(GoogleNewsRss::from_config(config)),
            Duration::from_secs(config.primary_timeout_secs),
        )
    }

    /// Latest news for an instrument name, at most `limit` items.
    pub async fn fetch_stock_news(&self, name: &str, limit: usize) -> Vec<NewsItem> {
        if limit == 0 || name.trim().is_empty() {
            return Vec::new();
        }

        if let Some(items) = self.try_primary(name, limit).await {
            return items;
        }

        match self.secondary.search(name, limit).await {
            Ok(mut items) => {
                items.truncate(limit);
                info!(source = self.secondary.name(), query = %name, count = items.len(), "Fetched news");
                items
            }
            Err(e) => {
                warn!(source = self.secondary.name(), query = %name, error = %e, "News fallback failed");
                Vec::new()
            }
        }
    }

    /// Non-empty primary result, or `None` to fall through.
    async fn try_primary(&self, name: &str, limit: usize) -> Option<Vec<NewsItem>> {
        if !self.primary.is_configured() {
            debug!(source = self.primary.name(), "Primary news source not configured");
            return None;
        }

        let outcome = tokio::time::timeout(self.primary_timeout, self.primary.search(name, limit))
            .await
            .unwrap_or(Err(NewsError::Timeout(self.primary_timeout)));

        match outcome {
            Ok(mut items) if !items.is_empty() => {
                items.truncate(limit);
                info!(source = self.primary.name(), query = %name, count = items.len(), "Fetched news");
                Some(items)
            }
            Ok(_) => {
                debug!(source = self.primary.name(), query = %name, "Primary returned no news");
                None
            }
            Err(e) => {
                warn!(source = self.primary.name(), query = %name, error = %e, "Primary news source failed");
                None
            }
        }
    }
}
