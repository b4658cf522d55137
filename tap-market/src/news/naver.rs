//! Naver news search API.
//!
//! # API Documentation
//! <https://developers.naver.com/docs/serviceapi/search/news/news.md>
//!
//! Requires `X-Naver-Client-Id` / `X-Naver-Client-Secret` headers. Titles
//! and descriptions come back with `<b>` highlight markup.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tap_common::config::NewsConfig;
use tracing::debug;

use super::{strip_tags, NewsError, NewsSource};
use crate::model::NewsItem;

/// Source label on returned items
pub const SOURCE_NAME: &str = "Naver";

const DEFAULT_ENDPOINT: &str = "https://openapi.naver.com/v1/search/news.json";

/// API maximum for `display`
const MAX_DISPLAY: usize = 100;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    originallink: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "pubDate")]
    pub_date: String,
}

impl From<SearchItem> for NewsItem {
    fn from(item: SearchItem) -> Self {
        let link = if item.originallink.trim().is_empty() {
            item.link
        } else {
            item.originallink
        };

        Self {
            title: strip_tags(&item.title),
            link,
            description: strip_tags(&item.description),
            published_at: item.pub_date,
            source: SOURCE_NAME.to_string(),
        }
    }
}

/// Naver news search client.
pub struct NaverNews {
    client: reqwest::Client,
    endpoint: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl NaverNews {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self::with_endpoint(
            DEFAULT_ENDPOINT,
            Some(client_id.into()),
            Some(client_secret.into()),
            Duration::from_secs(5),
        )
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: endpoint.into(),
            client_id: client_id.filter(|v| !v.is_empty()),
            client_secret: client_secret.filter(|v| !v.is_empty()),
        }
    }

    /// Create from config
    pub fn from_config(config: &NewsConfig) -> Self {
        Self::with_endpoint(
            config.naver_endpoint.clone(),
            config.naver_client_id.clone(),
            config.naver_client_secret.clone(),
            Duration::from_secs(config.primary_timeout_secs),
        )
    }
}

#[async_trait]
impl NewsSource for NaverNews {
    fn name(&self) -> &'static str {
        "naver"
    }

    fn is_configured(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<NewsItem>, NewsError> {
        let (Some(id), Some(secret)) = (&self.client_id, &self.client_secret) else {
            return Err(NewsError::NotConfigured("naver"));
        };

        debug!(query, limit, "Searching Naver news");

        let response = self
            .client
            .get(&self.endpoint)
            .header("X-Naver-Client-Id", id)
            .header("X-Naver-Client-Secret", secret)
            .query(&[
                ("query", query.to_string()),
                ("display", limit.clamp(1, MAX_DISPLAY).to_string()),
                ("sort", "date".to_string()),
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

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| NewsError::Parse(e.to_string()))?;

        Ok(body.items.into_iter().take(limit).map(NewsItem::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_prefers_original_link() {
        let item = SearchItem {
            title: "<b>삼성전자</b> 실적".into(),
            originallink: "https://press.example/1".into(),
            link: "https://n.news.naver.com/1".into(),
            description: "3분기 <b>영업이익</b>".into(),
            pub_date: "Mon, 10 Jun 2024 09:00:00 +0900".into(),
        };
        let news = NewsItem::from(item);
        assert_eq!(news.title, "삼성전자 실적");
        assert_eq!(news.description, "3분기 영업이익");
        assert_eq!(news.link, "https://press.example/1");
        assert_eq!(news.source, "Naver");
    }

    #[test]
    fn test_item_falls_back_to_link() {
        let item: SearchItem =
            serde_json::from_str(r#"{"title": "t", "link": "https://n.news.naver.com/2"}"#).unwrap();
        assert_eq!(NewsItem::from(item).link, "https://n.news.naver.com/2");
    }

    #[test]
    fn test_unconfigured() {
        let naver = NaverNews::with_endpoint(DEFAULT_ENDPOINT, Some("id".into()), None, Duration::from_secs(1));
        assert!(!naver.is_configured());

        let naver = NaverNews::with_endpoint(DEFAULT_ENDPOINT, Some(String::new()), Some("s".into()), Duration::from_secs(1));
        assert!(!naver.is_configured());

        assert!(NaverNews::new("id", "secret").is_configured());
    }

    #[tokio::test]
    async fn test_search_without_credentials_fails() {
        let naver = NaverNews::with_endpoint(DEFAULT_ENDPOINT, None, None, Duration::from_secs(1));
        let result = naver.search("삼성전자", 5).await;
        assert!(matches!(result, Err(NewsError::NotConfigured("naver"))));
    }
}
