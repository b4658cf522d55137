//! HTTP route tests over an in-memory market.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use common::{date, monday, MockMarket};
use tap_common::config::Config;
use tap_market::calendar::MarketClock;
use tap_market::model::NewsItem;
use tap_market::news::{NewsError, NewsFetcher, NewsSource};
use tap_market::routes::build_router;
use tap_market::MarketService;

/// Returns up to two articles titled after the query.
struct EchoNews;

#[async_trait]
impl NewsSource for EchoNews {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<NewsItem>, NewsError> {
        Ok((0..limit.min(2))
            .map(|i| NewsItem {
                title: format!("{query} 뉴스 {i}"),
                link: format!("https://news.example/{i}"),
                description: String::new(),
                published_at: String::new(),
                source: "echo".to_string(),
            })
            .collect())
    }
}

struct NoNews;

#[async_trait]
impl NewsSource for NoNews {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<NewsItem>, NewsError> {
        Ok(Vec::new())
    }
}

fn service(scheduler_enabled: bool) -> Arc<MarketService> {
    let provider = MockMarket::new()
        .weekdays(date(2024, 5, 1), date(2024, 6, 7))
        .theme("1001", "반도체", 500, &["005930", "091160"])
        .theme("1002", "2차전지", 900, &["373220"])
        .instrument("005930", "삼성전자", 20_000_000, 2.5)
        .instrument("091160", "KODEX 반도체 ETF", 1_000_000, 2.0)
        .instrument("373220", "LG에너지솔루션", 800_000, 3.0)
        .fundamentals(12.5, 1.3, 2.1);

    let news = NewsFetcher::new(Arc::new(NoNews), Arc::new(EchoNews), Duration::from_secs(1));

    let mut config = Config::default();
    config.schedule.enabled = scheduler_enabled;

    Arc::new(
        MarketService::with_parts(config, Arc::new(provider), news, MarketClock::fixed(monday()))
            .unwrap(),
    )
}

fn app() -> Router {
    build_router(service(false))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_root() {
    let (status, body) = get(app(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_health_reports_scheduler() {
    let (status, body) = get(app(), "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["scheduler"].is_null());

    let (_, body) = get(build_router(service(true)), "/api/health").await;
    assert_eq!(body["scheduler"]["state"], "stopped");
    assert_eq!(body["scheduler"]["jobs"].as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn test_themes_default_to_volume() {
    let (status, body) = get(app(), "/api/themes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sort"], "volume");

    let codes: Vec<&str> = body["themes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["code"].as_str().unwrap())
        .collect();
    assert_eq!(codes, vec!["1002", "1001"]);
    assert_eq!(body["themes"][0]["trading_volume"], 900);
    assert_eq!(body["themes"][0]["id"], 1002);
}

#[tokio::test]
async fn test_themes_by_surge() {
    let (_, body) = get(app(), "/api/themes?sort=surge").await;
    assert_eq!(body["sort"], "surge");
    assert_eq!(body["themes"][0]["code"], "1001");
    assert_eq!(body["themes"][0]["surge_stock_count"], 2);
    assert_eq!(body["themes"][1]["surge_stock_count"], 1);

    let (_, body) = get(app(), "/api/themes?sort=bogus").await;
    assert_eq!(body["sort"], "volume");
}

#[tokio::test]
async fn test_theme_search() {
    // q=반도
    let (status, body) = get(app(), "/api/themes/search?q=%EB%B0%98%EB%8F%84").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"], "반도");
    assert_eq!(body["themes"][0]["code"], "1001");

    // An empty query is a substring of every name
    let (status, body) = get(app(), "/api/themes/search?q=").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["themes"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_theme_search_requires_query() {
    let (status, body) = get(app(), "/api/themes/search").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_theme_stocks() {
    let (status, body) = get(app(), "/api/themes/1001/stocks").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["theme_code"], "1001");
    assert_eq!(body["stocks"][0]["code"], "005930");
    assert_eq!(body["stocks"][0]["type"], "stock");
    assert_eq!(body["etfs"][0]["code"], "091160");
    assert_eq!(body["etfs"][0]["type"], "ETF");
}

#[tokio::test]
async fn test_stock_detail() {
    let (status, body) = get(app(), "/api/stocks/005930?period=1w").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "005930");
    assert_eq!(body["detail"]["name"], "삼성전자");
    assert_eq!(body["detail"]["per"], 12.5);
    assert_eq!(body["detail"]["foreign_trading"], 0);
    assert!(body["detail"]["industry_per"].is_null());
    assert_eq!(body["history"].as_array().map(Vec::len), Some(6));
    assert_eq!(body["history"][5]["date"], "2024-06-07");
}

#[tokio::test]
async fn test_unknown_stock_has_null_detail() {
    let (status, body) = get(app(), "/api/stocks/999999").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["detail"].is_null());
    assert_eq!(body["history"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_stock_news_uses_resolved_name() {
    let (status, body) = get(app(), "/api/stocks/005930/news").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stock_name"], "삼성전자");
    assert_eq!(body["news"][0]["title"], "삼성전자 뉴스 0");

    let (_, body) = get(app(), "/api/stocks/999999/news").await;
    assert_eq!(body["stock_name"], "999999");
}

#[tokio::test]
async fn test_malformed_code_is_rejected() {
    let (status, body) = get(app(), "/api/stocks/00%2D59/news").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
    assert_eq!(body["error"]["details"]["code"], "00-59");
}

#[tokio::test]
async fn test_unknown_route_uses_error_envelope() {
    let (status, body) = get(app(), "/api/nowhere").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert!(body["error"]["message"].is_string());
}

// ============================================================================
// CORS
// ============================================================================

async fn preflight(origin: &str) -> axum::http::Response<Body> {
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/themes")
        .header(header::ORIGIN, origin)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-requested-with")
        .body(Body::empty())
        .unwrap();
    app().oneshot(request).await.unwrap()
}

#[tokio::test]
async fn test_cors_preflight_allows_configured_origin() {
    let response = preflight("http://localhost:3000").await;
    let headers = response.headers();

    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "x-requested-with");

    let methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
    assert!(methods.contains("GET") && methods.contains("POST"));
}

#[tokio::test]
async fn test_cors_origin_allow_list() {
    let response = preflight("http://evil.example").await;
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());

    let request = Request::builder()
        .uri("/")
        .header(header::ORIGIN, "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );
}
