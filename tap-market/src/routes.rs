//! HTTP routes for the market service.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tap_common::Error;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::warn;

use crate::model::{Instrument, InstrumentDetail, NewsItem, OhlcvBar, Theme};
use crate::scheduler::SchedulerStatus;
use crate::themes::ThemeRanking;
use crate::MarketService;

/// Longest code accepted in a path segment.
const MAX_CODE_LEN: usize = 12;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub scheduler: Option<SchedulerStatus>,
}

#[derive(Debug, Serialize)]
pub struct ThemesResponse {
    pub themes: Vec<Theme>,
    pub sort: String,
}

#[derive(Debug, Serialize)]
pub struct ThemeSearchResponse {
    pub themes: Vec<Theme>,
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct ThemeStocksResponse {
    pub theme_code: String,
    pub stocks: Vec<Instrument>,
    pub etfs: Vec<Instrument>,
}

#[derive(Debug, Serialize)]
pub struct StockDetailResponse {
    pub code: String,
    pub detail: Option<InstrumentDetail>,
    pub history: Vec<OhlcvBar>,
}

#[derive(Debug, Serialize)]
pub struct StockNewsResponse {
    pub code: String,
    pub stock_name: String,
    pub news: Vec<NewsItem>,
}

// ============================================================================
// Query Parameters
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ThemesQuery {
    pub sort: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetailQuery {
    pub period: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// Error envelope: `{"error": {"code", "message", "details"}}`.
#[derive(Debug)]
pub struct ApiError {
    error: Error,
    details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self {
            error,
            details: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::json!({
            "error": {
                "code": self.error.code(),
                "message": self.error.to_string(),
                "details": self.details,
            }
        });

        (status, Json(body)).into_response()
    }
}

/// Reject codes that cannot name a KRX theme or instrument.
fn validate_code(kind: &str, code: &str) -> Result<(), ApiError> {
    let valid = !code.is_empty()
        && code.len() <= MAX_CODE_LEN
        && code.chars().all(|c| c.is_ascii_alphanumeric());

    if valid {
        Ok(())
    } else {
        Err(ApiError::from(Error::InvalidInput(format!("malformed {kind} code")))
            .with_details(serde_json::json!({ "code": code })))
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        status: "ok".to_string(),
        message: "TAP API is running".to_string(),
    })
}

/// Health check endpoint
pub async fn health(State(state): State<Arc<MarketService>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        scheduler: state.scheduler_status().await,
    })
}

/// Ranked theme list; `sort=surge` ranks by surging members.
pub async fn list_themes(
    State(state): State<Arc<MarketService>>,
    Query(query): Query<ThemesQuery>,
) -> Json<ThemesResponse> {
    let ranking = ThemeRanking::parse_lossy(query.sort.as_deref().unwrap_or_default());
    let themes = state
        .list_themes(ranking, state.config.ranking.theme_limit)
        .await;

    Json(ThemesResponse {
        themes,
        sort: ranking.as_str().to_string(),
    })
}

/// Theme name search; `q` is required but may be empty.
pub async fn search_themes(
    State(state): State<Arc<MarketService>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ThemeSearchResponse>, ApiError> {
    let Some(query) = query.q else {
        return Err(ApiError::from(Error::InvalidInput(
            "missing query parameter `q`".to_string(),
        )));
    };
    let themes = state.search_themes(&query).await;

    Ok(Json(ThemeSearchResponse { themes, query }))
}

pub async fn theme_stocks(
    State(state): State<Arc<MarketService>>,
    Path(code): Path<String>,
) -> Result<Json<ThemeStocksResponse>, ApiError> {
    validate_code("theme", &code)?;
    let instruments = state.theme_instruments(&code).await;

    Ok(Json(ThemeStocksResponse {
        theme_code: code,
        stocks: instruments.stocks,
        etfs: instruments.etfs,
    }))
}

pub async fn stock_detail(
    State(state): State<Arc<MarketService>>,
    Path(code): Path<String>,
    Query(query): Query<DetailQuery>,
) -> Result<Json<StockDetailResponse>, ApiError> {
    validate_code("instrument", &code)?;
    let period = query.period.unwrap_or_default();
    let view = state.instrument_detail(&code, &period).await;

    Ok(Json(StockDetailResponse {
        code,
        detail: view.detail,
        history: view.history,
    }))
}

pub async fn stock_news(
    State(state): State<Arc<MarketService>>,
    Path(code): Path<String>,
) -> Result<Json<StockNewsResponse>, ApiError> {
    validate_code("instrument", &code)?;
    let (stock_name, news) = state
        .instrument_news(&code, state.config.ranking.news_limit)
        .await;

    Ok(Json(StockNewsResponse {
        code,
        stock_name,
        news,
    }))
}

pub async fn not_found() -> ApiError {
    Error::NotFound("route".to_string()).into()
}

// ============================================================================
// Router
// ============================================================================

/// CORS restricted to the configured origins, with credentials.
///
/// Requested headers are mirrored back since a wildcard cannot be combined
/// with credentials.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// All API routes over the shared service state.
pub fn build_router(state: Arc<MarketService>) -> Router {
    let cors = cors_layer(&state.config.cors.allowed_origins);

    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/themes", get(list_themes))
        .route("/api/themes/search", get(search_themes))
        .route("/api/themes/:code/stocks", get(theme_stocks))
        .route("/api/stocks/:code", get(stock_detail))
        .route("/api/stocks/:code/news", get(stock_news))
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
}
