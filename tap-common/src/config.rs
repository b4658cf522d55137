//! Configuration management for TAP services.
//!
//! The service reads a single configuration file at `~/.tap/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `TAP_BIND_ADDRESS` → network.bind
//! - `TAP_PORT` → network.port
//! - `TAP_LOG_LEVEL` → observability.log_level
//! - `TAP_LOG_FORMAT` → observability.log_format
//! - `TAP_TIMEZONE` → market.timezone
//! - `TAP_SCHEDULER_ENABLED` → schedule.enabled
//! - `NAVER_CLIENT_ID` → news.naver_client_id
//! - `NAVER_CLIENT_SECRET` → news.naver_client_secret
//! - `ALLOWED_ORIGINS` → cors.allowed_origins (comma separated)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".tap"),
        |dirs| dirs.home_dir().join(".tap"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure for the TAP service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP bind address and port
    #[serde(default)]
    pub network: NetworkConfig,

    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Market-data provider settings
    #[serde(default)]
    pub market: MarketConfig,

    /// News provider settings
    #[serde(default)]
    pub news: NewsConfig,

    /// Ranking limits and thresholds
    #[serde(default)]
    pub ranking: RankingConfig,

    /// Refresh scheduler settings
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Allowed browser origins
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Empty values are ignored so that `NAVER_CLIENT_ID=` does not count as
    /// configured credentials.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(bind) = get("TAP_BIND_ADDRESS") {
            self.network.bind = bind;
        }
        if let Some(port) = get("TAP_PORT") {
            match port.parse() {
                Ok(p) => self.network.port = p,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid TAP_PORT"),
            }
        }
        if let Some(level) = get("TAP_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = get("TAP_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Some(tz) = get("TAP_TIMEZONE") {
            self.market.timezone = tz;
        }
        if let Some(enabled) = get("TAP_SCHEDULER_ENABLED") {
            self.schedule.enabled = matches!(enabled.as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(id) = get("NAVER_CLIENT_ID") {
            self.news.naver_client_id = Some(id);
        }
        if let Some(secret) = get("NAVER_CLIENT_SECRET") {
            self.news.naver_client_secret = Some(secret);
        }
        if let Some(origins) = get("ALLOWED_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
    }

    /// Socket address string the HTTP server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.network.bind, self.network.port)
    }

    /// Naver search credentials, present only when both halves are set.
    pub fn naver_credentials(&self) -> Option<(String, String)> {
        match (&self.news.naver_client_id, &self.news.naver_client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some((id.clone(), secret.clone()))
            }
            _ => None,
        }
    }
}

// ============================================================================
// Network Configuration
// ============================================================================

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address. Default is `127.0.0.1` (local only).
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Listening port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to clamp to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// ============================================================================
// Market Data Configuration
// ============================================================================

/// KRX data portal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Base URL of the data portal
    #[serde(default = "default_krx_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_market_timeout")]
    pub request_timeout_secs: u64,

    /// Proactive request budget (requests per minute)
    #[serde(default = "default_market_rpm")]
    pub rate_limit_rpm: u32,

    /// Maximum concurrent per-ticker/per-instrument fetches
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Index group code of the theme market
    #[serde(default = "default_theme_group")]
    pub theme_index_group: String,

    /// Instrument used to probe for a trading date
    #[serde(default = "default_reference_instrument")]
    pub reference_instrument: String,

    /// IANA timezone of the exchange (used for "today" and cron evaluation)
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_url: default_krx_base_url(),
            request_timeout_secs: default_market_timeout(),
            rate_limit_rpm: default_market_rpm(),
            fetch_concurrency: default_fetch_concurrency(),
            theme_index_group: default_theme_group(),
            reference_instrument: default_reference_instrument(),
            timezone: default_timezone(),
        }
    }
}

fn default_krx_base_url() -> String {
    "http://data.krx.co.kr".to_string()
}

fn default_market_timeout() -> u64 {
    15
}

fn default_market_rpm() -> u32 {
    120
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_theme_group() -> String {
    "04".to_string()
}

fn default_reference_instrument() -> String {
    "005930".to_string()
}

fn default_timezone() -> String {
    "Asia/Seoul".to_string()
}

// ============================================================================
// News Configuration
// ============================================================================

/// News provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsConfig {
    /// Naver search client id
    #[serde(default)]
    pub naver_client_id: Option<String>,

    /// Naver search client secret
    #[serde(default)]
    pub naver_client_secret: Option<String>,

    /// Naver news search endpoint
    #[serde(default = "default_naver_endpoint")]
    pub naver_endpoint: String,

    /// Google News RSS search endpoint
    #[serde(default = "default_google_endpoint")]
    pub google_endpoint: String,

    /// Google News interface language
    #[serde(default = "default_google_hl")]
    pub google_hl: String,

    /// Google News region
    #[serde(default = "default_google_gl")]
    pub google_gl: String,

    /// Google News edition id
    #[serde(default = "default_google_ceid")]
    pub google_ceid: String,

    /// Hard timeout for the primary (keyed) provider
    #[serde(default = "default_primary_timeout")]
    pub primary_timeout_secs: u64,

    /// Transport timeout for the RSS fallback
    #[serde(default = "default_secondary_timeout")]
    pub secondary_timeout_secs: u64,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            naver_client_id: None,
            naver_client_secret: None,
            naver_endpoint: default_naver_endpoint(),
            google_endpoint: default_google_endpoint(),
            google_hl: default_google_hl(),
            google_gl: default_google_gl(),
            google_ceid: default_google_ceid(),
            primary_timeout_secs: default_primary_timeout(),
            secondary_timeout_secs: default_secondary_timeout(),
        }
    }
}

fn default_naver_endpoint() -> String {
    "https://openapi.naver.com/v1/search/news.json".to_string()
}

fn default_google_endpoint() -> String {
    "https://news.google.com/rss/search".to_string()
}

fn default_google_hl() -> String {
    "ko".to_string()
}

fn default_google_gl() -> String {
    "KR".to_string()
}

fn default_google_ceid() -> String {
    "KR:ko".to_string()
}

fn default_primary_timeout() -> u64 {
    5
}

fn default_secondary_timeout() -> u64 {
    10
}

// ============================================================================
// Ranking Configuration
// ============================================================================

/// Limits and thresholds for the ranked views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Themes per ranked list
    #[serde(default = "default_theme_limit")]
    pub theme_limit: usize,

    /// Lead stocks per theme
    #[serde(default = "default_stock_limit")]
    pub stock_limit: usize,

    /// ETFs per theme
    #[serde(default = "default_etf_limit")]
    pub etf_limit: usize,

    /// News items per instrument
    #[serde(default = "default_news_limit")]
    pub news_limit: usize,

    /// Daily change (percent) at or above which a member counts as surging
    #[serde(default = "default_surge_threshold")]
    pub surge_threshold_pct: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            theme_limit: default_theme_limit(),
            stock_limit: default_stock_limit(),
            etf_limit: default_etf_limit(),
            news_limit: default_news_limit(),
            surge_threshold_pct: default_surge_threshold(),
        }
    }
}

fn default_theme_limit() -> usize {
    5
}

fn default_stock_limit() -> usize {
    5
}

fn default_etf_limit() -> usize {
    3
}

fn default_news_limit() -> usize {
    5
}

fn default_surge_threshold() -> f64 {
    2.0
}

// ============================================================================
// Schedule Configuration
// ============================================================================

/// Refresh scheduler configuration.
///
/// Cron expressions use the six-field `sec min hour day month weekday` form
/// and are evaluated in `market.timezone`.
///
/// ```json
/// {
///   "schedule": {
///     "enabled": true,
///     "intraday": ["0 */5 9-14 * * Mon-Fri", "0 0-30/5 15 * * Mon-Fri"],
///     "end_of_day": ["0 40 15 * * Mon-Fri"]
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Run the refresh scheduler at startup
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Intraday refresh triggers
    #[serde(default = "default_intraday_cron")]
    pub intraday: Vec<String>,

    /// End-of-day refresh triggers
    #[serde(default = "default_end_of_day_cron")]
    pub end_of_day: Vec<String>,

    /// Seconds between schedule checks
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Themes taken from each ranking by a refresh run
    #[serde(default = "default_theme_limit")]
    pub theme_limit: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            intraday: default_intraday_cron(),
            end_of_day: default_end_of_day_cron(),
            tick_secs: default_tick_secs(),
            theme_limit: default_theme_limit(),
        }
    }
}

fn default_intraday_cron() -> Vec<String> {
    vec![
        "0 */5 9-14 * * Mon-Fri".to_string(),
        "0 0-30/5 15 * * Mon-Fri".to_string(),
    ]
}

fn default_end_of_day_cron() -> Vec<String> {
    vec!["0 40 15 * * Mon-Fri".to_string()]
}

fn default_tick_secs() -> u64 {
    10
}

// ============================================================================
// CORS Configuration
// ============================================================================

/// Browser origins allowed to call the API. Wildcards are not accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}
