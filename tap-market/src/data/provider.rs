//! Provider abstraction for market data.
//!
//! Defines the `MarketDataProvider` trait used by the aggregators, so the
//! ranking and aggregation logic can be exercised without network access.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;

use super::{DailyBar, FundamentalRow, InvestorFlows, MarketCapRow};

// ============================================================================
// Provider Error
// ============================================================================

/// Errors specific to data providers.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Network error (connection failed, timeout)
    Network(String),
    /// Rate limit exceeded
    RateLimited { retry_after_secs: Option<u64> },
    /// Data not available for the requested code/date
    DataNotAvailable(String),
    /// Provider is temporarily unavailable
    Unavailable(String),
    /// Invalid request parameters
    InvalidRequest(String),
    /// Internal provider error (unexpected payload, parse failure)
    Internal(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after_secs {
                    write!(f, ", retry after {} seconds", secs)?;
                }
                Ok(())
            }
            Self::DataNotAvailable(msg) => write!(f, "Data not available: {}", msg),
            Self::Unavailable(msg) => write!(f, "Provider unavailable: {}", msg),
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network("Request timeout".into())
        } else if e.is_connect() {
            Self::Network("Connection failed".into())
        } else if e.is_decode() {
            Self::Internal(format!("Failed to parse response: {}", e))
        } else {
            Self::Network(e.to_string())
        }
    }
}

// ============================================================================
// Market Data Provider Trait
// ============================================================================

/// Read-only access to theme indices and listed instruments.
///
/// Date ranges are inclusive on both ends. Bars and rows come back in
/// ascending date order; an empty vector means the provider has no data for
/// the range (weekend, holiday, not yet published).
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name for logging (e.g., "krx")
    fn name(&self) -> &'static str;

    /// Theme index tickers listed on `date`.
    async fn list_theme_tickers(&self, date: NaiveDate) -> Result<Vec<String>, ProviderError>;

    /// Display name of a theme index.
    async fn theme_name(&self, ticker: &str) -> Result<String, ProviderError>;

    /// Daily bars of the theme index itself.
    async fn theme_daily(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, ProviderError>;

    /// Constituent instrument codes of a theme index on `date`.
    async fn theme_members(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Vec<String>, ProviderError>;

    /// Display name of an instrument.
    async fn instrument_name(&self, code: &str) -> Result<String, ProviderError>;

    /// Daily bars of an instrument.
    async fn instrument_daily(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, ProviderError>;

    /// Market capitalisation rows of an instrument.
    async fn market_cap(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MarketCapRow>, ProviderError>;

    /// Net buy volume per investor segment over the range.
    async fn investor_flows(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<InvestorFlows, ProviderError>;

    /// Valuation ratio rows of an instrument.
    async fn fundamentals(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<FundamentalRow>, ProviderError>;
}
