//! Market data access for the KRX market.
//!
//! The aggregators talk to a [`MarketDataProvider`]; the only production
//! implementation is the KRX data portal adapter.
//!
//! # Data Sources
//! - **KRX data portal** (`data.krx.co.kr`): theme indices, index
//!   constituents, daily bars, market cap, investor flows, fundamentals

mod krx;
mod provider;
mod rate_limiter;

pub use krx::KrxAdapter;
pub use provider::{MarketDataProvider, ProviderError};
pub use rate_limiter::{RateLimiter, SharedRateLimiter};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Provider Rows
// ============================================================================

/// One daily bar as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    /// Change versus the previous close, in percent
    pub change_pct: f64,
}

/// Market capitalisation on a date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketCapRow {
    pub date: NaiveDate,
    pub market_cap: u64,
}

/// Net buy volume per investor segment. Missing segments are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvestorFlows {
    pub foreign: Option<i64>,
    pub institution: Option<i64>,
    pub individual: Option<i64>,
}

/// Valuation ratios on a date. The provider reports zero for "not available".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundamentalRow {
    pub date: NaiveDate,
    pub per: f64,
    pub pbr: f64,
    pub dividend_yield: f64,
}
