//! Domain records returned by the aggregators.
//!
//! Every record is recomputed on each fetch; nothing here is cached or
//! persisted.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Modulus applied to hashed theme codes.
const THEME_ID_MODULUS: u64 = 100_000;

// ============================================================================
// Theme
// ============================================================================

/// A thematic index with its ranking metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub id: u64,
    pub code: String,
    pub name: String,
    pub trading_volume: u64,
    pub surge_stock_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl Theme {
    /// Create a theme entry with zeroed metrics.
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            id: theme_id(&code),
            code,
            name: name.into(),
            trading_volume: 0,
            surge_stock_count: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_volume(mut self, volume: u64) -> Self {
        self.trading_volume = volume;
        self
    }

    pub fn with_surge_count(mut self, count: u32) -> Self {
        self.surge_stock_count = count;
        self
    }
}

/// Numeric id of a theme code.
///
/// All-digit codes map to their numeric value. Anything else is hashed with
/// FNV-1a and reduced modulo 100000, so the id is stable across restarts.
pub fn theme_id(code: &str) -> u64 {
    if !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(id) = code.parse::<u64>() {
            return id;
        }
    }

    let hash = code.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |acc, b| {
        (acc ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    });
    hash % THEME_ID_MODULUS
}

// ============================================================================
// Instruments
// ============================================================================

/// Instrument classification. Serialised as `"stock"` or `"ETF"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentType {
    #[serde(rename = "stock")]
    Stock,
    #[serde(rename = "ETF")]
    Etf,
}

impl InstrumentType {
    /// Classify by display name: names carrying `ETF` or `ETN` are funds.
    pub fn classify(name: &str) -> Self {
        if name.contains("ETF") || name.contains("ETN") {
            Self::Etf
        } else {
            Self::Stock
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stock => "stock",
            Self::Etf => "ETF",
        }
    }
}

impl std::fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A listed instrument as shown in theme views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub code: String,
    pub name: String,
    pub price: f64,
    pub trading_volume: u64,
    pub market_cap: u64,
    #[serde(rename = "type")]
    pub instrument_type: InstrumentType,
    pub updated_at: DateTime<Utc>,
}

impl Instrument {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            code: code.into(),
            instrument_type: InstrumentType::classify(&name),
            name,
            price: 0.0,
            trading_volume: 0,
            market_cap: 0,
            updated_at: Utc::now(),
        }
    }
}

/// An instrument with investor flows and valuation ratios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentDetail {
    #[serde(flatten)]
    pub instrument: Instrument,
    pub foreign_trading: i64,
    pub institution_trading: i64,
    pub individual_trading: i64,
    pub per: Option<f64>,
    pub pbr: Option<f64>,
    /// Industry PER needs a separate data source and is never populated.
    pub industry_per: Option<f64>,
    pub dividend_yield: Option<f64>,
}

/// One daily bar of a price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    /// `YYYY-MM-DD`
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl OhlcvBar {
    pub fn format_date(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }
}

/// Lead stocks and ETFs of a theme.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThemeInstruments {
    pub stocks: Vec<Instrument>,
    pub etfs: Vec<Instrument>,
}

impl ThemeInstruments {
    pub fn is_empty(&self) -> bool {
        self.stocks.is_empty() && self.etfs.is_empty()
    }
}

/// Detail view of a single instrument with its chart history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentDetailView {
    pub detail: Option<InstrumentDetail>,
    pub history: Vec<OhlcvBar>,
}

impl InstrumentDetailView {
    pub fn empty() -> Self {
        Self::default()
    }
}

// ============================================================================
// News
// ============================================================================

/// A news article about an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: String,
    /// `"Naver"` or `"Google News"`
    pub source: String,
}
