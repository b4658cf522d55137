//! In-memory market for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};

use tap_market::data::{
    DailyBar, FundamentalRow, InvestorFlows, MarketCapRow, MarketDataProvider, ProviderError,
};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Monday 2024-06-10.
pub fn monday() -> NaiveDate {
    date(2024, 6, 10)
}

#[derive(Debug, Clone)]
pub struct MockTheme {
    pub ticker: String,
    pub name: String,
    pub volume: u64,
    pub members: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MockInstrument {
    pub name: String,
    pub close: f64,
    pub volume: u64,
    pub change_pct: f64,
    pub market_cap: u64,
}

/// Scripted provider: every listed theme and instrument trades on each
/// configured trading day with the same bar.
pub struct MockMarket {
    trading_days: HashSet<NaiveDate>,
    themes: Vec<MockTheme>,
    instruments: HashMap<String, MockInstrument>,
    failing_theme_names: HashSet<String>,
    failing_members: HashSet<String>,
    failing_instrument_names: HashSet<String>,
    failing_market_caps: HashSet<String>,
    failing_flows: HashSet<String>,
    failing_fundamentals: HashSet<String>,
    flows: InvestorFlows,
    fundamentals: Option<(f64, f64, f64)>,
    pub name_calls: AtomicU32,
    pub daily_calls: AtomicU32,
}

impl MockMarket {
    pub fn new() -> Self {
        Self {
            trading_days: HashSet::new(),
            themes: Vec::new(),
            instruments: HashMap::new(),
            failing_theme_names: HashSet::new(),
            failing_members: HashSet::new(),
            failing_instrument_names: HashSet::new(),
            failing_market_caps: HashSet::new(),
            failing_flows: HashSet::new(),
            failing_fundamentals: HashSet::new(),
            flows: InvestorFlows::default(),
            fundamentals: None,
            name_calls: AtomicU32::new(0),
            daily_calls: AtomicU32::new(0),
        }
    }

    pub fn trading_day(mut self, day: NaiveDate) -> Self {
        self.trading_days.insert(day);
        self
    }

    /// Every weekday in `[from, to]` trades.
    pub fn weekdays(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        let mut day = from;
        while day <= to {
            if chrono::Datelike::weekday(&day).number_from_monday() <= 5 {
                self.trading_days.insert(day);
            }
            day += Duration::days(1);
        }
        self
    }

    pub fn theme(mut self, ticker: &str, name: &str, volume: u64, members: &[&str]) -> Self {
        self.themes.push(MockTheme {
            ticker: ticker.to_string(),
            name: name.to_string(),
            volume,
            members: members.iter().map(|m| m.to_string()).collect(),
        });
        self
    }

    pub fn instrument(mut self, code: &str, name: &str, volume: u64, change_pct: f64) -> Self {
        self.instruments.insert(
            code.to_string(),
            MockInstrument {
                name: name.to_string(),
                close: 10_000.0,
                volume,
                change_pct,
                market_cap: volume * 1_000,
            },
        );
        self
    }

    pub fn failing_theme_name(mut self, ticker: &str) -> Self {
        self.failing_theme_names.insert(ticker.to_string());
        self
    }

    pub fn failing_members(mut self, ticker: &str) -> Self {
        self.failing_members.insert(ticker.to_string());
        self
    }

    pub fn failing_instrument_name(mut self, code: &str) -> Self {
        self.failing_instrument_names.insert(code.to_string());
        self
    }

    pub fn failing_market_cap(mut self, code: &str) -> Self {
        self.failing_market_caps.insert(code.to_string());
        self
    }

    pub fn failing_flows(mut self, code: &str) -> Self {
        self.failing_flows.insert(code.to_string());
        self
    }

    pub fn failing_fundamentals(mut self, code: &str) -> Self {
        self.failing_fundamentals.insert(code.to_string());
        self
    }

    pub fn flows(self, foreign: i64, institution: i64, individual: i64) -> Self {
        self.segment_flows(Some(foreign), Some(institution), Some(individual))
    }

    /// Flows where a `None` segment is absent from the provider's report.
    pub fn segment_flows(
        mut self,
        foreign: Option<i64>,
        institution: Option<i64>,
        individual: Option<i64>,
    ) -> Self {
        self.flows = InvestorFlows {
            foreign,
            institution,
            individual,
        };
        self
    }

    pub fn fundamentals(mut self, per: f64, pbr: f64, dividend_yield: f64) -> Self {
        self.fundamentals = Some((per, pbr, dividend_yield));
        self
    }

    fn days_in(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        let mut days: Vec<NaiveDate> = self
            .trading_days
            .iter()
            .copied()
            .filter(|d| *d >= from && *d <= to)
            .collect();
        days.sort();
        days
    }

    fn find_theme(&self, ticker: &str) -> Result<&MockTheme, ProviderError> {
        self.themes
            .iter()
            .find(|t| t.ticker == ticker)
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("theme {ticker}")))
    }
}

fn bar(day: NaiveDate, close: f64, volume: u64, change_pct: f64) -> DailyBar {
    DailyBar {
        date: day,
        open: close,
        high: close,
        low: close,
        close,
        volume,
        change_pct,
    }
}

#[async_trait]
impl MarketDataProvider for MockMarket {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn list_theme_tickers(&self, date: NaiveDate) -> Result<Vec<String>, ProviderError> {
        if !self.trading_days.contains(&date) {
            return Ok(Vec::new());
        }
        Ok(self.themes.iter().map(|t| t.ticker.clone()).collect())
    }

    async fn theme_name(&self, ticker: &str) -> Result<String, ProviderError> {
        if self.failing_theme_names.contains(ticker) {
            return Err(ProviderError::Network("mock name failure".into()));
        }
        Ok(self.find_theme(ticker)?.name.clone())
    }

    async fn theme_daily(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, ProviderError> {
        let theme = self.find_theme(ticker)?;
        Ok(self
            .days_in(from, to)
            .into_iter()
            .map(|day| bar(day, 1_000.0, theme.volume, 0.0))
            .collect())
    }

    async fn theme_members(
        &self,
        ticker: &str,
        _date: NaiveDate,
    ) -> Result<Vec<String>, ProviderError> {
        if self.failing_members.contains(ticker) {
            return Err(ProviderError::Unavailable("mock member failure".into()));
        }
        Ok(self.find_theme(ticker)?.members.clone())
    }

    async fn instrument_name(&self, code: &str) -> Result<String, ProviderError> {
        self.name_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_instrument_names.contains(code) {
            return Err(ProviderError::Network("mock name failure".into()));
        }
        self.instruments
            .get(code)
            .map(|i| i.name.clone())
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("instrument {code}")))
    }

    async fn instrument_daily(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, ProviderError> {
        self.daily_calls.fetch_add(1, Ordering::SeqCst);
        let Some(instrument) = self.instruments.get(code) else {
            return Err(ProviderError::DataNotAvailable(format!("instrument {code}")));
        };
        Ok(self
            .days_in(from, to)
            .into_iter()
            .map(|day| bar(day, instrument.close, instrument.volume, instrument.change_pct))
            .collect())
    }

    async fn market_cap(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MarketCapRow>, ProviderError> {
        if self.failing_market_caps.contains(code) {
            return Err(ProviderError::Network("mock market cap failure".into()));
        }
        let market_cap = self.instruments.get(code).map_or(0, |i| i.market_cap);
        Ok(self
            .days_in(from, to)
            .into_iter()
            .map(|day| MarketCapRow {
                date: day,
                market_cap,
            })
            .collect())
    }

    async fn investor_flows(
        &self,
        code: &str,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> Result<InvestorFlows, ProviderError> {
        if self.failing_flows.contains(code) {
            return Err(ProviderError::Unavailable("mock flows failure".into()));
        }
        Ok(self.flows.clone())
    }

    async fn fundamentals(
        &self,
        code: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<FundamentalRow>, ProviderError> {
        if self.failing_fundamentals.contains(code) {
            return Err(ProviderError::Internal("mock fundamentals failure".into()));
        }
        let Some((per, pbr, dividend_yield)) = self.fundamentals else {
            return Ok(Vec::new());
        };
        Ok(self
            .days_in(from, to)
            .into_iter()
            .map(|day| FundamentalRow {
                date: day,
                per,
                pbr,
                dividend_yield,
            })
            .collect())
    }
}
