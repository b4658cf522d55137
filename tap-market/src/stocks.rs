//! Instrument aggregation: theme member lists, detail views, name lookup.

use chrono::{Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

use crate::calendar::{InstrumentBarProbe, MarketClock, TradingCalendarResolver};
use crate::data::{MarketDataProvider, ProviderError};
use crate::model::{
    Instrument, InstrumentDetail, InstrumentDetailView, InstrumentType, OhlcvBar,
    ThemeInstruments,
};
use crate::ranking;

/// Instrument probed when resolving the trading date.
pub const DEFAULT_REFERENCE_INSTRUMENT: &str = "005930";

/// Chart period of a detail view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    Day,
    Week,
    Month,
    #[default]
    Quarter,
}

impl Period {
    /// Parse `1d`, `1w`, `1m` or `3m`; anything else is `3m`.
    pub fn parse_lossy(value: &str) -> Self {
        match value {
            "1d" => Self::Day,
            "1w" => Self::Week,
            "1m" => Self::Month,
            _ => Self::Quarter,
        }
    }

    /// Calendar days covered, ending at the trading date.
    pub fn days(&self) -> i64 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Month => 30,
            Self::Quarter => 90,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "1d",
            Self::Week => "1w",
            Self::Month => "1m",
            Self::Quarter => "3m",
        }
    }
}

/// Builds instrument lists and detail views from provider data.
pub struct StockAggregator {
    provider: Arc<dyn MarketDataProvider>,
    resolver: TradingCalendarResolver,
    clock: MarketClock,
    concurrency: usize,
    reference_instrument: String,
}

impl StockAggregator {
    pub fn new(provider: Arc<dyn MarketDataProvider>, clock: MarketClock) -> Self {
        Self {
            provider,
            resolver: TradingCalendarResolver::new(),
            clock,
            concurrency: 4,
            reference_instrument: DEFAULT_REFERENCE_INSTRUMENT.to_string(),
        }
    }

    /// Bound on concurrent per-member fetches.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_reference_instrument(mut self, code: impl Into<String>) -> Self {
        self.reference_instrument = code.into();
        self
    }

    /// Lead stocks and ETFs of a theme, each ranked by trading volume.
    pub async fn fetch_by_theme(
        &self,
        theme_code: &str,
        stock_limit: usize,
        etf_limit: usize,
    ) -> ThemeInstruments {
        let date = self.trading_date(&self.reference_instrument).await;

        let members = match self.provider.theme_members(theme_code, date).await {
            Ok(members) => members,
            Err(e) => {
                warn!(theme = theme_code, %date, error = %e, "Failed to list theme members");
                return ThemeInstruments::default();
            }
        };

        if members.is_empty() {
            warn!(theme = theme_code, %date, "Theme has no members");
            return ThemeInstruments::default();
        }

        let outcomes: Vec<(String, Result<Option<Instrument>, ProviderError>)> =
            stream::iter(members)
                .map(|code| async move {
                    let outcome = self.member_entry(&code, date).await;
                    (code, outcome)
                })
                .buffered(self.concurrency)
                .collect()
                .await;

        let instruments: Vec<Instrument> = outcomes
            .into_iter()
            .filter_map(|(code, outcome)| match outcome {
                Ok(Some(instrument)) => Some(instrument),
                Ok(None) => None,
                Err(e) => {
                    warn!(theme = theme_code, member = %code, error = %e, "Dropping member");
                    None
                }
            })
            .collect();

        let ranked = ranking::sort(instruments, &["trading_volume"], &["desc"]);
        let mut stocks = ranking::filter_by_type(&ranked, InstrumentType::Stock.as_str());
        let mut etfs = ranking::filter_by_type(&ranked, InstrumentType::Etf.as_str());
        stocks.truncate(stock_limit);
        etfs.truncate(etf_limit);

        info!(
            theme = theme_code,
            %date,
            stocks = stocks.len(),
            etfs = etfs.len(),
            "Collected theme instruments"
        );

        ThemeInstruments { stocks, etfs }
    }

    /// Detail view with chart history for `period` (`1d`, `1w`, `1m`, `3m`).
    pub async fn fetch_detail(&self, code: &str, period: &str) -> InstrumentDetailView {
        let period = Period::parse_lossy(period);
        let date = self.trading_date(&self.reference_instrument).await;

        let name = match self.provider.instrument_name(code).await {
            Ok(name) => name,
            Err(e) => {
                warn!(code, error = %e, "Failed to fetch instrument name");
                return InstrumentDetailView::empty();
            }
        };

        let from = date - Duration::days(period.days());
        let history: Vec<OhlcvBar> = match self.provider.instrument_daily(code, from, date).await {
            Ok(bars) => bars
                .into_iter()
                .map(|bar| OhlcvBar {
                    date: OhlcvBar::format_date(bar.date),
                    open: bar.open,
                    high: bar.high,
                    low: bar.low,
                    close: bar.close,
                    volume: bar.volume,
                })
                .collect(),
            Err(e) => {
                warn!(code, error = %e, "Failed to fetch price history");
                Vec::new()
            }
        };

        let (price, volume) = history
            .last()
            .map_or((0.0, 0), |bar| (bar.close, bar.volume));

        let (market_cap, flows, fundamentals) = futures::join!(
            self.provider.market_cap(code, date, date),
            self.provider.investor_flows(code, date, date),
            self.provider.fundamentals(code, date, date),
        );

        let market_cap = market_cap
            .map(|rows| rows.last().map_or(0, |row| row.market_cap))
            .unwrap_or_else(|e| {
                warn!(code, error = %e, "Failed to fetch market cap");
                0
            });

        let flows = flows.unwrap_or_else(|e| {
            warn!(code, error = %e, "Failed to fetch investor flows");
            Default::default()
        });

        let latest = fundamentals
            .map(|mut rows| rows.pop())
            .unwrap_or_else(|e| {
                warn!(code, error = %e, "Failed to fetch fundamentals");
                None
            });
        let non_zero = |v: f64| (v != 0.0).then_some(v);

        let mut instrument = Instrument::new(code, name);
        instrument.price = price;
        instrument.trading_volume = volume;
        instrument.market_cap = market_cap;
        instrument.updated_at = Utc::now();

        let detail = InstrumentDetail {
            instrument,
            foreign_trading: flows.foreign.unwrap_or(0),
            institution_trading: flows.institution.unwrap_or(0),
            individual_trading: flows.individual.unwrap_or(0),
            per: latest.as_ref().and_then(|f| non_zero(f.per)),
            pbr: latest.as_ref().and_then(|f| non_zero(f.pbr)),
            industry_per: None,
            dividend_yield: latest.as_ref().and_then(|f| non_zero(f.dividend_yield)),
        };

        info!(code, period = period.as_str(), history = history.len(), "Built instrument detail");

        InstrumentDetailView {
            detail: Some(detail),
            history,
        }
    }

    /// Display name of an instrument for news lookup.
    ///
    /// Direct lookup first; on failure, retry once after confirming the
    /// instrument traded recently; otherwise the code itself.
    pub async fn resolve_name(&self, code: &str) -> String {
        match self.provider.instrument_name(code).await {
            Ok(name) if !name.trim().is_empty() => return name,
            Ok(_) => {}
            Err(e) => warn!(code, error = %e, "Instrument name lookup failed"),
        }

        let probe = InstrumentBarProbe::new(Arc::clone(&self.provider), code);
        if self.resolver.find(&probe, self.clock.today()).await.is_some() {
            if let Ok(name) = self.provider.instrument_name(code).await {
                if !name.trim().is_empty() {
                    return name;
                }
            }
        }

        warn!(code, "Falling back to instrument code as name");
        code.to_string()
    }

    async fn trading_date(&self, probe_code: &str) -> NaiveDate {
        let probe = InstrumentBarProbe::new(Arc::clone(&self.provider), probe_code);
        self.resolver.resolve(&probe, self.clock.today()).await
    }

    /// One theme member on `date`; `None` when it has no bar.
    async fn member_entry(
        &self,
        code: &str,
        date: NaiveDate,
    ) -> Result<Option<Instrument>, ProviderError> {
        let name = self.provider.instrument_name(code).await?;
        let bars = self.provider.instrument_daily(code, date, date).await?;
        let Some(bar) = bars.last() else {
            return Ok(None);
        };
        let caps = self.provider.market_cap(code, date, date).await?;

        let mut instrument = Instrument::new(code, name);
        instrument.price = bar.close;
        instrument.trading_volume = bar.volume;
        instrument.market_cap = caps.last().map_or(0, |row| row.market_cap);
        Ok(Some(instrument))
    }
}
