//! Theme aggregation: volume and surge rankings, name search.

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::calendar::{MarketClock, ThemeListingProbe, TradingCalendarResolver};
use crate::data::{MarketDataProvider, ProviderError};
use crate::model::Theme;
use crate::ranking;

/// Default daily change (percent) for a surging member.
pub const DEFAULT_SURGE_THRESHOLD_PCT: f64 = 2.0;

/// Which metric ranks the theme list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThemeRanking {
    #[default]
    Volume,
    Surge,
}

impl ThemeRanking {
    /// Parse a query value; anything but `surge` ranks by volume.
    pub fn parse_lossy(value: &str) -> Self {
        if value.eq_ignore_ascii_case("surge") {
            Self::Surge
        } else {
            Self::Volume
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Surge => "surge",
        }
    }

    fn metric(&self) -> &'static str {
        match self {
            Self::Volume => "trading_volume",
            Self::Surge => "surge_stock_count",
        }
    }
}

/// Builds ranked theme lists from provider data.
pub struct ThemeAggregator {
    provider: Arc<dyn MarketDataProvider>,
    resolver: TradingCalendarResolver,
    clock: MarketClock,
    concurrency: usize,
    surge_threshold_pct: f64,
}

impl ThemeAggregator {
    pub fn new(provider: Arc<dyn MarketDataProvider>, clock: MarketClock) -> Self {
        Self {
            provider,
            resolver: TradingCalendarResolver::new(),
            clock,
            concurrency: 4,
            surge_threshold_pct: DEFAULT_SURGE_THRESHOLD_PCT,
        }
    }

    /// Bound on concurrent per-ticker fetches.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_surge_threshold(mut self, pct: f64) -> Self {
        self.surge_threshold_pct = pct;
        self
    }

    /// Top themes under the given ranking.
    pub async fn top_themes(&self, ranking: ThemeRanking, limit: usize) -> Vec<Theme> {
        match ranking {
            ThemeRanking::Volume => self.by_volume(limit).await,
            ThemeRanking::Surge => self.by_surge(limit).await,
        }
    }

    /// Themes ranked by the trading volume of the theme index.
    pub async fn by_volume(&self, limit: usize) -> Vec<Theme> {
        let date = self.trading_date().await;
        let tickers = self.tickers(date).await;

        let outcomes: Vec<(String, Result<Theme, ProviderError>)> = stream::iter(tickers)
            .map(|ticker| async move {
                let outcome = self.volume_entry(&ticker, date).await;
                (ticker, outcome)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let themes = collect_successes(outcomes, "volume");
        let total = themes.len();
        let ranked = rank(themes, ThemeRanking::Volume, limit);

        info!(%date, limit, total, returned = ranked.len(), "Ranked themes by volume");
        ranked
    }

    /// Themes ranked by the number of surging members.
    pub async fn by_surge(&self, limit: usize) -> Vec<Theme> {
        let date = self.trading_date().await;
        let tickers = self.tickers(date).await;

        let outcomes: Vec<(String, Result<Theme, ProviderError>)> = stream::iter(tickers)
            .map(|ticker| async move {
                let outcome = self.surge_entry(&ticker, date).await;
                (ticker, outcome)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let themes = collect_successes(outcomes, "surge");
        let total = themes.len();
        let ranked = rank(themes, ThemeRanking::Surge, limit);

        info!(%date, limit, total, returned = ranked.len(), "Ranked themes by surge count");
        ranked
    }

    /// Case-insensitive substring search over theme names.
    ///
    /// Returns every match in listing order with zeroed metrics. The query
    /// is used as given, so an empty query matches every theme.
    pub async fn search(&self, query: &str) -> Vec<Theme> {
        let needle = query.to_lowercase();

        let date = self.trading_date().await;
        let tickers = self.tickers(date).await;

        let outcomes: Vec<(String, Result<Theme, ProviderError>)> = stream::iter(tickers)
            .map(|ticker| async move {
                let outcome = self
                    .provider
                    .theme_name(&ticker)
                    .await
                    .map(|name| Theme::new(ticker.as_str(), name));
                (ticker, outcome)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let matches: Vec<Theme> = collect_successes(outcomes, "search")
            .into_iter()
            .filter(|theme| theme.name.to_lowercase().contains(&needle))
            .collect();

        info!(query = %query, matches = matches.len(), "Theme search completed");
        matches
    }

    async fn trading_date(&self) -> NaiveDate {
        let probe = ThemeListingProbe::new(Arc::clone(&self.provider));
        self.resolver.resolve(&probe, self.clock.today()).await
    }

    /// Theme tickers on `date`, duplicates removed (first occurrence kept).
    async fn tickers(&self, date: NaiveDate) -> Vec<String> {
        match self.provider.list_theme_tickers(date).await {
            Ok(tickers) => dedupe(tickers),
            Err(e) => {
                warn!(%date, error = %e, "Failed to list theme tickers");
                Vec::new()
            }
        }
    }

    async fn volume_entry(&self, ticker: &str, date: NaiveDate) -> Result<Theme, ProviderError> {
        let name = self.provider.theme_name(ticker).await?;
        let bars = self.provider.theme_daily(ticker, date, date).await?;
        let volume = bars.last().map_or(0, |bar| bar.volume);
        Ok(Theme::new(ticker, name).with_volume(volume))
    }

    async fn surge_entry(&self, ticker: &str, date: NaiveDate) -> Result<Theme, ProviderError> {
        let name = self.provider.theme_name(ticker).await?;
        let members = self.provider.theme_members(ticker, date).await?;

        let bars = stream::iter(members)
            .map(|code| async move {
                let bar = self.provider.instrument_daily(&code, date, date).await;
                (code, bar)
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut surge_count = 0u32;
        let mut total_volume = 0u64;
        for (code, outcome) in bars {
            match outcome {
                Ok(bars) => {
                    if let Some(bar) = bars.last() {
                        if bar.change_pct >= self.surge_threshold_pct {
                            surge_count += 1;
                        }
                        total_volume = total_volume.saturating_add(bar.volume);
                    }
                }
                Err(e) => {
                    warn!(theme = ticker, member = %code, error = %e, "Dropping member bar");
                }
            }
        }

        Ok(Theme::new(ticker, name)
            .with_volume(total_volume)
            .with_surge_count(surge_count))
    }
}

fn dedupe(tickers: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tickers
        .into_iter()
        .filter(|ticker| seen.insert(ticker.clone()))
        .collect()
}

/// Keep successful outcomes, logging and discarding failures.
fn collect_successes(outcomes: Vec<(String, Result<Theme, ProviderError>)>, mode: &str) -> Vec<Theme> {
    outcomes
        .into_iter()
        .filter_map(|(ticker, outcome)| match outcome {
            Ok(theme) => Some(theme),
            Err(e) => {
                warn!(theme = %ticker, mode, error = %e, "Dropping theme");
                None
            }
        })
        .collect()
}

/// Stable descending sort by the ranking metric, truncated to `limit`.
pub fn rank(themes: Vec<Theme>, ranking: ThemeRanking, limit: usize) -> Vec<Theme> {
    let mut ranked = ranking::sort(themes, &[ranking.metric()], &["desc"]);
    ranked.truncate(limit);
    ranked
}
