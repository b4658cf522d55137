//! Trading date resolution.
//!
//! The provider publishes nothing on weekends, holidays and before the
//! first post-open batch. [`TradingCalendarResolver`] walks back from today
//! until a [`DateProbe`] reports data.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::data::{MarketDataProvider, ProviderError};

/// Days probed, starting with today.
pub const LOOKBACK_DAYS: i64 = 7;

// ============================================================================
// Probes
// ============================================================================

/// Existence check for provider data on a date.
#[async_trait]
pub trait DateProbe: Send + Sync {
    /// Probe name for logging
    fn name(&self) -> &'static str;

    /// Whether the provider has data on `date`.
    async fn has_data(&self, date: NaiveDate) -> Result<bool, ProviderError>;
}

/// Does the theme market list any tickers on the date.
pub struct ThemeListingProbe {
    provider: Arc<dyn MarketDataProvider>,
}

impl ThemeListingProbe {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl DateProbe for ThemeListingProbe {
    fn name(&self) -> &'static str {
        "theme_listing"
    }

    async fn has_data(&self, date: NaiveDate) -> Result<bool, ProviderError> {
        Ok(!self.provider.list_theme_tickers(date).await?.is_empty())
    }
}

/// Does a reference instrument have a daily bar on the date.
pub struct InstrumentBarProbe {
    provider: Arc<dyn MarketDataProvider>,
    code: String,
}

impl InstrumentBarProbe {
    pub fn new(provider: Arc<dyn MarketDataProvider>, code: impl Into<String>) -> Self {
        Self {
            provider,
            code: code.into(),
        }
    }
}

#[async_trait]
impl DateProbe for InstrumentBarProbe {
    fn name(&self) -> &'static str {
        "instrument_bar"
    }

    async fn has_data(&self, date: NaiveDate) -> Result<bool, ProviderError> {
        Ok(!self
            .provider
            .instrument_daily(&self.code, date, date)
            .await?
            .is_empty())
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Finds the most recent date with provider data.
#[derive(Debug, Clone, Copy)]
pub struct TradingCalendarResolver {
    lookback_days: i64,
}

impl Default for TradingCalendarResolver {
    fn default() -> Self {
        Self {
            lookback_days: LOOKBACK_DAYS,
        }
    }
}

impl TradingCalendarResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe `today, today-1, ..` and return the first date with data.
    ///
    /// A probe error counts as "no data". When every probe comes back empty
    /// the unvalidated `today` is returned, and downstream fetches will
    /// likely come back empty too.
    pub async fn resolve(&self, probe: &dyn DateProbe, today: NaiveDate) -> NaiveDate {
        if let Some(date) = self.find(probe, today).await {
            return date;
        }

        warn!(
            probe = probe.name(),
            %today,
            lookback_days = self.lookback_days,
            "No trading date found, falling back to today"
        );
        today
    }

    /// Like [`resolve`](Self::resolve), but `None` when every probe is empty.
    pub async fn find(&self, probe: &dyn DateProbe, today: NaiveDate) -> Option<NaiveDate> {
        for offset in 0..self.lookback_days {
            let date = today - Duration::days(offset);
            match probe.has_data(date).await {
                Ok(true) => {
                    debug!(probe = probe.name(), %date, offset, "Resolved trading date");
                    return Some(date);
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(probe = probe.name(), %date, error = %e, "Date probe failed");
                }
            }
        }
        None
    }
}

// ============================================================================
// Market Clock
// ============================================================================

/// Wall clock in the exchange timezone.
///
/// Tests pin the date with [`MarketClock::fixed`].
#[derive(Debug, Clone)]
pub struct MarketClock {
    tz: Tz,
    fixed_today: Option<NaiveDate>,
}

impl MarketClock {
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            fixed_today: None,
        }
    }

    /// Parse an IANA timezone name.
    pub fn from_name(name: &str) -> anyhow::Result<Self> {
        let tz: Tz = name
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid timezone {name}: {e}"))?;
        Ok(Self::new(tz))
    }

    /// A clock whose "today" never changes.
    pub fn fixed(today: NaiveDate) -> Self {
        Self {
            tz: chrono_tz::Asia::Seoul,
            fixed_today: Some(today),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Today's date in the exchange timezone.
    pub fn today(&self) -> NaiveDate {
        self.fixed_today
            .unwrap_or_else(|| Utc::now().with_timezone(&self.tz).date_naive())
    }
}

impl Default for MarketClock {
    fn default() -> Self {
        Self::new(chrono_tz::Asia::Seoul)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers from a script indexed by offset from `today`.
    struct ScriptedProbe {
        today: NaiveDate,
        answers: Vec<Result<bool, ProviderError>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DateProbe for ScriptedProbe {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn has_data(&self, date: NaiveDate) -> Result<bool, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let offset = (self.today - date).num_days() as usize;
            self.answers.get(offset).cloned().unwrap_or(Ok(false))
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
    }

    #[tokio::test]
    async fn test_resolves_first_date_with_data() {
        let probe = ScriptedProbe {
            today: today(),
            answers: vec![Ok(false), Ok(false), Ok(false), Ok(true), Ok(true)],
            calls: AtomicUsize::new(0),
        };
        let resolved = TradingCalendarResolver::new().resolve(&probe, today()).await;
        assert_eq!(resolved, today() - Duration::days(3));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_probe_error_counts_as_empty() {
        let probe = ScriptedProbe {
            today: today(),
            answers: vec![Err(ProviderError::Network("reset".into())), Ok(true)],
            calls: AtomicUsize::new(0),
        };
        let resolved = TradingCalendarResolver::new().resolve(&probe, today()).await;
        assert_eq!(resolved, today() - Duration::days(1));
    }

    #[tokio::test]
    async fn test_exhausted_probes_fall_back_to_today() {
        let probe = ScriptedProbe {
            today: today(),
            answers: vec![],
            calls: AtomicUsize::new(0),
        };
        let resolved = TradingCalendarResolver::new().resolve(&probe, today()).await;
        assert_eq!(resolved, today());
        assert_eq!(probe.calls.load(Ordering::SeqCst), LOOKBACK_DAYS as usize);
    }

    #[test]
    fn test_fixed_clock() {
        let clock = MarketClock::fixed(today());
        assert_eq!(clock.today(), today());
        assert_eq!(clock.timezone(), chrono_tz::Asia::Seoul);
    }

    #[test]
    fn test_clock_from_name() {
        assert!(MarketClock::from_name("Asia/Seoul").is_ok());
        assert!(MarketClock::from_name("Nowhere/City").is_err());
    }
}
