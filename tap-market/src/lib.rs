//! TAP Market Library
//!
//! Theme analysis for the Korean exchange: ranks theme indices by trading
//! volume or by the number of surging members, lists the lead stocks and
//! ETFs of a theme, builds instrument detail views and fetches news.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      tap-market (Rust Service)                      │
//! │                               :8000                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐      │
//! │  │  Theme / Stock  │  │  News           │  │  Refresh        │      │
//! │  │  Aggregators    │  │  Fetcher        │  │  Scheduler      │      │
//! │  └────────┬────────┘  └─────────────────┘  └─────────────────┘      │
//! │           │ MarketDataProvider (KRX data portal)                    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Trading date
//! - Every aggregation first resolves the most recent date with data,
//!   walking back up to 7 days from today in exchange time
//!
//! ## Partial failure
//! - A theme or member that fails to load is dropped; an aggregation that
//!   fails as a whole returns an empty result instead of an error

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod calendar;
pub mod data;
pub mod model;
pub mod news;
pub mod ranking;
pub mod routes;
pub mod scheduler;
pub mod stocks;
pub mod themes;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tap_common::config::Config;
use tracing::{info, warn};

use crate::calendar::MarketClock;
use crate::data::{KrxAdapter, MarketDataProvider};
use crate::model::{InstrumentDetailView, NewsItem, Theme, ThemeInstruments};
use crate::news::NewsFetcher;
use crate::scheduler::{AggregatorPipeline, RefreshScheduler, SchedulerError, SchedulerStatus};
use crate::stocks::StockAggregator;
use crate::themes::{ThemeAggregator, ThemeRanking};

/// Shared service state behind every route and scheduled job.
pub struct MarketService {
    /// Configuration
    pub config: Config,
    /// Theme rankings and search
    pub themes: Arc<ThemeAggregator>,
    /// Theme members and instrument details
    pub stocks: Arc<StockAggregator>,
    /// News fallback chain
    pub news: Arc<NewsFetcher>,
    /// Refresh scheduler, absent when disabled
    pub scheduler: Option<Arc<RefreshScheduler>>,
}

impl MarketService {
    /// Create the service against the KRX data portal.
    pub fn new(config: Config) -> Result<Self> {
        let provider: Arc<dyn MarketDataProvider> = Arc::new(KrxAdapter::from_config(&config.market));
        let news = NewsFetcher::from_config(&config.news);
        let clock = MarketClock::from_name(&config.market.timezone)?;

        if config.naver_credentials().is_none() {
            warn!("Naver credentials not configured, news served from Google News only");
        }

        Self::with_parts(config, provider, news, clock)
    }

    /// Create the service over an arbitrary provider, news chain and clock.
    pub fn with_parts(
        config: Config,
        provider: Arc<dyn MarketDataProvider>,
        news: NewsFetcher,
        clock: MarketClock,
    ) -> Result<Self> {
        let themes = Arc::new(
            ThemeAggregator::new(Arc::clone(&provider), clock.clone())
                .with_concurrency(config.market.fetch_concurrency)
                .with_surge_threshold(config.ranking.surge_threshold_pct),
        );
        let stocks = Arc::new(
            StockAggregator::new(provider, clock)
                .with_concurrency(config.market.fetch_concurrency)
                .with_reference_instrument(config.market.reference_instrument.clone()),
        );

        let scheduler = if config.schedule.enabled {
            let pipeline = Arc::new(AggregatorPipeline::new(
                Arc::clone(&themes),
                Arc::clone(&stocks),
                config.ranking.stock_limit,
                config.ranking.etf_limit,
            ));
            let scheduler = RefreshScheduler::new(pipeline, &config.schedule, &config.market.timezone)
                .context("Failed to configure refresh scheduler")?;
            Some(Arc::new(scheduler))
        } else {
            info!("Refresh scheduler disabled");
            None
        };

        Ok(Self {
            config,
            themes,
            stocks,
            news: Arc::new(news),
            scheduler,
        })
    }

    /// Top themes under `ranking`, at most `limit`.
    pub async fn list_themes(&self, ranking: ThemeRanking, limit: usize) -> Vec<Theme> {
        self.themes.top_themes(ranking, limit).await
    }

    pub async fn search_themes(&self, query: &str) -> Vec<Theme> {
        self.themes.search(query).await
    }

    pub async fn theme_instruments(&self, theme_code: &str) -> ThemeInstruments {
        self.stocks
            .fetch_by_theme(
                theme_code,
                self.config.ranking.stock_limit,
                self.config.ranking.etf_limit,
            )
            .await
    }

    pub async fn instrument_detail(&self, code: &str, period: &str) -> InstrumentDetailView {
        self.stocks.fetch_detail(code, period).await
    }

    /// Resolved instrument name and its latest news.
    pub async fn instrument_news(&self, code: &str, limit: usize) -> (String, Vec<NewsItem>) {
        let name = self.stocks.resolve_name(code).await;
        let news = self.news.fetch_stock_news(&name, limit).await;
        (name, news)
    }

    /// Start the refresh scheduler. A disabled scheduler is a no-op.
    pub async fn start_scheduler(&self) -> std::result::Result<(), SchedulerError> {
        match &self.scheduler {
            Some(scheduler) => scheduler.start().await,
            None => Ok(()),
        }
    }

    pub async fn stop_scheduler(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop().await;
        }
    }

    pub async fn scheduler_status(&self) -> Option<SchedulerStatus> {
        match &self.scheduler {
            Some(scheduler) => Some(scheduler.status().await),
            None => None,
        }
    }
}

/// Main TAP service
pub struct TapService {
    state: Arc<MarketService>,
}

impl TapService {
    /// Create a new service against the KRX data portal
    pub fn new(config: Config) -> Result<Self> {
        let state = Arc::new(MarketService::new(config)?);
        Ok(Self { state })
    }

    pub fn state(&self) -> Arc<MarketService> {
        Arc::clone(&self.state)
    }

    /// Start the scheduler and serve HTTP until Ctrl-C.
    pub async fn start(self) -> Result<()> {
        let app = routes::build_router(self.state.clone());

        self.state.start_scheduler().await?;

        if let Some(scheduler) = &self.state.scheduler {
            for (job, next) in scheduler.get_next_schedules() {
                info!(job = job.name(), next = %next, "Next scheduled refresh");
            }
        }

        let addr: SocketAddr = self.state.config.bind_address().parse()?;
        info!(address = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.state.stop_scheduler().await;
        info!("Service stopped");

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
