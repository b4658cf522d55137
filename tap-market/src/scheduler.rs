//! Cron-driven refresh of the ranked theme and instrument views.
//!
//! # Jobs (exchange time, Asia/Seoul by default)
//!
//! - **Intraday**: every 5 minutes, Mon-Fri 09:00-15:30. Recomputes the
//!   top volume themes and refreshes each theme's instruments.
//! - **End of day**: Mon-Fri 15:40. Recomputes the volume and surge
//!   rankings and refreshes the instruments of their union.
//!
//! # Schedule Configuration
//!
//! ```json
//! {
//!   "schedule": {
//!     "enabled": true,
//!     "intraday": ["0 */5 9-14 * * Mon-Fri", "0 0-30/5 15 * * Mon-Fri"],
//!     "end_of_day": ["0 40 15 * * Mon-Fri"]
//!   }
//! }
//! ```
//!
//! Each run executes on its own task. A failing or panicking run is logged
//! and never stops the schedule; a job whose previous run is still going is
//! skipped for that tick.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tap_common::config::ScheduleConfig;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::model::Theme;
use crate::stocks::StockAggregator;
use crate::themes::ThemeAggregator;

/// Fire times older than this are treated as missed, not run late.
const MISSED_FIRE_GRACE_SECS: i64 = 60;

// ============================================================================
// Jobs & State
// ============================================================================

/// Scheduled refresh job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshJob {
    /// Top volume themes and their instruments
    Intraday,
    /// Volume and surge union and their instruments
    EndOfDay,
}

impl RefreshJob {
    /// Get job name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Intraday => "intraday",
            Self::EndOfDay => "end_of_day",
        }
    }

    pub const ALL: [RefreshJob; 2] = [Self::Intraday, Self::EndOfDay];
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Invalid cron expression for {job}: {expression} ({reason})")]
    InvalidCron {
        job: &'static str,
        expression: String,
        reason: String,
    },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// Outcome of one refresh run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Theme codes whose instruments were refreshed
    pub refreshed: Vec<String>,
    /// Theme codes whose instrument refresh failed
    pub failed: Vec<String>,
}

// ============================================================================
// Refresh Pipeline
// ============================================================================

/// What a refresh run recomputes.
#[async_trait]
pub trait RefreshPipeline: Send + Sync {
    async fn volume_themes(&self, limit: usize) -> anyhow::Result<Vec<Theme>>;

    async fn surge_themes(&self, limit: usize) -> anyhow::Result<Vec<Theme>>;

    async fn refresh_theme_instruments(&self, theme: &Theme) -> anyhow::Result<()>;
}

/// Pipeline backed by the aggregators.
pub struct AggregatorPipeline {
    themes: Arc<ThemeAggregator>,
    stocks: Arc<StockAggregator>,
    stock_limit: usize,
    etf_limit: usize,
}

impl AggregatorPipeline {
    pub fn new(
        themes: Arc<ThemeAggregator>,
        stocks: Arc<StockAggregator>,
        stock_limit: usize,
        etf_limit: usize,
    ) -> Self {
        Self {
            themes,
            stocks,
            stock_limit,
            etf_limit,
        }
    }
}

#[async_trait]
impl RefreshPipeline for AggregatorPipeline {
    async fn volume_themes(&self, limit: usize) -> anyhow::Result<Vec<Theme>> {
        Ok(self.themes.by_volume(limit).await)
    }

    async fn surge_themes(&self, limit: usize) -> anyhow::Result<Vec<Theme>> {
        Ok(self.themes.by_surge(limit).await)
    }

    async fn refresh_theme_instruments(&self, theme: &Theme) -> anyhow::Result<()> {
        let instruments = self
            .stocks
            .fetch_by_theme(&theme.code, self.stock_limit, self.etf_limit)
            .await;
        debug!(
            theme = %theme.code,
            stocks = instruments.stocks.len(),
            etfs = instruments.etfs.len(),
            "Refreshed theme instruments"
        );
        Ok(())
    }
}

/// Union of two rankings by theme code, first occurrence wins.
pub fn merge_refresh_set(volume: Vec<Theme>, surge: Vec<Theme>) -> Vec<Theme> {
    let mut seen = HashSet::new();
    volume
        .into_iter()
        .chain(surge)
        .filter(|theme| seen.insert(theme.code.clone()))
        .collect()
}

/// Execute one job against a pipeline.
pub async fn run_job(
    job: RefreshJob,
    pipeline: &dyn RefreshPipeline,
    theme_limit: usize,
) -> anyhow::Result<RefreshReport> {
    let themes = match job {
        RefreshJob::Intraday => pipeline.volume_themes(theme_limit).await?,
        RefreshJob::EndOfDay => {
            let volume = pipeline.volume_themes(theme_limit).await?;
            let surge = pipeline.surge_themes(theme_limit).await?;
            merge_refresh_set(volume, surge)
        }
    };

    let mut report = RefreshReport::default();
    for theme in &themes {
        match pipeline.refresh_theme_instruments(theme).await {
            Ok(()) => report.refreshed.push(theme.code.clone()),
            Err(e) => {
                warn!(job = job.name(), theme = %theme.code, error = %e, "Theme refresh failed");
                report.failed.push(theme.code.clone());
            }
        }
    }

    Ok(report)
}

/// Latest fire time of `schedule` in `(since, now]`.
pub fn due_fire(schedule: &Schedule, since: &DateTime<Tz>, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    schedule.after(since).take_while(|fire| fire <= now).last()
}

// ============================================================================
// Scheduler
// ============================================================================

/// A parsed schedule with its job
struct ParsedSchedule {
    job: RefreshJob,
    expression: String,
    schedule: Schedule,
}

/// Per-job status.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job: RefreshJob,
    pub expression: String,
    /// RFC 3339, exchange timezone
    pub next_run: Option<String>,
    pub in_flight: bool,
}

/// Scheduler status.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub timezone: String,
    pub jobs: Vec<JobStatus>,
}

struct SchedulerInner {
    pipeline: Arc<dyn RefreshPipeline>,
    schedules: Vec<ParsedSchedule>,
    tz: Tz,
    tick: Duration,
    theme_limit: usize,
    in_flight: HashMap<RefreshJob, Arc<AtomicBool>>,
}

impl SchedulerInner {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    /// Start a run on its own task unless one is already going.
    fn dispatch(&self, job: RefreshJob) -> bool {
        let Some(flag) = self.in_flight.get(&job).cloned() else {
            return false;
        };

        if flag.swap(true, Ordering::SeqCst) {
            warn!(job = job.name(), "Previous run still in flight, skipping");
            return false;
        }

        let pipeline = Arc::clone(&self.pipeline);
        let theme_limit = self.theme_limit;

        tokio::spawn(async move {
            info!(job = job.name(), "Executing scheduled refresh");
            let started = Instant::now();

            let run = tokio::spawn(async move { run_job(job, pipeline.as_ref(), theme_limit).await });

            match run.await {
                Ok(Ok(report)) => info!(
                    job = job.name(),
                    refreshed = report.refreshed.len(),
                    failed = report.failed.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Scheduled refresh completed"
                ),
                Ok(Err(e)) => error!(job = job.name(), error = %e, "Scheduled refresh failed"),
                Err(e) if e.is_panic() => error!(job = job.name(), "Scheduled refresh panicked"),
                Err(e) => warn!(job = job.name(), error = %e, "Scheduled refresh cancelled"),
            }

            flag.store(false, Ordering::SeqCst);
        });

        true
    }
}

/// Owns the refresh schedule and its tick loop.
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
    state: Arc<RwLock<SchedulerState>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    /// Create a scheduler from config, evaluating crons in `timezone`.
    pub fn new(
        pipeline: Arc<dyn RefreshPipeline>,
        config: &ScheduleConfig,
        timezone: &str,
    ) -> Result<Self, SchedulerError> {
        let tz = Tz::from_str(timezone)
            .map_err(|_| SchedulerError::InvalidTimezone(timezone.to_string()))?;

        let mut schedules = Vec::new();
        let groups = [
            (RefreshJob::Intraday, &config.intraday),
            (RefreshJob::EndOfDay, &config.end_of_day),
        ];
        for (job, expressions) in groups {
            for expression in expressions {
                let schedule =
                    Schedule::from_str(expression).map_err(|e| SchedulerError::InvalidCron {
                        job: job.name(),
                        expression: expression.clone(),
                        reason: e.to_string(),
                    })?;
                schedules.push(ParsedSchedule {
                    job,
                    expression: expression.clone(),
                    schedule,
                });
            }
        }

        info!(
            timezone = %tz,
            intraday = ?config.intraday,
            end_of_day = ?config.end_of_day,
            "Scheduler configured"
        );

        let in_flight = RefreshJob::ALL
            .iter()
            .map(|job| (*job, Arc::new(AtomicBool::new(false))))
            .collect();

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                pipeline,
                schedules,
                tz,
                tick: Duration::from_secs(config.tick_secs.max(1)),
                theme_limit: config.theme_limit,
                in_flight,
            }),
            state: Arc::new(RwLock::new(SchedulerState::Stopped)),
            handle: Mutex::new(None),
        })
    }

    /// Get current scheduler state
    pub async fn get_state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// Start the tick loop.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut state = self.state.write().await;
        if *state == SchedulerState::Running {
            return Err(SchedulerError::AlreadyRunning);
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(run_loop(inner));
        *self.handle.lock().await = Some(handle);
        *state = SchedulerState::Running;

        info!(schedules = self.inner.schedules.len(), "Scheduler started");
        Ok(())
    }

    /// Stop the tick loop. In-flight runs finish on their own.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
        if *state == SchedulerState::Running {
            info!("Scheduler stopped");
        }
        *state = SchedulerState::Stopped;
    }

    /// Run a job now, outside its schedule. Returns `false` if skipped
    /// because the previous run is still in flight.
    pub fn trigger(&self, job: RefreshJob) -> bool {
        self.inner.dispatch(job)
    }

    /// Whether a run of `job` is in flight.
    pub fn is_in_flight(&self, job: RefreshJob) -> bool {
        self.inner
            .in_flight
            .get(&job)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Next fire time of each configured expression.
    pub fn get_next_schedules(&self) -> Vec<(RefreshJob, DateTime<Tz>)> {
        let mut next_times: Vec<_> = self
            .inner
            .schedules
            .iter()
            .filter_map(|parsed| {
                parsed
                    .schedule
                    .upcoming(self.inner.tz)
                    .next()
                    .map(|next| (parsed.job, next))
            })
            .collect();

        next_times.sort_by_key(|(_, time)| *time);
        next_times
    }

    pub async fn status(&self) -> SchedulerStatus {
        let jobs = self
            .inner
            .schedules
            .iter()
            .map(|parsed| JobStatus {
                job: parsed.job,
                expression: parsed.expression.clone(),
                next_run: parsed
                    .schedule
                    .upcoming(self.inner.tz)
                    .next()
                    .map(|next| next.to_rfc3339()),
                in_flight: self.is_in_flight(parsed.job),
            })
            .collect();

        SchedulerStatus {
            state: self.get_state().await,
            timezone: self.inner.tz.name().to_string(),
            jobs,
        }
    }
}

/// Tick loop: dispatch every schedule with a fire time since the last tick.
async fn run_loop(inner: Arc<SchedulerInner>) {
    let mut check_interval = interval(inner.tick);
    check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let start = inner.now();
    let mut cursors = vec![start; inner.schedules.len()];

    loop {
        check_interval.tick().await;
        let now = inner.now();

        for (parsed, cursor) in inner.schedules.iter().zip(cursors.iter_mut()) {
            let since = std::mem::replace(cursor, now);
            let Some(fire) = due_fire(&parsed.schedule, &since, &now) else {
                continue;
            };

            if now.signed_duration_since(fire) > chrono::Duration::seconds(MISSED_FIRE_GRACE_SECS) {
                warn!(job = parsed.job.name(), fire = %fire, "Missed fire time, skipping");
                continue;
            }

            inner.dispatch(parsed.job);
        }
    }
}
