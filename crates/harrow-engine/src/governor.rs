//! Person-profile pacing and rate-limit backoff.
//!
//! The governor keeps a small JSON state file so that separate runs share
//! one picture of how hard the account has been used today:
//!
//! - a minimum gap between two profile scrapes (waited out, bounded by the
//!   request deadline)
//! - a daily profile cap (fails fast once reached)
//! - a backoff window after the platform throttled us (fails fast while active)
//!
//! The first rate limit of a day switches to [`DegradationMode::Reduced`] and
//! backs off for the suggested wait; a second one stops profile scraping for
//! the rest of the day. Days are UTC calendar days.

use crate::strategy::ExtractionMode;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use harrow_core::{ConfigResult, Result, ScrapeError, ThrottleConfig};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::time::Instant;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// How much profile scraping is currently allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationMode {
    /// No rate limit seen today
    #[default]
    Normal,
    /// One rate limit today: extract identity fields only
    Reduced,
    /// Repeated rate limits: no more profiles today
    Stopped,
}

/// Snapshot for logging and dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GovernorMetrics {
    pub profiles_today: u32,
    pub rate_limits_today: u32,
    pub mode: DegradationMode,
    pub backoff_remaining: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct GovernorState {
    day: Option<NaiveDate>,
    last_profile_at: Option<DateTime<Utc>>,
    profiles_today: u32,
    rate_limits_today: u32,
    rate_limits_total: u64,
    last_rate_limit_at: Option<DateTime<Utc>>,
    backoff_until: Option<DateTime<Utc>>,
    mode: DegradationMode,
}

impl GovernorState {
    fn roll_over(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.profiles_today = 0;
            self.rate_limits_today = 0;
            self.mode = DegradationMode::Normal;
        }
    }

    fn backoff_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.backoff_until
            .filter(|until| *until > now)
            .and_then(|until| (until - now).to_std().ok())
    }
}

fn end_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    tomorrow
        .and_hms_opt(0, 0, 0)
        .map_or(now, |midnight| midnight.and_utc())
}

/// Persistent pacing state for person-profile scrapes.
pub struct RateGovernor {
    config: ThrottleConfig,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    state: Mutex<GovernorState>,
}

impl RateGovernor {
    /// Governor persisting to the configured (or default) state path.
    pub fn from_config(config: &ThrottleConfig) -> ConfigResult<Self> {
        let path = config.resolved_state_path()?;
        Ok(Self::with_state_file(config.clone(), path))
    }

    /// Governor persisting to `path`; an unreadable state file starts fresh.
    pub fn with_state_file(config: ThrottleConfig, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = load_state(&path);
        Self {
            config,
            path: Some(path),
            clock: Arc::new(SystemClock),
            state: Mutex::new(state),
        }
    }

    /// Governor that keeps its state in memory only.
    #[must_use]
    pub fn in_memory(config: ThrottleConfig) -> Self {
        Self {
            config,
            path: None,
            clock: Arc::new(SystemClock),
            state: Mutex::new(GovernorState::default()),
        }
    }

    /// Replace the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current degradation mode.
    pub fn mode(&self) -> DegradationMode {
        let now = self.clock.now();
        let mut state = self.lock();
        state.roll_over(now);
        state.mode
    }

    /// Extraction depth strategies should use for the next profile.
    pub fn extraction_mode(&self) -> ExtractionMode {
        match self.mode() {
            DegradationMode::Normal => ExtractionMode::Full,
            DegradationMode::Reduced | DegradationMode::Stopped => ExtractionMode::Reduced,
        }
    }

    /// Today's counters.
    pub fn metrics(&self) -> GovernorMetrics {
        let now = self.clock.now();
        let mut state = self.lock();
        state.roll_over(now);
        GovernorMetrics {
            profiles_today: state.profiles_today,
            rate_limits_today: state.rate_limits_today,
            mode: state.mode,
            backoff_remaining: state.backoff_remaining(now),
        }
    }

    /// Wait for permission to start a person-profile scrape, then record it.
    ///
    /// Fails with [`ScrapeError::RateLimited`] without waiting while a backoff
    /// is active or the daily cap is used up, and when the minimum gap would
    /// run past `deadline`.
    pub async fn acquire(&self, deadline: Option<Instant>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let wait = {
            let now = self.clock.now();
            let mut state = self.lock();
            state.roll_over(now);

            if let Some(remaining) = state.backoff_remaining(now) {
                return Err(ScrapeError::RateLimited {
                    retry_after: Some(remaining),
                    cause: format!(
                        "rate-limit backoff active ({} mode) for another {}s",
                        mode_name(state.mode),
                        remaining.as_secs()
                    ),
                });
            }

            if state.profiles_today >= self.config.max_profiles_per_day {
                return Err(ScrapeError::RateLimited {
                    retry_after: (end_of_day(now) - now).to_std().ok(),
                    cause: format!(
                        "daily cap of {} profiles reached",
                        self.config.max_profiles_per_day
                    ),
                });
            }

            let min_gap = Duration::from_secs(self.config.min_delay_between_profiles_secs);
            state
                .last_profile_at
                .and_then(|last| (now - last).to_std().ok())
                .and_then(|elapsed| min_gap.checked_sub(elapsed))
                .unwrap_or_default()
        };

        if !wait.is_zero() {
            if let Some(deadline) = deadline {
                if Instant::now() + wait > deadline {
                    return Err(ScrapeError::RateLimited {
                        retry_after: Some(wait),
                        cause: "minimum delay between profiles exceeds the request deadline"
                            .to_string(),
                    });
                }
            }
            tracing::debug!("Throttle: waiting {:?} before next profile", wait);
            tokio::time::sleep(wait).await;
        }

        let now = self.clock.now();
        let mut state = self.lock();
        state.roll_over(now);
        state.last_profile_at = Some(now);
        state.profiles_today += 1;
        self.persist(&state);
        Ok(())
    }

    /// Record a platform rate limit and escalate the degradation mode.
    pub fn record_rate_limit(&self, retry_after: Option<Duration>) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.roll_over(now);
        state.rate_limits_today += 1;
        state.rate_limits_total += 1;
        state.last_rate_limit_at = Some(now);

        if state.rate_limits_today == 1 {
            let backoff = retry_after
                .unwrap_or_else(|| Duration::from_secs(self.config.rate_limit_backoff_secs));
            state.mode = DegradationMode::Reduced;
            state.backoff_until = ChronoDuration::from_std(backoff).ok().map(|d| now + d);
            tracing::warn!(
                "Rate limit (first today): reduced data mode, backing off {}s",
                backoff.as_secs()
            );
        } else {
            state.mode = DegradationMode::Stopped;
            state.backoff_until = Some(end_of_day(now));
            tracing::warn!(
                "Rate limit (#{} today): stopping profile scrapes until end of day",
                state.rate_limits_today
            );
        }
        self.persist(&state);
    }

    fn lock(&self) -> MutexGuard<'_, GovernorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &GovernorState) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = save_state(path, state) {
            tracing::warn!("Could not save rate-limit state to {}: {}", path.display(), e);
        }
    }
}

fn mode_name(mode: DegradationMode) -> &'static str {
    match mode {
        DegradationMode::Normal => "normal",
        DegradationMode::Reduced => "reduced",
        DegradationMode::Stopped => "stopped",
    }
}

fn load_state(path: &Path) -> GovernorState {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable rate-limit state {}: {}", path.display(), e);
            GovernorState::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => GovernorState::default(),
        Err(e) => {
            tracing::warn!("Could not read rate-limit state {}: {}", path.display(), e);
            GovernorState::default()
        }
    }
}

fn save_state(path: &Path, state: &GovernorState) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let contents = serde_json::to_vec_pretty(state)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(&contents)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
