//! Scrape orchestrator.
//!
//! [`ScrapeOrchestrator`] runs one request at a time through
//! `Idle -> Navigating -> WaitingReady -> Extracting -> Validating -> Done`,
//! with `Failed` reachable from every working state. Each transition emits a
//! progress event for the request. Failures are classified into
//! [`ScrapeError`] kinds before they leave the orchestrator.
//!
//! Navigation is retried with linear backoff; page-level blocks (login wall,
//! rate limit, missing entity) are surfaced on the first attempt because
//! retrying them only makes matters worse.

use crate::classifier::{ErrorClassifier, FailureOrigin, RawFailure};
use crate::governor::RateGovernor;
use crate::pagination::{PageSource, PaginationController, PaginationCursor, PaginationPolicy};
use crate::progress::{ProgressObserver, ProgressReporter, ProgressScope};
use crate::record::TypedRecord;
use crate::strategy::{
    resolve_target, ExtractionContext, ExtractionMode, ExtractionStrategy,
    ListExtractionStrategy, RawValue,
};
use crate::validator::ResultValidator;
use async_trait::async_trait;
use harrow_browser::{BrowserError, PageDriver};
use harrow_core::{
    AppConfig, Cardinality, EntityKind, Result, ScrapeError, ScrapeRequest, ScrapingConfig,
};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Where a request currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeState {
    /// No request running
    Idle,
    /// Loading the target page (or the next result page)
    Navigating,
    /// Waiting for the ready marker
    WaitingReady,
    /// Strategy is reading the page
    Extracting,
    /// Raw fields are being turned into records
    Validating,
    /// Last request succeeded
    Done,
    /// Last request failed
    Failed,
}

impl ScrapeState {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Navigating => "navigating",
            Self::WaitingReady => "waiting_ready",
            Self::Extracting => "extracting",
            Self::Validating => "validating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ScrapeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives single-entity and list scrapes over one page driver.
pub struct ScrapeOrchestrator {
    driver: Arc<dyn PageDriver>,
    scraping: ScrapingConfig,
    classifier: ErrorClassifier,
    reporter: ProgressReporter,
    governor: Option<Arc<RateGovernor>>,
    state: Mutex<ScrapeState>,
}

impl ScrapeOrchestrator {
    /// Create an orchestrator using `config`'s scraping and auth settings.
    #[must_use]
    pub fn new(driver: Arc<dyn PageDriver>, config: &AppConfig) -> Self {
        Self {
            driver,
            scraping: config.scraping.clone(),
            classifier: ErrorClassifier::new(&config.auth),
            reporter: ProgressReporter::new(),
            governor: None,
            state: Mutex::new(ScrapeState::Idle),
        }
    }

    /// Pace person-profile scrapes through `governor`.
    #[must_use]
    pub fn with_governor(mut self, governor: Arc<RateGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Replace the progress reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Reporter observers register with.
    #[must_use]
    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    /// The page driver.
    #[must_use]
    pub fn driver(&self) -> &dyn PageDriver {
        self.driver.as_ref()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ScrapeState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scrape one entity.
    ///
    /// For URL targets the record's `linkedin_url` is the requested URL,
    /// whatever the page itself links to.
    pub async fn scrape(
        &self,
        request: &ScrapeRequest,
        strategy: &dyn ExtractionStrategy,
    ) -> Result<TypedRecord> {
        self.scrape_observed(request, strategy, &[]).await
    }

    /// [`scrape`](Self::scrape), with `observers` receiving this request's
    /// events on top of the reporter's registered observers.
    pub async fn scrape_observed(
        &self,
        request: &ScrapeRequest,
        strategy: &dyn ExtractionStrategy,
        observers: &[Arc<dyn ProgressObserver>],
    ) -> Result<TypedRecord> {
        let scope = self.begin(request, observers);
        let result = self.run_single(request, strategy, &scope).await;
        self.finish(request, &scope, result, |record| {
            format!("Scraped {}", record.linkedin_url())
        })
    }

    /// Scrape a paginated result list.
    ///
    /// Collects up to the request's limit (the configured default when
    /// unset). Items failing validation are skipped; a page whose items all
    /// fail counts as empty.
    pub async fn scrape_list(
        &self,
        request: &ScrapeRequest,
        strategy: &dyn ListExtractionStrategy,
    ) -> Result<Vec<TypedRecord>> {
        self.scrape_list_observed(request, strategy, &[]).await
    }

    /// [`scrape_list`](Self::scrape_list) with per-request observers.
    pub async fn scrape_list_observed(
        &self,
        request: &ScrapeRequest,
        strategy: &dyn ListExtractionStrategy,
        observers: &[Arc<dyn ProgressObserver>],
    ) -> Result<Vec<TypedRecord>> {
        let scope = self.begin(request, observers);
        let result = self.run_list(request, strategy, &scope).await;
        self.finish(request, &scope, result, |records| {
            format!("Collected {} records", records.len())
        })
    }

    fn begin(
        &self,
        request: &ScrapeRequest,
        observers: &[Arc<dyn ProgressObserver>],
    ) -> ProgressScope<'_> {
        self.set_state(ScrapeState::Idle);
        tracing::info!(
            request = %request.id(),
            kind = %request.kind(),
            "Scraping {}",
            request.target()
        );
        let scope = self.reporter.scope_with(request, observers);
        scope.started();
        scope
    }

    fn finish<T>(
        &self,
        request: &ScrapeRequest,
        scope: &ProgressScope<'_>,
        result: Result<T>,
        summary: impl FnOnce(&T) -> String,
    ) -> Result<T> {
        match &result {
            Ok(value) => {
                self.set_state(ScrapeState::Done);
                let summary = summary(value);
                tracing::info!(request = %request.id(), "{}", summary);
                scope.completed(summary);
            }
            Err(e) => {
                self.set_state(ScrapeState::Failed);
                tracing::error!(
                    request = %request.id(),
                    kind = %e.kind(),
                    "Scrape of {} failed: {}",
                    request.target(),
                    e
                );
                scope.failed(e);
            }
        }
        result
    }

    async fn run_single(
        &self,
        request: &ScrapeRequest,
        strategy: &dyn ExtractionStrategy,
        scope: &ProgressScope<'_>,
    ) -> Result<TypedRecord> {
        check_request(request, Cardinality::Single, strategy.kind())?;
        let deadline = request.deadline().map(Instant::from_std);
        let url = resolve_target(request.target(), request.kind(), strategy.search_url())?;

        let governor = self
            .governor
            .as_deref()
            .filter(|_| request.kind() == EntityKind::Person);
        let mode = match governor {
            Some(governor) => {
                governor.acquire(deadline).await?;
                governor.extraction_mode()
            }
            None => ExtractionMode::Full,
        };
        let ctx = ExtractionContext {
            target_url: url.clone(),
            mode,
        };

        let result = self.load_and_extract(request, strategy, &ctx, deadline, scope).await;
        if let (Some(governor), Err(ScrapeError::RateLimited { retry_after, .. })) =
            (governor, &result)
        {
            governor.record_rate_limit(*retry_after);
        }
        result
    }

    async fn load_and_extract(
        &self,
        request: &ScrapeRequest,
        strategy: &dyn ExtractionStrategy,
        ctx: &ExtractionContext,
        deadline: Option<Instant>,
        scope: &ProgressScope<'_>,
    ) -> Result<TypedRecord> {
        let url = ctx.target_url.as_str();

        self.transition(scope, ScrapeState::Navigating, 10, format!("Navigating to {url}"));
        self.navigate(url, deadline).await?;

        self.transition(scope, ScrapeState::WaitingReady, 30, "Waiting for page content");
        self.wait_ready(url, strategy.ready_marker(), deadline).await?;

        self.transition(scope, ScrapeState::Extracting, 60, "Extracting fields");
        let extracted = within(deadline, "extraction", strategy.extract(self.driver(), ctx)).await?;
        let mut raw = match extracted {
            Ok(raw) => raw,
            Err(e) => return Err(self.classify_browser(FailureOrigin::Extraction, url, &e).await),
        };

        self.transition(scope, ScrapeState::Validating, 85, "Validating record");
        if request.target().as_url().is_some() {
            raw.insert("linkedin_url".to_string(), RawValue::text(url));
        }
        ResultValidator::validate(request.kind(), &raw).map_err(|e| match e {
            ScrapeError::Validation { entity, field } => ScrapeError::EntityNotFound {
                target: url.to_string(),
                cause: format!("{entity} page is missing required field `{field}`"),
            },
            other => other,
        })
    }

    async fn run_list(
        &self,
        request: &ScrapeRequest,
        strategy: &dyn ListExtractionStrategy,
        scope: &ProgressScope<'_>,
    ) -> Result<Vec<TypedRecord>> {
        check_request(request, Cardinality::List, strategy.kind())?;
        let deadline = request.deadline().map(Instant::from_std);
        let url = resolve_target(request.target(), request.kind(), strategy.search_url())?;
        let limit = request.limit().unwrap_or(self.scraping.default_list_limit);
        let ctx = ExtractionContext {
            target_url: url.clone(),
            mode: ExtractionMode::Full,
        };

        self.transition(scope, ScrapeState::Navigating, 5, format!("Navigating to {url}"));
        self.navigate(&url, deadline).await?;
        self.transition(scope, ScrapeState::WaitingReady, 10, "Waiting for first result page");
        self.wait_ready(&url, strategy.ready_marker(), deadline).await?;

        let controller = PaginationController::new(PaginationPolicy {
            limit: Some(limit),
            max_consecutive_empty_pages: self.scraping.max_consecutive_empty_pages,
        });
        let mut pages = StrategyPages {
            orchestrator: self,
            strategy,
            kind: request.kind(),
            ctx: &ctx,
            deadline,
            scope,
        };
        controller
            .run(&mut pages, |cursor| {
                scope.progress(
                    list_percent(cursor.accumulated(), limit),
                    format!(
                        "{} of {} records after {} page(s)",
                        cursor.accumulated(),
                        limit,
                        cursor.pages_fetched()
                    ),
                );
            })
            .await
    }

    /// Navigate with retries. Page-level blocks are not retried.
    async fn navigate(&self, url: &str, deadline: Option<Instant>) -> Result<()> {
        let attempts = self.scraping.navigation_attempts.max(1);
        let mut last_cause = String::new();

        for attempt in 1..=attempts {
            match within(deadline, "navigation", self.driver.navigate(url)).await? {
                Ok(()) => return self.check_landing(url).await,
                Err(e) => {
                    let failure = RawFailure::from_browser(FailureOrigin::Navigation, url, &e);
                    match self.classifier.classify(&failure) {
                        blocked @ (ScrapeError::Authentication { .. }
                        | ScrapeError::RateLimited { .. }
                        | ScrapeError::EntityNotFound { .. }) => return Err(blocked),
                        _ => last_cause = e.to_string(),
                    }
                }
            }

            if attempt < attempts {
                let delay = self.scraping.retry_delay(attempt);
                tracing::warn!(
                    "Navigation to {} failed (attempt {}/{}), retrying in {:?}: {}",
                    url,
                    attempt,
                    attempts,
                    delay,
                    last_cause
                );
                within(deadline, "navigation retry", tokio::time::sleep(delay)).await?;
            }
        }

        Err(ScrapeError::Navigation {
            url: url.to_string(),
            attempts,
            cause: last_cause,
        })
    }

    /// Catch redirects onto login or checkpoint pages. Only the landed path
    /// is considered here; page text is consulted once something actually fails.
    async fn check_landing(&self, url: &str) -> Result<()> {
        let landed = self.driver.current_url().await.ok();
        let failure = RawFailure::new(
            FailureOrigin::Navigation,
            url,
            format!("landed on {}", landed.as_deref().unwrap_or("an unknown page")),
        )
        .with_page(landed, None);
        match self.classifier.detect_block(&failure) {
            Some(blocked) => Err(blocked),
            None => Ok(()),
        }
    }

    async fn wait_ready(&self, url: &str, marker: &str, deadline: Option<Instant>) -> Result<()> {
        let mut wait = self.scraping.ready_timeout();
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ScrapeError::ContentTimeout {
                    marker: marker.to_string(),
                    waited: Duration::ZERO,
                });
            }
            wait = wait.min(remaining);
        }

        let waited = within(deadline, marker, self.driver.wait_for(marker, wait)).await?;
        match waited {
            Ok(()) => Ok(()),
            Err(e) => {
                let (landed, text) = self.evidence().await;
                let failure = RawFailure::from_browser(FailureOrigin::ReadyWait, url, &e)
                    .with_page(landed, text)
                    .with_wait(marker, wait);
                Err(self.classifier.classify(&failure))
            }
        }
    }

    async fn classify_browser(
        &self,
        origin: FailureOrigin,
        url: &str,
        error: &BrowserError,
    ) -> ScrapeError {
        let (landed, text) = self.evidence().await;
        let failure = RawFailure::from_browser(origin, url, error).with_page(landed, text);
        self.classifier.classify(&failure)
    }

    async fn evidence(&self) -> (Option<String>, Option<String>) {
        let landed = self.driver.current_url().await.ok();
        let text = self.driver.page_text().await.ok();
        (landed, text)
    }

    fn transition(
        &self,
        scope: &ProgressScope<'_>,
        state: ScrapeState,
        percent: u8,
        message: impl Into<String>,
    ) {
        self.set_state(state);
        tracing::debug!(request = %scope.request_id(), state = %state, "State transition");
        scope.progress(percent, message);
    }

    fn set_state(&self, state: ScrapeState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Result pages of a list strategy, validated item by item.
struct StrategyPages<'a> {
    orchestrator: &'a ScrapeOrchestrator,
    strategy: &'a dyn ListExtractionStrategy,
    kind: EntityKind,
    ctx: &'a ExtractionContext,
    deadline: Option<Instant>,
    scope: &'a ProgressScope<'a>,
}

#[async_trait]
impl PageSource for StrategyPages<'_> {
    type Item = TypedRecord;

    async fn fetch(&mut self, cursor: &PaginationCursor) -> Result<Vec<TypedRecord>> {
        let o = self.orchestrator;
        let url = self.ctx.target_url.as_str();
        let page = cursor.page_index() + 1;

        o.transition(
            self.scope,
            ScrapeState::Extracting,
            self.scope.percent(),
            format!("Extracting result page {page}"),
        );
        let extracted = within(
            self.deadline,
            "extraction",
            self.strategy.extract_items(o.driver(), self.ctx),
        )
        .await?;
        let raws = match extracted {
            Ok(raws) => raws,
            Err(e) => return Err(o.classify_browser(FailureOrigin::Extraction, url, &e).await),
        };

        o.transition(
            self.scope,
            ScrapeState::Validating,
            self.scope.percent(),
            format!("Validating {} item(s) from page {page}", raws.len()),
        );
        let mut records = Vec::with_capacity(raws.len());
        for (index, raw) in raws.iter().enumerate() {
            match ResultValidator::validate(self.kind, raw) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping item {} on page {}: {}", index + 1, page, e),
            }
        }
        Ok(records)
    }

    async fn has_more(&mut self) -> Result<bool> {
        let o = self.orchestrator;
        match self.strategy.has_next_page(o.driver()).await {
            Ok(more) => Ok(more),
            Err(e) => {
                let url = self.ctx.target_url.as_str();
                Err(o.classify_browser(FailureOrigin::Advance, url, &e).await)
            }
        }
    }

    async fn advance(&mut self, cursor: &PaginationCursor) -> Result<()> {
        let o = self.orchestrator;
        let url = self.ctx.target_url.as_str();

        o.transition(
            self.scope,
            ScrapeState::Navigating,
            self.scope.percent(),
            format!("Loading result page {}", cursor.page_index() + 2),
        );
        let advanced = within(self.deadline, "pagination", self.strategy.advance(o.driver())).await?;
        if let Err(e) = advanced {
            return Err(o.classify_browser(FailureOrigin::Advance, url, &e).await);
        }
        o.check_landing(url).await?;

        o.transition(
            self.scope,
            ScrapeState::WaitingReady,
            self.scope.percent(),
            "Waiting for result page",
        );
        o.wait_ready(url, self.strategy.ready_marker(), self.deadline).await
    }
}

fn check_request(request: &ScrapeRequest, cardinality: Cardinality, kind: EntityKind) -> Result<()> {
    if request.cardinality() != cardinality {
        return Err(ScrapeError::Unknown {
            cause: format!(
                "request {} is a {:?} request; use the matching scrape operation",
                request.id(),
                request.cardinality()
            ),
        });
    }
    if request.kind() != kind {
        return Err(ScrapeError::Unknown {
            cause: format!(
                "request {} wants {} records but the strategy produces {}",
                request.id(),
                request.kind(),
                kind
            ),
        });
    }
    Ok(())
}

/// Percentage for a list scrape with `accumulated` of `limit` items: 10 once
/// the first page is up, approaching 99 as the limit fills.
fn list_percent(accumulated: usize, limit: usize) -> u8 {
    let share = accumulated.saturating_mul(89) / limit.max(1);
    u8::try_from(10 + share.min(89)).unwrap_or(99)
}

/// Run `fut`, failing with a timeout once `deadline` passes.
async fn within<F: Future>(deadline: Option<Instant>, what: &str, fut: F) -> Result<F::Output> {
    let Some(deadline) = deadline else {
        return Ok(fut.await);
    };
    let started = Instant::now();
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| ScrapeError::ContentTimeout {
            marker: what.to_string(),
            waited: started.elapsed(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_percent_range() {
        assert_eq!(list_percent(0, 10), 10);
        assert_eq!(list_percent(5, 10), 54);
        assert_eq!(list_percent(10, 10), 99);
        assert_eq!(list_percent(40, 10), 99);
        assert_eq!(list_percent(3, 0), 99);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ScrapeState::WaitingReady.to_string(), "waiting_ready");
        assert_eq!(ScrapeState::Failed.as_str(), "failed");
    }

    #[test]
    fn test_check_request_rejects_mismatches() {
        use harrow_core::ScrapeTarget;

        let single = ScrapeRequest::single(
            EntityKind::Company,
            ScrapeTarget::Url("https://www.linkedin.com/company/acme/".to_string()),
        );
        assert!(check_request(&single, Cardinality::Single, EntityKind::Company).is_ok());
        assert!(check_request(&single, Cardinality::List, EntityKind::Company).is_err());
        assert!(check_request(&single, Cardinality::Single, EntityKind::Job).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_deadline() {
        let deadline = Instant::now() + Duration::from_secs(1);
        let err = within(Some(deadline), "marker", tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        match err {
            ScrapeError::ContentTimeout { marker, waited } => {
                assert_eq!(marker, "marker");
                assert!(waited >= Duration::from_secs(1) && waited < Duration::from_secs(2));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(within(None, "marker", async { 7 }).await.unwrap(), 7);
    }
}
