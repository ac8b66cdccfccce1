//! Harrow Engine - scrape orchestration for session-gated pages.
//!
//! This crate turns a [`ScrapeRequest`] into typed records. Page layouts live
//! in [`ExtractionStrategy`] implementations; the engine owns everything
//! around them: navigation with retries, ready detection, failure
//! classification, pagination, progress reporting and validation.
//!
//! # Features
//!
//! - Single-entity and paginated list scrapes with the same state machine
//! - Ordered failure classification (login wall, rate limit, not found, timeout)
//! - Progress events fanned out to observers that cannot break a scrape
//! - Persistent pacing and degradation for person-profile scrapes
//! - Selector-map strategies loaded from TOML
//!
//! # Example
//!
//! ```rust,ignore
//! use harrow_engine::{scrape, ScrapeOrchestrator, SelectorMap, SelectorStrategy};
//! use std::sync::Arc;
//!
//! let session = restore_session(driver.as_ref(), &store, &config.auth).await?;
//! let orchestrator = ScrapeOrchestrator::new(driver, &config);
//! let strategy = SelectorStrategy::new(SelectorMap::from_toml(&selectors)?);
//! let request = ScrapeRequest::single(EntityKind::Company, ScrapeTarget::parse(url));
//! let record = scrape(&orchestrator, &request, &strategy, &[Arc::new(TracingObserver)]).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod classifier;
pub mod governor;
pub mod orchestrator;
pub mod pagination;
pub mod progress;
#[allow(missing_docs)]
pub mod record;
pub mod strategy;
pub mod validator;

pub use classifier::{ErrorClassifier, FailureOrigin, RawFailure};
pub use governor::{Clock, DegradationMode, GovernorMetrics, RateGovernor, SystemClock};
pub use orchestrator::{ScrapeOrchestrator, ScrapeState};
pub use pagination::{PageSource, PaginationController, PaginationCursor, PaginationPolicy};
pub use progress::{
    ChannelObserver, ObserverError, ObserverFailure, ObserverId, ObserverResult, ProgressEvent,
    ProgressEventKind, ProgressObserver, ProgressReporter, ProgressScope, TracingObserver,
};
pub use record::{
    CompanyRecord, Education, Experience, JobRecord, PersonRecord, PostRecord, TypedRecord,
};
pub use strategy::{
    resolve_target, ExtractionContext, ExtractionMode, ExtractionStrategy, FieldSelector,
    ListExtractionStrategy, ListSelectorMap, RawFieldMap, RawValue, SelectorListStrategy,
    SelectorMap, SelectorStrategy,
};
pub use validator::{parse_count, ResultValidator};

use harrow_browser::PageDriver;
use harrow_core::{AuthConfig, Result, ScrapeRequest};
use harrow_session::{apply_session, AuthMode, AuthenticationController, Session, SessionStore};
use std::sync::Arc;

/// Establish an authenticated session in `driver`.
pub async fn authenticate(
    driver: &dyn PageDriver,
    config: &AuthConfig,
    mode: AuthMode,
) -> Result<Session> {
    AuthenticationController::new(driver, config)
        .authenticate(mode)
        .await
}

/// Load the stored session and install it into `driver`.
///
/// The session is not verified against the platform; callers that need to
/// know should follow up with
/// [`AuthenticationController::is_authenticated`].
pub async fn restore_session(
    driver: &dyn PageDriver,
    store: &SessionStore,
    config: &AuthConfig,
) -> Result<Session> {
    let session = store.load()?;
    apply_session(driver, &session, &config.verify_url).await?;
    tracing::info!(
        "Restored session from {} ({} cookies)",
        store.path().display(),
        session.cookies.len()
    );
    Ok(session)
}

/// Scrape one entity, reporting to `observers` as well as the orchestrator's
/// registered observers. Other requests' events never reach `observers`.
pub async fn scrape(
    orchestrator: &ScrapeOrchestrator,
    request: &ScrapeRequest,
    strategy: &dyn ExtractionStrategy,
    observers: &[Arc<dyn ProgressObserver>],
) -> Result<TypedRecord> {
    orchestrator.scrape_observed(request, strategy, observers).await
}

/// Scrape a result list, reporting to `observers` for this request only.
/// `limit` overrides the request's own cap.
pub async fn scrape_list(
    orchestrator: &ScrapeOrchestrator,
    request: &ScrapeRequest,
    strategy: &dyn ListExtractionStrategy,
    limit: Option<usize>,
    observers: &[Arc<dyn ProgressObserver>],
) -> Result<Vec<TypedRecord>> {
    match limit {
        Some(limit) => {
            let request = request.clone().with_limit(Some(limit));
            orchestrator
                .scrape_list_observed(&request, strategy, observers)
                .await
        }
        None => {
            orchestrator
                .scrape_list_observed(request, strategy, observers)
                .await
        }
    }
}
