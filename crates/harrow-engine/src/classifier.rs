//! Failure classification.
//!
//! [`ErrorClassifier::classify`] maps a [`RawFailure`] (the raw driver error
//! plus whatever page evidence could be collected) to exactly one
//! [`ScrapeError`]. Detectors run in a fixed order and the first match wins:
//!
//! 1. login wall → [`ScrapeError::Authentication`]
//! 2. throttling → [`ScrapeError::RateLimited`]
//! 3. missing / private entity → [`ScrapeError::EntityNotFound`]
//! 4. timeout → [`ScrapeError::ContentTimeout`]
//! 5. anything else → [`ScrapeError::Unknown`]
//!
//! Classification only reads its input, so identical failures always
//! produce identical results.

use harrow_browser::BrowserError;
use harrow_core::{path_has_prefix, AuthConfig, ScrapeError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::time::Duration;

/// Step of the scrape pipeline that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    /// Loading the target URL
    Navigation,
    /// Waiting for the ready marker
    ReadyWait,
    /// Running the extraction strategy
    Extraction,
    /// Moving to the next result page
    Advance,
}

/// A failure as observed, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFailure {
    /// Where it happened
    pub origin: FailureOrigin,
    /// URL that was requested
    pub target: String,
    /// Raw error text
    pub message: String,
    /// Whether the raw error was a timeout
    pub timed_out: bool,
    /// URL the page actually shows
    pub landed_url: Option<String>,
    /// Visible page text, when readable
    pub page_text: Option<String>,
    /// HTTP status, when known
    pub http_status: Option<u16>,
    /// Ready marker being awaited
    pub marker: Option<String>,
    /// How long the failed wait lasted
    pub waited: Option<Duration>,
}

impl RawFailure {
    /// Failure with only a message.
    pub fn new(origin: FailureOrigin, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin,
            target: target.into(),
            message: message.into(),
            timed_out: false,
            landed_url: None,
            page_text: None,
            http_status: None,
            marker: None,
            waited: None,
        }
    }

    /// Failure caused by a driver error.
    pub fn from_browser(origin: FailureOrigin, target: impl Into<String>, error: &BrowserError) -> Self {
        Self {
            timed_out: error.is_timeout(),
            ..Self::new(origin, target, error.to_string())
        }
    }

    /// Attach what the page looked like when the failure happened.
    #[must_use]
    pub fn with_page(mut self, landed_url: Option<String>, page_text: Option<String>) -> Self {
        self.landed_url = landed_url;
        self.page_text = page_text;
        self
    }

    /// Attach the marker and duration of a failed wait.
    #[must_use]
    pub fn with_wait(mut self, marker: impl Into<String>, waited: Duration) -> Self {
        self.marker = Some(marker.into());
        self.waited = Some(waited);
        self
    }

    /// Attach an HTTP status.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Message (with URLs blanked out) and page text.
    fn texts(&self) -> impl Iterator<Item = Cow<'_, str>> {
        std::iter::once(URL_IN_TEXT.replace_all(&self.message, "<url>"))
            .chain(self.page_text.as_deref().map(Cow::Borrowed))
    }
}

static LOGIN_WALL_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(sign in to (view|see|continue)|join (linkedin|now) to (view|see)|you'?re signed out|session (has )?expired|authwall|please log ?in)",
    )
    .expect("login wall regex is valid")
});

static THROTTLE_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(too many requests|\brate.?limit|\bhttp 429\b|unusual (activity|traffic)|slow down|try again later|reached the (weekly|commercial use) limit)",
    )
    .expect("throttle regex is valid")
});

static NOT_FOUND_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(page not found|this page doesn'?t exist|(profile|page|company|job|post|content) (is )?(not|no longer) available|this (profile|account) is private|private profile|isn'?t available|has been removed|\bhttp 404\b)",
    )
    .expect("not found regex is valid")
});

static TIMEOUT_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(timed? ?out|deadline (has )?elapsed)").expect("timeout regex is valid")
});

/// URLs inside error messages; slugs and queries are not page evidence.
static URL_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[a-z][a-z0-9+.-]*://\S+").expect("url regex is valid"));

/// Landed paths of the platform's "entity unavailable" pages.
const NOT_FOUND_PATHS: [&str; 3] = ["/404", "/unavailable", "/in/unavailable"];

/// Ordered detector set mapping raw failures to classified errors.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    auth: AuthConfig,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(&AuthConfig::default())
    }
}

impl ErrorClassifier {
    /// Classifier recognising the login surface described by `auth`.
    #[must_use]
    pub fn new(auth: &AuthConfig) -> Self {
        Self {
            auth: auth.clone(),
        }
    }

    /// Classify `failure`. Total: always returns exactly one error.
    #[must_use]
    pub fn classify(&self, failure: &RawFailure) -> ScrapeError {
        if let Some(error) = self.detect_block(failure) {
            return error;
        }

        if self.is_not_found(failure) {
            return ScrapeError::EntityNotFound {
                target: failure.target.clone(),
                cause: failure.message.clone(),
            };
        }

        if failure.timed_out || failure.texts().next().is_some_and(|t| TIMEOUT_TEXT.is_match(&t)) {
            return ScrapeError::ContentTimeout {
                marker: failure
                    .marker
                    .clone()
                    .unwrap_or_else(|| "page load".to_string()),
                waited: failure.waited.unwrap_or_default(),
            };
        }

        ScrapeError::Unknown {
            cause: format!("{:?} at {}: {}", failure.origin, failure.target, failure.message),
        }
    }

    /// Only the login-wall and throttling detectors.
    ///
    /// Used on freshly loaded pages, where a missing marker is not yet a failure
    /// but a login wall or throttle page already is.
    #[must_use]
    pub fn detect_block(&self, failure: &RawFailure) -> Option<ScrapeError> {
        if self.is_login_wall(failure) {
            return Some(ScrapeError::Authentication {
                url: failure
                    .landed_url
                    .clone()
                    .unwrap_or_else(|| failure.target.clone()),
                cause: failure.message.clone(),
            });
        }

        if failure.http_status == Some(429) || failure.texts().any(|t| THROTTLE_TEXT.is_match(&t))
        {
            return Some(ScrapeError::RateLimited {
                retry_after: None,
                cause: failure.message.clone(),
            });
        }

        None
    }

    fn is_login_wall(&self, failure: &RawFailure) -> bool {
        failure
            .landed_url
            .as_deref()
            .is_some_and(|url| self.auth.is_login_url(url))
            || failure.http_status == Some(401)
            || failure.texts().any(|t| LOGIN_WALL_TEXT.is_match(&t))
    }

    fn is_not_found(&self, failure: &RawFailure) -> bool {
        matches!(failure.http_status, Some(404 | 410))
            || failure.landed_url.as_deref().is_some_and(|url| {
                NOT_FOUND_PATHS
                    .iter()
                    .any(|path| path_has_prefix(url, path))
            })
            || failure.texts().any(|t| NOT_FOUND_TEXT.is_match(&t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harrow_core::ErrorKind;

    const TARGET: &str = "https://www.linkedin.com/in/jane/";

    fn kind(failure: &RawFailure) -> ErrorKind {
        ErrorClassifier::default().classify(failure).kind()
    }

    #[test]
    fn test_login_wall_by_url_and_text() {
        let by_url = RawFailure::new(FailureOrigin::ReadyWait, TARGET, "marker missing")
            .with_page(
                Some("https://www.linkedin.com/authwall?trk=x".to_string()),
                None,
            );
        assert_eq!(kind(&by_url), ErrorKind::Authentication);

        let by_text = RawFailure::new(FailureOrigin::ReadyWait, TARGET, "marker missing")
            .with_page(
                Some(TARGET.to_string()),
                Some("Sign in to view Jane's full profile".to_string()),
            );
        assert_eq!(kind(&by_text), ErrorKind::Authentication);
    }

    #[test]
    fn test_words_in_target_urls_are_not_evidence() {
        let classifier = ErrorClassifier::default();
        for landed in [
            "https://www.linkedin.com/jobs/search/?keywords=rate+limiting+engineer",
            "https://www.linkedin.com/in/ratelimit-jane/",
            "https://www.linkedin.com/company/loginradius/",
            "https://www.linkedin.com/company/404-labs/",
            "https://www.linkedin.com/search/results/people/?keywords=session%20expired",
        ] {
            let failure = RawFailure::new(
                FailureOrigin::Navigation,
                landed,
                format!("{landed}: net::ERR_CONNECTION_RESET"),
            )
            .with_page(Some(landed.to_string()), None);
            assert_eq!(classifier.detect_block(&failure), None, "{landed}");
            assert_eq!(classifier.classify(&failure).kind(), ErrorKind::Unknown, "{landed}");
        }
    }

    #[test]
    fn test_not_found_by_landed_path() {
        let failure = RawFailure::new(FailureOrigin::ReadyWait, TARGET, "marker missing")
            .with_page(Some("https://www.linkedin.com/in/unavailable/".to_string()), None);
        assert_eq!(kind(&failure), ErrorKind::EntityNotFound);
    }

    #[test]
    fn test_detector_order() {
        // A timed-out wait on a login wall is an authentication failure
        let failure = RawFailure::from_browser(
            FailureOrigin::ReadyWait,
            TARGET,
            &BrowserError::Timeout("main not present".to_string()),
        )
        .with_page(Some("https://www.linkedin.com/login".to_string()), None);
        assert_eq!(kind(&failure), ErrorKind::Authentication);

        // Throttling beats not-found
        let failure = RawFailure::new(FailureOrigin::Navigation, TARGET, "page not found")
            .with_status(429);
        assert_eq!(kind(&failure), ErrorKind::RateLimit);

        // Not-found beats timeout
        let failure = RawFailure::new(FailureOrigin::ReadyWait, TARGET, "timed out")
            .with_page(None, Some("This page doesn't exist".to_string()));
        assert_eq!(kind(&failure), ErrorKind::EntityNotFound);
    }

    #[test]
    fn test_timeout_carries_marker() {
        let failure = RawFailure::from_browser(
            FailureOrigin::ReadyWait,
            TARGET,
            &BrowserError::Timeout("selector `main` not present".to_string()),
        )
        .with_wait("main", Duration::from_secs(15));

        assert_eq!(
            ErrorClassifier::default().classify(&failure),
            ScrapeError::ContentTimeout {
                marker: "main".to_string(),
                waited: Duration::from_secs(15),
            }
        );
    }

    #[test]
    fn test_unknown_keeps_raw_cause() {
        let failure = RawFailure::new(FailureOrigin::Extraction, TARGET, "Cannot read properties of null");
        let err = ErrorClassifier::default().classify(&failure);
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.to_string().contains("Cannot read properties of null"));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let failures = [
            RawFailure::new(FailureOrigin::Navigation, TARGET, "net::ERR_CONNECTION_RESET"),
            RawFailure::new(FailureOrigin::ReadyWait, TARGET, "Too Many Requests"),
            RawFailure::new(FailureOrigin::Extraction, TARGET, "").with_status(404),
            RawFailure::new(FailureOrigin::Advance, TARGET, "operation timed out"),
            RawFailure::new(FailureOrigin::ReadyWait, TARGET, "")
                .with_page(Some("https://www.linkedin.com/checkpoint/challenge".to_string()), None),
        ];
        let classifier = ErrorClassifier::default();

        for failure in &failures {
            let first = classifier.classify(failure);
            for _ in 0..10 {
                assert_eq!(classifier.classify(&failure.clone()), first);
            }
        }
        let kinds: Vec<_> = failures.iter().map(kind).collect();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::Unknown,
                ErrorKind::RateLimit,
                ErrorKind::EntityNotFound,
                ErrorKind::ContentTimeout,
                ErrorKind::Authentication,
            ]
        );
    }
}
