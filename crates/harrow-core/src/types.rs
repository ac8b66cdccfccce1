//! Shared types used across the harrow crates.
//!
//! A [`ScrapeRequest`] names what to fetch (a [`ScrapeTarget`]), which record
//! type to build from it ([`EntityKind`]) and whether the target yields one
//! record or a paginated list ([`Cardinality`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

/// Record types the engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Person profile
    Person,
    /// Company / organization page
    Company,
    /// Job posting
    Job,
    /// Social post
    Post,
}

impl EntityKind {
    /// Stable lowercase name used in logs and progress events.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Company => "company",
            Self::Job => "job",
            Self::Post => "post",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a target produces one record or a paginated sequence of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// One entity page, one record
    Single,
    /// Result list spread over one or more pages
    List,
}

/// What to scrape: a direct page URL or search terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeTarget {
    /// Absolute http(s) URL of the entity or list page
    Url(String),
    /// Search terms, resolved to a URL by the extraction strategy
    Query(String),
}

impl ScrapeTarget {
    /// Interpret user input: absolute http(s) URLs become [`ScrapeTarget::Url`],
    /// anything else is treated as search terms.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        match url::Url::parse(trimmed) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Url(trimmed.to_string()),
            _ => Self::Query(trimmed.to_string()),
        }
    }

    /// The URL, when this target is one.
    #[must_use]
    pub fn as_url(&self) -> Option<&str> {
        match self {
            Self::Url(url) => Some(url),
            Self::Query(_) => None,
        }
    }
}

impl fmt::Display for ScrapeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::Query(terms) => write!(f, "query:{terms}"),
        }
    }
}

/// Identifier scoping progress events to one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new random request ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable description of one scrape.
///
/// Built with [`ScrapeRequest::single`] or [`ScrapeRequest::list`] and
/// optionally given a deadline; the orchestrator only ever borrows it.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    id: RequestId,
    target: ScrapeTarget,
    kind: EntityKind,
    cardinality: Cardinality,
    limit: Option<usize>,
    deadline: Option<Instant>,
}

impl ScrapeRequest {
    /// Request for a single entity page.
    #[must_use]
    pub fn single(kind: EntityKind, target: ScrapeTarget) -> Self {
        Self {
            id: RequestId::generate(),
            target,
            kind,
            cardinality: Cardinality::Single,
            limit: None,
            deadline: None,
        }
    }

    /// Request for a paginated list of entities, optionally capped at `limit` records.
    #[must_use]
    pub fn list(kind: EntityKind, target: ScrapeTarget, limit: Option<usize>) -> Self {
        Self {
            id: RequestId::generate(),
            target,
            kind,
            cardinality: Cardinality::List,
            limit,
            deadline: None,
        }
    }

    /// Bound every wait performed for this request by `deadline`.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Replace the result-count cap, keeping the request's identity.
    #[must_use]
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Request identifier.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Scrape target.
    #[must_use]
    pub fn target(&self) -> &ScrapeTarget {
        &self.target
    }

    /// Record type to build.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Single or list.
    #[must_use]
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Result-count cap for list requests.
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Caller-supplied deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
