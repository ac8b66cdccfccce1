//! Core error types for the harrow scraping engine.
//!
//! [`ScrapeError`] is the single classified error returned by every public
//! entry point. Each variant corresponds to one actionable failure category and
//! carries the raw cause for diagnostics. [`ErrorKind`] is its field-less
//! discriminant, used where only the category matters (progress events, metrics).

use crate::types::EntityKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classified scraping error.
///
/// Storage and authentication variants abort the operation immediately;
/// navigation failures are retried locally before surfacing as
/// [`ScrapeError::Navigation`]; everything else is the terminal result of
/// a scrape. The engine never retries [`ScrapeError::RateLimited`] or
/// [`ScrapeError::Authentication`] on its own.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScrapeError {
    /// No session blob exists at the given location
    #[error("no stored session at {path}")]
    SessionNotFound {
        /// Location that was probed
        path: String,
    },

    /// Session blob exists but is unreadable, incomplete, or of another format version
    #[error("stored session at {path} is corrupt: {reason}")]
    SessionCorrupt {
        /// Location of the blob
        path: String,
        /// What was wrong with it
        reason: String,
    },

    /// Login did not reach the authenticated area in time
    #[error("authentication did not complete within {waited:?}")]
    AuthenticationTimeout {
        /// How long the controller waited
        waited: Duration,
    },

    /// Credentials or injected cookie were rejected by the platform
    #[error("credentials rejected: {reason}")]
    InvalidCredentials {
        /// Platform-side indication, if any
        reason: String,
    },

    /// Session was rejected mid-scrape (login wall, expired cookie)
    #[error("session rejected at {url}: {cause}")]
    Authentication {
        /// URL where the login wall was observed
        url: String,
        /// Raw cause
        cause: String,
    },

    /// Platform throttling signal
    #[error("rate limited: {cause}")]
    RateLimited {
        /// Suggested wait before a new request, when known
        retry_after: Option<Duration>,
        /// Raw cause
        cause: String,
    },

    /// Entity is missing, private, or removed
    #[error("entity not found at {target}: {cause}")]
    EntityNotFound {
        /// Requested target
        target: String,
        /// Raw cause
        cause: String,
    },

    /// Navigation failed after all retry attempts
    #[error("navigation to {url} failed after {attempts} attempt(s): {cause}")]
    Navigation {
        /// Target URL
        url: String,
        /// Number of attempts made
        attempts: u32,
        /// Last raw cause
        cause: String,
    },

    /// Page-ready marker did not appear in time
    #[error("content marker `{marker}` not ready after {waited:?}")]
    ContentTimeout {
        /// Marker that was awaited
        marker: String,
        /// How long the engine waited
        waited: Duration,
    },

    /// Pagination kept signalling more pages while returning nothing
    #[error("pagination stalled after {empty_pages} consecutive empty page(s) ({pages_fetched} fetched)")]
    PaginationStalled {
        /// Consecutive empty pages observed
        empty_pages: u32,
        /// Total pages fetched
        pages_fetched: u32,
    },

    /// A required field was missing from an extracted record
    #[error("{entity} record is missing required field `{field}`")]
    Validation {
        /// Entity kind being built
        entity: EntityKind,
        /// Field that failed
        field: String,
    },

    /// Anything the classifier could not place
    #[error("unclassified scrape failure: {cause}")]
    Unknown {
        /// Raw cause
        cause: String,
    },
}

impl ScrapeError {
    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionNotFound { .. } => ErrorKind::SessionNotFound,
            Self::SessionCorrupt { .. } => ErrorKind::SessionCorrupt,
            Self::AuthenticationTimeout { .. } => ErrorKind::AuthenticationTimeout,
            Self::InvalidCredentials { .. } => ErrorKind::InvalidCredentials,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::EntityNotFound { .. } => ErrorKind::EntityNotFound,
            Self::Navigation { .. } => ErrorKind::Navigation,
            Self::ContentTimeout { .. } => ErrorKind::ContentTimeout,
            Self::PaginationStalled { .. } => ErrorKind::PaginationStalled,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }
}

/// Field-less discriminant of [`ScrapeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`ScrapeError::SessionNotFound`]
    SessionNotFound,
    /// See [`ScrapeError::SessionCorrupt`]
    SessionCorrupt,
    /// See [`ScrapeError::AuthenticationTimeout`]
    AuthenticationTimeout,
    /// See [`ScrapeError::InvalidCredentials`]
    InvalidCredentials,
    /// See [`ScrapeError::Authentication`]
    Authentication,
    /// See [`ScrapeError::RateLimited`]
    RateLimit,
    /// See [`ScrapeError::EntityNotFound`]
    EntityNotFound,
    /// See [`ScrapeError::Navigation`]
    Navigation,
    /// See [`ScrapeError::ContentTimeout`]
    ContentTimeout,
    /// See [`ScrapeError::PaginationStalled`]
    PaginationStalled,
    /// See [`ScrapeError::Validation`]
    Validation,
    /// See [`ScrapeError::Unknown`]
    Unknown,
}

impl ErrorKind {
    /// Stable snake-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionNotFound => "session_not_found",
            Self::SessionCorrupt => "session_corrupt",
            Self::AuthenticationTimeout => "authentication_timeout",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::EntityNotFound => "entity_not_found",
            Self::Navigation => "navigation",
            Self::ContentTimeout => "content_timeout",
            Self::PaginationStalled => "pagination_stalled",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to determine config directory path
    #[error("could not determine config directory (XDG base directories not available)")]
    NoConfigDir,

    /// Failed to parse TOML
    #[error("failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// I/O error reading/writing config
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Reason for invalidity
        reason: String,
    },
}

/// Result type alias using `ScrapeError`.
pub type Result<T> = std::result::Result<T, ScrapeError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScrapeError::Validation {
            entity: EntityKind::Company,
            field: "name".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "company record is missing required field `name`"
        );

        let err = ConfigError::NoConfigDir;
        assert_eq!(
            err.to_string(),
            "could not determine config directory (XDG base directories not available)"
        );
    }

    #[test]
    fn test_kind_matches_variant() {
        let err = ScrapeError::RateLimited {
            retry_after: Some(Duration::from_secs(900)),
            cause: "HTTP 429".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::RateLimit);

        let err = ScrapeError::PaginationStalled {
            empty_pages: 3,
            pages_fetched: 7,
        };
        assert_eq!(err.kind(), ErrorKind::PaginationStalled);
        assert!(err.to_string().contains("3 consecutive"));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ContentTimeout).expect("serialize kind");
        assert_eq!(json, "\"content_timeout\"");
        assert_eq!(ErrorKind::ContentTimeout.to_string(), "content_timeout");
    }

    #[test]
    fn test_config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: ConfigError = io_err.into();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
