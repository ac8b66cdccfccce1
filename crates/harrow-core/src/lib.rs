//! Harrow Core - Foundation crate for the harrow scraping engine.
//!
//! This crate provides the classified error taxonomy, shared request types,
//! configuration management and tracing setup that all other harrow crates
//! depend on.
//!
//! # Modules
//!
//! - [`error`] - `ScrapeError` taxonomy and `ConfigError`
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - `ScrapeRequest`, `ScrapeTarget`, `EntityKind`
//! - [`logging`] - tracing subscriber initialisation
//!
//! # Example
//!
//! ```rust
//! use harrow_core::{AppConfig, EntityKind, ScrapeRequest, ScrapeTarget};
//!
//! let config = AppConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let request = ScrapeRequest::single(
//!     EntityKind::Company,
//!     ScrapeTarget::parse("https://www.linkedin.com/company/microsoft/"),
//! );
//! assert_eq!(request.kind(), EntityKind::Company);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use config::{
    path_has_prefix, AppConfig, AuthConfig, BrowserConfig, ScrapingConfig, SessionConfig,
    ThrottleConfig,
};
pub use error::{ConfigError, ConfigResult, ErrorKind, Result, ScrapeError};
pub use logging::init_tracing;
pub use types::{Cardinality, EntityKind, RequestId, ScrapeRequest, ScrapeTarget};
