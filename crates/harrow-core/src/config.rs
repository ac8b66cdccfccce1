//! Configuration management for harrow.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration.
///
/// This is loaded from `~/.config/harrow/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Browser automation settings
    pub browser: BrowserConfig,
    /// Session storage settings
    pub session: SessionConfig,
    /// Login surface and authenticated-area detection
    pub auth: AuthConfig,
    /// Orchestration bounds (retries, waits, pagination)
    pub scraping: ScrapingConfig,
    /// Person-profile pacing and rate-limit backoff
    pub throttle: ThrottleConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML or fail validation
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, falling back to defaults if absent.
    pub fn load_from(config_path: &Path) -> ConfigResult<Self> {
        let config: Self = if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(config_path)?;
            toml::from_str(&contents)?
        } else {
            tracing::debug!("Config file not found, using defaults");
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `HARROW_HEADLESS`: Override browser headless mode (true/false)
    /// - `HARROW_SESSION_PATH`: Override session file location
    /// - `HARROW_NAVIGATION_ATTEMPTS`: Override navigation attempt bound
    /// - `HARROW_MAX_EMPTY_PAGES`: Override consecutive-empty-page bound
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("HARROW_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Some(val) = lookup("HARROW_SESSION_PATH") {
            if !val.trim().is_empty() {
                tracing::debug!("Override session.path from env: {}", val);
                self.session.path = Some(PathBuf::from(val));
            }
        }

        if let Some(val) = lookup("HARROW_NAVIGATION_ATTEMPTS") {
            if let Ok(attempts) = val.parse() {
                self.scraping.navigation_attempts = attempts;
                tracing::debug!("Override scraping.navigation_attempts from env: {}", attempts);
            }
        }

        if let Some(val) = lookup("HARROW_MAX_EMPTY_PAGES") {
            if let Ok(pages) = val.parse() {
                self.scraping.max_consecutive_empty_pages = pages;
                tracing::debug!(
                    "Override scraping.max_consecutive_empty_pages from env: {}",
                    pages
                );
            }
        }
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        fn positive(field: &str, value: u64) -> ConfigResult<()> {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
            Ok(())
        }

        positive(
            "browser.navigation_timeout_secs",
            self.browser.navigation_timeout_secs,
        )?;
        positive("browser.poll_interval_ms", self.browser.poll_interval_ms)?;
        positive(
            "auth.manual_login_timeout_secs",
            self.auth.manual_login_timeout_secs,
        )?;
        positive(
            "auth.credential_login_timeout_secs",
            self.auth.credential_login_timeout_secs,
        )?;
        positive(
            "scraping.navigation_attempts",
            u64::from(self.scraping.navigation_attempts),
        )?;
        positive("scraping.ready_timeout_secs", self.scraping.ready_timeout_secs)?;
        positive(
            "scraping.max_consecutive_empty_pages",
            u64::from(self.scraping.max_consecutive_empty_pages),
        )?;

        if self.auth.authenticated_url_patterns.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "auth.authenticated_url_patterns".to_string(),
                reason: "at least one pattern is required".to_string(),
            });
        }
        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/harrow/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "harrow", "harrow").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/harrow`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "harrow", "harrow").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Per-attempt navigation timeout in seconds
    pub navigation_timeout_secs: u64,
    /// Interval between DOM probes while waiting for a selector
    pub poll_interval_ms: u64,
    /// Explicit Chrome/Chromium binary; autodetected when unset
    pub chrome_executable: Option<PathBuf>,
}

impl BrowserConfig {
    /// Per-attempt navigation timeout.
    #[must_use]
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    /// DOM probe interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            navigation_timeout_secs: 30,
            poll_interval_ms: 250,
            chrome_executable: None,
        }
    }
}

/// Session storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session file; defaults to `<data_dir>/session.json`
    pub path: Option<PathBuf>,
}

impl SessionConfig {
    /// Resolve the session file location.
    pub fn resolved_path(&self) -> ConfigResult<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(AppConfig::data_dir()?.join("session.json")),
        }
    }
}

/// Login surface and authenticated-area detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Login page
    pub login_url: String,
    /// Username input on the login page
    pub username_selector: String,
    /// Password input on the login page
    pub password_selector: String,
    /// Submit button on the login page
    pub submit_selector: String,
    /// Element that appears when the platform rejects credentials
    pub error_selector: String,
    /// URL fragments that only appear inside the authenticated area
    pub authenticated_url_patterns: Vec<String>,
    /// URL fragments of login/checkpoint pages; these override a match above
    pub login_url_patterns: Vec<String>,
    /// Page navigated to when verifying an injected cookie or restored session
    pub verify_url: String,
    /// Name of the platform's authentication cookie
    pub auth_cookie_name: String,
    /// Domain the authentication cookie is scoped to
    pub auth_cookie_domain: String,
    /// How long manual login may take
    pub manual_login_timeout_secs: u64,
    /// How long credential login may take after submitting the form
    pub credential_login_timeout_secs: u64,
}

impl AuthConfig {
    /// Manual login timeout.
    #[must_use]
    pub fn manual_login_timeout(&self) -> Duration {
        Duration::from_secs(self.manual_login_timeout_secs)
    }

    /// Credential login timeout.
    #[must_use]
    pub fn credential_login_timeout(&self) -> Duration {
        Duration::from_secs(self.credential_login_timeout_secs)
    }

    /// Whether `url` is a login, auth wall or checkpoint page.
    #[must_use]
    pub fn is_login_url(&self, url: &str) -> bool {
        self.login_url_patterns
            .iter()
            .any(|pattern| path_has_prefix(url, pattern))
    }

    /// Whether `url` lies inside the authenticated area.
    #[must_use]
    pub fn is_authenticated_url(&self, url: &str) -> bool {
        !self.is_login_url(url)
            && self
                .authenticated_url_patterns
                .iter()
                .any(|pattern| path_has_prefix(url, pattern))
    }
}

/// Whether the path of `url` starts with the segments of `prefix`.
///
/// Only whole segments count: `/login` matches `/login` and `/login/x` but
/// not `/loginradius` or `/company/login-co`. Query and fragment are ignored.
#[must_use]
pub fn path_has_prefix(url: &str, prefix: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let prefix = prefix.trim_end_matches('/');
    parsed
        .path()
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_url: "https://www.linkedin.com/login".to_string(),
            username_selector: "#username".to_string(),
            password_selector: "#password".to_string(),
            submit_selector: "button[type=\"submit\"]".to_string(),
            error_selector: "#error-for-password".to_string(),
            authenticated_url_patterns: vec![
                "/feed".to_string(),
                "/mynetwork".to_string(),
                "/messaging".to_string(),
                "/notifications".to_string(),
            ],
            login_url_patterns: vec![
                "/login".to_string(),
                "/authwall".to_string(),
                "/checkpoint".to_string(),
                "/uas/".to_string(),
            ],
            verify_url: "https://www.linkedin.com/feed/".to_string(),
            auth_cookie_name: "li_at".to_string(),
            auth_cookie_domain: ".linkedin.com".to_string(),
            manual_login_timeout_secs: 300,
            credential_login_timeout_secs: 30,
        }
    }
}

/// Orchestration bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    /// Navigation attempts per page before giving up (first try included)
    pub navigation_attempts: u32,
    /// Base delay between navigation attempts; grows linearly per attempt
    pub retry_delay_ms: u64,
    /// How long to wait for a strategy's ready marker
    pub ready_timeout_secs: u64,
    /// Consecutive empty pages tolerated before pagination is declared stalled
    pub max_consecutive_empty_pages: u32,
    /// Record cap applied to list scrapes that don't specify one
    pub default_list_limit: usize,
}

impl ScrapingConfig {
    /// Ready-marker wait bound.
    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    /// Delay before navigation attempt `attempt + 1` (1-based `attempt`).
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            navigation_attempts: 3,
            retry_delay_ms: 2000,
            ready_timeout_secs: 15,
            max_consecutive_empty_pages: 3,
            default_list_limit: 25,
        }
    }
}

/// Person-profile pacing and rate-limit backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Whether the governor is consulted at all
    pub enabled: bool,
    /// Minimum gap between two person-profile scrapes
    pub min_delay_between_profiles_secs: u64,
    /// Person profiles allowed per calendar day
    pub max_profiles_per_day: u32,
    /// Backoff applied after the first rate limit of a day
    pub rate_limit_backoff_secs: u64,
    /// State file; defaults to `<data_dir>/rate_limit_state.json`
    pub state_path: Option<PathBuf>,
}

impl ThrottleConfig {
    /// Resolve the governor state file location.
    pub fn resolved_state_path(&self) -> ConfigResult<PathBuf> {
        match &self.state_path {
            Some(path) => Ok(path.clone()),
            None => Ok(AppConfig::data_dir()?.join("rate_limit_state.json")),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay_between_profiles_secs: 15,
            max_profiles_per_day: 100,
            rate_limit_backoff_secs: 900,
            state_path: None,
        }
    }
}
