//! Session establishment.
//!
//! Three mutually exclusive modes produce a fresh [`Session`]:
//!
//! 1. **Manual**: open the login page and wait for a human to finish logging in
//! 2. **Credentials**: fill and submit the login form
//! 3. **Cookie**: install a known authentication cookie and verify it
//!
//! Each ends with a fully captured session or a classified error; a context
//! that reached the authenticated area but holds no authentication cookie is
//! treated as a failure, not a partial success.

use crate::session::Session;
use harrow_browser::{extract_domain, BrowserError, Cookie, PageDriver};
use harrow_core::{AuthConfig, Result, ScrapeError};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use zeroize::Zeroizing;

/// Default interval between authenticated-area probes.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Username and password for credential login.
pub struct Credentials {
    /// Account identifier (usually an email address)
    pub username: String,
    password: Zeroizing<String>,
}

impl Credentials {
    /// Bundle credentials; the password is wiped from memory on drop.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How to establish a session.
#[derive(Debug)]
pub enum AuthMode {
    /// Wait for a human to log in; `None` uses the configured timeout
    Manual {
        /// Upper bound on the wait
        timeout: Option<Duration>,
    },
    /// Submit the login form
    Credentials(Credentials),
    /// Install the platform's authentication cookie directly
    Cookie(Zeroizing<String>),
}

impl AuthMode {
    /// Cookie-injection mode for `value`.
    pub fn cookie(value: impl Into<String>) -> Self {
        Self::Cookie(Zeroizing::new(value.into()))
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Manual { .. } => "manual",
            Self::Credentials(_) => "credentials",
            Self::Cookie(_) => "cookie",
        }
    }
}

/// Outcome of one poll of the login flow.
enum LoginProbe {
    Authenticated,
    Rejected(String),
    Pending,
}

/// Drives one of the [`AuthMode`]s against a page context.
pub struct AuthenticationController<'a> {
    driver: &'a dyn PageDriver,
    config: &'a AuthConfig,
    poll_interval: Duration,
}

impl<'a> AuthenticationController<'a> {
    /// Controller for `driver` using the login surface described by `config`.
    #[must_use]
    pub fn new(driver: &'a dyn PageDriver, config: &'a AuthConfig) -> Self {
        Self {
            driver,
            config,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override how often the current URL is probed while waiting.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Establish a session using `mode`.
    pub async fn authenticate(&self, mode: AuthMode) -> Result<Session> {
        tracing::info!(mode = mode.name(), "Authenticating");
        let result = match mode {
            AuthMode::Manual { timeout } => {
                self.manual_login(timeout.unwrap_or_else(|| self.config.manual_login_timeout()))
                    .await
            }
            AuthMode::Credentials(credentials) => self.credential_login(&credentials).await,
            AuthMode::Cookie(value) => self.cookie_login(&value).await,
        };

        match &result {
            Ok(session) => tracing::info!(
                cookies = session.cookies.len(),
                "Authentication succeeded"
            ),
            Err(e) => tracing::warn!(kind = %e.kind(), "Authentication failed: {}", e),
        }
        result
    }

    /// Whether the context currently reaches the authenticated area.
    pub async fn is_authenticated(&self) -> Result<bool> {
        self.navigate(&self.config.verify_url).await?;
        let url = self.driver.current_url().await.map_err(unknown)?;
        Ok(self.config.is_authenticated_url(&url))
    }

    async fn manual_login(&self, timeout: Duration) -> Result<Session> {
        self.navigate(&self.config.login_url).await?;
        tracing::info!(
            "Waiting up to {:?} for login to be completed in the browser window",
            timeout
        );
        self.wait_for_login(timeout, false).await?;
        self.capture().await
    }

    async fn credential_login(&self, credentials: &Credentials) -> Result<Session> {
        self.navigate(&self.config.login_url).await?;

        self.driver
            .fill_field(&self.config.username_selector, &credentials.username)
            .await
            .map_err(unknown)?;
        self.driver
            .fill_field(&self.config.password_selector, &credentials.password)
            .await
            .map_err(unknown)?;
        self.driver
            .click(&self.config.submit_selector)
            .await
            .map_err(unknown)?;

        self.wait_for_login(self.config.credential_login_timeout(), true)
            .await?;
        self.capture().await
    }

    async fn cookie_login(&self, value: &str) -> Result<Session> {
        let cookie = Cookie::new(
            self.config.auth_cookie_name.clone(),
            value,
            self.config.auth_cookie_domain.clone(),
        );
        let injected = std::slice::from_ref(&cookie);
        self.driver.set_cookies(injected).await.map_err(unknown)?;

        let result = self.verify_injected().await;
        if result.is_err() {
            // A rejected cookie would ride along on every later navigation
            if let Err(e) = self.driver.delete_cookies(injected).await {
                tracing::warn!("Could not remove rejected `{}` cookie: {}", cookie.name, e);
            }
        }
        result
    }

    async fn verify_injected(&self) -> Result<Session> {
        self.navigate(&self.config.verify_url).await?;
        let landed = self.driver.current_url().await.map_err(unknown)?;
        if !self.config.is_authenticated_url(&landed) {
            return Err(ScrapeError::InvalidCredentials {
                reason: format!("injected cookie was not accepted (landed on {landed})"),
            });
        }
        self.capture().await
    }

    /// Poll until the authenticated area is reached, the login page shows an
    /// error (when `watch_errors`), or `timeout` elapses.
    async fn wait_for_login(&self, timeout: Duration, watch_errors: bool) -> Result<()> {
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            match self.probe(watch_errors).await {
                LoginProbe::Authenticated => {
                    tracing::debug!("Reached authenticated area after {:?}", started.elapsed());
                    return Ok(());
                }
                LoginProbe::Rejected(reason) => {
                    return Err(ScrapeError::InvalidCredentials { reason });
                }
                LoginProbe::Pending => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ScrapeError::AuthenticationTimeout { waited: timeout });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn probe(&self, watch_errors: bool) -> LoginProbe {
        match self.driver.current_url().await {
            Ok(url) if self.config.is_authenticated_url(&url) => return LoginProbe::Authenticated,
            Ok(_) => {}
            // The page may be mid-navigation; try again on the next tick
            Err(e) => tracing::debug!("Login probe could not read URL: {}", e),
        }

        if watch_errors {
            if let Ok(true) = self.driver.exists(&self.config.error_selector).await {
                let reason = self
                    .driver
                    .extract_text(&self.config.error_selector)
                    .await
                    .ok()
                    .flatten()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| "login page reported an error".to_string());
                return LoginProbe::Rejected(reason);
            }
        }
        LoginProbe::Pending
    }

    async fn capture(&self) -> Result<Session> {
        let cookies = self.driver.cookies().await.map_err(unknown)?;
        if !cookies
            .iter()
            .any(|c| c.name == self.config.auth_cookie_name && !c.value.is_empty())
        {
            return Err(ScrapeError::InvalidCredentials {
                reason: format!(
                    "authenticated area reached but no `{}` cookie was issued",
                    self.config.auth_cookie_name
                ),
            });
        }

        let storage = match self.driver.local_storage().await {
            Ok(storage) => storage,
            Err(e) => {
                tracing::warn!("Could not snapshot local storage, continuing without: {}", e);
                Default::default()
            }
        };

        Ok(Session::new(cookies, storage))
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.driver
            .navigate(url)
            .await
            .map_err(|e| ScrapeError::Navigation {
                url: url.to_string(),
                attempts: 1,
                cause: e.to_string(),
            })
    }
}

/// Install a stored session's cookies and storage into a page context.
///
/// Storage is written after navigating to `origin_url`, since `localStorage`
/// is scoped to the current origin.
pub async fn apply_session(
    driver: &dyn PageDriver,
    session: &Session,
    origin_url: &str,
) -> Result<()> {
    let host = extract_domain(origin_url).map_err(unknown)?;
    if !session.cookies.iter().any(|c| c.matches_host(&host)) {
        tracing::warn!("Stored session has no cookies for {}; it will not authenticate", host);
    }

    driver.set_cookies(&session.cookies).await.map_err(unknown)?;

    if !session.storage.is_empty() {
        driver
            .navigate(origin_url)
            .await
            .map_err(|e| ScrapeError::Navigation {
                url: origin_url.to_string(),
                attempts: 1,
                cause: e.to_string(),
            })?;
        driver
            .set_local_storage(&session.storage)
            .await
            .map_err(unknown)?;
    }

    tracing::debug!(
        cookies = session.cookies.len(),
        storage_keys = session.storage.len(),
        "Applied stored session"
    );
    Ok(())
}

fn unknown(e: BrowserError) -> ScrapeError {
    ScrapeError::Unknown {
        cause: e.to_string(),
    }
}
