//! Harrow Session - authentication state for session-gated scraping
//!
//! A [`Session`] is the cookie set and storage snapshot of a logged-in
//! browser context. [`AuthenticationController`] produces one through manual
//! login, credential login or cookie injection; [`SessionStore`] persists it
//! between runs; [`apply_session`] installs it into a fresh context.
//!
//! # Lifecycle
//!
//! 1. **Establish**: `AuthenticationController::authenticate(mode)`
//! 2. **Persist**: `SessionStore::save`
//! 3. **Restore**: `SessionStore::load` then `apply_session`
//!
//! Loading never yields a partial session: a missing file is
//! `SessionNotFound`, anything unreadable or incomplete is `SessionCorrupt`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod session;
pub mod store;

pub use auth::{apply_session, AuthMode, AuthenticationController, Credentials};
pub use session::Session;
pub use store::{load, save, SessionStore, SESSION_FORMAT_VERSION};
