//! Browser automation boundary for session-gated sites.
//!
//! [`PageDriver`] is the only surface the orchestration engine touches.
//! [`BrowserEngine`] implements it over headless Chromium; [`ScriptedDriver`]
//! implements it over in-memory pages for dry runs and tests.

pub mod cookie;
pub mod driver;
pub mod engine;
pub mod error;
pub mod scripted;

pub use cookie::Cookie;
pub use driver::{extract_domain, FieldQuery, PageDriver};
pub use engine::BrowserEngine;
pub use error::{BrowserError, Result};
pub use scripted::{ScriptedContext, ScriptedDriver, ScriptedPage};
