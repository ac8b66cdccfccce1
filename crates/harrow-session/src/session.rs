//! Authentication state captured from a browser context.

use chrono::{DateTime, Utc};
use harrow_browser::Cookie;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque authentication state: cookie set, storage snapshot, capture time.
///
/// A session handed out by this crate always has at least one cookie; the
/// store refuses to load or persist anything less.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Cookies of the authenticated context
    pub cookies: Vec<Cookie>,
    /// `localStorage` of the platform origin
    #[serde(default)]
    pub storage: BTreeMap<String, String>,
    /// When the state was captured
    pub captured_at: DateTime<Utc>,
}

impl Session {
    /// Session captured now.
    #[must_use]
    pub fn new(cookies: Vec<Cookie>, storage: BTreeMap<String, String>) -> Self {
        Self {
            cookies,
            storage,
            captured_at: Utc::now(),
        }
    }

    /// Value of the named cookie.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Reason this session is unusable, if any.
    #[must_use]
    pub fn defect(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return Some("session has no cookies".to_string());
        }
        self.cookies
            .iter()
            .position(|c| c.name.is_empty() || c.domain.is_empty())
            .map(|i| format!("cookie #{i} is missing its name or domain"))
    }

    /// Same cookie set and storage content, ignoring capture time and cookie order.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        let key = |c: &Cookie| (c.domain.clone(), c.path.clone(), c.name.clone());
        let mut mine = self.cookies.clone();
        let mut theirs = other.cookies.clone();
        mine.sort_by_key(key);
        theirs.sort_by_key(key);
        mine == theirs && self.storage == other.storage
    }
}
