use crate::cookie::Cookie;
use crate::error::{BrowserError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One field read from inside each item matched by [`PageDriver::query_all`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldQuery {
    /// Key under which the value is returned
    pub name: String,
    /// Selector relative to the item element
    pub selector: String,
    /// Attribute to read instead of the element's text
    #[serde(default)]
    pub attribute: Option<String>,
}

impl FieldQuery {
    /// Read the text of `selector` into `name`.
    pub fn text(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
            attribute: None,
        }
    }

    /// Read `attribute` of `selector` into `name`.
    pub fn attribute(
        name: impl Into<String>,
        selector: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            selector: selector.into(),
            attribute: Some(attribute.into()),
        }
    }
}

/// Browser surface consumed by the orchestration engine.
///
/// One driver is one page context. Implementations must be usable through
/// `&self` from a single task at a time; the engine never shares a driver
/// between concurrent scrapes.
#[async_trait::async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate to a URL and wait for the load to settle
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Wait for a selector to appear, failing with [`BrowserError::Timeout`]
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// URL of the current document after redirects
    async fn current_url(&self) -> Result<String>;

    /// Visible text of the whole document
    async fn page_text(&self) -> Result<String>;

    /// Whether at least one element matches
    async fn exists(&self, selector: &str) -> Result<bool>;

    /// Fill a form field by selector
    async fn fill_field(&self, selector: &str, value: &str) -> Result<()>;

    /// Click an element by selector
    async fn click(&self, selector: &str) -> Result<()>;

    /// Text of the first match, `None` when nothing matches
    async fn extract_text(&self, selector: &str) -> Result<Option<String>>;

    /// Text of every match, in document order
    async fn extract_all_text(&self, selector: &str) -> Result<Vec<String>>;

    /// Attribute of the first match
    async fn extract_attribute(&self, selector: &str, attribute: &str) -> Result<Option<String>>;

    /// For each element matching `item_selector`, read `fields` relative to it.
    /// Fields with no match are left out of that item's map.
    async fn query_all(
        &self,
        item_selector: &str,
        fields: &[FieldQuery],
    ) -> Result<Vec<BTreeMap<String, String>>>;

    /// Cookies visible to the context
    async fn cookies(&self) -> Result<Vec<Cookie>>;

    /// Install cookies into the context
    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()>;

    /// Remove cookies with the same name, domain and path as those given
    async fn delete_cookies(&self, cookies: &[Cookie]) -> Result<()>;

    /// `localStorage` of the current origin
    async fn local_storage(&self) -> Result<BTreeMap<String, String>>;

    /// Write entries into `localStorage` of the current origin
    async fn set_local_storage(&self, entries: &BTreeMap<String, String>) -> Result<()>;
}

/// Helper to extract domain from URL
pub fn extract_domain(url: &str) -> Result<String> {
    let url = url::Url::parse(url)
        .map_err(|e| BrowserError::NavigationError(format!("Invalid URL: {}", e)))?;

    url.host_str()
        .ok_or_else(|| BrowserError::NavigationError("No host in URL".to_string()))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://www.linkedin.com/in/someone").unwrap(),
            "www.linkedin.com"
        );
        assert_eq!(
            extract_domain("http://subdomain.example.com:8080/path").unwrap(),
            "subdomain.example.com"
        );
    }

    #[test]
    fn test_extract_domain_invalid() {
        assert!(extract_domain("not-a-url").is_err());
    }

    #[test]
    fn test_field_query_constructors() {
        let q = FieldQuery::attribute("linkedin_url", "a.job-card", "href");
        assert_eq!(q.attribute.as_deref(), Some("href"));
        assert!(FieldQuery::text("title", "h3").attribute.is_none());
    }
}
