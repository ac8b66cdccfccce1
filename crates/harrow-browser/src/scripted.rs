//! In-memory page driver.
//!
//! `ScriptedDriver` serves pre-built pages keyed by URL. It understands
//! redirects, scripted navigation failures, click handlers and cookie-gated
//! navigation, which is enough to exercise every orchestration path without
//! a browser.

use crate::cookie::Cookie;
use crate::driver::{FieldQuery, PageDriver};
use crate::error::{BrowserError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Hops followed before a redirect chain is treated as a loop.
const MAX_REDIRECTS: usize = 10;

/// State visible to navigation and click hooks.
pub struct ScriptedContext<'a> {
    url: &'a str,
    cookies: &'a [Cookie],
    fields: &'a HashMap<String, String>,
}

impl ScriptedContext<'_> {
    /// URL of the document the hook fires on (the previous one for navigation hooks).
    #[must_use]
    pub fn current_url(&self) -> &str {
        self.url
    }

    /// Value of the named cookie.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// Value last typed into `selector`.
    #[must_use]
    pub fn field(&self, selector: &str) -> Option<&str> {
        self.fields.get(selector).map(String::as_str)
    }
}

/// Returns the URL to continue to, or `None` to stay.
type Hook = Box<dyn Fn(&ScriptedContext<'_>) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, Default)]
struct ScriptedElement {
    text: String,
    attributes: BTreeMap<String, String>,
}

/// A page served by [`ScriptedDriver`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    elements: BTreeMap<String, Vec<ScriptedElement>>,
    items: BTreeMap<String, Vec<BTreeMap<String, String>>>,
    body_text: String,
}

impl ScriptedPage {
    /// Empty page.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element matching `selector` with `text`.
    #[must_use]
    pub fn with_text(mut self, selector: &str, text: &str) -> Self {
        self.elements
            .entry(selector.to_string())
            .or_default()
            .push(ScriptedElement {
                text: text.to_string(),
                attributes: BTreeMap::new(),
            });
        self
    }

    /// Add an empty element, e.g. a ready marker or a button.
    #[must_use]
    pub fn with_element(self, selector: &str) -> Self {
        self.with_text(selector, "")
    }

    /// Set an attribute on the first element matching `selector`, creating it if needed.
    #[must_use]
    pub fn with_attribute(mut self, selector: &str, attribute: &str, value: &str) -> Self {
        let elements = self.elements.entry(selector.to_string()).or_default();
        if elements.is_empty() {
            elements.push(ScriptedElement::default());
        }
        elements[0]
            .attributes
            .insert(attribute.to_string(), value.to_string());
        self
    }

    /// Items returned by `query_all(item_selector, ..)`.
    ///
    /// Each item maps a field selector to its value; attribute reads are keyed
    /// as `"selector@attribute"`.
    #[must_use]
    pub fn with_items(mut self, item_selector: &str, items: Vec<BTreeMap<String, String>>) -> Self {
        self.items.insert(item_selector.to_string(), items);
        self
    }

    /// Visible document text.
    #[must_use]
    pub fn with_body_text(mut self, text: &str) -> Self {
        self.body_text = text.to_string();
        self
    }

    fn has(&self, selector: &str) -> bool {
        self.elements.get(selector).is_some_and(|e| !e.is_empty())
            || self.items.get(selector).is_some_and(|i| !i.is_empty())
    }
}

#[derive(Default)]
struct ScriptState {
    pages: HashMap<String, ScriptedPage>,
    redirects: HashMap<String, String>,
    navigation_hooks: HashMap<String, Hook>,
    click_hooks: HashMap<String, Hook>,
    navigation_failures: HashMap<String, u32>,
    issued_cookies: HashMap<String, Vec<Cookie>>,
    current_url: String,
    fields: HashMap<String, String>,
    cookies: Vec<Cookie>,
    storage: BTreeMap<String, String>,
    navigations: Vec<String>,
}

impl ScriptState {
    fn page(&self) -> Option<&ScriptedPage> {
        self.pages.get(&self.current_url)
    }

    fn context(&self) -> ScriptedContext<'_> {
        ScriptedContext {
            url: &self.current_url,
            cookies: &self.cookies,
            fields: &self.fields,
        }
    }

    fn resolve(&self, url: &str) -> Result<String> {
        let mut current = url.to_string();
        for _ in 0..MAX_REDIRECTS {
            let next = match self.navigation_hooks.get(&current) {
                Some(hook) => hook(&self.context()),
                None => None,
            }
            .or_else(|| self.redirects.get(&current).cloned());

            match next {
                Some(next) if next != current => current = next,
                _ => return Ok(current),
            }
        }
        Err(BrowserError::NavigationError(format!(
            "redirect loop starting at {url}"
        )))
    }
}

/// Page driver backed by scripted pages instead of a browser.
#[derive(Default)]
pub struct ScriptedDriver {
    state: Mutex<ScriptState>,
}

impl ScriptedDriver {
    /// Driver with no pages; every navigation lands on an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `page` at `url`.
    #[must_use]
    pub fn page(self, url: &str, page: ScriptedPage) -> Self {
        self.lock().pages.insert(url.to_string(), page);
        self
    }

    /// Unconditionally redirect `from` to `to`.
    #[must_use]
    pub fn redirect(self, from: &str, to: &str) -> Self {
        self.lock()
            .redirects
            .insert(from.to_string(), to.to_string());
        self
    }

    /// Decide per navigation whether `url` redirects elsewhere.
    #[must_use]
    pub fn on_navigate<F>(self, url: &str, hook: F) -> Self
    where
        F: Fn(&ScriptedContext<'_>) -> Option<String> + Send + Sync + 'static,
    {
        self.lock()
            .navigation_hooks
            .insert(url.to_string(), Box::new(hook));
        self
    }

    /// Clicking `selector` navigates to the URL the hook returns.
    #[must_use]
    pub fn on_click<F>(self, selector: &str, hook: F) -> Self
    where
        F: Fn(&ScriptedContext<'_>) -> Option<String> + Send + Sync + 'static,
    {
        self.lock()
            .click_hooks
            .insert(selector.to_string(), Box::new(hook));
        self
    }

    /// Fail the next `times` navigations to `url`.
    #[must_use]
    pub fn fail_navigation(self, url: &str, times: u32) -> Self {
        self.lock()
            .navigation_failures
            .insert(url.to_string(), times);
        self
    }

    /// Landing on `url` installs `cookie`, as a `Set-Cookie` response header would.
    #[must_use]
    pub fn issue_cookie(self, url: &str, cookie: Cookie) -> Self {
        self.lock()
            .issued_cookies
            .entry(url.to_string())
            .or_default()
            .push(cookie);
        self
    }

    /// Every URL passed to `navigate`, including failed attempts.
    #[must_use]
    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }

    /// Value typed into `selector`, if any.
    #[must_use]
    pub fn filled(&self, selector: &str) -> Option<String> {
        self.lock().fields.get(selector).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl PageDriver for ScriptedDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut state = self.lock();
        state.navigations.push(url.to_string());

        if let Some(remaining) = state.navigation_failures.get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BrowserError::NavigationError(format!(
                    "{url}: net::ERR_CONNECTION_RESET"
                )));
            }
        }

        let landed = state.resolve(url)?;
        tracing::trace!("scripted navigation {} -> {}", url, landed);
        if let Some(issued) = state.issued_cookies.get(&landed).cloned() {
            for cookie in issued {
                state
                    .cookies
                    .retain(|c| !(c.name == cookie.name && c.domain == cookie.domain));
                state.cookies.push(cookie);
            }
        }
        state.current_url = landed;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
        if self.exists(selector).await? {
            return Ok(());
        }
        tokio::time::sleep(timeout).await;
        if self.exists(selector).await? {
            return Ok(());
        }
        Err(BrowserError::Timeout(format!(
            "selector `{selector}` not present after {timeout:?}"
        )))
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.lock().current_url.clone())
    }

    async fn page_text(&self) -> Result<String> {
        Ok(self
            .lock()
            .page()
            .map(|p| p.body_text.clone())
            .unwrap_or_default())
    }

    async fn exists(&self, selector: &str) -> Result<bool> {
        Ok(self.lock().page().is_some_and(|p| p.has(selector)))
    }

    async fn fill_field(&self, selector: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.page().is_some_and(|p| p.has(selector)) {
            return Err(BrowserError::SelectorNotFound(selector.to_string()));
        }
        state.fields.insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let target = {
            let state = self.lock();
            if !state.page().is_some_and(|p| p.has(selector)) {
                return Err(BrowserError::SelectorNotFound(selector.to_string()));
            }
            state
                .click_hooks
                .get(selector)
                .and_then(|hook| hook(&state.context()))
        };

        match target {
            Some(url) => self.navigate(&url).await,
            None => Ok(()),
        }
    }

    async fn extract_text(&self, selector: &str) -> Result<Option<String>> {
        Ok(self.lock().page().and_then(|p| {
            p.elements
                .get(selector)
                .and_then(|e| e.first())
                .map(|e| e.text.clone())
        }))
    }

    async fn extract_all_text(&self, selector: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .page()
            .and_then(|p| p.elements.get(selector))
            .map(|elements| elements.iter().map(|e| e.text.clone()).collect())
            .unwrap_or_default())
    }

    async fn extract_attribute(&self, selector: &str, attribute: &str) -> Result<Option<String>> {
        Ok(self.lock().page().and_then(|p| {
            p.elements
                .get(selector)
                .and_then(|e| e.first())
                .and_then(|e| e.attributes.get(attribute).cloned())
        }))
    }

    async fn query_all(
        &self,
        item_selector: &str,
        fields: &[FieldQuery],
    ) -> Result<Vec<BTreeMap<String, String>>> {
        let state = self.lock();
        let Some(items) = state.page().and_then(|p| p.items.get(item_selector)) else {
            return Ok(Vec::new());
        };

        Ok(items
            .iter()
            .map(|item| {
                fields
                    .iter()
                    .filter_map(|field| {
                        let key = match &field.attribute {
                            Some(attr) => format!("{}@{}", field.selector, attr),
                            None => field.selector.clone(),
                        };
                        item.get(&key).map(|v| (field.name.clone(), v.clone()))
                    })
                    .collect()
            })
            .collect())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        Ok(self.lock().cookies.clone())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        let mut state = self.lock();
        for cookie in cookies {
            state
                .cookies
                .retain(|c| !(c.name == cookie.name && c.domain == cookie.domain));
            state.cookies.push(cookie.clone());
        }
        Ok(())
    }

    async fn delete_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        self.lock().cookies.retain(|c| {
            !cookies
                .iter()
                .any(|d| c.name == d.name && c.domain == d.domain && c.path == d.path)
        });
        Ok(())
    }

    async fn local_storage(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.lock().storage.clone())
    }

    async fn set_local_storage(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let mut state = self.lock();
        for (k, v) in entries {
            state.storage.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_navigation_follows_redirects() {
        let driver = ScriptedDriver::new()
            .redirect("https://site.test/a", "https://site.test/b")
            .page(
                "https://site.test/b",
                ScriptedPage::new().with_text("h1", "B"),
            );

        driver.navigate("https://site.test/a").await.unwrap();
        assert_eq!(driver.current_url().await.unwrap(), "https://site.test/b");
        assert_eq!(
            driver.extract_text("h1").await.unwrap().as_deref(),
            Some("B")
        );
    }

    #[tokio::test]
    async fn test_redirect_loop_is_an_error() {
        let driver = ScriptedDriver::new()
            .redirect("https://site.test/a", "https://site.test/b")
            .redirect("https://site.test/b", "https://site.test/a");
        assert!(driver.navigate("https://site.test/a").await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_navigation_failures() {
        let driver = ScriptedDriver::new().fail_navigation("https://site.test/", 2);
        assert!(driver.navigate("https://site.test/").await.is_err());
        assert!(driver.navigate("https://site.test/").await.is_err());
        assert!(driver.navigate("https://site.test/").await.is_ok());
        assert_eq!(driver.navigations().len(), 3);
    }

    #[tokio::test]
    async fn test_click_hook_sees_filled_fields() {
        let driver = ScriptedDriver::new()
            .page(
                "https://site.test/login",
                ScriptedPage::new()
                    .with_element("#password")
                    .with_element("button"),
            )
            .on_click("button", |ctx| {
                (ctx.field("#password") == Some("hunter2"))
                    .then(|| "https://site.test/home".to_string())
            });

        driver.navigate("https://site.test/login").await.unwrap();
        driver.fill_field("#password", "hunter2").await.unwrap();
        driver.click("button").await.unwrap();
        assert_eq!(driver.current_url().await.unwrap(), "https://site.test/home");
    }

    #[tokio::test]
    async fn test_query_all_reads_text_and_attributes() {
        let item = BTreeMap::from([
            ("h3".to_string(), "Rust Engineer".to_string()),
            ("a@href".to_string(), "https://site.test/jobs/1".to_string()),
        ]);
        let driver = ScriptedDriver::new().page(
            "https://site.test/jobs",
            ScriptedPage::new().with_items("li.job", vec![item]),
        );
        driver.navigate("https://site.test/jobs").await.unwrap();

        let rows = driver
            .query_all(
                "li.job",
                &[
                    FieldQuery::text("job_title", "h3"),
                    FieldQuery::attribute("linkedin_url", "a", "href"),
                    FieldQuery::text("company", ".company"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["job_title"], "Rust Engineer");
        assert_eq!(rows[0]["linkedin_url"], "https://site.test/jobs/1");
        assert!(!rows[0].contains_key("company"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out() {
        let driver = ScriptedDriver::new();
        let err = driver
            .wait_for("main", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
