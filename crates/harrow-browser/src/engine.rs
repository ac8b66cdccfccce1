use crate::cookie::Cookie;
use crate::driver::{FieldQuery, PageDriver};
use crate::error::{BrowserError, Result};
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, DeleteCookiesParams, TimeSinceEpoch,
};
use chromiumoxide::page::Page;
use futures_util::stream::StreamExt;
use harrow_core::BrowserConfig;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Headless Chromium page context.
///
/// This is the explicit browser context handed to the orchestrator: the
/// caller launches it, lends it to any number of sequential scrapes, and
/// closes it when done.
pub struct BrowserEngine {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
    poll_interval: Duration,
}

impl BrowserEngine {
    /// Launch a browser and open a blank page.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let mut builder = ChromeConfig::builder()
            .no_sandbox()
            .window_size(config.window_width, config.window_height);
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &config.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let chrome_config = builder.build().map_err(BrowserError::ChromiumError)?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("chromium handler event error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        tracing::info!(headless = config.headless, "Browser context launched");

        Ok(Self {
            browser,
            page,
            handler,
            navigation_timeout: config.navigation_timeout(),
            poll_interval: config.poll_interval(),
        })
    }

    /// Close the browser and stop its event handler.
    pub async fn close(mut self) -> Result<()> {
        let result = self
            .browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::ChromiumError(e.to_string()));
        self.handler.abort();
        tracing::info!("Browser context closed");
        result
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::EvaluationError(e.to_string()))?;
        decode_value(result.value())
    }
}

/// Deserialize a script result. CDP omits `value` when the script returns
/// `null` or `undefined`; that decodes as JSON `null`, so `Option` targets
/// come back as `None`.
fn decode_value<T: DeserializeOwned>(value: Option<&serde_json::Value>) -> Result<T> {
    let value = value.cloned().unwrap_or(serde_json::Value::Null);
    serde_json::from_value(value).map_err(|e| BrowserError::EvaluationError(e.to_string()))
}

/// JSON-encode a value for interpolation into a script.
fn js_literal<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| BrowserError::EvaluationError(e.to_string()))
}

#[async_trait::async_trait]
impl PageDriver for BrowserEngine {
    async fn navigate(&self, url: &str) -> Result<()> {
        tracing::debug!("Navigating to {}", url);
        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::NavigationError(format!("{url}: {e}"))),
            Err(_) => Err(BrowserError::Timeout(format!(
                "navigation to {url} exceeded {:?}",
                self.navigation_timeout
            ))),
        }
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.exists(selector).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "selector `{selector}` not present after {timeout:?}"
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn current_url(&self) -> Result<String> {
        self.page
            .url()
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))
    }

    async fn page_text(&self) -> Result<String> {
        self.eval("document.body ? document.body.innerText : ''".to_string())
            .await
    }

    async fn exists(&self, selector: &str) -> Result<bool> {
        let sel = js_literal(selector)?;
        self.eval(format!("document.querySelector({sel}) !== null"))
            .await
    }

    async fn fill_field(&self, selector: &str, value: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::SelectorNotFound(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        element
            .type_str(value)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::SelectorNotFound(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        Ok(())
    }

    async fn extract_text(&self, selector: &str) -> Result<Option<String>> {
        let sel = js_literal(selector)?;
        self.eval(format!(
            "(() => {{ const el = document.querySelector({sel}); return el ? el.innerText : null; }})()"
        ))
        .await
    }

    async fn extract_all_text(&self, selector: &str) -> Result<Vec<String>> {
        let sel = js_literal(selector)?;
        self.eval(format!(
            "Array.from(document.querySelectorAll({sel})).map(el => el.innerText)"
        ))
        .await
    }

    async fn extract_attribute(&self, selector: &str, attribute: &str) -> Result<Option<String>> {
        let sel = js_literal(selector)?;
        let attr = js_literal(attribute)?;
        self.eval(format!(
            "(() => {{ const el = document.querySelector({sel}); return el ? el.getAttribute({attr}) : null; }})()"
        ))
        .await
    }

    async fn query_all(
        &self,
        item_selector: &str,
        fields: &[FieldQuery],
    ) -> Result<Vec<BTreeMap<String, String>>> {
        let sel = js_literal(item_selector)?;
        let queries = js_literal(fields)?;
        self.eval(format!(
            r"(() => {{
                const fields = {queries};
                return Array.from(document.querySelectorAll({sel})).map(item => {{
                    const out = {{}};
                    for (const f of fields) {{
                        const el = item.querySelector(f.selector);
                        if (!el) continue;
                        const v = f.attribute ? el.getAttribute(f.attribute) : el.innerText;
                        if (v !== null) out[f.name] = v;
                    }}
                    return out;
                }});
            }})()"
        ))
        .await
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: (!c.session).then_some(c.expires),
                http_only: c.http_only,
                secure: c.secure,
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let mut builder = CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value.clone())
                .domain(cookie.domain.clone())
                .path(cookie.path.clone())
                .secure(cookie.secure)
                .http_only(cookie.http_only);
            if let Some(expires) = cookie.expires {
                builder = builder.expires(TimeSinceEpoch::new(expires));
            }
            params.push(builder.build().map_err(BrowserError::ChromiumError)?);
        }

        self.page
            .set_cookies(params)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        Ok(())
    }

    async fn delete_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            params.push(
                DeleteCookiesParams::builder()
                    .name(cookie.name.clone())
                    .domain(cookie.domain.clone())
                    .path(cookie.path.clone())
                    .build()
                    .map_err(BrowserError::ChromiumError)?,
            );
        }

        self.page
            .delete_cookies(params)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        Ok(())
    }

    async fn local_storage(&self) -> Result<BTreeMap<String, String>> {
        let json: String = self
            .eval("JSON.stringify(Object.assign({}, window.localStorage))".to_string())
            .await?;
        serde_json::from_str(&json).map_err(|e| BrowserError::EvaluationError(e.to_string()))
    }

    async fn set_local_storage(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let entries = js_literal(entries)?;
        self.eval::<bool>(format!(
            "(() => {{ for (const [k, v] of Object.entries({entries})) window.localStorage.setItem(k, v); return true; }})()"
        ))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_script_value_is_none() {
        assert_eq!(decode_value::<Option<String>>(None).unwrap(), None);
        assert_eq!(
            decode_value::<Option<String>>(Some(&serde_json::Value::Null)).unwrap(),
            None
        );
    }

    #[test]
    fn test_script_values_decode() {
        assert_eq!(
            decode_value::<Option<String>>(Some(&json!("Jane"))).unwrap(),
            Some("Jane".to_string())
        );
        assert_eq!(
            decode_value::<Vec<String>>(Some(&json!(["a", "b"]))).unwrap(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_missing_value_for_required_type_is_an_error() {
        let err = decode_value::<bool>(None).unwrap_err();
        assert!(matches!(err, BrowserError::EvaluationError(_)));
    }
}
