//! Extraction strategies.
//!
//! A strategy knows one page layout: which element signals that the page is
//! ready, and how to turn the loaded page into a [`RawFieldMap`]. The engine
//! never looks at selectors itself.
//!
//! Most pages need no code: [`SelectorStrategy`] and [`SelectorListStrategy`]
//! are driven by TOML selector maps.

use async_trait::async_trait;
use harrow_browser::{FieldQuery, PageDriver, Result as BrowserResult};
use harrow_core::{ConfigResult, EntityKind, Result, ScrapeError, ScrapeTarget};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Untyped value produced by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    /// Text as shown on the page
    Text(String),
    /// Already-numeric value
    Number(f64),
    /// Repeated value (skills, image URLs, experience entries)
    List(Vec<RawValue>),
    /// Nested field map (one experience, one education)
    Record(RawFieldMap),
}

impl RawValue {
    /// Text value.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

/// Field name to raw value, for one page or one list item.
pub type RawFieldMap = BTreeMap<String, RawValue>;

/// How much a strategy should extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Everything the layout offers
    #[default]
    Full,
    /// Identity and headline fields only; used while the platform is throttling
    Reduced,
}

/// Per-request information handed to a strategy.
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    /// URL the engine navigated to
    pub target_url: String,
    /// Extraction depth
    pub mode: ExtractionMode,
}

/// Extraction for single-entity pages.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Record type this strategy produces
    fn kind(&self) -> EntityKind;

    /// Selector whose presence means the page has rendered
    fn ready_marker(&self) -> &str;

    /// Search URL template with a `{query}` placeholder, for query targets
    fn search_url(&self) -> Option<&str> {
        None
    }

    /// Read the loaded page into a raw field map
    async fn extract(&self, page: &dyn PageDriver, ctx: &ExtractionContext)
        -> BrowserResult<RawFieldMap>;
}

/// Extraction for paginated result lists.
#[async_trait]
pub trait ListExtractionStrategy: Send + Sync {
    /// Record type of each item
    fn kind(&self) -> EntityKind;

    /// Selector whose presence means a result page has rendered
    fn ready_marker(&self) -> &str;

    /// Search URL template with a `{query}` placeholder, for query targets
    fn search_url(&self) -> Option<&str> {
        None
    }

    /// Items on the current page, in page order
    async fn extract_items(
        &self,
        page: &dyn PageDriver,
        ctx: &ExtractionContext,
    ) -> BrowserResult<Vec<RawFieldMap>>;

    /// Whether another result page follows the current one
    async fn has_next_page(&self, page: &dyn PageDriver) -> BrowserResult<bool>;

    /// Move the page to the next result page
    async fn advance(&self, page: &dyn PageDriver) -> BrowserResult<()>;
}

/// Turn a target into the URL to navigate to.
///
/// URLs are used verbatim; queries are substituted, form-encoded, into the
/// strategy's search template.
pub fn resolve_target(
    target: &ScrapeTarget,
    kind: EntityKind,
    search_url: Option<&str>,
) -> Result<String> {
    match target {
        ScrapeTarget::Url(url) => Ok(url.clone()),
        ScrapeTarget::Query(terms) => {
            let template = search_url.ok_or_else(|| ScrapeError::Unknown {
                cause: format!("{kind} strategy has no search URL; `{terms}` must be given as a URL"),
            })?;
            let encoded: String = url::form_urlencoded::byte_serialize(terms.as_bytes()).collect();
            Ok(template.replace("{query}", &encoded))
        }
    }
}

/// One field read by a [`SelectorStrategy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelector {
    /// Record field name
    pub name: String,
    /// CSS selector
    pub selector: String,
    /// Read this attribute instead of the text
    #[serde(default)]
    pub attribute: Option<String>,
    /// Collect every match into a list
    #[serde(default)]
    pub multiple: bool,
    /// Still read in [`ExtractionMode::Reduced`]
    #[serde(default)]
    pub essential: bool,
}

/// Selector map for a single-entity page.
///
/// ```toml
/// kind = "company"
/// ready_marker = "h1"
///
/// [[fields]]
/// name = "name"
/// selector = "h1"
/// essential = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorMap {
    /// Record type
    pub kind: EntityKind,
    /// Page-ready selector
    pub ready_marker: String,
    /// Search template for query targets
    #[serde(default)]
    pub search_url: Option<String>,
    /// Fields to read
    #[serde(default)]
    pub fields: Vec<FieldSelector>,
}

impl SelectorMap {
    /// Parse a selector map from TOML.
    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// [`ExtractionStrategy`] backed by a [`SelectorMap`].
#[derive(Debug, Clone)]
pub struct SelectorStrategy {
    map: SelectorMap,
}

impl SelectorStrategy {
    /// Strategy reading the fields of `map`.
    #[must_use]
    pub fn new(map: SelectorMap) -> Self {
        Self { map }
    }
}

#[async_trait]
impl ExtractionStrategy for SelectorStrategy {
    fn kind(&self) -> EntityKind {
        self.map.kind
    }

    fn ready_marker(&self) -> &str {
        &self.map.ready_marker
    }

    fn search_url(&self) -> Option<&str> {
        self.map.search_url.as_deref()
    }

    async fn extract(
        &self,
        page: &dyn PageDriver,
        ctx: &ExtractionContext,
    ) -> BrowserResult<RawFieldMap> {
        let mut raw = RawFieldMap::new();

        for field in &self.map.fields {
            if ctx.mode == ExtractionMode::Reduced && !field.essential {
                continue;
            }

            let value = match (&field.attribute, field.multiple) {
                (_, true) => {
                    let all = page.extract_all_text(&field.selector).await?;
                    Some(RawValue::List(all.into_iter().map(RawValue::Text).collect()))
                }
                (Some(attr), false) => page
                    .extract_attribute(&field.selector, attr)
                    .await?
                    .map(RawValue::Text),
                (None, false) => page.extract_text(&field.selector).await?.map(RawValue::Text),
            };

            if let Some(value) = value {
                raw.insert(field.name.clone(), value);
            }
        }

        tracing::trace!(kind = %self.map.kind, fields = raw.len(), "Selector extraction done");
        Ok(raw)
    }
}

/// Selector map for a paginated result list.
///
/// ```toml
/// kind = "job"
/// ready_marker = "ul.jobs-search__results-list"
/// search_url = "https://www.linkedin.com/jobs/search/?keywords={query}"
/// item_selector = "ul.jobs-search__results-list > li"
/// next_selector = "button[aria-label='Next']"
///
/// [[fields]]
/// name = "job_title"
/// selector = "h3"
///
/// [[fields]]
/// name = "linkedin_url"
/// selector = "a.base-card__full-link"
/// attribute = "href"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSelectorMap {
    /// Record type of each item
    pub kind: EntityKind,
    /// Result-page ready selector
    pub ready_marker: String,
    /// Search template for query targets
    #[serde(default)]
    pub search_url: Option<String>,
    /// Selector matching one result item
    pub item_selector: String,
    /// Fields read relative to each item
    #[serde(default)]
    pub fields: Vec<FieldQuery>,
    /// "Next page" control; without one the list is a single page
    #[serde(default)]
    pub next_selector: Option<String>,
}

impl ListSelectorMap {
    /// Parse a list selector map from TOML.
    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// [`ListExtractionStrategy`] backed by a [`ListSelectorMap`].
#[derive(Debug, Clone)]
pub struct SelectorListStrategy {
    map: ListSelectorMap,
}

impl SelectorListStrategy {
    /// Strategy reading the items described by `map`.
    #[must_use]
    pub fn new(map: ListSelectorMap) -> Self {
        Self { map }
    }
}

#[async_trait]
impl ListExtractionStrategy for SelectorListStrategy {
    fn kind(&self) -> EntityKind {
        self.map.kind
    }

    fn ready_marker(&self) -> &str {
        &self.map.ready_marker
    }

    fn search_url(&self) -> Option<&str> {
        self.map.search_url.as_deref()
    }

    async fn extract_items(
        &self,
        page: &dyn PageDriver,
        _ctx: &ExtractionContext,
    ) -> BrowserResult<Vec<RawFieldMap>> {
        let rows = page
            .query_all(&self.map.item_selector, &self.map.fields)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(|(k, v)| (k, RawValue::Text(v))).collect())
            .collect())
    }

    async fn has_next_page(&self, page: &dyn PageDriver) -> BrowserResult<bool> {
        match &self.map.next_selector {
            Some(selector) => page.exists(selector).await,
            None => Ok(false),
        }
    }

    async fn advance(&self, page: &dyn PageDriver) -> BrowserResult<()> {
        match &self.map.next_selector {
            Some(selector) => page.click(selector).await,
            None => Ok(()),
        }
    }
}
