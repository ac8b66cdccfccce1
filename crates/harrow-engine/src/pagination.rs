//! Pagination over multi-page result lists.
//!
//! [`PaginationController::run`] drives a [`PageSource`] page by page until
//! one of three things happens, checked in this order after every page:
//!
//! 1. the limit is reached (the surplus of the last page is cut off)
//! 2. the source reports no further page
//! 3. too many consecutive pages came back empty, which is an error
//!    ([`ScrapeError::PaginationStalled`]) rather than a silent stop
//!
//! Items keep page order and in-page order. Nothing is deduplicated.

use async_trait::async_trait;
use harrow_core::{Result, ScrapeError};

/// Termination policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationPolicy {
    /// Maximum number of items to return
    pub limit: Option<usize>,
    /// Consecutive empty pages after which pagination counts as stalled
    pub max_consecutive_empty_pages: u32,
}

/// Position in a paginated scrape.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PaginationCursor {
    page_index: u32,
    accumulated: usize,
    consecutive_empty: u32,
}

impl PaginationCursor {
    /// Zero-based index of the current page.
    #[must_use]
    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    /// Items accumulated so far.
    #[must_use]
    pub fn accumulated(&self) -> usize {
        self.accumulated
    }

    /// Pages fetched so far.
    #[must_use]
    pub fn pages_fetched(&self) -> u32 {
        self.page_index + 1
    }
}

/// Something that yields result pages.
#[async_trait]
pub trait PageSource: Send {
    /// Item type.
    type Item: Send;

    /// Items of the page the cursor points at (already loaded for page 0)
    async fn fetch(&mut self, cursor: &PaginationCursor) -> Result<Vec<Self::Item>>;

    /// Whether another page follows
    async fn has_more(&mut self) -> Result<bool>;

    /// Load the next page
    async fn advance(&mut self, cursor: &PaginationCursor) -> Result<()>;
}

/// Runs a [`PageSource`] under a [`PaginationPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct PaginationController {
    policy: PaginationPolicy,
}

impl PaginationController {
    /// Controller enforcing `policy`.
    #[must_use]
    pub fn new(policy: PaginationPolicy) -> Self {
        Self { policy }
    }

    /// Collect items from `source`. `on_page` is called after each page that
    /// does not end pagination, with the updated cursor.
    pub async fn run<S>(
        &self,
        source: &mut S,
        mut on_page: impl FnMut(&PaginationCursor) + Send,
    ) -> Result<Vec<S::Item>>
    where
        S: PageSource,
    {
        let mut items = Vec::new();
        if self.policy.limit == Some(0) {
            return Ok(items);
        }

        let mut cursor = PaginationCursor::default();
        loop {
            let page = source.fetch(&cursor).await?;
            let fetched = page.len();
            cursor.consecutive_empty = if fetched == 0 {
                cursor.consecutive_empty + 1
            } else {
                0
            };
            items.extend(page);
            cursor.accumulated = items.len();
            tracing::debug!(
                page = cursor.page_index,
                fetched,
                accumulated = cursor.accumulated,
                "Fetched result page"
            );

            if let Some(limit) = self.policy.limit {
                if items.len() >= limit {
                    items.truncate(limit);
                    cursor.accumulated = limit;
                    break;
                }
            }

            if !source.has_more().await? {
                break;
            }

            if cursor.consecutive_empty >= self.policy.max_consecutive_empty_pages.max(1) {
                tracing::warn!(
                    "Pagination stalled: {} consecutive empty pages while more were signalled",
                    cursor.consecutive_empty
                );
                return Err(ScrapeError::PaginationStalled {
                    empty_pages: cursor.consecutive_empty,
                    pages_fetched: cursor.pages_fetched(),
                });
            }

            on_page(&cursor);
            source.advance(&cursor).await?;
            cursor.page_index += 1;
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harrow_core::ErrorKind;

    /// In-memory pages; `endless` keeps signalling more pages after the last one.
    struct VecSource {
        pages: Vec<Vec<u32>>,
        current: usize,
        endless: bool,
        fetches: u32,
    }

    impl VecSource {
        fn new(pages: Vec<Vec<u32>>) -> Self {
            Self {
                pages,
                current: 0,
                endless: false,
                fetches: 0,
            }
        }
    }

    #[async_trait]
    impl PageSource for VecSource {
        type Item = u32;

        async fn fetch(&mut self, _cursor: &PaginationCursor) -> Result<Vec<u32>> {
            self.fetches += 1;
            Ok(self.pages.get(self.current).cloned().unwrap_or_default())
        }

        async fn has_more(&mut self) -> Result<bool> {
            Ok(self.endless || self.current + 1 < self.pages.len())
        }

        async fn advance(&mut self, _cursor: &PaginationCursor) -> Result<()> {
            self.current += 1;
            Ok(())
        }
    }

    fn controller(limit: Option<usize>, max_empty: u32) -> PaginationController {
        PaginationController::new(PaginationPolicy {
            limit,
            max_consecutive_empty_pages: max_empty,
        })
    }

    fn pages(count: u32, per_page: u32) -> Vec<Vec<u32>> {
        (0..count)
            .map(|p| (0..per_page).map(|i| p * 100 + i).collect())
            .collect()
    }

    #[tokio::test]
    async fn test_limit_cuts_last_page() {
        let mut source = VecSource::new(pages(5, 3));
        let items = controller(Some(10), 3)
            .run(&mut source, |_| {})
            .await
            .unwrap();

        assert_eq!(items.len(), 10);
        assert_eq!(source.fetches, 4);
        assert_eq!(&items[..4], &[0, 1, 2, 100]);
        assert_eq!(items[9], 300);
    }

    #[tokio::test]
    async fn test_stops_when_no_more_pages() {
        let mut source = VecSource::new(pages(2, 3));
        let items = controller(None, 3).run(&mut source, |_| {}).await.unwrap();
        assert_eq!(items, vec![0, 1, 2, 100, 101, 102]);
    }

    #[tokio::test]
    async fn test_endless_empty_pages_stall() {
        let mut source = VecSource::new(Vec::new());
        source.endless = true;

        let err = controller(Some(50), 3)
            .run(&mut source, |_| {})
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PaginationStalled);
        assert_eq!(
            err,
            ScrapeError::PaginationStalled {
                empty_pages: 3,
                pages_fetched: 3,
            }
        );
        assert_eq!(source.fetches, 3);
    }

    #[tokio::test]
    async fn test_non_empty_page_resets_stall_count() {
        let mut source = VecSource::new(vec![vec![], vec![], vec![1], vec![], vec![], vec![2]]);
        let items = controller(None, 3).run(&mut source, |_| {}).await.unwrap();
        assert_eq!(items, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_zero_empty_page_allowance_acts_as_one() {
        let mut source = VecSource::new(pages(3, 2));
        let items = controller(None, 0).run(&mut source, |_| {}).await.unwrap();
        assert_eq!(items.len(), 6);

        let mut source = VecSource::new(vec![vec![1], vec![], vec![2]]);
        let err = controller(None, 0)
            .run(&mut source, |_| {})
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ScrapeError::PaginationStalled {
                empty_pages: 1,
                pages_fetched: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_zero_limit_fetches_nothing() {
        let mut source = VecSource::new(pages(3, 3));
        let items = controller(Some(0), 3).run(&mut source, |_| {}).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(source.fetches, 0);
    }

    #[tokio::test]
    async fn test_on_page_sees_growing_cursor() {
        let mut source = VecSource::new(pages(3, 2));
        let mut seen = Vec::new();
        controller(None, 3)
            .run(&mut source, |cursor| {
                seen.push((cursor.page_index(), cursor.accumulated()));
            })
            .await
            .unwrap();
        assert_eq!(seen, vec![(0, 2), (1, 4)]);
    }
}
