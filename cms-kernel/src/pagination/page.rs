//! A page of results with its totals

use serde::{Deserialize, Serialize};

/// One page of a list query
///
/// `total_count` is computed independently of the page window, so a page
/// beyond the last one has no items but still reports the full total.
///
/// ```rust
/// use cms_kernel::pagination::Page;
///
/// let page = Page::new(vec!["a", "b"], 1, 2, 5);
/// assert_eq!(page.total_pages, 3);
/// assert!(page.has_next);
/// assert!(!page.has_prev);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page<T> {
    /// Items on this page, at most `page_size`
    pub items: Vec<T>,
    /// Current page number (1-indexed)
    pub page: u64,
    /// Requested page size after clamping
    pub page_size: u64,
    /// Rows matching the query across all pages
    pub total_count: u64,
    /// `ceil(total_count / page_size)`
    pub total_pages: u64,
    /// Whether there is a next page
    pub has_next: bool,
    /// Whether there is a previous page
    pub has_prev: bool,
}

impl<T> Page<T> {
    /// Build a page and derive `total_pages`, `has_next` and `has_prev`
    pub fn new(items: Vec<T>, page: u64, page_size: u64, total_count: u64) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            total_count.div_ceil(page_size)
        };
        Self {
            items,
            page,
            page_size,
            total_count,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }

    /// Convert every item, keeping the totals
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total_count: self.total_count,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_prev: self.has_prev,
        }
    }

    /// Convert every item, stopping at the first failure
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            items: self.items.into_iter().map(f).collect::<Result<_, _>>()?,
            page: self.page,
            page_size: self.page_size,
            total_count: self.total_count,
            total_pages: self.total_pages,
            has_next: self.has_next,
            has_prev: self.has_prev,
        })
    }

    /// Number of items on this page
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether this page has no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_pages_rounds_up() {
        assert_eq!(Page::<u8>::new(vec![], 1, 20, 0).total_pages, 0);
        assert_eq!(Page::<u8>::new(vec![], 1, 20, 20).total_pages, 1);
        assert_eq!(Page::<u8>::new(vec![], 1, 20, 21).total_pages, 2);
    }

    #[test]
    fn test_beyond_last_page() {
        let page = Page::<u8>::new(vec![], 9, 10, 25);
        assert_eq!(page.total_pages, 3);
        assert!(!page.has_next);
        assert!(page.has_prev);
        assert!(page.is_empty());
    }

    #[test]
    fn test_try_map_keeps_totals() {
        let page = Page::new(vec!["1", "2"], 2, 2, 6);
        let parsed: Page<u32> = page.try_map(|s| s.parse::<u32>()).unwrap();
        assert_eq!(parsed.items, vec![1, 2]);
        assert_eq!(parsed.total_count, 6);
        assert!(parsed.has_next);

        let failed = Page::new(vec!["x"], 1, 1, 1).try_map(|s| s.parse::<u32>());
        assert!(failed.is_err());
    }
}
