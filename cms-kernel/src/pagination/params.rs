//! Caller-supplied paging parameters
//!
//! [`PageParams`] is deserialized straight from a query string and clamped
//! server-side, so a client can never request an unbounded page.
//!
//! ```rust
//! use cms_kernel::pagination::{PageParams, SoftDeleteScope};
//!
//! let params = PageParams::new()
//!     .with_page(0)
//!     .with_page_size(500)
//!     .with_deleted(SoftDeleteScope::Include);
//!
//! assert_eq!(params.page_number(), 1);
//! assert_eq!(params.page_size_within(20, 100), 100);
//! ```

use serde::{Deserialize, Serialize};

use crate::crud::DELETED_AT;
use crate::storage::{Filter, FilterCondition};

/// Which rows a query sees with respect to soft deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoftDeleteScope {
    /// Only rows with `deleted_at` unset
    #[default]
    Exclude,
    /// Every row
    Include,
    /// Only soft-deleted rows
    Only,
}

impl SoftDeleteScope {
    /// Filter selecting the rows in this scope
    pub fn filter(self) -> Filter {
        match self {
            Self::Exclude => FilterCondition::is_null(DELETED_AT).into(),
            Self::Include => Filter::All,
            Self::Only => FilterCondition::is_not_null(DELETED_AT).into(),
        }
    }
}

/// Paging, search and soft-delete parameters for list queries
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PageParams {
    /// Page number (1-indexed). None defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,

    /// Items per page. None uses the configured default.
    #[serde(
        default,
        alias = "pageSize",
        alias = "per_page",
        skip_serializing_if = "Option::is_none"
    )]
    pub page_size: Option<u64>,

    /// Free-text query matched against the searchable columns
    #[serde(default, alias = "q", skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,

    /// Soft-delete scope
    #[serde(default)]
    pub deleted: SoftDeleteScope,
}

impl PageParams {
    /// Empty parameters: first page, default size, no search
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page number
    #[must_use]
    pub fn with_page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    /// Set the page size
    #[must_use]
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Set the search query
    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Set the soft-delete scope
    #[must_use]
    pub fn with_deleted(mut self, deleted: SoftDeleteScope) -> Self {
        self.deleted = deleted;
        self
    }

    /// The 1-indexed page number; page 0 is treated as page 1
    #[must_use]
    pub fn page_number(&self) -> u64 {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size clamped to `1..=max`, falling back to `default`
    #[must_use]
    pub fn page_size_within(&self, default: u64, max: u64) -> u64 {
        let max = max.max(1);
        self.page_size.unwrap_or(default).clamp(1, max)
    }

    /// The trimmed search term, if any
    #[must_use]
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
