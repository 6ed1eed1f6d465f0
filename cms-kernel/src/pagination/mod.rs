//! Pagination and free-text search
//!
//! - [`PageParams`]: what the caller asked for, clamped server-side
//! - [`ListQuery`]: what to list (filter, relations, ordering, projection,
//!   searchable columns)
//! - [`Paginator`]: runs the count and page queries on one executor
//! - [`Page`]: the result with its totals

mod page;
mod paginator;
mod params;

pub use page::Page;
pub use paginator::{list_filter, stable_order, ListQuery, Paginator};
pub use params::{PageParams, SoftDeleteScope};
