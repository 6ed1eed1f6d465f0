//! Page queries with total counts

use crate::client::DataClient;
use crate::config::PaginationConfig;
use crate::crud::relation::{self, Relation};
use crate::crud::{CREATED_AT, ID};
use crate::error::{DataError, DataResult};
use crate::storage::{
    Executor, Filter, FilterCondition, FindQuery, OrderBy, Pagination, Record, StorageError,
};

use super::{Page, PageParams};

/// What to list, independent of which page
///
/// ```rust
/// use cms_kernel::pagination::ListQuery;
/// use cms_kernel::storage::{FilterCondition, OrderBy};
///
/// let query = ListQuery::new()
///     .filter(FilterCondition::eq("status_id", "sts_1").into())
///     .order_by(vec![OrderBy::asc("title")])
///     .searchable(&["title", "content"]);
/// assert_eq!(query.searchable.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Caller filter, combined with the soft-delete scope and search
    pub filter: Filter,
    /// Relations to attach to every item
    pub include: Vec<Relation>,
    /// Ordering keys; empty means newest first
    pub order_by: Vec<OrderBy>,
    /// Column projection
    pub select: Option<Vec<String>>,
    /// Columns the free-text search matches against
    pub searchable: Vec<String>,
}

impl ListQuery {
    /// Every row, default ordering, no search
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the caller filter
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Set the relations to load
    #[must_use]
    pub fn include(mut self, include: Vec<Relation>) -> Self {
        self.include = include;
        self
    }

    /// Set the ordering keys
    #[must_use]
    pub fn order_by(mut self, order_by: Vec<OrderBy>) -> Self {
        self.order_by = order_by;
        self
    }

    /// Set the column projection
    #[must_use]
    pub fn select(mut self, select: Option<Vec<String>>) -> Self {
        self.select = select;
        self
    }

    /// Set the searchable columns
    #[must_use]
    pub fn searchable(mut self, columns: &[&str]) -> Self {
        self.searchable = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Pagination and search over any table
#[derive(Debug, Clone)]
pub struct Paginator {
    client: DataClient,
    config: PaginationConfig,
}

impl Paginator {
    /// Create a paginator with the given limits
    pub fn new(client: DataClient, config: PaginationConfig) -> Self {
        Self { client, config }
    }

    /// Page size limits and count policy
    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    /// One page of `table` plus the total number of matching rows
    ///
    /// Count and page run on the same executor. With an ambient transaction
    /// they share it; otherwise `consistent_counts` decides whether a short
    /// transaction is opened around both.
    pub async fn paginate(
        &self,
        table: &str,
        query: &ListQuery,
        params: &PageParams,
    ) -> DataResult<Page<Record>> {
        if self.config.consistent_counts && !self.client.in_transaction() {
            self.client
                .run_in_transaction(self.client.defaults(), |_tx| {
                    self.fetch_page(table, query, params)
                })
                .await
        } else {
            self.fetch_page(table, query, params).await
        }
    }

    async fn fetch_page(
        &self,
        table: &str,
        query: &ListQuery,
        params: &PageParams,
    ) -> DataResult<Page<Record>> {
        let page = params.page_number();
        let page_size =
            params.page_size_within(self.config.default_page_size, self.config.max_page_size);
        let filter = list_filter(query, params);

        let find = FindQuery::new(filter)
            .order_by(stable_order(&query.order_by))
            .paginate(Pagination::page(page, page_size))
            .select(relation::widen_select(query.select.clone(), &query.include));

        let fetch_failed = |source: StorageError| DataError::FetchFailed {
            table: table.to_string(),
            source,
        };

        let mut executor = self.client.executor().await?;
        let total_count = executor
            .count(table, &find.filter)
            .await
            .map_err(fetch_failed)?;
        let mut items = if find
            .pagination
            .is_some_and(|window| window.offset >= total_count)
        {
            Vec::new()
        } else {
            executor.find_many(table, &find).await.map_err(fetch_failed)?
        };
        relation::load(&mut executor, &query.include, &mut items)
            .await
            .map_err(fetch_failed)?;

        tracing::debug!(
            table,
            page,
            page_size,
            total_count,
            returned = items.len(),
            "Fetched page"
        );
        Ok(Page::new(items, page, page_size, total_count))
    }
}

/// Caller filter AND soft-delete scope AND search
pub fn list_filter(query: &ListQuery, params: &PageParams) -> Filter {
    let mut filter = query.filter.clone().and(params.deleted.filter());
    if let Some(term) = params.search_term() {
        if !query.searchable.is_empty() {
            filter = filter.and(Filter::any_of(query.searchable.iter().map(|column| {
                Filter::from(FilterCondition::contains_insensitive(column.as_str(), term))
            })));
        }
    }
    filter
}

/// Caller ordering with `id` appended as a tiebreaker
///
/// An empty ordering falls back to newest first.
pub fn stable_order(order_by: &[OrderBy]) -> Vec<OrderBy> {
    if order_by.is_empty() {
        return vec![OrderBy::desc(CREATED_AT), OrderBy::desc(ID)];
    }
    let mut order = order_by.to_vec();
    if !order.iter().any(|o| o.column == ID) {
        order.push(OrderBy::asc(ID));
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TransactionOptions;
    use crate::crud::DELETED_AT;
    use crate::pagination::SoftDeleteScope;
    use crate::storage::{MemoryDriver, StorageDriver};
    use serde_json::json;
    use std::sync::Arc;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn seeded(rows: usize) -> (DataClient, Arc<MemoryDriver>) {
        let driver = Arc::new(MemoryDriver::new());
        let mut db = driver.direct();
        for i in 0..rows {
            db.insert(
                "categories",
                record(json!({
                    "id": format!("cat_{:02}", i),
                    "name": if i % 2 == 0 { format!("Tech {}", i) } else { format!("Art {}", i) },
                    "created_at": format!("2025-01-{:02}T00:00:00Z", i % 3 + 1),
                    "deleted_at": if i == 0 { json!("2025-02-01T00:00:00Z") } else { json!(null) },
                })),
            )
            .await
            .unwrap();
        }
        (DataClient::new(driver.clone()), driver)
    }

    fn paginator(client: DataClient) -> Paginator {
        Paginator::new(client, PaginationConfig::default())
    }

    fn ids(page: &Page<Record>) -> Vec<&str> {
        page.items.iter().map(|r| r["id"].as_str().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_totals_independent_of_page() {
        let (client, _) = seeded(11).await;
        let paginator = paginator(client);
        let query = ListQuery::new();

        for page in [1, 2, 3, 9] {
            let params = PageParams::new().with_page(page).with_page_size(4);
            let result = paginator.paginate("categories", &query, &params).await.unwrap();
            assert_eq!(result.total_count, 10);
            assert_eq!(result.total_pages, 3);
            assert!(result.len() <= 4);
        }

        let last = paginator
            .paginate(
                "categories",
                &query,
                &PageParams::new().with_page(3).with_page_size(4),
            )
            .await
            .unwrap();
        assert_eq!(last.len(), 2);
        assert!(!last.has_next);
    }

    #[tokio::test]
    async fn test_default_order_is_stable() {
        let (client, _) = seeded(9).await;
        let paginator = paginator(client);
        let params = PageParams::new().with_page_size(100);

        let first = paginator
            .paginate("categories", &ListQuery::new(), &params)
            .await
            .unwrap();
        let second = paginator
            .paginate("categories", &ListQuery::new(), &params)
            .await
            .unwrap();
        assert_eq!(ids(&first), ids(&second));
        // newest first, id descending within the same instant
        assert_eq!(
            ids(&first),
            vec!["cat_08", "cat_05", "cat_02", "cat_07", "cat_04", "cat_01", "cat_06", "cat_03"]
        );
    }

    #[tokio::test]
    async fn test_deleted_scope() {
        let (client, _) = seeded(3).await;
        let paginator = paginator(client);
        let query = ListQuery::new().order_by(vec![OrderBy::asc("id")]);

        let only = paginator
            .paginate(
                "categories",
                &query,
                &PageParams::new().with_deleted(SoftDeleteScope::Only),
            )
            .await
            .unwrap();
        assert_eq!(ids(&only), vec!["cat_00"]);

        let all = paginator
            .paginate(
                "categories",
                &query,
                &PageParams::new().with_deleted(SoftDeleteScope::Include),
            )
            .await
            .unwrap();
        assert_eq!(all.total_count, 3);
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_and_anded() {
        let (client, _) = seeded(6).await;
        let paginator = paginator(client);
        let query = ListQuery::new()
            .filter(FilterCondition::ne("id", "cat_04").into())
            .order_by(vec![OrderBy::asc("id")])
            .searchable(&["name", "description"]);

        let result = paginator
            .paginate("categories", &query, &PageParams::new().with_search("tECH"))
            .await
            .unwrap();
        // cat_00 is soft-deleted and cat_04 is filtered out
        assert_eq!(ids(&result), vec!["cat_02"]);
    }

    #[test]
    fn test_search_without_searchable_columns_is_ignored() {
        let filter = list_filter(&ListQuery::new(), &PageParams::new().with_search("x"));
        assert_eq!(filter, FilterCondition::is_null(DELETED_AT).into());
    }

    #[test]
    fn test_stable_order_appends_id() {
        assert_eq!(
            stable_order(&[OrderBy::asc("name")]),
            vec![OrderBy::asc("name"), OrderBy::asc("id")]
        );
        assert_eq!(
            stable_order(&[OrderBy::desc("id")]),
            vec![OrderBy::desc("id")]
        );
    }

    #[tokio::test]
    async fn test_consistent_counts_use_transaction() {
        let (client, _) = seeded(3).await;
        let config = PaginationConfig {
            consistent_counts: true,
            ..PaginationConfig::default()
        };
        let paginator = Paginator::new(client.clone(), config);

        // hold the store so the paginator has to wait for its own transaction
        let holder = client.clone();
        let blocker = tokio::spawn(async move {
            holder
                .run_in_transaction(TransactionOptions::default(), |_tx| async {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    DataResult::Ok(())
                })
                .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let result = paginator
            .paginate("categories", &ListQuery::new(), &PageParams::new())
            .await
            .unwrap();
        assert_eq!(result.total_count, 2);
        blocker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_includes_survive_projection() {
        let (client, driver) = seeded(2).await;
        let mut db = driver.direct();
        db.insert(
            "articles",
            record(json!({"id": "art_1", "title": "Rust", "category_id": "cat_01"})),
        )
        .await
        .unwrap();

        let query = ListQuery::new()
            .select(Some(vec!["title".into()]))
            .include(vec![Relation::belongs_to("category", "categories", "category_id")]);
        let page = paginator(client)
            .paginate("articles", &query, &PageParams::new())
            .await
            .unwrap();
        assert_eq!(page.items[0]["category"]["name"], "Art 1");
        assert_eq!(page.items[0]["title"], "Rust");
    }
}
