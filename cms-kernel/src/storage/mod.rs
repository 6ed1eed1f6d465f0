//! Storage driver boundary
//!
//! Everything above this module talks to the backing store through three
//! object-safe traits:
//!
//! - [`StorageDriver`]: hands out direct executors and opens transactions
//! - [`Executor`]: the per-table operations (`find`, `count`, `group_by`,
//!   `insert`, `update`, `delete`)
//! - [`Transaction`]: an [`Executor`] that must end in `commit` or `rollback`
//!
//! Rows cross the boundary as JSON objects ([`Record`]). Typed entities are
//! layered on top by the CRUD engine.
//!
//! Two drivers ship with the crate: [`MemoryDriver`], always available, and
//! `PgDriver` behind the `postgres` feature.

mod error;
mod filter;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;

use async_trait::async_trait;

pub use error::{StorageError, StorageErrorKind, StorageOperation, StorageResult};
pub use filter::{
    Filter, FilterCondition, FilterOperator, FilterValue, FindQuery, OrderBy, OrderDirection,
    Pagination,
};
pub use memory::MemoryDriver;
#[cfg(feature = "postgres")]
pub use postgres::PgDriver;

/// A row as a JSON object keyed by column name
pub type Record = serde_json::Map<String, serde_json::Value>;

/// One bucket of a `group_by` result
#[derive(Debug, Clone, PartialEq)]
pub struct GroupCount {
    /// The grouped column values
    pub key: Record,
    /// Number of rows in the bucket
    pub count: u64,
}

/// Table operations against either a plain connection or an open transaction
#[async_trait]
pub trait Executor: Send {
    /// Rows matching `query`
    async fn find_many(&mut self, table: &str, query: &FindQuery) -> StorageResult<Vec<Record>>;

    /// First row matching `query`, honoring its ordering
    async fn find_first(&mut self, table: &str, query: &FindQuery) -> StorageResult<Option<Record>> {
        let query = query.clone().limit(1);
        Ok(self.find_many(table, &query).await?.into_iter().next())
    }

    /// Number of rows matching `filter`
    async fn count(&mut self, table: &str, filter: &Filter) -> StorageResult<u64>;

    /// Row counts grouped by `columns`
    async fn group_by(
        &mut self,
        table: &str,
        columns: &[String],
        filter: &Filter,
    ) -> StorageResult<Vec<GroupCount>>;

    /// Insert one row and return it as stored
    async fn insert(&mut self, table: &str, record: Record) -> StorageResult<Record>;

    /// Apply `changes` to every row matching `filter`; returns the updated rows
    async fn update(
        &mut self,
        table: &str,
        filter: &Filter,
        changes: Record,
    ) -> StorageResult<Vec<Record>>;

    /// Remove every row matching `filter`; returns the removed rows
    async fn delete(&mut self, table: &str, filter: &Filter) -> StorageResult<Vec<Record>>;
}

/// An open transaction
///
/// Dropping a transaction without calling [`commit`](Transaction::commit)
/// discards its writes.
#[async_trait]
pub trait Transaction: Send {
    /// Executor bound to this transaction
    fn executor(&mut self) -> &mut dyn Executor;

    /// Make all writes durable
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Discard all writes
    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}

/// Backing store
#[async_trait]
pub trait StorageDriver: Send + Sync + 'static {
    /// Short driver name for logs
    fn name(&self) -> &'static str;

    /// Executor running each operation on its own
    fn direct(&self) -> Box<dyn Executor>;

    /// Open a transaction, waiting for a connection if the store is busy
    async fn begin(&self) -> StorageResult<Box<dyn Transaction>>;
}

/// Keep only `columns` (plus `id` when present) from `record`
pub(crate) fn project(record: Record, columns: &[String]) -> Record {
    record
        .into_iter()
        .filter(|(key, _)| key == "id" || columns.iter().any(|c| c == key))
        .collect()
}

/// Drivers with scripted failures for tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Memory driver whose transactions always fail to commit
    #[derive(Debug, Clone, Default)]
    pub(crate) struct FailingCommitDriver {
        pub(crate) inner: MemoryDriver,
    }

    struct FailingCommit(Box<dyn Transaction>);

    #[async_trait]
    impl StorageDriver for FailingCommitDriver {
        fn name(&self) -> &'static str {
            "failing-commit"
        }

        fn direct(&self) -> Box<dyn Executor> {
            self.inner.direct()
        }

        async fn begin(&self) -> StorageResult<Box<dyn Transaction>> {
            Ok(Box::new(FailingCommit(self.inner.begin().await?)))
        }
    }

    #[async_trait]
    impl Transaction for FailingCommit {
        fn executor(&mut self) -> &mut dyn Executor {
            self.0.executor()
        }

        async fn commit(self: Box<Self>) -> StorageResult<()> {
            self.0.rollback().await?;
            Err(StorageError::new(
                StorageOperation::Commit,
                StorageErrorKind::ConnectionFailed,
                "connection reset during commit",
            ))
        }

        async fn rollback(self: Box<Self>) -> StorageResult<()> {
            self.0.rollback().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_keeps_id() {
        let record = json!({"id": "cat_1", "name": "Tech", "slug": "tech"});
        let record = record.as_object().cloned().unwrap_or_default();
        let projected = project(record, &["name".to_string()]);
        assert_eq!(projected.len(), 2);
        assert!(projected.contains_key("id"));
        assert!(projected.contains_key("name"));
    }
}
