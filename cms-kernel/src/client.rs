//! Transactional data client
//!
//! [`DataClient`] is the one place that decides where a storage operation
//! runs. [`DataClient::executor`] looks at the request context: when a
//! transaction is bound to the request, the returned [`ExecutorGuard`] holds
//! that transaction exclusively; otherwise it is a direct executor. Every
//! CRUD operation goes through it, so the direct-versus-transactional choice
//! is never repeated per operation.
//!
//! [`DataClient::run_in_transaction`] opens a transaction, binds it to the
//! request context, runs the body, and commits or rolls back:
//!
//! | body outcome        | result                                         |
//! |---------------------|------------------------------------------------|
//! | `Ok(value)`         | commit; `CommitFailed` if the commit fails      |
//! | `Err(e)`            | rollback; `e` returned unchanged               |
//! | exceeded `timeout`  | rollback; `TransactionTimeout`                 |
//! | `begin` > `max_wait`| `TransactionTimeout`, body never runs          |
//!
//! Once the transaction has committed or rolled back, any handle still
//! referring to it fails with `TransactionClosed`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::config::TransactionConfig;
use crate::context::{self, RequestContext};
use crate::error::{DataError, DataResult, TimeoutPhase};
use crate::ids::TransactionId;
use crate::storage::{
    Executor, Filter, FindQuery, GroupCount, Record, StorageDriver, StorageError, StorageErrorKind,
    StorageOperation, StorageResult, Transaction,
};

/// Limits for one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// How long to wait for a transaction handle under contention
    pub max_wait: Duration,
    /// Maximum lifetime of the transaction body
    pub timeout: Duration,
}

impl TransactionOptions {
    /// Options with explicit limits
    pub fn new(max_wait: Duration, timeout: Duration) -> Self {
        Self { max_wait, timeout }
    }
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self::from(&TransactionConfig::default())
    }
}

impl From<&TransactionConfig> for TransactionOptions {
    fn from(config: &TransactionConfig) -> Self {
        Self::new(config.max_wait(), config.timeout())
    }
}

type SharedTransaction = Arc<Mutex<Option<Box<dyn Transaction>>>>;

/// An open transaction as seen from the request context
///
/// The inner `Option` is `None` once the transaction has committed or
/// rolled back.
pub struct TransactionSlot {
    id: TransactionId,
    deadline: Instant,
    timeout: Duration,
    inner: SharedTransaction,
}

impl TransactionSlot {
    fn new(id: TransactionId, timeout: Duration, tx: Box<dyn Transaction>) -> Self {
        Self {
            id,
            deadline: Instant::now() + timeout,
            timeout,
            inner: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Transaction id
    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    fn timeout_error(&self) -> DataError {
        DataError::TransactionTimeout {
            id: self.id.to_string(),
            phase: TimeoutPhase::Lifetime,
            limit: self.timeout,
        }
    }

    /// Lock the transaction for one or more operations
    async fn acquire(&self) -> DataResult<ExecutorGuard> {
        let guard = tokio::time::timeout_at(self.deadline, Arc::clone(&self.inner).lock_owned())
            .await
            .map_err(|_| self.timeout_error())?;

        if guard.is_none() {
            return Err(DataError::TransactionClosed {
                id: self.id.to_string(),
            });
        }
        if Instant::now() >= self.deadline {
            return Err(self.timeout_error());
        }
        Ok(ExecutorGuard::Transaction {
            id: self.id.clone(),
            guard,
        })
    }

    /// Take the transaction out, marking the slot closed
    async fn close(&self) -> Option<Box<dyn Transaction>> {
        self.inner.lock().await.take()
    }
}

impl fmt::Debug for TransactionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionSlot")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Handle passed to a transaction body
///
/// Operations issued through the CRUD engine pick the transaction up from
/// the request context; the handle is for code that wants to issue driver
/// operations itself.
#[derive(Debug, Clone)]
pub struct TransactionHandle {
    slot: Arc<TransactionSlot>,
}

impl TransactionHandle {
    /// Transaction id
    pub fn id(&self) -> &TransactionId {
        self.slot.id()
    }

    /// Exclusive executor on this transaction
    ///
    /// Fails with `TransactionClosed` after commit or rollback.
    pub async fn executor(&self) -> DataResult<ExecutorGuard> {
        self.slot.acquire().await
    }
}

/// Executor selected by [`DataClient::executor`]
///
/// The transactional variant holds the request transaction exclusively
/// until dropped; concurrent operations of the same request queue behind it.
pub enum ExecutorGuard {
    /// Standalone operations on the shared pool
    Direct(Box<dyn Executor>),
    /// Operations inside the request transaction
    Transaction {
        /// Transaction id
        id: TransactionId,
        /// Exclusive access to the open transaction
        guard: OwnedMutexGuard<Option<Box<dyn Transaction>>>,
    },
}

impl ExecutorGuard {
    /// Whether operations run inside a transaction
    pub fn is_transactional(&self) -> bool {
        matches!(self, Self::Transaction { .. })
    }

    fn target(&mut self, operation: StorageOperation) -> StorageResult<&mut dyn Executor> {
        match self {
            Self::Direct(executor) => Ok(executor.as_mut()),
            Self::Transaction { id, guard } => match guard.as_mut() {
                Some(tx) => Ok(tx.executor()),
                None => Err(StorageError::new(
                    operation,
                    StorageErrorKind::Database,
                    format!("transaction {} is closed", id),
                )),
            },
        }
    }
}

impl fmt::Debug for ExecutorGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(_) => f.write_str("ExecutorGuard::Direct"),
            Self::Transaction { id, .. } => write!(f, "ExecutorGuard::Transaction({})", id),
        }
    }
}

#[async_trait]
impl Executor for ExecutorGuard {
    async fn find_many(&mut self, table: &str, query: &FindQuery) -> StorageResult<Vec<Record>> {
        self.target(StorageOperation::Find)?
            .find_many(table, query)
            .await
    }

    async fn count(&mut self, table: &str, filter: &Filter) -> StorageResult<u64> {
        self.target(StorageOperation::Count)?
            .count(table, filter)
            .await
    }

    async fn group_by(
        &mut self,
        table: &str,
        columns: &[String],
        filter: &Filter,
    ) -> StorageResult<Vec<GroupCount>> {
        self.target(StorageOperation::GroupBy)?
            .group_by(table, columns, filter)
            .await
    }

    async fn insert(&mut self, table: &str, record: Record) -> StorageResult<Record> {
        self.target(StorageOperation::Insert)?
            .insert(table, record)
            .await
    }

    async fn update(
        &mut self,
        table: &str,
        filter: &Filter,
        changes: Record,
    ) -> StorageResult<Vec<Record>> {
        self.target(StorageOperation::Update)?
            .update(table, filter, changes)
            .await
    }

    async fn delete(&mut self, table: &str, filter: &Filter) -> StorageResult<Vec<Record>> {
        self.target(StorageOperation::Delete)?
            .delete(table, filter)
            .await
    }
}

/// Storage client shared by every service
///
/// ```rust
/// use std::sync::Arc;
/// use cms_kernel::client::{DataClient, TransactionOptions};
/// use cms_kernel::storage::{Filter, MemoryDriver};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let client = DataClient::new(Arc::new(MemoryDriver::new()));
///
/// let count = client
///     .run_in_transaction(TransactionOptions::default(), |_tx| async {
///         client.count("categories", &Filter::All).await
///     })
///     .await
///     .unwrap();
/// assert_eq!(count, 0);
/// # }
/// ```
#[derive(Clone)]
pub struct DataClient {
    driver: Arc<dyn StorageDriver>,
    defaults: TransactionOptions,
}

impl fmt::Debug for DataClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataClient")
            .field("driver", &self.driver.name())
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl DataClient {
    /// Client over `driver` with default transaction limits
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        Self {
            driver,
            defaults: TransactionOptions::default(),
        }
    }

    /// Replace the default transaction limits
    #[must_use]
    pub fn with_defaults(mut self, defaults: TransactionOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Default transaction limits
    pub fn defaults(&self) -> TransactionOptions {
        self.defaults
    }

    /// Driver name for logs
    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Whether the current call chain has a bound transaction
    pub fn in_transaction(&self) -> bool {
        context::active_transaction().is_some()
    }

    /// Executor for the current call chain
    ///
    /// Returns the request transaction when one is bound, otherwise a direct
    /// executor. Outside any request context the direct path is used.
    pub async fn executor(&self) -> DataResult<ExecutorGuard> {
        match context::active_transaction() {
            Some(slot) => slot.acquire().await,
            None => Ok(ExecutorGuard::Direct(self.driver.direct())),
        }
    }

    /// Direct executor, ignoring any bound transaction
    pub fn direct(&self) -> ExecutorGuard {
        ExecutorGuard::Direct(self.driver.direct())
    }

    /// Insert one row into `table`
    pub async fn create(&self, table: &str, record: Record) -> DataResult<Record> {
        let mut executor = self.executor().await?;
        executor
            .insert(table, record)
            .await
            .map_err(|source| DataError::CreateFailed {
                table: table.to_string(),
                source,
            })
    }

    /// Update every row of `table` matching `filter`
    pub async fn update(
        &self,
        table: &str,
        filter: &Filter,
        changes: Record,
    ) -> DataResult<Vec<Record>> {
        let mut executor = self.executor().await?;
        executor
            .update(table, filter, changes)
            .await
            .map_err(|source| DataError::UpdateFailed {
                table: table.to_string(),
                source,
            })
    }

    /// Delete every row of `table` matching `filter`
    pub async fn delete(&self, table: &str, filter: &Filter) -> DataResult<Vec<Record>> {
        let mut executor = self.executor().await?;
        executor
            .delete(table, filter)
            .await
            .map_err(|source| DataError::DeleteFailed {
                table: table.to_string(),
                source,
            })
    }

    /// Rows of `table` matching `query`
    pub async fn find_many(&self, table: &str, query: &FindQuery) -> DataResult<Vec<Record>> {
        let mut executor = self.executor().await?;
        executor
            .find_many(table, query)
            .await
            .map_err(|source| fetch_failed(table, source))
    }

    /// First row of `table` matching `query`
    pub async fn find_first(&self, table: &str, query: &FindQuery) -> DataResult<Option<Record>> {
        let mut executor = self.executor().await?;
        executor
            .find_first(table, query)
            .await
            .map_err(|source| fetch_failed(table, source))
    }

    /// Number of rows of `table` matching `filter`
    pub async fn count(&self, table: &str, filter: &Filter) -> DataResult<u64> {
        let mut executor = self.executor().await?;
        executor
            .count(table, filter)
            .await
            .map_err(|source| fetch_failed(table, source))
    }

    /// Row counts of `table` grouped by `columns`
    pub async fn group_by(
        &self,
        table: &str,
        columns: &[String],
        filter: &Filter,
    ) -> DataResult<Vec<GroupCount>> {
        let mut executor = self.executor().await?;
        executor
            .group_by(table, columns, filter)
            .await
            .map_err(|source| fetch_failed(table, source))
    }

    /// Run `body` inside a transaction bound to the request context
    ///
    /// When a transaction is already bound, `body` joins it and the outer
    /// owner decides commit or rollback. Outside a request a fresh context is
    /// installed for the duration of the call.
    pub async fn run_in_transaction<T, E, F, Fut>(
        &self,
        options: TransactionOptions,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce(TransactionHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DataError>,
    {
        if !context::is_active() {
            return context::scope(RequestContext::new(), self.run_owned(options, body)).await;
        }

        if let Some(slot) = context::active_transaction() {
            tracing::debug!(transaction_id = %slot.id(), "Joining active transaction");
            return body(TransactionHandle { slot }).await;
        }

        self.run_owned(options, body).await
    }

    /// Open, bind, run and finish a transaction owned by this call
    async fn run_owned<T, E, F, Fut>(&self, options: TransactionOptions, body: F) -> Result<T, E>
    where
        F: FnOnce(TransactionHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DataError>,
    {
        let id = TransactionId::new();
        let request_id = context::try_current().map(|ctx| ctx.request_id.to_string());

        let tx = match tokio::time::timeout(options.max_wait, self.driver.begin()).await {
            Ok(Ok(tx)) => tx,
            Ok(Err(source)) => {
                tracing::error!(
                    transaction_id = %id,
                    request_id = ?request_id,
                    error = %source,
                    "Failed to begin transaction"
                );
                return Err(DataError::BeginFailed {
                    id: id.to_string(),
                    source,
                }
                .into());
            }
            Err(_) => {
                tracing::warn!(
                    transaction_id = %id,
                    request_id = ?request_id,
                    max_wait_ms = options.max_wait.as_millis() as u64,
                    "Timed out waiting for a transaction"
                );
                return Err(DataError::TransactionTimeout {
                    id: id.to_string(),
                    phase: TimeoutPhase::Acquire,
                    limit: options.max_wait,
                }
                .into());
            }
        };

        let slot = Arc::new(TransactionSlot::new(id.clone(), options.timeout, tx));
        if let Err(err) = context::bind_transaction(Some(Arc::clone(&slot))) {
            rollback(&id, slot.close().await).await;
            return Err(DataError::from(err).into());
        }
        tracing::debug!(
            transaction_id = %id,
            request_id = ?request_id,
            driver = self.driver.name(),
            "Transaction opened"
        );

        let outcome = tokio::time::timeout_at(
            slot.deadline,
            body(TransactionHandle {
                slot: Arc::clone(&slot),
            }),
        )
        .await;

        // Unbind before finishing so nothing on this chain can reach the
        // transaction once it is closed
        let _ = context::bind_transaction(None);
        let tx = slot.close().await;

        match outcome {
            Ok(Ok(value)) => {
                let Some(tx) = tx else {
                    return Err(DataError::TransactionClosed { id: id.to_string() }.into());
                };
                match tx.commit().await {
                    Ok(()) => {
                        tracing::debug!(transaction_id = %id, "Transaction committed");
                        Ok(value)
                    }
                    Err(source) => {
                        tracing::error!(
                            transaction_id = %id,
                            request_id = ?request_id,
                            error = %source,
                            "Transaction commit failed"
                        );
                        Err(DataError::CommitFailed {
                            id: id.to_string(),
                            source,
                        }
                        .into())
                    }
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    transaction_id = %id,
                    request_id = ?request_id,
                    "Rolling back transaction after error"
                );
                rollback(&id, tx).await;
                Err(err)
            }
            Err(_) => {
                tracing::warn!(
                    transaction_id = %id,
                    request_id = ?request_id,
                    timeout_ms = options.timeout.as_millis() as u64,
                    "Transaction timed out, rolling back"
                );
                rollback(&id, tx).await;
                Err(slot.timeout_error().into())
            }
        }
    }
}

/// Roll back, logging failures; the caller already has an error to report
async fn rollback(id: &TransactionId, tx: Option<Box<dyn Transaction>>) {
    if let Some(tx) = tx {
        if let Err(error) = tx.rollback().await {
            tracing::error!(transaction_id = %id, %error, "Transaction rollback failed");
        }
    }
}

fn fetch_failed(table: &str, source: StorageError) -> DataError {
    DataError::FetchFailed {
        table: table.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::FailingCommitDriver;
    use crate::storage::{FilterCondition, MemoryDriver};
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    fn client() -> DataClient {
        DataClient::new(Arc::new(
            MemoryDriver::new().with_unique("categories", &["name"]),
        ))
    }

    fn fast() -> TransactionOptions {
        TransactionOptions::new(Duration::from_millis(100), Duration::from_millis(200))
    }

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("business rule failed")]
        Business,
        #[error(transparent)]
        Data(#[from] DataError),
    }

    #[tokio::test]
    async fn test_direct_path_outside_context() {
        let client = client();
        assert!(!client.executor().await.unwrap().is_transactional());
        client
            .create("categories", record(json!({"id": "cat_1", "name": "Tech"})))
            .await
            .unwrap();
        assert_eq!(client.count("categories", &Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let client = client();
        let created = client
            .run_in_transaction(fast(), |_tx| async {
                assert!(client.executor().await?.is_transactional());
                client
                    .create("categories", record(json!({"id": "cat_1", "name": "Tech"})))
                    .await
            })
            .await
            .unwrap();
        assert_eq!(created["name"], "Tech");
        assert_eq!(client.count("categories", &Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_body_error_rolls_back_and_is_preserved() {
        let client = client();
        let result: Result<(), TestError> = client
            .run_in_transaction(fast(), |_tx| async {
                client
                    .create("categories", record(json!({"id": "cat_a", "name": "A"})))
                    .await?;
                client
                    .create("categories", record(json!({"id": "cat_b", "name": "B"})))
                    .await?;
                Err(TestError::Business)
            })
            .await;
        assert!(matches!(result, Err(TestError::Business)));
        assert_eq!(client.count("categories", &Filter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_storage_error_in_second_step_rolls_back_first() {
        let client = client();
        let result = client
            .run_in_transaction(fast(), |_tx| async {
                client
                    .create("categories", record(json!({"id": "cat_a", "name": "Tech"})))
                    .await?;
                client
                    .create("categories", record(json!({"id": "cat_b", "name": "Tech"})))
                    .await
            })
            .await;
        assert!(matches!(result, Err(DataError::CreateFailed { .. })));
        assert_eq!(client.count("categories", &Filter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_timeout_rolls_back() {
        let client = client();
        let result: DataResult<()> = client
            .run_in_transaction(fast(), |_tx| async {
                client
                    .create("categories", record(json!({"id": "cat_a", "name": "A"})))
                    .await?;
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            })
            .await;
        match result {
            Err(DataError::TransactionTimeout { phase, .. }) => {
                assert_eq!(phase, TimeoutPhase::Lifetime)
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(client.count("categories", &Filter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_max_wait_exceeded_under_contention() {
        let client = client();
        let holder = client.clone();
        let long = tokio::spawn(async move {
            holder
                .run_in_transaction(
                    TransactionOptions::new(Duration::from_secs(1), Duration::from_secs(2)),
                    |_tx| async {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        DataResult::Ok(())
                    },
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let waiting: DataResult<()> = client
            .run_in_transaction(
                TransactionOptions::new(Duration::from_millis(50), Duration::from_secs(1)),
                |_tx| async { Ok(()) },
            )
            .await;
        assert!(matches!(
            waiting,
            Err(DataError::TransactionTimeout {
                phase: TimeoutPhase::Acquire,
                ..
            })
        ));
        long.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_direct_read_inside_transaction_sees_committed_rows() {
        let client = client();
        client
            .create("categories", record(json!({"id": "cat_1", "name": "Tech"})))
            .await
            .unwrap();

        let (inside, outside) = client
            .run_in_transaction(fast(), |_tx| async {
                client
                    .create("categories", record(json!({"id": "cat_2", "name": "Art"})))
                    .await?;
                let inside = client.count("categories", &Filter::All).await?;
                let outside = client.direct().count("categories", &Filter::All).await;
                DataResult::Ok((inside, outside.map_err(|e| fetch_failed("categories", e))?))
            })
            .await
            .unwrap();
        assert_eq!(inside, 2);
        assert_eq!(outside, 1);
        assert_eq!(client.count("categories", &Filter::All).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_commit_failure_is_reported_and_discards_writes() {
        let driver = FailingCommitDriver::default();
        let client = DataClient::new(Arc::new(driver.clone()));
        let result = client
            .run_in_transaction(fast(), |_tx| async {
                client
                    .create("categories", record(json!({"id": "cat_1", "name": "Tech"})))
                    .await
            })
            .await;
        match result {
            Err(DataError::CommitFailed { source, .. }) => {
                assert_eq!(source.operation, StorageOperation::Commit)
            }
            other => panic!("expected commit failure, got {:?}", other),
        }
        assert_eq!(client.count("categories", &Filter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handle_closed_after_commit() {
        let client = client();
        let handle = client
            .run_in_transaction(fast(), |tx| async move { DataResult::Ok(tx) })
            .await
            .unwrap();
        assert!(matches!(
            handle.executor().await,
            Err(DataError::TransactionClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_nested_call_joins_outer_transaction() {
        let client = &client();
        let result: DataResult<()> = client
            .run_in_transaction(fast(), |outer| async move {
                let inner_id = client
                    .run_in_transaction(fast(), |inner| async move {
                        client
                            .create("categories", record(json!({"id": "cat_a", "name": "A"})))
                            .await?;
                        Ok::<_, DataError>(inner.id().clone())
                    })
                    .await?;
                assert_eq!(&inner_id, outer.id());
                Err(DataError::Forbidden("abort".into()))
            })
            .await;
        assert!(result.is_err());
        // the inner write went down with the outer rollback
        assert_eq!(client.count("categories", &Filter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transaction_unbound_after_finish() {
        let client = client();
        context::scope(RequestContext::new(), async {
            client
                .run_in_transaction(fast(), |_tx| async {
                    assert!(context::current()?.in_transaction());
                    DataResult::Ok(())
                })
                .await
                .unwrap();
            assert!(!context::current().unwrap().in_transaction());
            assert!(!client.executor().await.unwrap().is_transactional());
        })
        .await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_do_not_share_transactions() {
        let client = client();
        let failing = {
            let client = client.clone();
            async move {
                let result: Result<(), TestError> = client
                    .run_in_transaction(fast(), |_tx| async {
                        client
                            .create("categories", record(json!({"id": "cat_x", "name": "X"})))
                            .await?;
                        Err(TestError::Business)
                    })
                    .await;
                assert!(result.is_err());
            }
        };
        let direct = {
            let client = client.clone();
            context::scope(RequestContext::new(), async move {
                tokio::task::yield_now().await;
                // this request has no transaction, so it must not queue on the other one
                assert!(!client.in_transaction());
            })
        };
        tokio::join!(failing, direct);

        let found = client
            .find_first(
                "categories",
                &FindQuery::new(FilterCondition::eq("id", "cat_x").into()),
            )
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
