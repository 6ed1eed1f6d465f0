//! In-process storage driver
//!
//! Tables are vectors of JSON rows kept in insertion order. Writers are
//! serialised on a single permit, so concurrent `begin` calls queue behind
//! each other the way they would behind a pool of one connection. A
//! transaction works on a private copy of the store and merges its changes
//! back on commit; direct readers and writers only lock the committed store
//! for the length of one call and never wait on an open transaction.
//!
//! Filter semantics follow SQL where it matters for callers: comparisons
//! against `NULL` are false, `NULL` sorts after every value in ascending
//! order, and RFC 3339 strings compare as instants.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use super::{
    project, Executor, Filter, FilterCondition, FilterOperator, FindQuery, GroupCount, OrderBy,
    OrderDirection, Record, StorageDriver, StorageError, StorageErrorKind, StorageOperation,
    StorageResult, Transaction,
};

/// Unique column sets per table
type Constraints = HashMap<String, Vec<Vec<String>>>;

#[derive(Debug, Clone, Default)]
struct Store {
    tables: HashMap<String, Vec<Record>>,
}

/// Storage driver keeping every table in memory
///
/// ```rust
/// use cms_kernel::storage::MemoryDriver;
///
/// let driver = MemoryDriver::new().with_unique("categories", &["name"]);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    store: Arc<Mutex<Store>>,
    writer: Arc<Semaphore>,
    constraints: Arc<Constraints>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self {
            store: Arc::default(),
            writer: Arc::new(Semaphore::new(1)),
            constraints: Arc::default(),
        }
    }
}

impl MemoryDriver {
    /// Empty store with no constraints besides unique `id`
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a unique constraint over `columns` on `table`
    #[must_use]
    pub fn with_unique(mut self, table: &str, columns: &[&str]) -> Self {
        Arc::make_mut(&mut self.constraints)
            .entry(table.to_string())
            .or_default()
            .push(columns.iter().map(|c| (*c).to_string()).collect());
        self
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn direct(&self) -> Box<dyn Executor> {
        Box::new(DirectExecutor {
            store: Arc::clone(&self.store),
            constraints: Arc::clone(&self.constraints),
        })
    }

    async fn begin(&self) -> StorageResult<Box<dyn Transaction>> {
        let permit = Arc::clone(&self.writer).acquire_owned().await.map_err(|e| {
            StorageError::new(
                StorageOperation::Begin,
                StorageErrorKind::ConnectionFailed,
                e.to_string(),
            )
        })?;
        let base = self.store.lock().await.clone();
        Ok(Box::new(MemoryTransaction {
            _permit: permit,
            store: Arc::clone(&self.store),
            working: base.clone(),
            base,
            constraints: Arc::clone(&self.constraints),
        }))
    }
}

struct DirectExecutor {
    store: Arc<Mutex<Store>>,
    constraints: Arc<Constraints>,
}

#[async_trait]
impl Executor for DirectExecutor {
    async fn find_many(&mut self, table: &str, query: &FindQuery) -> StorageResult<Vec<Record>> {
        Ok(self.store.lock().await.find_many(table, query))
    }

    async fn count(&mut self, table: &str, filter: &Filter) -> StorageResult<u64> {
        Ok(self.store.lock().await.count(table, filter))
    }

    async fn group_by(
        &mut self,
        table: &str,
        columns: &[String],
        filter: &Filter,
    ) -> StorageResult<Vec<GroupCount>> {
        Ok(self.store.lock().await.group_by(table, columns, filter))
    }

    async fn insert(&mut self, table: &str, record: Record) -> StorageResult<Record> {
        self.store
            .lock()
            .await
            .insert(&self.constraints, table, record)
    }

    async fn update(
        &mut self,
        table: &str,
        filter: &Filter,
        changes: Record,
    ) -> StorageResult<Vec<Record>> {
        self.store
            .lock()
            .await
            .update(&self.constraints, table, filter, changes)
    }

    async fn delete(&mut self, table: &str, filter: &Filter) -> StorageResult<Vec<Record>> {
        Ok(self.store.lock().await.delete(table, filter))
    }
}

/// Open transaction; dropping it without a commit discards `working`
struct MemoryTransaction {
    _permit: OwnedSemaphorePermit,
    store: Arc<Mutex<Store>>,
    /// Committed state when the transaction began
    base: Store,
    working: Store,
    constraints: Arc<Constraints>,
}

#[async_trait]
impl Executor for MemoryTransaction {
    async fn find_many(&mut self, table: &str, query: &FindQuery) -> StorageResult<Vec<Record>> {
        Ok(self.working.find_many(table, query))
    }

    async fn count(&mut self, table: &str, filter: &Filter) -> StorageResult<u64> {
        Ok(self.working.count(table, filter))
    }

    async fn group_by(
        &mut self,
        table: &str,
        columns: &[String],
        filter: &Filter,
    ) -> StorageResult<Vec<GroupCount>> {
        Ok(self.working.group_by(table, columns, filter))
    }

    async fn insert(&mut self, table: &str, record: Record) -> StorageResult<Record> {
        self.working.insert(&self.constraints, table, record)
    }

    async fn update(
        &mut self,
        table: &str,
        filter: &Filter,
        changes: Record,
    ) -> StorageResult<Vec<Record>> {
        self.working.update(&self.constraints, table, filter, changes)
    }

    async fn delete(&mut self, table: &str, filter: &Filter) -> StorageResult<Vec<Record>> {
        Ok(self.working.delete(table, filter))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn executor(&mut self) -> &mut dyn Executor {
        self
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let mut store = self.store.lock().await;
        let merged = store.merge(&self.base, &self.working, &self.constraints)?;
        *store = merged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

/// Identity of a row across copies of the store
fn row_key(row: &Record) -> String {
    match row.get("id") {
        Some(id) if !id.is_null() => id.to_string(),
        _ => Value::Object(row.clone()).to_string(),
    }
}

impl Store {
    /// Apply the rows a transaction changed between `base` and `working`
    /// on top of `self`, keyed by id
    ///
    /// Rows written directly since `base` are kept unless the transaction
    /// touched the same id. Fails without changing anything when the merged
    /// rows break a unique constraint.
    fn merge(
        &self,
        base: &Store,
        working: &Store,
        constraints: &Constraints,
    ) -> StorageResult<Store> {
        let mut merged = self.clone();
        let tables: HashSet<&String> = base.tables.keys().chain(working.tables.keys()).collect();

        for table in tables {
            let before: HashMap<String, &Record> =
                base.rows(table).iter().map(|r| (row_key(r), r)).collect();
            let after: HashMap<String, &Record> =
                working.rows(table).iter().map(|r| (row_key(r), r)).collect();

            let rows = merged.tables.entry(table.clone()).or_default();
            rows.retain(|row| {
                let key = row_key(row);
                !(before.contains_key(&key) && !after.contains_key(&key))
            });

            let mut written = Vec::new();
            for row in working.rows(table) {
                let key = row_key(row);
                match before.get(&key) {
                    Some(old) if *old == row => {}
                    Some(_) => {
                        if let Some(index) = rows.iter().position(|r| row_key(r) == key) {
                            rows[index] = row.clone();
                            written.push(index);
                        }
                    }
                    None => {
                        rows.push(row.clone());
                        written.push(rows.len() - 1);
                    }
                }
            }

            for index in written {
                if let Some(columns) =
                    violated_constraint(constraints, table, rows, &rows[index], Some(index))
                {
                    return Err(StorageError::unique_violation(
                        table.as_str(),
                        format!("duplicate key value violates unique constraint on ({})", columns),
                    )
                    .with_operation(StorageOperation::Commit));
                }
            }
        }

        Ok(merged)
    }

    fn rows(&self, table: &str) -> &[Record] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or_default()
    }

    fn find_many(&self, table: &str, query: &FindQuery) -> Vec<Record> {
        let mut rows: Vec<&Record> = self
            .rows(table)
            .iter()
            .filter(|row| matches(&query.filter, row))
            .collect();
        rows.sort_by(|a, b| compare_rows(a, b, &query.order_by));

        let (offset, limit) = query
            .pagination
            .map(|p| (p.offset as usize, p.limit as usize))
            .unwrap_or((0, usize::MAX));

        rows.into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| match &query.select {
                Some(columns) => project(row.clone(), columns),
                None => row.clone(),
            })
            .collect()
    }

    fn count(&self, table: &str, filter: &Filter) -> u64 {
        self.rows(table).iter().filter(|row| matches(filter, row)).count() as u64
    }

    fn group_by(&self, table: &str, columns: &[String], filter: &Filter) -> Vec<GroupCount> {
        let mut groups: BTreeMap<String, GroupCount> = BTreeMap::new();
        for row in self.rows(table).iter().filter(|row| matches(filter, row)) {
            let key: Record = columns
                .iter()
                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                .collect();
            let sort_key = Value::Object(key.clone()).to_string();
            groups
                .entry(sort_key)
                .or_insert_with(|| GroupCount { key, count: 0 })
                .count += 1;
        }
        groups.into_values().collect()
    }

    fn insert(
        &mut self,
        constraints: &Constraints,
        table: &str,
        record: Record,
    ) -> StorageResult<Record> {
        let rows = self.tables.entry(table.to_string()).or_default();
        if let Some(columns) = violated_constraint(constraints, table, rows, &record, None) {
            return Err(StorageError::unique_violation(
                table,
                format!("duplicate key value violates unique constraint on ({})", columns),
            ));
        }
        rows.push(record.clone());
        Ok(record)
    }

    fn update(
        &mut self,
        constraints: &Constraints,
        table: &str,
        filter: &Filter,
        changes: Record,
    ) -> StorageResult<Vec<Record>> {
        let Some(rows) = self.tables.get(table) else {
            return Ok(Vec::new());
        };

        let mut next = rows.clone();
        let mut touched = Vec::new();
        for (index, row) in next.iter_mut().enumerate() {
            if matches(filter, row) {
                for (key, value) in &changes {
                    row.insert(key.clone(), value.clone());
                }
                touched.push(index);
            }
        }

        for &index in &touched {
            if let Some(columns) =
                violated_constraint(constraints, table, &next, &next[index], Some(index))
            {
                return Err(StorageError::unique_violation(
                    table,
                    format!("duplicate key value violates unique constraint on ({})", columns),
                )
                .with_operation(StorageOperation::Update));
            }
        }

        let updated = touched.iter().map(|&i| next[i].clone()).collect();
        self.tables.insert(table.to_string(), next);
        Ok(updated)
    }

    fn delete(&mut self, table: &str, filter: &Filter) -> Vec<Record> {
        let Some(rows) = self.tables.get_mut(table) else {
            return Vec::new();
        };
        let (removed, kept): (Vec<Record>, Vec<Record>) =
            rows.drain(..).partition(|row| matches(filter, row));
        *rows = kept;
        removed
    }
}

/// Columns of the first unique constraint `candidate` would break
fn violated_constraint(
    constraints: &Constraints,
    table: &str,
    rows: &[Record],
    candidate: &Record,
    skip: Option<usize>,
) -> Option<String> {
    let id_key = vec!["id".to_string()];
    let declared = constraints.get(table).map(Vec::as_slice).unwrap_or_default();

    std::iter::once(&id_key)
        .chain(declared.iter())
        .find(|columns| {
            let values: Option<Vec<&Value>> = columns
                .iter()
                .map(|c| candidate.get(c).filter(|v| !v.is_null()))
                .collect();
            let Some(values) = values else {
                return false;
            };
            rows.iter().enumerate().any(|(index, row)| {
                Some(index) != skip
                    && columns
                        .iter()
                        .zip(&values)
                        .all(|(c, v)| row.get(c) == Some(*v))
            })
        })
        .map(|columns| columns.join(", "))
}

fn matches(filter: &Filter, row: &Record) -> bool {
    match filter {
        Filter::All => true,
        Filter::Condition(condition) => condition_matches(condition, row),
        Filter::And(children) => children.iter().all(|c| matches(c, row)),
        Filter::Or(children) => children.iter().any(|c| matches(c, row)),
        Filter::Not(inner) => !matches(inner, row),
    }
}

fn condition_matches(condition: &FilterCondition, row: &Record) -> bool {
    let actual = row.get(&condition.field).unwrap_or(&Value::Null);
    let expected = condition.value.to_json();

    match condition.operator {
        FilterOperator::IsNull => actual.is_null(),
        FilterOperator::IsNotNull => !actual.is_null(),
        _ if actual.is_null() => false,
        FilterOperator::Equal => compare(actual, &expected) == Some(Ordering::Equal),
        FilterOperator::NotEqual => {
            !expected.is_null() && compare(actual, &expected) != Some(Ordering::Equal)
        }
        FilterOperator::GreaterThan => compare(actual, &expected) == Some(Ordering::Greater),
        FilterOperator::GreaterThanOrEqual => matches!(
            compare(actual, &expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::LessThan => compare(actual, &expected) == Some(Ordering::Less),
        FilterOperator::LessThanOrEqual => matches!(
            compare(actual, &expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::Like => match (actual.as_str(), expected.as_str()) {
            (Some(text), Some(pattern)) => like_regex(pattern).is_some_and(|re| re.is_match(text)),
            _ => false,
        },
        FilterOperator::ContainsInsensitive => match (actual.as_str(), expected.as_str()) {
            (Some(text), Some(needle)) => text.to_lowercase().contains(&needle.to_lowercase()),
            _ => false,
        },
        FilterOperator::In => expected
            .as_array()
            .is_some_and(|list| list.iter().any(|v| compare(actual, v) == Some(Ordering::Equal))),
    }
}

/// Translate a SQL `LIKE` pattern into an anchored regex
fn like_regex(pattern: &str) -> Option<Regex> {
    let mut source = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source).ok()
}

fn parse_instant(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
}

/// Ordering between two non-null JSON scalars of compatible type
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_instant(x), parse_instant(y)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_rows(a: &Record, b: &Record, order_by: &[OrderBy]) -> Ordering {
    for key in order_by {
        let left = a.get(&key.column).unwrap_or(&Value::Null);
        let right = b.get(&key.column).unwrap_or(&Value::Null);
        let ordering = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare(left, right).unwrap_or(Ordering::Equal),
        };
        let ordering = match key.direction {
            OrderDirection::Ascending => ordering,
            OrderDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FilterValue, Pagination, StorageErrorKind};
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn seeded() -> MemoryDriver {
        let driver = MemoryDriver::new().with_unique("categories", &["name"]);
        let mut exec = driver.direct();
        for (id, name, created) in [
            ("cat_1", "Tech", "2025-01-01T00:00:00Z"),
            ("cat_2", "Science", "2025-01-02T00:00:00Z"),
            ("cat_3", "Art", "2025-01-02T01:00:00+02:00"),
        ] {
            exec.insert(
                "categories",
                record(json!({"id": id, "name": name, "created_at": created, "deleted_at": null})),
            )
            .await
            .unwrap();
        }
        driver
    }

    #[tokio::test]
    async fn test_find_with_filter_and_order() {
        let driver = seeded().await;
        let mut exec = driver.direct();

        let query = FindQuery::new(FilterCondition::ne("name", "Science").into())
            .order_by(vec![OrderBy::desc("created_at")]);
        let rows = exec.find_many("categories", &query).await.unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Art", "Tech"]);

        let rows = exec
            .find_many(
                "categories",
                &FindQuery::new(Filter::All).order_by(vec![OrderBy::asc("created_at")]),
            )
            .await
            .unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        // Art is 23:00Z on Jan 1st, earlier than Science although its string sorts later
        assert_eq!(names, vec!["Tech", "Art", "Science"]);
    }

    #[tokio::test]
    async fn test_pagination_window() {
        let driver = seeded().await;
        let mut exec = driver.direct();
        let query = FindQuery::new(Filter::All)
            .order_by(vec![OrderBy::asc("name")])
            .paginate(Pagination::page(2, 2));
        let rows = exec.find_many("categories", &query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Tech");
    }

    #[tokio::test]
    async fn test_null_comparisons_are_false() {
        let driver = seeded().await;
        let mut exec = driver.direct();
        let eq_null = Filter::from(FilterCondition::new(
            "deleted_at",
            FilterOperator::Equal,
            FilterValue::Null,
        ));
        assert_eq!(exec.count("categories", &eq_null).await.unwrap(), 0);
        let is_null = Filter::from(FilterCondition::is_null("deleted_at"));
        assert_eq!(exec.count("categories", &is_null).await.unwrap(), 3);
        let missing = Filter::from(FilterCondition::gt("missing", 1_i64));
        assert_eq!(exec.count("categories", &missing).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_like_and_contains() {
        let driver = seeded().await;
        let mut exec = driver.direct();
        let like = Filter::from(FilterCondition::like("name", "T_c%"));
        assert_eq!(exec.count("categories", &like).await.unwrap(), 1);
        let contains = Filter::from(FilterCondition::contains_insensitive("name", "SCI"));
        assert_eq!(exec.count("categories", &contains).await.unwrap(), 1);
        let literal = Filter::from(FilterCondition::like("name", "Te.h"));
        assert_eq!(exec.count("categories", &literal).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_in_and_or() {
        let driver = seeded().await;
        let mut exec = driver.direct();
        let filter = Filter::any_of([
            FilterCondition::in_strings("id", vec!["cat_1".into(), "cat_9".into()]).into(),
            FilterCondition::eq("name", "Art").into(),
        ]);
        assert_eq!(exec.count("categories", &filter).await.unwrap(), 2);
        assert_eq!(exec.count("categories", &Filter::Or(vec![])).await.unwrap(), 0);
        assert_eq!(exec.count("categories", &Filter::And(vec![])).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unique_violation_on_insert_and_update() {
        let driver = seeded().await;
        let mut exec = driver.direct();

        let err = exec
            .insert("categories", record(json!({"id": "cat_4", "name": "Tech"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::UniqueViolation);
        assert_eq!(err.table.as_deref(), Some("categories"));

        let err = exec
            .update(
                "categories",
                &FilterCondition::eq("id", "cat_2").into(),
                record(json!({"name": "Art"})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.operation, StorageOperation::Update);

        // failed update leaves the row unchanged
        let row = exec
            .find_first("categories", &FindQuery::new(FilterCondition::eq("id", "cat_2").into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["name"], "Science");
    }

    #[tokio::test]
    async fn test_update_returns_rows() {
        let driver = seeded().await;
        let mut exec = driver.direct();
        let updated = exec
            .update(
                "categories",
                &FilterCondition::eq("id", "cat_1").into(),
                record(json!({"description": "All things tech"})),
            )
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["name"], "Tech");
        assert_eq!(updated[0]["description"], "All things tech");
    }

    #[tokio::test]
    async fn test_delete_and_group_by() {
        let driver = MemoryDriver::new();
        let mut exec = driver.direct();
        for (id, profile) in [("u1", "prf_a"), ("u2", "prf_a"), ("u3", "prf_b")] {
            exec.insert("users", record(json!({"id": id, "profile_id": profile})))
                .await
                .unwrap();
        }
        let groups = exec
            .group_by("users", &["profile_id".to_string()], &Filter::All)
            .await
            .unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key["profile_id"], "prf_a");
        assert_eq!(groups[0].count, 2);

        let removed = exec
            .delete("users", &FilterCondition::eq("profile_id", "prf_a").into())
            .await
            .unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(exec.count("users", &Filter::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let driver = seeded().await;

        let mut tx = driver.begin().await.unwrap();
        tx.executor()
            .insert("categories", record(json!({"id": "cat_4", "name": "Music"})))
            .await
            .unwrap();
        assert_eq!(
            tx.executor().count("categories", &Filter::All).await.unwrap(),
            4
        );
        tx.rollback().await.unwrap();

        let mut exec = driver.direct();
        assert_eq!(exec.count("categories", &Filter::All).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_commit_persists_and_drop_discards() {
        let driver = seeded().await;

        let mut tx = driver.begin().await.unwrap();
        tx.executor()
            .insert("categories", record(json!({"id": "cat_4", "name": "Music"})))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = driver.begin().await.unwrap();
        tx.executor()
            .delete("categories", &Filter::All)
            .await
            .unwrap();
        drop(tx);

        let mut exec = driver.direct();
        assert_eq!(exec.count("categories", &Filter::All).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_begin_waits_for_open_transaction() {
        let driver = seeded().await;
        let tx = driver.begin().await.unwrap();

        let waiting = tokio::time::timeout(std::time::Duration::from_millis(50), driver.begin());
        assert!(waiting.await.is_err());

        tx.commit().await.unwrap();
        assert!(driver.begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_direct_reads_do_not_wait_for_open_transaction() {
        let driver = seeded().await;
        let mut tx = driver.begin().await.unwrap();
        tx.executor()
            .insert("categories", record(json!({"id": "cat_4", "name": "Music"})))
            .await
            .unwrap();

        let mut exec = driver.direct();
        let count = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            exec.count("categories", &Filter::All),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(count, 3);

        tx.commit().await.unwrap();
        assert_eq!(exec.count("categories", &Filter::All).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_commit_keeps_direct_writes() {
        let driver = seeded().await;
        let mut tx = driver.begin().await.unwrap();
        tx.executor()
            .insert("categories", record(json!({"id": "cat_4", "name": "Music"})))
            .await
            .unwrap();

        let mut exec = driver.direct();
        exec.insert("categories", record(json!({"id": "cat_5", "name": "Travel"})))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let names: Vec<Value> = exec
            .find_many("categories", &FindQuery::new(Filter::All))
            .await
            .unwrap()
            .into_iter()
            .filter_map(|r| r.get("name").cloned())
            .collect();
        assert_eq!(names.len(), 5);
        assert!(names.contains(&json!("Music")));
        assert!(names.contains(&json!("Travel")));
    }

    #[tokio::test]
    async fn test_commit_rejects_conflicting_direct_write() {
        let driver = seeded().await;
        let mut tx = driver.begin().await.unwrap();
        tx.executor()
            .insert("categories", record(json!({"id": "cat_4", "name": "Music"})))
            .await
            .unwrap();

        let mut exec = driver.direct();
        exec.insert("categories", record(json!({"id": "cat_5", "name": "Music"})))
            .await
            .unwrap();

        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.kind, StorageErrorKind::UniqueViolation);
        assert_eq!(err.operation, StorageOperation::Commit);
        assert_eq!(exec.count("categories", &Filter::All).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_select_projection() {
        let driver = seeded().await;
        let mut exec = driver.direct();
        let query = FindQuery::new(Filter::All).select(Some(vec!["name".to_string()]));
        let rows = exec.find_many("categories", &query).await.unwrap();
        assert!(rows.iter().all(|r| r.len() == 2 && r.contains_key("id")));
    }
}
