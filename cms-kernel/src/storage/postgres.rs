//! PostgreSQL storage driver
//!
//! Rows travel as JSON in both directions: reads select `row_to_json(t)` and
//! writes feed the payload through `jsonb_populate_record(NULL::"table", $1)`
//! so PostgreSQL coerces each field to the column's declared type. Table and
//! column names are validated as plain identifiers and always quoted.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};

use super::{
    Executor, Filter, FilterCondition, FilterOperator, FilterValue, FindQuery, GroupCount,
    OrderDirection, Record, StorageDriver, StorageError, StorageOperation, StorageResult,
    Transaction,
};

/// Storage driver backed by a sqlx PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgDriver {
    pool: PgPool,
}

impl PgDriver {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the retry policy from `config`
    pub async fn connect(config: &crate::config::DatabaseConfig) -> crate::error::Result<Self> {
        Ok(Self::new(crate::database::create_pool(config).await?))
    }

    /// The underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StorageDriver for PgDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn direct(&self) -> Box<dyn Executor> {
        Box::new(PgDirect {
            pool: self.pool.clone(),
        })
    }

    async fn begin(&self) -> StorageResult<Box<dyn Transaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::from(e).with_operation(StorageOperation::Begin))?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

struct PgDirect {
    pool: PgPool,
}

impl PgDirect {
    async fn acquire(&self) -> StorageResult<sqlx::pool::PoolConnection<Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| StorageError::from(e).with_operation(StorageOperation::Connect))
    }
}

#[async_trait]
impl Executor for PgDirect {
    async fn find_many(&mut self, table: &str, query: &FindQuery) -> StorageResult<Vec<Record>> {
        let mut conn = self.acquire().await?;
        find_many(&mut conn, table, query).await
    }

    async fn count(&mut self, table: &str, filter: &Filter) -> StorageResult<u64> {
        let mut conn = self.acquire().await?;
        count(&mut conn, table, filter).await
    }

    async fn group_by(
        &mut self,
        table: &str,
        columns: &[String],
        filter: &Filter,
    ) -> StorageResult<Vec<GroupCount>> {
        let mut conn = self.acquire().await?;
        group_by(&mut conn, table, columns, filter).await
    }

    async fn insert(&mut self, table: &str, record: Record) -> StorageResult<Record> {
        let mut conn = self.acquire().await?;
        insert(&mut conn, table, record).await
    }

    async fn update(
        &mut self,
        table: &str,
        filter: &Filter,
        changes: Record,
    ) -> StorageResult<Vec<Record>> {
        let mut conn = self.acquire().await?;
        update(&mut conn, table, filter, changes).await
    }

    async fn delete(&mut self, table: &str, filter: &Filter) -> StorageResult<Vec<Record>> {
        let mut conn = self.acquire().await?;
        delete(&mut conn, table, filter).await
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Executor for PgTransaction {
    async fn find_many(&mut self, table: &str, query: &FindQuery) -> StorageResult<Vec<Record>> {
        find_many(&mut self.tx, table, query).await
    }

    async fn count(&mut self, table: &str, filter: &Filter) -> StorageResult<u64> {
        count(&mut self.tx, table, filter).await
    }

    async fn group_by(
        &mut self,
        table: &str,
        columns: &[String],
        filter: &Filter,
    ) -> StorageResult<Vec<GroupCount>> {
        group_by(&mut self.tx, table, columns, filter).await
    }

    async fn insert(&mut self, table: &str, record: Record) -> StorageResult<Record> {
        insert(&mut self.tx, table, record).await
    }

    async fn update(
        &mut self,
        table: &str,
        filter: &Filter,
        changes: Record,
    ) -> StorageResult<Vec<Record>> {
        update(&mut self.tx, table, filter, changes).await
    }

    async fn delete(&mut self, table: &str, filter: &Filter) -> StorageResult<Vec<Record>> {
        delete(&mut self.tx, table, filter).await
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    fn executor(&mut self) -> &mut dyn Executor {
        self
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StorageError::from(e).with_operation(StorageOperation::Commit))
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StorageError::from(e).with_operation(StorageOperation::Rollback))
    }
}

async fn find_many(
    conn: &mut PgConnection,
    table: &str,
    query: &FindQuery,
) -> StorageResult<Vec<Record>> {
    let mut qb = select_sql(table, query)?;
    fetch_records(conn, &mut qb, table, StorageOperation::Find).await
}

async fn count(conn: &mut PgConnection, table: &str, filter: &Filter) -> StorageResult<u64> {
    let mut qb = count_sql(table, filter)?;
    let row = qb
        .build()
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| driver_error(e, StorageOperation::Count, table))?;
    let total: i64 = row
        .try_get(0)
        .map_err(|e| driver_error(e, StorageOperation::Count, table))?;
    Ok(u64::try_from(total).unwrap_or_default())
}

async fn group_by(
    conn: &mut PgConnection,
    table: &str,
    columns: &[String],
    filter: &Filter,
) -> StorageResult<Vec<GroupCount>> {
    let mut qb = group_by_sql(table, columns, filter)?;
    let rows = qb
        .build()
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| driver_error(e, StorageOperation::GroupBy, table))?;
    rows.iter()
        .map(|row| {
            let key = decode_record(row, StorageOperation::GroupBy, table)?;
            let count: i64 = row
                .try_get("_count")
                .map_err(|e| driver_error(e, StorageOperation::GroupBy, table))?;
            Ok(GroupCount {
                key,
                count: u64::try_from(count).unwrap_or_default(),
            })
        })
        .collect()
}

async fn insert(conn: &mut PgConnection, table: &str, record: Record) -> StorageResult<Record> {
    let mut qb = insert_sql(table, record)?;
    fetch_records(conn, &mut qb, table, StorageOperation::Insert)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| {
            StorageError::serialization(StorageOperation::Insert, "insert returned no row")
                .with_table(table)
        })
}

async fn update(
    conn: &mut PgConnection,
    table: &str,
    filter: &Filter,
    changes: Record,
) -> StorageResult<Vec<Record>> {
    if changes.is_empty() {
        return find_many(conn, table, &FindQuery::new(filter.clone())).await;
    }
    let mut qb = update_sql(table, filter, changes)?;
    fetch_records(conn, &mut qb, table, StorageOperation::Update).await
}

async fn delete(conn: &mut PgConnection, table: &str, filter: &Filter) -> StorageResult<Vec<Record>> {
    let mut qb = delete_sql(table, filter)?;
    fetch_records(conn, &mut qb, table, StorageOperation::Delete).await
}

async fn fetch_records(
    conn: &mut PgConnection,
    qb: &mut QueryBuilder<'static, Postgres>,
    table: &str,
    operation: StorageOperation,
) -> StorageResult<Vec<Record>> {
    let rows = qb
        .build()
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| driver_error(e, operation, table))?;
    rows.iter()
        .map(|row| decode_record(row, operation, table))
        .collect()
}

fn decode_record(row: &PgRow, operation: StorageOperation, table: &str) -> StorageResult<Record> {
    let Json(value): Json<Value> = row
        .try_get("rec")
        .map_err(|e| driver_error(e, operation, table))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StorageError::serialization(
            operation,
            format!("expected a JSON object row, got {}", other),
        )
        .with_table(table)),
    }
}

fn driver_error(err: sqlx::Error, operation: StorageOperation, table: &str) -> StorageError {
    let error = StorageError::from(err).with_operation(operation);
    if error.table.is_some() {
        error
    } else {
        error.with_table(table)
    }
}

/// Validate and quote an identifier
fn ident(name: &str, operation: StorageOperation) -> StorageResult<String> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(format!("\"{}\"", name))
    } else {
        Err(StorageError::invalid_query(
            operation,
            format!("invalid identifier '{}'", name),
        ))
    }
}

/// Escape `%`, `_` and `\` for use inside a LIKE pattern
fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn push_value(qb: &mut QueryBuilder<'static, Postgres>, value: &FilterValue) {
    match value {
        FilterValue::String(s) => qb.push_bind(s.clone()),
        FilterValue::Integer(n) => qb.push_bind(*n),
        FilterValue::Float(n) => qb.push_bind(*n),
        FilterValue::Boolean(b) => qb.push_bind(*b),
        FilterValue::Timestamp(ts) => qb.push_bind(*ts),
        FilterValue::StringList(list) => qb.push_bind(list.clone()),
        FilterValue::IntegerList(list) => qb.push_bind(list.clone()),
        FilterValue::Null => qb.push("NULL"),
    };
}

fn push_condition(
    qb: &mut QueryBuilder<'static, Postgres>,
    condition: &FilterCondition,
    operation: StorageOperation,
) -> StorageResult<()> {
    let column = format!("t.{}", ident(&condition.field, operation)?);

    match condition.operator {
        FilterOperator::IsNull => {
            qb.push(format!("{} IS NULL", column));
        }
        FilterOperator::IsNotNull => {
            qb.push(format!("{} IS NOT NULL", column));
        }
        // comparing with NULL is never true
        _ if condition.value == FilterValue::Null => {
            qb.push("FALSE");
        }
        FilterOperator::Like => {
            qb.push(format!("{}::text LIKE ", column));
            push_value(qb, &condition.value);
        }
        FilterOperator::ContainsInsensitive => {
            let needle = match &condition.value {
                FilterValue::String(s) => s.clone(),
                other => other.to_json().to_string(),
            };
            qb.push(format!("{}::text ILIKE ", column));
            qb.push_bind(format!("%{}%", escape_like(&needle)));
        }
        FilterOperator::In => match &condition.value {
            FilterValue::StringList(_) | FilterValue::IntegerList(_) => {
                qb.push(format!("{} = ANY(", column));
                push_value(qb, &condition.value);
                qb.push(")");
            }
            scalar => {
                qb.push(format!("{} = ", column));
                push_value(qb, scalar);
            }
        },
        op => {
            let sql_op = match op {
                FilterOperator::NotEqual => "<>".to_string(),
                other => other.to_string(),
            };
            qb.push(format!("{} {} ", column, sql_op));
            push_value(qb, &condition.value);
        }
    }
    Ok(())
}

fn push_filter(
    qb: &mut QueryBuilder<'static, Postgres>,
    filter: &Filter,
    operation: StorageOperation,
) -> StorageResult<()> {
    match filter {
        Filter::All => {
            qb.push("TRUE");
        }
        Filter::Condition(condition) => push_condition(qb, condition, operation)?,
        Filter::And(children) | Filter::Or(children) if children.is_empty() => {
            qb.push(if matches!(filter, Filter::And(_)) {
                "TRUE"
            } else {
                "FALSE"
            });
        }
        Filter::And(children) | Filter::Or(children) => {
            let joiner = if matches!(filter, Filter::And(_)) {
                " AND "
            } else {
                " OR "
            };
            qb.push("(");
            for (index, child) in children.iter().enumerate() {
                if index > 0 {
                    qb.push(joiner);
                }
                push_filter(qb, child, operation)?;
            }
            qb.push(")");
        }
        Filter::Not(inner) => {
            qb.push("NOT (");
            push_filter(qb, inner, operation)?;
            qb.push(")");
        }
    }
    Ok(())
}

/// `jsonb_build_object('a', t."a", ...)` over `columns`
fn json_object_sql(columns: &[String], operation: StorageOperation) -> StorageResult<String> {
    let pairs = columns
        .iter()
        .map(|c| Ok(format!("'{}', t.{}", c, ident(c, operation)?)))
        .collect::<StorageResult<Vec<_>>>()?;
    Ok(format!("jsonb_build_object({})", pairs.join(", ")))
}

fn select_sql(table: &str, query: &FindQuery) -> StorageResult<QueryBuilder<'static, Postgres>> {
    let op = StorageOperation::Find;
    let projection = match &query.select {
        Some(columns) => {
            let mut columns = columns.clone();
            if !columns.iter().any(|c| c == "id") {
                columns.insert(0, "id".to_string());
            }
            json_object_sql(&columns, op)?
        }
        None => "row_to_json(t)::jsonb".to_string(),
    };

    let mut qb = QueryBuilder::new(format!(
        "SELECT {} AS rec FROM {} AS t WHERE ",
        projection,
        ident(table, op)?
    ));
    push_filter(&mut qb, &query.filter, op)?;

    if !query.order_by.is_empty() {
        let keys = query
            .order_by
            .iter()
            .map(|key| {
                let direction = match key.direction {
                    OrderDirection::Ascending => "ASC",
                    OrderDirection::Descending => "DESC",
                };
                Ok(format!("t.{} {}", ident(&key.column, op)?, direction))
            })
            .collect::<StorageResult<Vec<_>>>()?;
        qb.push(format!(" ORDER BY {}", keys.join(", ")));
    }

    if let Some(window) = query.pagination {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(window.limit).unwrap_or(i64::MAX));
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(window.offset).unwrap_or(i64::MAX));
    }
    Ok(qb)
}

fn count_sql(table: &str, filter: &Filter) -> StorageResult<QueryBuilder<'static, Postgres>> {
    let op = StorageOperation::Count;
    let mut qb = QueryBuilder::new(format!(
        "SELECT COUNT(*) FROM {} AS t WHERE ",
        ident(table, op)?
    ));
    push_filter(&mut qb, filter, op)?;
    Ok(qb)
}

fn group_by_sql(
    table: &str,
    columns: &[String],
    filter: &Filter,
) -> StorageResult<QueryBuilder<'static, Postgres>> {
    let op = StorageOperation::GroupBy;
    if columns.is_empty() {
        return Err(StorageError::invalid_query(op, "group_by needs at least one column")
            .with_table(table));
    }
    let grouped = columns
        .iter()
        .map(|c| Ok(format!("t.{}", ident(c, op)?)))
        .collect::<StorageResult<Vec<_>>>()?
        .join(", ");

    let mut qb = QueryBuilder::new(format!(
        "SELECT {} AS rec, COUNT(*) AS _count FROM {} AS t WHERE ",
        json_object_sql(columns, op)?,
        ident(table, op)?
    ));
    push_filter(&mut qb, filter, op)?;
    qb.push(format!(" GROUP BY {grouped} ORDER BY {grouped}"));
    Ok(qb)
}

fn insert_sql(table: &str, record: Record) -> StorageResult<QueryBuilder<'static, Postgres>> {
    let op = StorageOperation::Insert;
    let table_ident = ident(table, op)?;
    let columns = record
        .keys()
        .map(|c| ident(c, op))
        .collect::<StorageResult<Vec<_>>>()?
        .join(", ");

    let mut qb = QueryBuilder::new(format!(
        "WITH ins AS (INSERT INTO {table_ident} ({columns}) SELECT {columns} \
         FROM jsonb_populate_record(NULL::{table_ident}, "
    ));
    qb.push_bind(Json(Value::Object(record)));
    qb.push(") RETURNING *) SELECT row_to_json(ins)::jsonb AS rec FROM ins");
    Ok(qb)
}

fn update_sql(
    table: &str,
    filter: &Filter,
    changes: Record,
) -> StorageResult<QueryBuilder<'static, Postgres>> {
    let op = StorageOperation::Update;
    let table_ident = ident(table, op)?;
    let assignments = changes
        .keys()
        .map(|c| {
            let column = ident(c, op)?;
            Ok(format!("{column} = r.{column}"))
        })
        .collect::<StorageResult<Vec<_>>>()?
        .join(", ");

    let mut qb = QueryBuilder::new(format!(
        "WITH upd AS (UPDATE {table_ident} AS t SET {assignments} \
         FROM jsonb_populate_record(NULL::{table_ident}, "
    ));
    qb.push_bind(Json(Value::Object(changes)));
    qb.push(") AS r WHERE ");
    push_filter(&mut qb, filter, op)?;
    qb.push(" RETURNING t.*) SELECT row_to_json(upd)::jsonb AS rec FROM upd");
    Ok(qb)
}

fn delete_sql(table: &str, filter: &Filter) -> StorageResult<QueryBuilder<'static, Postgres>> {
    let op = StorageOperation::Delete;
    let mut qb = QueryBuilder::new(format!(
        "WITH del AS (DELETE FROM {} AS t WHERE ",
        ident(table, op)?
    ));
    push_filter(&mut qb, filter, op)?;
    qb.push(" RETURNING t.*) SELECT row_to_json(del)::jsonb AS rec FROM del");
    Ok(qb)
}
