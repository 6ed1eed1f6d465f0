//! The table-agnostic CRUD service

use std::fmt;
use std::marker::PhantomData;

use chrono::{SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::relation::{self, Relation};
use super::{
    Entity, AUDIT_TARGET, CREATED_AT, CREATED_BY, DELETED_AT, DELETED_BY, ID, UPDATED_AT,
    UPDATED_BY,
};
use crate::client::DataClient;
use crate::context::{self, Role};
use crate::error::{DataError, DataResult};
use crate::ids::new_record_id;
use crate::pagination::{stable_order, ListQuery, Page, PageParams, Paginator, SoftDeleteScope};
use crate::storage::{
    project, Executor, Filter, FilterCondition, FindQuery, GroupCount, Record, StorageError,
    StorageOperation,
};

/// Relations, projection and soft-delete scope for single-record calls
///
/// ```rust
/// use cms_kernel::crud::{QueryOptions, Relation};
/// use cms_kernel::pagination::SoftDeleteScope;
///
/// let options = QueryOptions::new()
///     .include(vec![Relation::belongs_to("profile", "profiles", "profile_id")])
///     .deleted(SoftDeleteScope::Include);
/// assert_eq!(options.include.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Relations to attach
    pub include: Vec<Relation>,
    /// Column projection; `id` is always kept
    pub select: Option<Vec<String>>,
    /// Soft-delete scope for reads
    pub deleted: SoftDeleteScope,
}

impl QueryOptions {
    /// No relations, whole rows, soft-deleted rows hidden
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the relations to attach
    #[must_use]
    pub fn include(mut self, include: Vec<Relation>) -> Self {
        self.include = include;
        self
    }

    /// Project the result onto `columns`
    #[must_use]
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.select = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Set the soft-delete scope
    #[must_use]
    pub fn deleted(mut self, deleted: SoftDeleteScope) -> Self {
        self.deleted = deleted;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
    Create,
    Update,
    SoftDelete,
    Restore,
    HardDelete,
}

impl Mutation {
    fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::SoftDelete => "soft_delete",
            Self::Restore => "restore",
            Self::HardDelete => "hard_delete",
        }
    }

    fn operation(self) -> StorageOperation {
        match self {
            Self::Create => StorageOperation::Insert,
            Self::Update | Self::SoftDelete | Self::Restore => StorageOperation::Update,
            Self::HardDelete => StorageOperation::Delete,
        }
    }

    fn failed(self, table: &str, source: StorageError) -> DataError {
        tracing::warn!(
            table,
            mutation = self.as_str(),
            error = %source,
            "Storage rejected mutation"
        );
        let table = table.to_string();
        match self {
            Self::Create => DataError::CreateFailed { table, source },
            Self::Update | Self::SoftDelete | Self::Restore => {
                DataError::UpdateFailed { table, source }
            }
            Self::HardDelete => DataError::DeleteFailed { table, source },
        }
    }
}

/// CRUD operations for one entity type
///
/// Writes take an optional actor id; when `None`, the authenticated user of
/// the current request is used.
///
/// ```rust
/// use std::sync::Arc;
/// use cms_kernel::prelude::*;
/// use cms_kernel::resources::{Category, NewCategory};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> cms_kernel::error::DataResult<()> {
/// let client = DataClient::new(Arc::new(MemoryDriver::new()));
/// let paginator = Paginator::new(client.clone(), PaginationConfig::default());
/// let categories: CrudService<Category> = CrudService::new(client, paginator);
///
/// let tech = categories
///     .create(&NewCategory::new("Tech"), Some("usr_admin"))
///     .await?;
/// assert_eq!(tech.audit.created_by.as_deref(), Some("usr_admin"));
///
/// categories.soft_delete(&tech.id, Some("usr_admin")).await?;
/// assert!(categories.find_one(&tech.id).await?.is_none());
/// # Ok(())
/// # }
/// ```
pub struct CrudService<E> {
    client: DataClient,
    paginator: Paginator,
    entity: PhantomData<fn() -> E>,
}

impl<E> Clone for CrudService<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            paginator: self.paginator.clone(),
            entity: PhantomData,
        }
    }
}

impl<E: Entity> fmt::Debug for CrudService<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrudService")
            .field("table", &E::TABLE)
            .field("client", &self.client)
            .finish()
    }
}

impl<E: Entity> CrudService<E> {
    /// Service over `E::TABLE`
    pub fn new(client: DataClient, paginator: Paginator) -> Self {
        Self {
            client,
            paginator,
            entity: PhantomData,
        }
    }

    /// Table this service operates on
    pub fn table(&self) -> &'static str {
        E::TABLE
    }

    /// Underlying data client
    pub fn client(&self) -> &DataClient {
        &self.client
    }

    /// Insert a row built from `data`, stamping `created_by`
    pub async fn create<D>(&self, data: &D, actor: Option<&str>) -> DataResult<E>
    where
        D: Serialize + ?Sized + Sync,
    {
        self.create_as(data, actor, &QueryOptions::default()).await
    }

    /// [`create`](Self::create) with relations and projection, decoded as `T`
    ///
    /// An id is generated when `data` has none.
    pub async fn create_as<T, D>(
        &self,
        data: &D,
        actor: Option<&str>,
        options: &QueryOptions,
    ) -> DataResult<T>
    where
        T: DeserializeOwned,
        D: Serialize + ?Sized + Sync,
    {
        let actor = resolve_actor(actor);
        let mut record = payload::<E, D>(data)?;
        if !record.get(ID).is_some_and(Value::is_string) {
            record.insert(ID.into(), Value::String(new_record_id(E::ID_PREFIX)));
        }
        let now = timestamp();
        record.insert(CREATED_AT.into(), now.clone());
        record.insert(UPDATED_AT.into(), now);
        record.insert(CREATED_BY.into(), actor_value(actor.as_deref()));
        let changed = columns(&record);

        let mut executor = self.client.executor().await?;
        let row = executor
            .insert(E::TABLE, record)
            .await
            .map_err(|source| Mutation::Create.failed(E::TABLE, source))?;
        let row = shape::<E>(&mut executor, row, options).await?;
        drop(executor);

        audit::<E>(Mutation::Create, &row, actor.as_deref(), &changed);
        decode::<E, T>(row)
    }

    /// One page of rows, soft-deleted rows excluded unless `params` says otherwise
    pub async fn find_all(&self, params: &PageParams) -> DataResult<Page<E>> {
        self.find_all_as(params, &ListQuery::new()).await
    }

    /// [`find_all`](Self::find_all) with a filter, relations, ordering and
    /// projection, decoded as `T`
    ///
    /// Search matches `E::SEARCHABLE` unless `query` names its own columns.
    pub async fn find_all_as<T>(&self, params: &PageParams, query: &ListQuery) -> DataResult<Page<T>>
    where
        T: DeserializeOwned,
    {
        let mut query = query.clone();
        if query.searchable.is_empty() {
            query.searchable = E::SEARCHABLE.iter().map(|c| c.to_string()).collect();
        }
        self.paginator
            .paginate(E::TABLE, &query, params)
            .await?
            .try_map(decode::<E, T>)
    }

    /// Row with the given id, `None` when absent or soft-deleted
    pub async fn find_one(&self, id: &str) -> DataResult<Option<E>> {
        self.find_one_as(id, &QueryOptions::default()).await
    }

    /// [`find_one`](Self::find_one) with options, decoded as `T`
    pub async fn find_one_as<T>(&self, id: &str, options: &QueryOptions) -> DataResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.find_one_by_as(id_filter(id), options).await
    }

    /// First row matching `filter`, `None` when nothing matches
    pub async fn find_one_by(&self, filter: Filter) -> DataResult<Option<E>> {
        self.find_one_by_as(filter, &QueryOptions::default()).await
    }

    /// [`find_one_by`](Self::find_one_by) with options, decoded as `T`
    ///
    /// With several matches the newest row wins.
    pub async fn find_one_by_as<T>(
        &self,
        filter: Filter,
        options: &QueryOptions,
    ) -> DataResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let query = FindQuery::new(filter.and(options.deleted.filter()))
            .order_by(stable_order(&[]))
            .select(relation::widen_select(
                options.select.clone(),
                &options.include,
            ));

        let mut executor = self.client.executor().await?;
        let found = executor
            .find_first(E::TABLE, &query)
            .await
            .map_err(fetch_failed::<E>)?;
        let Some(row) = found else {
            return Ok(None);
        };
        let mut rows = [row];
        relation::load(&mut executor, &options.include, &mut rows)
            .await
            .map_err(fetch_failed::<E>)?;
        drop(executor);

        let [row] = rows;
        decode::<E, T>(row).map(Some)
    }

    /// Apply `data` to the row with the given id, stamping `updated_by`
    pub async fn update<D>(&self, id: &str, data: &D, actor: Option<&str>) -> DataResult<E>
    where
        D: Serialize + ?Sized + Sync,
    {
        self.update_as(id, data, actor, &QueryOptions::default())
            .await
    }

    /// [`update`](Self::update) with relations and projection, decoded as `T`
    ///
    /// The id itself cannot be changed; an `id` key in `data` is ignored.
    pub async fn update_as<T, D>(
        &self,
        id: &str,
        data: &D,
        actor: Option<&str>,
        options: &QueryOptions,
    ) -> DataResult<T>
    where
        T: DeserializeOwned,
        D: Serialize + ?Sized + Sync,
    {
        let actor = resolve_actor(actor);
        let mut changes = payload::<E, D>(data)?;
        changes.remove(ID);
        changes.insert(UPDATED_AT.into(), timestamp());
        changes.insert(UPDATED_BY.into(), actor_value(actor.as_deref()));
        self.mutate_by_id(Mutation::Update, id, changes, actor.as_deref(), options)
            .await
    }

    /// Mark the row deleted; it stays readable with an explicit scope
    pub async fn soft_delete(&self, id: &str, actor: Option<&str>) -> DataResult<E> {
        self.soft_delete_as(id, actor, &QueryOptions::default())
            .await
    }

    /// [`soft_delete`](Self::soft_delete) with options, decoded as `T`
    pub async fn soft_delete_as<T>(
        &self,
        id: &str,
        actor: Option<&str>,
        options: &QueryOptions,
    ) -> DataResult<T>
    where
        T: DeserializeOwned,
    {
        let actor = resolve_actor(actor);
        let mut changes = Record::new();
        changes.insert(DELETED_AT.into(), timestamp());
        changes.insert(DELETED_BY.into(), actor_value(actor.as_deref()));
        self.mutate_by_id(Mutation::SoftDelete, id, changes, actor.as_deref(), options)
            .await
    }

    /// Clear the soft-delete columns, stamping `updated_by`
    ///
    /// Restoring a row that is not deleted only refreshes the update stamps.
    pub async fn restore(&self, id: &str, actor: Option<&str>) -> DataResult<E> {
        self.restore_as(id, actor, &QueryOptions::default()).await
    }

    /// [`restore`](Self::restore) with options, decoded as `T`
    pub async fn restore_as<T>(
        &self,
        id: &str,
        actor: Option<&str>,
        options: &QueryOptions,
    ) -> DataResult<T>
    where
        T: DeserializeOwned,
    {
        let actor = resolve_actor(actor);
        let mut changes = Record::new();
        changes.insert(DELETED_AT.into(), Value::Null);
        changes.insert(DELETED_BY.into(), Value::Null);
        changes.insert(UPDATED_AT.into(), timestamp());
        changes.insert(UPDATED_BY.into(), actor_value(actor.as_deref()));
        self.mutate_by_id(Mutation::Restore, id, changes, actor.as_deref(), options)
            .await
    }

    /// Physically remove the row and return it
    ///
    /// Inside a request only a `SuperAdmin` may do this. Jobs running outside
    /// any request are not restricted.
    pub async fn hard_delete(&self, id: &str) -> DataResult<E> {
        ensure_may_hard_delete::<E>()?;

        let mut executor = self.client.executor().await?;
        let row = executor
            .delete(E::TABLE, &id_filter(id))
            .await
            .map_err(|source| Mutation::HardDelete.failed(E::TABLE, source))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Mutation::HardDelete.failed(
                    E::TABLE,
                    StorageError::not_found(StorageOperation::Delete, E::TABLE, id),
                )
            })?;
        drop(executor);

        audit::<E>(
            Mutation::HardDelete,
            &row,
            context::actor_id().as_deref(),
            &[],
        );
        decode::<E, E>(row)
    }

    /// Number of live rows matching `filter`
    pub async fn count(&self, filter: Filter) -> DataResult<u64> {
        let filter = filter.and(SoftDeleteScope::Exclude.filter());
        self.client.count(E::TABLE, &filter).await
    }

    /// Live row counts grouped by `columns`
    pub async fn group_by(&self, columns: &[&str], filter: Filter) -> DataResult<Vec<GroupCount>> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let filter = filter.and(SoftDeleteScope::Exclude.filter());
        self.client.group_by(E::TABLE, &columns, &filter).await
    }

    async fn mutate_by_id<T>(
        &self,
        mutation: Mutation,
        id: &str,
        changes: Record,
        actor: Option<&str>,
        options: &QueryOptions,
    ) -> DataResult<T>
    where
        T: DeserializeOwned,
    {
        let changed = columns(&changes);

        let mut executor = self.client.executor().await?;
        let row = executor
            .update(E::TABLE, &id_filter(id), changes)
            .await
            .map_err(|source| mutation.failed(E::TABLE, source))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                mutation.failed(
                    E::TABLE,
                    StorageError::not_found(mutation.operation(), E::TABLE, id),
                )
            })?;
        let row = shape::<E>(&mut executor, row, options).await?;
        drop(executor);

        audit::<E>(mutation, &row, actor, &changed);
        decode::<E, T>(row)
    }
}

fn id_filter(id: &str) -> Filter {
    FilterCondition::eq(ID, id).into()
}

fn timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn actor_value(actor: Option<&str>) -> Value {
    actor.map_or(Value::Null, |a| Value::String(a.to_string()))
}

fn resolve_actor(actor: Option<&str>) -> Option<String> {
    actor.map(str::to_string).or_else(context::actor_id)
}

fn columns(record: &Record) -> Vec<String> {
    record.keys().cloned().collect()
}

fn payload<E: Entity, D: Serialize + ?Sized>(data: &D) -> DataResult<Record> {
    match serde_json::to_value(data) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(other) => Err(DataError::InvalidPayload {
            table: E::TABLE.to_string(),
            message: format!("expected an object, got {}", json_kind(&other)),
        }),
        Err(e) => Err(DataError::InvalidPayload {
            table: E::TABLE.to_string(),
            message: e.to_string(),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn fetch_failed<E: Entity>(source: StorageError) -> DataError {
    DataError::FetchFailed {
        table: E::TABLE.to_string(),
        source,
    }
}

fn decode<E: Entity, T: DeserializeOwned>(row: Record) -> DataResult<T> {
    serde_json::from_value(Value::Object(row)).map_err(|e| {
        fetch_failed::<E>(
            StorageError::serialization(StorageOperation::Find, e.to_string())
                .with_table(E::TABLE),
        )
    })
}

/// Project a written row and attach its relations
async fn shape<E: Entity>(
    executor: &mut dyn Executor,
    row: Record,
    options: &QueryOptions,
) -> DataResult<Record> {
    let row = match relation::widen_select(options.select.clone(), &options.include) {
        Some(columns) => project(row, &columns),
        None => row,
    };
    let mut rows = [row];
    relation::load(executor, &options.include, &mut rows)
        .await
        .map_err(fetch_failed::<E>)?;
    let [row] = rows;
    Ok(row)
}

fn ensure_may_hard_delete<E: Entity>() -> DataResult<()> {
    let Some(ctx) = context::try_current() else {
        return Ok(());
    };
    match ctx.user {
        Some(user) if user.role == Role::SuperAdmin => Ok(()),
        Some(user) => {
            tracing::warn!(
                table = E::TABLE,
                user_id = %user.id,
                role = ?user.role,
                "Hard delete refused"
            );
            Err(DataError::Forbidden(format!(
                "hard deleting a {} requires the SUPER_ADMIN role",
                E::NAME
            )))
        }
        None => Err(DataError::Forbidden(format!(
            "hard deleting a {} requires an authenticated SUPER_ADMIN",
            E::NAME
        ))),
    }
}

fn audit<E: Entity>(mutation: Mutation, row: &Record, actor: Option<&str>, changed: &[String]) {
    let record_id = row.get(ID).and_then(Value::as_str).unwrap_or_default();
    let extended = context::try_current().is_some_and(|ctx| ctx.extended_audit);
    if extended {
        tracing::info!(
            target: AUDIT_TARGET,
            table = E::TABLE,
            operation = mutation.as_str(),
            record_id,
            actor = actor.unwrap_or("anonymous"),
            changed = ?changed,
            "Record mutated"
        );
    } else {
        tracing::debug!(
            table = E::TABLE,
            operation = mutation.as_str(),
            record_id,
            "Record mutated"
        );
    }
}
