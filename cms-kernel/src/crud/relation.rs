//! Eager loading of related rows
//!
//! Relations are loaded in one batch per relation, not per record: the keys
//! of every parent row are collected first and the related table is queried
//! once with `IN`. The loaded rows are attached to each parent under the
//! relation name.

use std::collections::HashMap;

use serde_json::Value;

use crate::storage::{Executor, FilterCondition, FindQuery, OrderBy, Record, StorageResult};

/// How a parent table reaches a related one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// `parent.foreign_key = related.id`; attaches one row or `null`
    BelongsTo {
        /// Key the row is attached under
        name: String,
        /// Related table
        table: String,
        /// Column on the parent holding the related id
        foreign_key: String,
    },
    /// `related.foreign_key = parent.id`; attaches an array
    HasMany {
        /// Key the rows are attached under
        name: String,
        /// Related table
        table: String,
        /// Column on the related table holding the parent id
        foreign_key: String,
    },
    /// Rows linked through a pivot table; attaches an array
    ManyToMany {
        /// Key the rows are attached under
        name: String,
        /// Related table
        table: String,
        /// Pivot table
        pivot: String,
        /// Pivot column holding the parent id
        local_key: String,
        /// Pivot column holding the related id
        foreign_key: String,
    },
}

impl Relation {
    /// Parent row points at one related row
    pub fn belongs_to(
        name: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::BelongsTo {
            name: name.into(),
            table: table.into(),
            foreign_key: foreign_key.into(),
        }
    }

    /// Related rows point at the parent
    pub fn has_many(
        name: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::HasMany {
            name: name.into(),
            table: table.into(),
            foreign_key: foreign_key.into(),
        }
    }

    /// Parent and related rows are linked through `pivot`
    pub fn many_to_many(
        name: impl Into<String>,
        table: impl Into<String>,
        pivot: impl Into<String>,
        local_key: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::ManyToMany {
            name: name.into(),
            table: table.into(),
            pivot: pivot.into(),
            local_key: local_key.into(),
            foreign_key: foreign_key.into(),
        }
    }

    /// Key the related data is attached under
    pub fn name(&self) -> &str {
        match self {
            Self::BelongsTo { name, .. }
            | Self::HasMany { name, .. }
            | Self::ManyToMany { name, .. } => name,
        }
    }

    /// Parent column needed to resolve the relation, besides `id`
    pub fn parent_column(&self) -> Option<&str> {
        match self {
            Self::BelongsTo { foreign_key, .. } => Some(foreign_key),
            Self::HasMany { .. } | Self::ManyToMany { .. } => None,
        }
    }
}

/// Columns to add to a projection so `relations` can still be resolved
pub fn widen_select(select: Option<Vec<String>>, relations: &[Relation]) -> Option<Vec<String>> {
    select.map(|mut columns| {
        for column in relations.iter().filter_map(Relation::parent_column) {
            if !columns.iter().any(|c| c == column) {
                columns.push(column.to_string());
            }
        }
        columns
    })
}

/// Attach every relation in `relations` to `records`
pub async fn load(
    executor: &mut dyn Executor,
    relations: &[Relation],
    records: &mut [Record],
) -> StorageResult<()> {
    if records.is_empty() {
        return Ok(());
    }
    for relation in relations {
        match relation {
            Relation::BelongsTo {
                name,
                table,
                foreign_key,
            } => load_belongs_to(executor, name, table, foreign_key, records).await?,
            Relation::HasMany {
                name,
                table,
                foreign_key,
            } => load_has_many(executor, name, table, foreign_key, records).await?,
            Relation::ManyToMany {
                name,
                table,
                pivot,
                local_key,
                foreign_key,
            } => {
                load_many_to_many(executor, name, table, pivot, local_key, foreign_key, records)
                    .await?
            }
        }
    }
    Ok(())
}

fn string_values<'a>(records: impl IntoIterator<Item = &'a Record>, column: &str) -> Vec<String> {
    let mut values: Vec<String> = records
        .into_iter()
        .filter_map(|r| r.get(column).and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    values.sort();
    values.dedup();
    values
}

fn id_of(record: &Record) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

async fn fetch_in(
    executor: &mut dyn Executor,
    table: &str,
    column: &str,
    values: Vec<String>,
) -> StorageResult<Vec<Record>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let query = FindQuery::new(FilterCondition::in_strings(column, values).into())
        .order_by(vec![OrderBy::asc("id")]);
    executor.find_many(table, &query).await
}

async fn load_belongs_to(
    executor: &mut dyn Executor,
    name: &str,
    table: &str,
    foreign_key: &str,
    records: &mut [Record],
) -> StorageResult<()> {
    let keys = string_values(records.iter(), foreign_key);
    let related: HashMap<String, Record> = fetch_in(executor, table, "id", keys)
        .await?
        .into_iter()
        .filter_map(|r| id_of(&r).map(str::to_string).map(|id| (id, r)))
        .collect();

    for record in records.iter_mut() {
        let value = record
            .get(foreign_key)
            .and_then(Value::as_str)
            .and_then(|key| related.get(key))
            .map(|r| Value::Object(r.clone()))
            .unwrap_or(Value::Null);
        record.insert(name.to_string(), value);
    }
    Ok(())
}

async fn load_has_many(
    executor: &mut dyn Executor,
    name: &str,
    table: &str,
    foreign_key: &str,
    records: &mut [Record],
) -> StorageResult<()> {
    let ids = string_values(records.iter(), "id");
    let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
    for row in fetch_in(executor, table, foreign_key, ids).await? {
        if let Some(parent) = row.get(foreign_key).and_then(Value::as_str) {
            grouped
                .entry(parent.to_string())
                .or_default()
                .push(Value::Object(row.clone()));
        }
    }

    for record in records.iter_mut() {
        let children = id_of(record)
            .and_then(|id| grouped.get(id))
            .cloned()
            .unwrap_or_default();
        record.insert(name.to_string(), Value::Array(children));
    }
    Ok(())
}

async fn load_many_to_many(
    executor: &mut dyn Executor,
    name: &str,
    table: &str,
    pivot: &str,
    local_key: &str,
    foreign_key: &str,
    records: &mut [Record],
) -> StorageResult<()> {
    let ids = string_values(records.iter(), "id");
    let links = fetch_in(executor, pivot, local_key, ids).await?;

    let related_ids = string_values(links.iter(), foreign_key);
    let related: HashMap<String, Record> = fetch_in(executor, table, "id", related_ids)
        .await?
        .into_iter()
        .filter_map(|r| id_of(&r).map(str::to_string).map(|id| (id, r)))
        .collect();

    let mut grouped: HashMap<String, Vec<Value>> = HashMap::new();
    for link in &links {
        let parent = link.get(local_key).and_then(Value::as_str);
        let target = link
            .get(foreign_key)
            .and_then(Value::as_str)
            .and_then(|id| related.get(id));
        if let (Some(parent), Some(target)) = (parent, target) {
            grouped
                .entry(parent.to_string())
                .or_default()
                .push(Value::Object(target.clone()));
        }
    }

    for record in records.iter_mut() {
        let rows = id_of(record)
            .and_then(|id| grouped.get(id))
            .cloned()
            .unwrap_or_default();
        record.insert(name.to_string(), Value::Array(rows));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Filter, MemoryDriver, StorageDriver};
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn seeded() -> MemoryDriver {
        let driver = MemoryDriver::new();
        let mut db = driver.direct();
        for row in [
            json!({"id": "cat_1", "name": "Tech"}),
            json!({"id": "cat_2", "name": "Art"}),
        ] {
            db.insert("categories", record(row)).await.unwrap();
        }
        for row in [
            json!({"id": "art_1", "title": "Rust", "category_id": "cat_1"}),
            json!({"id": "art_2", "title": "Tokio", "category_id": "cat_1"}),
            json!({"id": "art_3", "title": "Orphan", "category_id": null}),
        ] {
            db.insert("articles", record(row)).await.unwrap();
        }
        for row in [
            json!({"id": "usr_1", "email": "a@example.com"}),
            json!({"id": "usr_2", "email": "b@example.com"}),
        ] {
            db.insert("users", record(row)).await.unwrap();
        }
        for row in [
            json!({"id": "ua_1", "article_id": "art_1", "user_id": "usr_1"}),
            json!({"id": "ua_2", "article_id": "art_1", "user_id": "usr_2"}),
            json!({"id": "ua_3", "article_id": "art_2", "user_id": "usr_2"}),
        ] {
            db.insert("user_articles", record(row)).await.unwrap();
        }
        driver
    }

    async fn articles(db: &mut dyn Executor) -> Vec<Record> {
        let query = FindQuery::new(Filter::All).order_by(vec![OrderBy::asc("id")]);
        db.find_many("articles", &query).await.unwrap()
    }

    #[tokio::test]
    async fn test_belongs_to() {
        let driver = seeded().await;
        let mut db = driver.direct();
        let mut rows = articles(db.as_mut()).await;
        let relations = [Relation::belongs_to("category", "categories", "category_id")];
        load(db.as_mut(), &relations, &mut rows).await.unwrap();

        assert_eq!(rows[0]["category"]["name"], "Tech");
        assert_eq!(rows[1]["category"]["id"], "cat_1");
        assert!(rows[2]["category"].is_null());
    }

    #[tokio::test]
    async fn test_has_many() {
        let driver = seeded().await;
        let mut db = driver.direct();
        let mut categories = db
            .find_many(
                "categories",
                &FindQuery::new(Filter::All).order_by(vec![OrderBy::asc("id")]),
            )
            .await
            .unwrap();
        let relations = [Relation::has_many("articles", "articles", "category_id")];
        load(db.as_mut(), &relations, &mut categories).await.unwrap();

        assert_eq!(categories[0]["articles"].as_array().unwrap().len(), 2);
        assert_eq!(categories[1]["articles"], json!([]));
    }

    #[tokio::test]
    async fn test_many_to_many_through_pivot() {
        let driver = seeded().await;
        let mut db = driver.direct();
        let mut rows = articles(db.as_mut()).await;
        let relations = [Relation::many_to_many(
            "users",
            "users",
            "user_articles",
            "article_id",
            "user_id",
        )];
        load(db.as_mut(), &relations, &mut rows).await.unwrap();

        let emails: Vec<&str> = rows[0]["users"]
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["email"].as_str().unwrap())
            .collect();
        assert_eq!(emails, vec!["a@example.com", "b@example.com"]);
        assert_eq!(rows[1]["users"].as_array().unwrap().len(), 1);
        assert_eq!(rows[2]["users"], json!([]));
    }

    #[test]
    fn test_widen_select_adds_foreign_keys() {
        let relations = [
            Relation::belongs_to("category", "categories", "category_id"),
            Relation::has_many("articles", "articles", "category_id"),
        ];
        assert_eq!(
            widen_select(Some(vec!["title".into()]), &relations),
            Some(vec!["title".to_string(), "category_id".to_string()])
        );
        assert_eq!(widen_select(None, &relations), None);
    }
}
