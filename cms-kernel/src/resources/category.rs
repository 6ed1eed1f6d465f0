//! Article categories

use serde::{Deserialize, Serialize};

use crate::crud::{AuditFields, CrudService, Entity, Relation};

/// A category articles are filed under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// `cat_…` id
    pub id: String,
    /// Display name, unique
    pub name: String,
    /// Optional long description
    #[serde(default)]
    pub description: Option<String>,
    /// Audit columns
    #[serde(flatten)]
    pub audit: AuditFields,
}

impl Entity for Category {
    const TABLE: &'static str = "categories";
    const ID_PREFIX: &'static str = "cat";
    const NAME: &'static str = "category";

    fn id(&self) -> &str {
        &self.id
    }

    fn audit(&self) -> &AuditFields {
        &self.audit
    }
}

impl Category {
    /// Articles filed under the category
    pub fn articles() -> Relation {
        Relation::has_many("articles", super::article::Article::TABLE, "category_id")
    }
}

/// Payload for creating a category
#[derive(Debug, Clone, Serialize)]
pub struct NewCategory {
    /// Display name
    pub name: String,
    /// Optional description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewCategory {
    /// Category with a name and no description
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Partial update; absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryChanges {
    /// New name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Categories need nothing beyond the generic operations
pub type CategoryService = CrudService<Category>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DataClient;
    use crate::config::PaginationConfig;
    use crate::crud::QueryOptions;
    use crate::pagination::Paginator;
    use crate::storage::{MemoryDriver, Record, StorageDriver};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_category_with_articles() {
        let driver = Arc::new(MemoryDriver::new());
        let client = DataClient::new(driver.clone());
        let categories =
            CategoryService::new(client.clone(), Paginator::new(client, PaginationConfig::default()));

        let tech = categories
            .create(&NewCategory::new("Tech").with_description("Gadgets"), None)
            .await
            .unwrap();
        let mut db = driver.direct();
        for (id, title) in [("art_1", "Rust"), ("art_2", "Tokio")] {
            let row: Record = json!({"id": id, "title": title, "category_id": tech.id})
                .as_object()
                .cloned()
                .unwrap();
            db.insert("articles", row).await.unwrap();
        }

        let row: Record = categories
            .find_one_as(&tech.id, &QueryOptions::new().include(vec![Category::articles()]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["articles"].as_array().unwrap().len(), 2);

        let renamed = categories
            .update(
                &tech.id,
                &CategoryChanges {
                    name: Some("Technology".into()),
                    ..CategoryChanges::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Technology");
        assert_eq!(renamed.description.as_deref(), Some("Gadgets"));
    }
}
