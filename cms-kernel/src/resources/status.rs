//! Publication statuses

use serde::{Deserialize, Serialize};

use crate::crud::{AuditFields, CrudService, Entity};
use crate::error::DataResult;
use crate::pagination::{ListQuery, Page, PageParams};
use crate::storage::{FilterCondition, OrderBy};

/// Workflow state of an article ("Draft", "Published", ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// `sts_…` id
    pub id: String,
    /// Unique name
    pub name: String,
    /// What the status means
    #[serde(default)]
    pub description: Option<String>,
    /// Audit columns
    #[serde(flatten)]
    pub audit: AuditFields,
}

impl Entity for Status {
    const TABLE: &'static str = "statuses";
    const ID_PREFIX: &'static str = "sts";
    const NAME: &'static str = "status";

    fn id(&self) -> &str {
        &self.id
    }

    fn audit(&self) -> &AuditFields {
        &self.audit
    }
}

/// Payload for creating a status
#[derive(Debug, Clone, Serialize)]
pub struct NewStatus {
    /// Unique name
    pub name: String,
    /// Optional description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewStatus {
    /// Status with a name and a description
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
        }
    }
}

/// Status queries on top of the generic operations
#[derive(Debug, Clone)]
pub struct StatusService {
    crud: CrudService<Status>,
}

impl StatusService {
    /// Service over the generic status CRUD
    pub fn new(crud: CrudService<Status>) -> Self {
        Self { crud }
    }

    /// Generic create, update, delete and restore
    pub fn crud(&self) -> &CrudService<Status> {
        &self.crud
    }

    /// Statuses in alphabetical order
    pub async fn find_all(&self, params: &PageParams) -> DataResult<Page<Status>> {
        let query = ListQuery::new().order_by(vec![OrderBy::asc("name")]);
        self.crud.find_all_as(params, &query).await
    }

    /// Live status with exactly this name
    pub async fn get_by_name(&self, name: &str) -> DataResult<Option<Status>> {
        self.crud
            .find_one_by(FilterCondition::eq("name", name).into())
            .await
    }
}
