//! User profiles
//!
//! A profile row exists for each [`Role`]; its `label` is the role name.

use serde::{Deserialize, Serialize};

use crate::context::Role;
use crate::crud::{AuditFields, CrudService, Entity};
use crate::error::DataResult;
use crate::storage::{Filter, FilterCondition, GroupCount};

/// Access profile attached to every user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// `prf_…` id
    pub id: String,
    /// Role name, unique
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Audit columns
    #[serde(flatten)]
    pub audit: AuditFields,
}

impl Entity for Profile {
    const TABLE: &'static str = "profiles";
    const ID_PREFIX: &'static str = "prf";
    const NAME: &'static str = "profile";
    const SEARCHABLE: &'static [&'static str] = &["label", "description"];

    fn id(&self) -> &str {
        &self.id
    }

    fn audit(&self) -> &AuditFields {
        &self.audit
    }
}

/// Payload for creating a profile
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    /// Role name
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewProfile {
    /// Profile for a role
    pub fn for_role(role: Role, description: impl Into<String>) -> Self {
        Self {
            label: role.as_str().to_string(),
            description: Some(description.into()),
        }
    }
}

/// Profile queries on top of the generic operations
#[derive(Debug, Clone)]
pub struct ProfileService {
    crud: CrudService<Profile>,
}

impl ProfileService {
    /// Service over the generic profile CRUD
    pub fn new(crud: CrudService<Profile>) -> Self {
        Self { crud }
    }

    /// Generic create, update, delete and restore
    pub fn crud(&self) -> &CrudService<Profile> {
        &self.crud
    }

    /// The live profile for `role`
    pub async fn find_by_role(&self, role: Role) -> DataResult<Option<Profile>> {
        self.crud
            .find_one_by(FilterCondition::eq("label", role.as_str()).into())
            .await
    }

    /// Live profiles counted per value of `columns`
    pub async fn group_by(&self, columns: &[&str], filter: Filter) -> DataResult<Vec<GroupCount>> {
        self.crud.group_by(columns, filter).await
    }
}
