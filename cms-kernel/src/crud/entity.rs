//! Entity contract for the CRUD engine

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A persisted type with a table, an id prefix and the audit columns
///
/// ```rust
/// use cms_kernel::crud::{AuditFields, Entity};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Tag {
///     id: String,
///     name: String,
///     #[serde(flatten)]
///     audit: AuditFields,
/// }
///
/// impl Entity for Tag {
///     const TABLE: &'static str = "tags";
///     const ID_PREFIX: &'static str = "tag";
///     const NAME: &'static str = "tag";
///
///     fn id(&self) -> &str {
///         &self.id
///     }
///
///     fn audit(&self) -> &AuditFields {
///         &self.audit
///     }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table the entity is stored in
    const TABLE: &'static str;

    /// TypeID prefix for new ids
    const ID_PREFIX: &'static str;

    /// Singular name for logs and messages
    const NAME: &'static str;

    /// Columns matched by free-text search
    const SEARCHABLE: &'static [&'static str] = &["name", "description"];

    /// Primary key
    fn id(&self) -> &str;

    /// Audit columns
    fn audit(&self) -> &AuditFields;

    /// Whether the row is soft-deleted
    fn is_deleted(&self) -> bool {
        self.audit().deleted_at.is_some()
    }
}

/// The six audit columns every entity table carries
///
/// Embed with `#[serde(flatten)]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    /// Creation time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Creating actor
    #[serde(default)]
    pub created_by: Option<String>,
    /// Last update time
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Last updating actor
    #[serde(default)]
    pub updated_by: Option<String>,
    /// Soft deletion time
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Soft deleting actor
    #[serde(default)]
    pub deleted_by: Option<String>,
}
