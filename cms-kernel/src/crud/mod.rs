//! Generic CRUD engine
//!
//! [`CrudService<E>`] implements create, read, update, soft delete, restore
//! and hard delete once for every [`Entity`]. The table comes from
//! `E::TABLE`, so a resource service is a type alias plus whatever queries
//! are specific to it.
//!
//! Every mutation stamps the audit columns in the same statement as the
//! change itself, and runs on the executor chosen by
//! [`DataClient::executor`](crate::client::DataClient::executor): inside the
//! request transaction when one is bound, directly otherwise.
//!
//! Reads exclude soft-deleted rows unless the caller asks for them through
//! [`SoftDeleteScope`](crate::pagination::SoftDeleteScope).

mod entity;
pub mod relation;
mod service;

pub use entity::{AuditFields, Entity};
pub use relation::Relation;
pub use service::{CrudService, QueryOptions};

/// Primary key column
pub const ID: &str = "id";
/// Creation time
pub const CREATED_AT: &str = "created_at";
/// Creating actor
pub const CREATED_BY: &str = "created_by";
/// Last update time
pub const UPDATED_AT: &str = "updated_at";
/// Last updating actor
pub const UPDATED_BY: &str = "updated_by";
/// Soft deletion time; non-null rows are hidden from default queries
pub const DELETED_AT: &str = "deleted_at";
/// Soft deleting actor
pub const DELETED_BY: &str = "deleted_by";

/// Tracing target for extended audit events
pub const AUDIT_TARGET: &str = "cms_kernel::audit";
