//! # cms-kernel
//!
//! Transactional data-access kernel for a content-management backend.
//!
//! ## Features
//!
//! - **Request context**: a per-request store carried through every `.await`
//!   of the request, holding the caller, paging parameters and the open
//!   transaction
//! - **Ambient transactions**: CRUD calls join the request transaction when
//!   one is bound and run directly otherwise, with no handle passed around
//! - **Generic CRUD**: create, read, update, soft delete, restore and hard
//!   delete implemented once for every entity, with audit stamping
//! - **Pagination and search**: clamped page sizes, total counts, stable
//!   ordering, case-insensitive search and soft-delete scopes
//! - **Storage drivers**: PostgreSQL (sqlx) and an in-memory store
//!
//! ## Example
//!
//! ```rust,no_run
//! use axum::{middleware::from_fn_with_state, routing::post, Router};
//! use cms_kernel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let state = AppState::builder()
//!         .config(config)
//!         .without_tracing()
//!         .build()
//!         .await?;
//!
//!     let app: Router = Router::new()
//!         .route("/articles", post(|| async { "created" }))
//!         .layer(from_fn_with_state(state.boundary(), TransactionBoundary::middleware))
//!         .layer(from_fn_with_state(state.context_layer(), ContextLayer::middleware));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod boundary;
pub mod client;
pub mod config;
pub mod context;
pub mod crud;
pub mod error;
pub mod ids;
pub mod observability;
pub mod pagination;
pub mod resources;
pub mod state;
pub mod storage;

#[cfg(feature = "postgres")]
mod database;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::boundary::TransactionBoundary;
    pub use crate::client::{DataClient, TransactionHandle, TransactionOptions};
    pub use crate::config::{Config, PaginationConfig, TransactionConfig};
    pub use crate::context::{AuthUser, ContextLayer, RequestContext, Role};
    pub use crate::crud::{AuditFields, CrudService, Entity, QueryOptions, Relation};
    pub use crate::error::{DataError, DataResult, Error, Result};
    pub use crate::ids::{MakeTypedRequestId, RequestId, TransactionId};
    pub use crate::observability::{init_tracing, shutdown_tracing};
    pub use crate::pagination::{ListQuery, Page, PageParams, Paginator, SoftDeleteScope};
    pub use crate::state::{AppState, AppStateBuilder};
    pub use crate::storage::{
        Filter, FilterCondition, MemoryDriver, OrderBy, Record, StorageDriver, StorageError,
    };

    #[cfg(feature = "postgres")]
    pub use crate::storage::PgDriver;
}
