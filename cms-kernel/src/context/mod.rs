//! Request-scoped context store
//!
//! Each request gets one [`RequestContext`], installed with [`scope`] for the
//! lifetime of the request future. Code anywhere on that future's call chain
//! reads it with [`current`] and changes it with [`mutate`]; nothing is
//! passed explicitly.
//!
//! The store is a tokio task-local, so the context follows the request's
//! future across every `.await` and never the worker thread. Two requests
//! interleaving on the same worker each see only their own context. A task
//! spawned from a request does not inherit the context unless wrapped with
//! [`propagate`].
//!
//! ```rust
//! use cms_kernel::context::{self, RequestContext};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ctx = RequestContext::new();
//! let id = ctx.request_id.clone();
//!
//! context::scope(ctx, async move {
//!     context::mutate(|ctx| ctx.extended_audit = true).unwrap();
//!     tokio::task::yield_now().await;
//!
//!     let ctx = context::current().unwrap();
//!     assert_eq!(ctx.request_id, id);
//!     assert!(ctx.extended_audit);
//! })
//! .await;
//!
//! assert!(context::current().is_err());
//! # }
//! ```

mod middleware;

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::client::TransactionSlot;
use crate::ids::RequestId;
use crate::pagination::PageParams;

pub use middleware::{ContextLayer, EXTENDED_AUDIT_HEADER, REQUEST_ID_HEADER};

tokio::task_local! {
    static CONTEXT: Arc<Mutex<RequestContext>>;
}

/// No request context is active on this call chain
///
/// Raised by code that needs a request (actor id, ambient transaction) when
/// it runs from a background job or during bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("No request context is active")]
pub struct ContextUnavailable;

/// Role of an authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Regular account
    Client,
    /// Back-office user
    Admin,
    /// Most privileged role; the only one allowed to hard delete
    SuperAdmin,
}

impl Role {
    /// Label stored in the `profiles` table
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "CLIENT",
            Self::Admin => "ADMIN",
            Self::SuperAdmin => "SUPER_ADMIN",
        }
    }
}

/// Identity placed in request extensions by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    /// User id, stamped into audit columns
    pub id: String,
    /// Caller role
    pub role: Role,
}

impl AuthUser {
    /// Create an identity
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// Per-request state
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request id, also logged with every transaction
    pub request_id: RequestId,
    /// Paging parameters parsed from the query string
    pub pagination: PageParams,
    /// Authenticated caller, if any
    pub user: Option<AuthUser>,
    /// Emit audit events for every mutation of this request
    pub extended_audit: bool,
    /// Files written during the request, removed if it rolls back
    pub saved_files: Vec<PathBuf>,
    transaction: Option<Arc<TransactionSlot>>,
}

impl RequestContext {
    /// Fresh context with a new request id
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request id
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Set the authenticated caller
    #[must_use]
    pub fn with_user(mut self, user: AuthUser) -> Self {
        self.user = Some(user);
        self
    }

    /// Set the paging parameters
    #[must_use]
    pub fn with_pagination(mut self, pagination: PageParams) -> Self {
        self.pagination = pagination;
        self
    }

    /// Enable or disable extended audit
    #[must_use]
    pub fn with_extended_audit(mut self, enabled: bool) -> Self {
        self.extended_audit = enabled;
        self
    }

    /// Id of the authenticated caller
    pub fn actor_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    /// Whether a transaction is bound to this request
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}

fn with_cell<R>(f: impl FnOnce(&Arc<Mutex<RequestContext>>) -> R) -> Result<R, ContextUnavailable> {
    CONTEXT.try_with(f).map_err(|_| ContextUnavailable)
}

/// Run `fut` with `initial` installed as the current context
pub async fn scope<F: Future>(initial: RequestContext, fut: F) -> F::Output {
    CONTEXT.scope(Arc::new(Mutex::new(initial)), fut).await
}

/// Snapshot of the current context
pub fn current() -> Result<RequestContext, ContextUnavailable> {
    with_cell(|cell| cell.lock().unwrap_or_else(PoisonError::into_inner).clone())
}

/// Snapshot of the current context, or `None` outside a request
pub fn try_current() -> Option<RequestContext> {
    current().ok()
}

/// Whether a context is installed on this call chain
pub fn is_active() -> bool {
    CONTEXT.try_with(|_| ()).is_ok()
}

/// Change the current context in place
///
/// The change is visible to every later read on the same call chain,
/// including after suspension points.
pub fn mutate<R>(f: impl FnOnce(&mut RequestContext) -> R) -> Result<R, ContextUnavailable> {
    with_cell(|cell| f(&mut cell.lock().unwrap_or_else(PoisonError::into_inner)))
}

/// Carry the current context into `fut`, typically before `tokio::spawn`
///
/// The wrapped future shares the same context as the caller. Outside a
/// request `fut` runs without one.
pub fn propagate<F: Future>(fut: F) -> impl Future<Output = F::Output> {
    let shared = CONTEXT.try_with(Arc::clone).ok();
    async move {
        match shared {
            Some(cell) => CONTEXT.scope(cell, fut).await,
            None => fut.await,
        }
    }
}

/// Remember a file written during this request
pub fn record_saved_file(path: impl Into<PathBuf>) -> Result<(), ContextUnavailable> {
    let path = path.into();
    mutate(|ctx| ctx.saved_files.push(path))
}

/// Id of the authenticated caller, `None` outside a request or when anonymous
pub fn actor_id() -> Option<String> {
    try_current().and_then(|ctx| ctx.user.map(|u| u.id))
}

/// Paging parameters of the current request, defaults outside a request
pub fn page_params() -> PageParams {
    try_current()
        .map(|ctx| ctx.pagination)
        .unwrap_or_default()
}

pub(crate) fn active_transaction() -> Option<Arc<TransactionSlot>> {
    with_cell(|cell| {
        cell.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .transaction
            .clone()
    })
    .ok()
    .flatten()
}

/// Bind or clear the request transaction
pub(crate) fn bind_transaction(
    slot: Option<Arc<TransactionSlot>>,
) -> Result<(), ContextUnavailable> {
    mutate(|ctx| ctx.transaction = slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_current_outside_scope_fails() {
        assert_eq!(current().unwrap_err(), ContextUnavailable);
        assert!(mutate(|ctx| ctx.extended_audit = true).is_err());
        assert!(!is_active());
        assert!(actor_id().is_none());
    }

    #[tokio::test]
    async fn test_mutation_survives_await() {
        scope(RequestContext::new(), async {
            mutate(|ctx| ctx.user = Some(AuthUser::new("usr_1", Role::Admin))).unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert_eq!(actor_id().as_deref(), Some("usr_1"));
            record_saved_file("/tmp/upload.png").unwrap();
            tokio::task::yield_now().await;
            assert_eq!(current().unwrap().saved_files.len(), 1);
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_requests_are_isolated() {
        async fn request(user: &'static str, delays: [u64; 3]) -> Vec<String> {
            let ctx = RequestContext::new().with_user(AuthUser::new(user, Role::Client));
            scope(ctx, async move {
                let mut seen = Vec::new();
                for delay in delays {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    seen.push(current().unwrap().user.unwrap().id);
                    mutate(|ctx| ctx.pagination.page = Some(delay)).unwrap();
                }
                seen
            })
            .await
        }

        let (a, b) = tokio::join!(
            tokio::spawn(request("usr_a", [5, 1, 3])),
            tokio::spawn(request("usr_b", [1, 4, 2])),
        );
        assert!(a.unwrap().iter().all(|id| id == "usr_a"));
        assert!(b.unwrap().iter().all(|id| id == "usr_b"));
    }

    #[tokio::test]
    async fn test_interleaved_on_one_task() {
        let first = scope(
            RequestContext::new().with_extended_audit(true),
            async {
                tokio::task::yield_now().await;
                current().unwrap().extended_audit
            },
        );
        let second = scope(RequestContext::new(), async {
            tokio::task::yield_now().await;
            current().unwrap().extended_audit
        });
        let (first, second) = tokio::join!(first, second);
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn test_spawned_task_needs_propagate() {
        scope(RequestContext::new().with_extended_audit(true), async {
            let plain = tokio::spawn(async { is_active() }).await.unwrap();
            assert!(!plain);

            let carried = tokio::spawn(propagate(async {
                mutate(|ctx| ctx.saved_files.push("/tmp/a".into())).unwrap();
                current().unwrap().extended_audit
            }))
            .await
            .unwrap();
            assert!(carried);
            // the spawned task shares the caller's context
            assert_eq!(current().unwrap().saved_files.len(), 1);
        })
        .await;
    }

    #[tokio::test]
    async fn test_nested_scope_shadows_outer() {
        scope(RequestContext::new().with_extended_audit(true), async {
            scope(RequestContext::new(), async {
                assert!(!current().unwrap().extended_audit);
            })
            .await;
            assert!(current().unwrap().extended_audit);
        })
        .await;
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(
            serde_json::to_string(&Role::SuperAdmin).unwrap(),
            "\"SUPER_ADMIN\""
        );
        assert_eq!(Role::SuperAdmin.as_str(), "SUPER_ADMIN");
        assert_eq!(Role::Client.as_str(), "CLIENT");
    }

    #[tokio::test]
    async fn test_page_params_fall_back_to_defaults() {
        assert_eq!(page_params(), PageParams::default());
        let ctx = RequestContext::new().with_pagination(PageParams::new().with_page(4));
        let page = scope(ctx, async { page_params().page_number() }).await;
        assert_eq!(page, 4);
    }
}
