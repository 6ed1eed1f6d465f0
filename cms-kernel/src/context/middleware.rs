//! Axum middleware installing a [`RequestContext`] per request

use std::str::FromStr;

use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};

use super::{active_transaction, mutate, scope, AuthUser, RequestContext};
use crate::ids::RequestId;
use crate::pagination::PageParams;

/// Header carrying the request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header enabling extended audit for a single request
pub const EXTENDED_AUDIT_HEADER: &str = "x-extended-audit";

/// Middleware state for building request contexts
///
/// Authentication must run before it so the [`AuthUser`] extension is
/// present, and it should wrap the transaction boundary so the boundary
/// binds to this context. Layered inside a boundary instead, it carries the
/// boundary's transaction over and logs a warning.
///
/// The context is built from:
///
/// 1. `x-request-id` when it holds a valid `req_` id, otherwise a new id
/// 2. `page`, `page_size`, `search` and `deleted` from the query string
///    (malformed values fall back to defaults)
/// 3. the [`AuthUser`] request extension
/// 4. the configured extended-audit flag, or `x-extended-audit: true`
///
/// # Example
///
/// ```rust,ignore
/// use cms_kernel::context::ContextLayer;
///
/// let app = Router::new()
///     .route("/articles", get(list_articles))
///     .layer(axum::middleware::from_fn_with_state(
///         ContextLayer::new(config.audit.extended),
///         ContextLayer::middleware,
///     ));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextLayer {
    extended_audit: bool,
}

impl ContextLayer {
    /// Create the middleware state
    pub fn new(extended_audit: bool) -> Self {
        Self { extended_audit }
    }

    /// Middleware function for axum
    ///
    /// Use with `axum::middleware::from_fn_with_state`.
    pub async fn middleware(State(layer): State<Self>, request: Request, next: Next) -> Response {
        let mut context = layer.build_context(&request);
        let request_id = context.request_id.clone();

        // Installed inside a transaction boundary: keep writes in its
        // transaction and hand saved files back for its rollback
        let inherited = active_transaction();
        let carried = inherited.is_some();
        if carried {
            tracing::warn!(
                request_id = %request_id,
                "Request context installed inside a transaction boundary, carrying its transaction"
            );
            context.transaction = inherited;
        }

        let (mut response, saved_files) = scope(context, async move {
            let response = next.run(request).await;
            let saved_files = if carried {
                mutate(|ctx| std::mem::take(&mut ctx.saved_files)).unwrap_or_default()
            } else {
                Vec::new()
            };
            (response, saved_files)
        })
        .await;

        if !saved_files.is_empty() {
            let _ = mutate(|ctx| ctx.saved_files.extend(saved_files));
        }

        if let Ok(value) = http::HeaderValue::from_str(request_id.as_str()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }

    fn build_context(&self, request: &Request) -> RequestContext {
        let headers = request.headers();

        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| RequestId::from_str(v).ok())
            .unwrap_or_default();

        let pagination = match Query::<PageParams>::try_from_uri(request.uri()) {
            Ok(Query(params)) => params,
            Err(rejection) => {
                tracing::debug!(%rejection, "Ignoring malformed paging parameters");
                PageParams::default()
            }
        };

        let extended_audit = self.extended_audit
            || headers
                .get(EXTENDED_AUDIT_HEADER)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");

        let mut context = RequestContext::new()
            .with_request_id(request_id)
            .with_pagination(pagination)
            .with_extended_audit(extended_audit);
        context.user = request.extensions().get::<AuthUser>().cloned();
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{current, Role};
    use crate::ids::MakeTypedRequestId;
    use crate::pagination::SoftDeleteScope;
    use axum::{body::Body, routing::get, Json, Router};
    use tower::ServiceExt;
    use tower_http::request_id::SetRequestIdLayer;

    async fn echo() -> Json<serde_json::Value> {
        let ctx = current().unwrap();
        Json(serde_json::json!({
            "request_id": ctx.request_id.to_string(),
            "page": ctx.pagination.page,
            "page_size": ctx.pagination.page_size,
            "deleted": ctx.pagination.deleted,
            "user": ctx.actor_id(),
            "audit": ctx.extended_audit,
        }))
    }

    fn app(extended_audit: bool) -> Router {
        Router::new().route("/", get(echo)).layer(
            axum::middleware::from_fn_with_state(
                ContextLayer::new(extended_audit),
                ContextLayer::middleware,
            ),
        )
    }

    async fn call(router: Router, request: http::Request<Body>) -> (Response, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap();
        (Response::from_parts(parts, Body::empty()), json)
    }

    #[tokio::test]
    async fn test_context_built_from_request() {
        let mut request = http::Request::builder()
            .uri("/?page=2&page_size=5&deleted=only")
            .header(EXTENDED_AUDIT_HEADER, "true")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(AuthUser::new("usr_1", Role::Admin));

        let (response, body) = call(app(false), request).await;
        assert_eq!(body["page"], 2);
        assert_eq!(body["page_size"], 5);
        assert_eq!(
            body["deleted"],
            serde_json::to_value(SoftDeleteScope::Only).unwrap()
        );
        assert_eq!(body["user"], "usr_1");
        assert_eq!(body["audit"], true);

        let header = response.headers().get(REQUEST_ID_HEADER).unwrap();
        assert_eq!(header.to_str().unwrap(), body["request_id"].as_str().unwrap());
    }

    #[tokio::test]
    async fn test_incoming_request_id_is_kept() {
        let router = app(true).layer(SetRequestIdLayer::x_request_id(MakeTypedRequestId));
        let request = http::Request::builder().uri("/").body(Body::empty()).unwrap();
        let (response, body) = call(router, request).await;

        let id = body["request_id"].as_str().unwrap();
        assert!(id.starts_with("req_"));
        assert_eq!(response.headers()[REQUEST_ID_HEADER], id);
        assert_eq!(body["audit"], true);
        assert!(body["user"].is_null());
    }

    #[tokio::test]
    async fn test_malformed_query_uses_defaults() {
        let request = http::Request::builder()
            .uri("/?page=abc")
            .header(REQUEST_ID_HEADER, "not-a-typeid")
            .body(Body::empty())
            .unwrap();
        let (_, body) = call(app(false), request).await;
        assert!(body["page"].is_null());
        assert!(body["request_id"].as_str().unwrap().starts_with("req_"));
        assert_eq!(body["audit"], false);
    }
}
