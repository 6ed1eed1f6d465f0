//! Transaction boundary for write requests
//!
//! [`TransactionBoundary`] opens one transaction per request, binds it to the
//! request context, and lets the handler run. Every CRUD call made while the
//! handler runs joins that transaction.
//!
//! | handler outcome             | transaction | returned                   |
//! |-----------------------------|-------------|----------------------------|
//! | 1xx/2xx/3xx response        | commit      | the response               |
//! | 4xx/5xx response            | rollback    | the same response          |
//! | commit fails                | -           | `COMMIT_FAILED` error      |
//! | exceeds the timeout         | rollback    | `TRANSACTION_TIMEOUT` error |
//!
//! Files recorded with [`record_saved_file`](crate::context::record_saved_file)
//! during a request that rolls back are removed.

use std::future::Future;
use std::io::ErrorKind;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::client::{DataClient, TransactionOptions};
use crate::context::{self, RequestContext};
use crate::error::{DataError, Error};

/// Opens, commits and rolls back the per-request transaction
///
/// # Example
///
/// ```rust,ignore
/// use axum::middleware::from_fn_with_state;
/// use cms_kernel::boundary::TransactionBoundary;
/// use cms_kernel::context::ContextLayer;
///
/// let writes = Router::new()
///     .route("/articles", post(create_article))
///     .layer(from_fn_with_state(
///         TransactionBoundary::new(state.client().clone()),
///         TransactionBoundary::middleware,
///     ));
///
/// let app = Router::new()
///     .merge(writes)
///     .route("/articles", get(list_articles))
///     .layer(from_fn_with_state(ContextLayer::new(false), ContextLayer::middleware));
/// ```
#[derive(Debug, Clone)]
pub struct TransactionBoundary {
    client: DataClient,
    options: TransactionOptions,
}

/// Why a request's transaction was not committed
enum Abort {
    Rejected(Response),
    Data(DataError),
}

impl From<DataError> for Abort {
    fn from(error: DataError) -> Self {
        Self::Data(error)
    }
}

impl TransactionBoundary {
    /// Boundary using the client's default limits
    pub fn new(client: DataClient) -> Self {
        let options = client.defaults();
        Self { client, options }
    }

    /// Override the transaction limits
    #[must_use]
    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    /// Run `fut` inside a transaction: commit on `Ok`, roll back on `Err`
    ///
    /// The error of `fut` is returned unchanged. Outside a request a fresh
    /// context is installed for the duration of the call.
    pub async fn run<T, E, F>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<DataError>,
    {
        if context::is_active() {
            self.run_bound(fut).await
        } else {
            context::scope(RequestContext::new(), self.run_bound(fut)).await
        }
    }

    async fn run_bound<T, E, F>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<DataError>,
    {
        let owner = !self.client.in_transaction();
        let result = self
            .client
            .run_in_transaction(self.options, |_tx| fut)
            .await;
        if owner && result.is_err() {
            remove_saved_files().await;
        }
        result
    }

    /// Middleware function for axum
    ///
    /// Use with `axum::middleware::from_fn_with_state`, inside
    /// [`ContextLayer`](crate::context::ContextLayer).
    pub async fn middleware(State(boundary): State<Self>, request: Request, next: Next) -> Response {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let outcome = boundary
            .run(async move {
                let response = next.run(request).await;
                let status = response.status();
                if status.is_client_error() || status.is_server_error() {
                    Err(Abort::Rejected(response))
                } else {
                    Ok(response)
                }
            })
            .await;

        match outcome {
            Ok(response) => response,
            Err(Abort::Rejected(response)) => {
                tracing::debug!(
                    %method,
                    path,
                    status = response.status().as_u16(),
                    "Request rolled back"
                );
                response
            }
            Err(Abort::Data(error)) => Error::from(error).into_response(),
        }
    }
}

/// Delete the files this request wrote; the list is cleared either way
async fn remove_saved_files() {
    let files = context::mutate(|ctx| std::mem::take(&mut ctx.saved_files)).unwrap_or_default();
    for path in files {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed file after rollback"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(error) => tracing::warn!(
                path = %path.display(),
                %error,
                "Failed to remove file after rollback"
            ),
        }
    }
}
