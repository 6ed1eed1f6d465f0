//! Application state management

use std::sync::Arc;

use crate::{
    boundary::TransactionBoundary,
    client::{DataClient, TransactionOptions},
    config::Config,
    context::ContextLayer,
    crud::CrudService,
    error::Result,
    pagination::Paginator,
    resources::{
        ArticleService, CategoryService, ProfileService, StatusService, UserService,
        USER_ARTICLES,
    },
    storage::{MemoryDriver, StorageDriver},
};

/// Application state shared across handlers
///
/// Cloning is cheap: every service shares the same driver and client.
#[derive(Debug, Clone)]
pub struct AppState {
    config: Arc<Config>,
    client: DataClient,
    paginator: Paginator,
    categories: CategoryService,
    statuses: StatusService,
    profiles: ProfileService,
    users: UserService,
    articles: ArticleService,
}

impl AppState {
    /// Create a new builder for AppState
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Transactional data client
    pub fn client(&self) -> &DataClient {
        &self.client
    }

    /// Paginator with the configured limits
    pub fn paginator(&self) -> &Paginator {
        &self.paginator
    }

    pub fn categories(&self) -> &CategoryService {
        &self.categories
    }

    pub fn statuses(&self) -> &StatusService {
        &self.statuses
    }

    pub fn profiles(&self) -> &ProfileService {
        &self.profiles
    }

    pub fn users(&self) -> &UserService {
        &self.users
    }

    pub fn articles(&self) -> &ArticleService {
        &self.articles
    }

    /// Transaction boundary for write routes, using the configured limits
    pub fn boundary(&self) -> TransactionBoundary {
        TransactionBoundary::new(self.client.clone())
    }

    /// Request context middleware state, using the configured audit flag
    pub fn context_layer(&self) -> ContextLayer {
        ContextLayer::new(self.config.audit.extended)
    }
}

/// Builder for AppState
///
/// ```rust
/// use cms_kernel::state::AppState;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> cms_kernel::error::Result<()> {
/// // no database configured: the in-memory driver is used
/// let state = AppState::builder().without_tracing().build().await?;
/// assert_eq!(state.client().driver_name(), "memory");
/// # Ok(())
/// # }
/// ```
pub struct AppStateBuilder {
    config: Option<Config>,
    driver: Option<Arc<dyn StorageDriver>>,
    enable_tracing: bool,
}

impl AppStateBuilder {
    /// Create a new builder with sensible defaults
    ///
    /// By default:
    /// - Config will be loaded from `Config::default()` if not provided
    /// - Tracing will be auto-initialized if not already set up
    pub fn new() -> Self {
        Self {
            config: None,
            driver: None,
            enable_tracing: true,
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this driver instead of the one the config selects
    pub fn driver(mut self, driver: Arc<dyn StorageDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Enable automatic tracing initialization (default: enabled)
    pub fn with_tracing(mut self) -> Self {
        self.enable_tracing = true;
        self
    }

    /// Disable automatic tracing initialization
    ///
    /// Use this if the application installs its own subscriber before
    /// calling `build()`.
    pub fn without_tracing(mut self) -> Self {
        self.enable_tracing = false;
        self
    }

    /// Install the JSON subscriber once per process
    fn init_tracing(config: &Config) {
        use std::sync::Once;
        static INIT: Once = Once::new();

        INIT.call_once(|| {
            if let Err(e) = crate::observability::init_tracing(config) {
                // a subscriber installed by the host application wins
                tracing::debug!("Tracing already initialized: {}", e);
            }
        });
    }

    /// Storage for `config`: PostgreSQL when a database is configured,
    /// in memory otherwise
    async fn connect(config: &Config) -> Result<Arc<dyn StorageDriver>> {
        match &config.database {
            #[cfg(feature = "postgres")]
            Some(db_config) => {
                let driver = crate::storage::PgDriver::connect(db_config).await?;
                Ok(Arc::new(driver))
            }
            #[cfg(not(feature = "postgres"))]
            Some(_) => Err(crate::error::Error::Internal(
                "a database is configured but the `postgres` feature is disabled".to_string(),
            )),
            None => {
                tracing::warn!("No database configured, using in-memory storage");
                Ok(Arc::new(memory_driver()))
            }
        }
    }

    /// Build the AppState, connecting storage as needed
    pub async fn build(self) -> Result<AppState> {
        let config = self.config.unwrap_or_default();

        if self.enable_tracing {
            Self::init_tracing(&config);
        }

        let driver = match self.driver {
            Some(driver) => driver,
            None => Self::connect(&config).await?,
        };

        let client = DataClient::new(driver)
            .with_defaults(TransactionOptions::from(&config.transaction));
        let paginator = Paginator::new(client.clone(), config.pagination.clone());
        let profiles = CrudService::new(client.clone(), paginator.clone());

        tracing::info!(
            service = %config.service.name,
            driver = client.driver_name(),
            max_wait_ms = config.transaction.max_wait_ms,
            timeout_ms = config.transaction.timeout_ms,
            "Application state ready"
        );

        Ok(AppState {
            categories: CategoryService::new(client.clone(), paginator.clone()),
            statuses: StatusService::new(CrudService::new(client.clone(), paginator.clone())),
            profiles: ProfileService::new(profiles.clone()),
            users: UserService::new(CrudService::new(client.clone(), paginator.clone()), profiles),
            articles: ArticleService::new(CrudService::new(client.clone(), paginator.clone())),
            config: Arc::new(config),
            client,
            paginator,
        })
    }
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory store carrying the unique constraints of the SQL schema
fn memory_driver() -> MemoryDriver {
    MemoryDriver::new()
        .with_unique("categories", &["name"])
        .with_unique("statuses", &["name"])
        .with_unique("profiles", &["label"])
        .with_unique("users", &["email"])
        .with_unique(USER_ARTICLES, &["article_id", "user_id"])
}
