use crate::config::Config;
use crate::error::{Error, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;

/// Application context: shared state handed to every handler and to the
/// background dispatch tasks.
///
/// Cheap to clone; the database handle is shared behind an `Arc` (the
/// connection is itself a pool) and the HTTP client reuses its internal
/// connection pool across adapters.
#[derive(Clone)]
pub struct AppContext {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<Config>,
    pub http: reqwest::Client,
}

impl AppContext {
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::new()
    }

    /// Connect to the database described in `config` and assemble a context.
    pub async fn from_config(config: Config) -> Result<Self> {
        let mut opt = ConnectOptions::new(&config.database.url);
        opt.max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .connect_timeout(Duration::from_secs(config.database.connect_timeout))
            .idle_timeout(Duration::from_secs(config.database.idle_timeout))
            .sqlx_logging(true);

        let db = Database::connect(opt)
            .await
            .map_err(|e| Error::internal(format!("Failed to connect to database: {}", e)))?;

        tracing::info!(
            max_connections = config.database.max_connections,
            "Database connected"
        );

        Ok(Self::builder().with_db(db).with_config(config).build())
    }
}

/// Builder for AppContext with fluent API
#[must_use = "builder does nothing until you call build()"]
pub struct AppContextBuilder {
    db: Option<DatabaseConnection>,
    config: Config,
    http: Option<reqwest::Client>,
}

impl AppContextBuilder {
    pub fn new() -> Self {
        Self {
            db: None,
            config: Config::default(),
            http: None,
        }
    }

    pub fn with_db(mut self, db: DatabaseConnection) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Panics if no database connection was supplied; the context is
    /// unusable without one.
    pub fn build(self) -> AppContext {
        AppContext {
            db: Arc::new(
                self.db
                    .expect("AppContextBuilder requires a database connection"),
            ),
            config: Arc::new(self.config),
            http: self.http.unwrap_or_default(),
        }
    }
}

impl Default for AppContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
